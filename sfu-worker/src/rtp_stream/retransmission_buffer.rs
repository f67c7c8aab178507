//! Time-windowed store of sent packets, indexed by sequence number.

use std::rc::Rc;
use std::time::{Duration, Instant};

/// Longest a video packet stays eligible for retransmission.
pub const MAX_RETRANSMISSION_DELAY_VIDEO: Duration = Duration::from_millis(1000);
/// Longest an audio packet stays eligible for retransmission.
pub const MAX_RETRANSMISSION_DELAY_AUDIO: Duration = Duration::from_millis(200);

const UINT16_SIZE_HALF: u16 = 1 << 15;

pub(crate) struct Slot {
    pub seq: u16,
    pub stored_at: Instant,
    pub resent_at: Option<Instant>,
    pub packet: Rc<rtp::Packet>,
    /// RTX form built on the first retransmission and reused afterwards,
    /// so the RTX sequence number stays stable per original packet.
    pub rtx_packet: Option<Rc<rtp::Packet>>,
}

/// A fixed ring of recently sent packets keyed by `seq % capacity`,
/// bounded both by capacity and by the retransmission age limit.
///
/// Aging is enforced twice: inserts sweep out entries whose RTP timestamp
/// lags the incoming packet by more than the age limit (converted through
/// the stream clock rate), and lookups drop entries past the limit in
/// wall-clock time.
pub(crate) struct RetransmissionBuffer {
    slots: Vec<Option<Slot>>,
    capacity: u16,
    max_age: Duration,
    /// The age limit expressed in RTP timestamp ticks.
    max_age_ticks: u32,
    started: bool,
    highest_seq: u16,
}

impl RetransmissionBuffer {
    pub fn new(capacity: u16, max_age: Duration, clock_rate: u32) -> Self {
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            capacity,
            max_age,
            max_age_ticks: (max_age.as_millis() as u64 * clock_rate as u64 / 1000) as u32,
            started: false,
            highest_seq: 0,
        }
    }

    fn index(&self, seq: u16) -> usize {
        (seq % self.capacity) as usize
    }

    /// Drops entries whose RTP timestamp is more than the age limit behind
    /// `newest_ts`, walking from the oldest end of the window. Entries sit
    /// in send order, so the sweep ends at the first fresh one.
    fn evict_aged(&mut self, newest_ts: u32) {
        if self.max_age_ticks == 0 {
            return;
        }
        let mut s = self.highest_seq.wrapping_sub(self.capacity - 1);
        loop {
            let idx = self.index(s);
            if let Some(slot) = &self.slots[idx] {
                if slot.seq == s {
                    let age = newest_ts.wrapping_sub(slot.packet.header.timestamp);
                    if age < 0x8000_0000 && age > self.max_age_ticks {
                        self.slots[idx] = None;
                    } else {
                        break;
                    }
                }
            }
            if s == self.highest_seq {
                break;
            }
            s = s.wrapping_add(1);
        }
    }

    pub fn insert(&mut self, now: Instant, packet: Rc<rtp::Packet>) {
        let seq = packet.header.sequence_number;

        if !self.started {
            self.started = true;
            self.highest_seq = seq;
            let idx = self.index(seq);
            self.slots[idx] = Some(Slot {
                seq,
                stored_at: now,
                resent_at: None,
                packet,
                rtx_packet: None,
            });
            return;
        }

        let diff = seq.wrapping_sub(self.highest_seq);
        if diff == 0 {
            // Duplicate send, keep the original entry.
            return;
        }

        if diff < UINT16_SIZE_HALF {
            if diff >= self.capacity {
                // The jump displaces the whole ring.
                self.slots.iter_mut().for_each(|s| *s = None);
            } else {
                // Invalidate the slots the gap passes over.
                let mut s = self.highest_seq.wrapping_add(1);
                while s != seq {
                    let idx = self.index(s);
                    self.slots[idx] = None;
                    s = s.wrapping_add(1);
                }
            }
            self.highest_seq = seq;
        } else {
            // Out-of-order send: stale if it no longer fits the window.
            if self.highest_seq.wrapping_sub(seq) >= self.capacity {
                return;
            }
        }

        let timestamp = packet.header.timestamp;
        let idx = self.index(seq);
        self.slots[idx] = Some(Slot {
            seq,
            stored_at: now,
            resent_at: None,
            packet,
            rtx_packet: None,
        });

        self.evict_aged(timestamp);
    }

    /// Fetches a live entry; an entry past the age limit is evicted on the
    /// spot and reported as absent.
    pub fn get_mut(&mut self, now: Instant, seq: u16) -> Option<&mut Slot> {
        if !self.started {
            return None;
        }
        let diff = self.highest_seq.wrapping_sub(seq);
        if diff >= UINT16_SIZE_HALF || diff >= self.capacity {
            return None;
        }

        let idx = self.index(seq);
        let max_age = self.max_age;
        let expired = match &self.slots[idx] {
            Some(slot) => {
                slot.seq != seq || now.duration_since(slot.stored_at) > max_age
            }
            None => return None,
        };
        if expired {
            self.slots[idx] = None;
            return None;
        }
        self.slots[idx].as_mut()
    }

    /// Empties the buffer entirely, forgetting the sequence window.
    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|s| *s = None);
        self.started = false;
        self.highest_seq = 0;
    }

    #[cfg(test)]
    fn occupied(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }
}
