//! NACK generation for a received stream.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use log::debug;

use rtcp::transport_feedbacks::transport_layer_nack::{
    nack_pairs_from_sequence_numbers, NackPair,
};

use crate::seq_unwrapper::SequenceUnwrapper;

/// Packets older than this many sequence numbers are given up on.
pub const MAX_PACKET_AGE: i64 = 10_000;
/// Pending-list hard cap; exceeding it means the stream is beyond repair.
pub const MAX_NACK_PACKETS: usize = 1000;
/// Retry budget per missing packet.
pub const MAX_NACK_RETRIES: u16 = 8;
/// How often the owner is expected to call [`NackGenerator::on_timer`].
pub const TIMER_INTERVAL: Duration = Duration::from_millis(40);
/// RTT assumed until a measurement arrives.
pub const DEFAULT_RTT: Duration = Duration::from_millis(100);

#[derive(Debug)]
struct NackInfo {
    retries: u16,
    sent_at: Option<Instant>,
    #[allow(dead_code)]
    created_at: Instant,
}

/// Outcome of feeding one packet into the generator.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum NackOutcome {
    Tracked,
    /// The loss run is unrecoverable; the caller should request a key frame.
    KeyFrameRequired,
}

/// Watches the received sequence number flow, remembers the holes and emits
/// NACK items for them on a timer until they are recovered, retried out or
/// aged out.
pub struct NackGenerator {
    rtt: Duration,
    unwrapper: SequenceUnwrapper,
    last_seq: Option<i64>,
    nack_list: BTreeMap<i64, NackInfo>,
}

impl Default for NackGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl NackGenerator {
    pub fn new() -> Self {
        Self {
            rtt: DEFAULT_RTT,
            unwrapper: SequenceUnwrapper::new(),
            last_seq: None,
            nack_list: BTreeMap::new(),
        }
    }

    pub fn set_rtt(&mut self, rtt: Duration) {
        self.rtt = if rtt.is_zero() { DEFAULT_RTT } else { rtt };
    }

    pub fn pending(&self) -> usize {
        self.nack_list.len()
    }

    /// Feeds an accepted packet. Returns whether the loss state escalated
    /// to a key frame request.
    pub fn receive_packet(&mut self, now: Instant, seq: u16) -> NackOutcome {
        let unwrapped = self.unwrapper.unwrap(seq);

        let Some(last) = self.last_seq else {
            self.last_seq = Some(unwrapped);
            return NackOutcome::Tracked;
        };

        if unwrapped <= last {
            // Out of order or duplicate: a hole may have been filled.
            self.nack_list.remove(&unwrapped);
            return NackOutcome::Tracked;
        }

        for missing in last + 1..unwrapped {
            self.nack_list.insert(
                missing,
                NackInfo {
                    retries: 0,
                    sent_at: None,
                    created_at: now,
                },
            );
        }
        self.last_seq = Some(unwrapped);

        // Drop entries that fell out of the repairable window.
        let floor = unwrapped - MAX_PACKET_AGE;
        let too_old: Vec<i64> = self
            .nack_list
            .range(..floor)
            .map(|(&k, _)| k)
            .collect();
        let aged_out = !too_old.is_empty();
        for key in too_old {
            self.nack_list.remove(&key);
        }

        if self.nack_list.len() > MAX_NACK_PACKETS || aged_out {
            debug!(
                "nack list unrecoverable (pending: {}), requesting key frame",
                self.nack_list.len()
            );
            self.nack_list.clear();
            return NackOutcome::KeyFrameRequired;
        }

        NackOutcome::Tracked
    }

    /// Emits NACK pairs for the entries that are due. Expected to be driven
    /// every [`TIMER_INTERVAL`].
    pub fn on_timer(&mut self, now: Instant) -> Vec<NackPair> {
        let mut seqs: Vec<u16> = vec![];
        let mut exhausted: Vec<i64> = vec![];

        for (&key, info) in self.nack_list.iter_mut() {
            let due = match info.sent_at {
                None => true,
                Some(sent_at) => now.duration_since(sent_at) >= self.rtt,
            };
            if !due {
                continue;
            }

            seqs.push((key & 0xFFFF) as u16);
            info.retries += 1;
            info.sent_at = Some(now);
            if info.retries >= MAX_NACK_RETRIES {
                exhausted.push(key);
            }
        }

        for key in exhausted {
            self.nack_list.remove(&key);
        }

        if seqs.is_empty() {
            return vec![];
        }
        nack_pairs_from_sequence_numbers(&seqs)
    }
}
