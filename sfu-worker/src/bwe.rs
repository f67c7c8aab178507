//! Send-side bandwidth estimation from transport-wide feedback and REMB.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use log::debug;

use rtcp::payload_feedbacks::receiver_estimated_maximum_bitrate::ReceiverEstimatedMaximumBitrate;
use rtcp::transport_feedbacks::transport_layer_cc::TransportLayerCc;

use crate::data_counter::RateCalculator;
use crate::seq_unwrapper::SequenceUnwrapper;

/// Sent-info history depth, in transport-wide sequence numbers.
const MAX_SENT_INFO_AGE: i64 = 2000;
/// Minimum spacing between available-bitrate notifications.
pub const AVAILABLE_BITRATE_EVENT_INTERVAL: Duration = Duration::from_secs(2);
/// An ongoing accumulation window is abandoned after this long.
const MAX_CUMULATIVE_AGE: Duration = Duration::from_millis(1000);
/// Feedback runs usable for estimation.
const MIN_PROBATION_PACKETS: usize = 2;
const MIN_REAL_PACKETS: usize = 20;
const MIN_REAL_WINDOW: Duration = Duration::from_millis(100);

/// Record of one sent packet awaiting feedback.
#[derive(Debug, Copy, Clone)]
struct SentInfo {
    size: usize,
    sent_at_us: i64,
    is_probation: bool,
}

/// Matched send/receive observations over one run of feedback.
#[derive(Debug, Default)]
struct CumulativeResult {
    num_packets: usize,
    total_size: usize,
    first_sent_us: i64,
    last_sent_us: i64,
    first_received_us: i64,
    last_received_us: i64,
}

impl CumulativeResult {
    fn add_packet(&mut self, size: usize, sent_at_us: i64, received_at_us: i64) {
        if self.num_packets == 0 {
            self.first_sent_us = sent_at_us;
            self.last_sent_us = sent_at_us;
            self.first_received_us = received_at_us;
            self.last_received_us = received_at_us;
        } else {
            self.first_sent_us = self.first_sent_us.min(sent_at_us);
            self.last_sent_us = self.last_sent_us.max(sent_at_us);
            self.first_received_us = self.first_received_us.min(received_at_us);
            self.last_received_us = self.last_received_us.max(received_at_us);
        }
        self.num_packets += 1;
        self.total_size += size;
    }

    fn send_bitrate(&self) -> u32 {
        let span_us = (self.last_sent_us - self.first_sent_us).max(1);
        (self.total_size as u64 * 8 * 1_000_000 / span_us as u64) as u32
    }

    fn receive_bitrate(&self) -> u32 {
        let span_us = (self.last_received_us - self.first_received_us).max(1);
        (self.total_size as u64 * 8 * 1_000_000 / span_us as u64) as u32
    }

    fn reset(&mut self) {
        *self = CumulativeResult::default();
    }
}

/// An available-bitrate transition worth telling the caller about.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BitrateEvent {
    pub available_bitrate: u32,
    pub previous_available_bitrate: u32,
}

/// Estimates the bitrate the path can carry by comparing the send rate of
/// acknowledged packets with the rate they were received at.
pub struct SenderBandwidthEstimator {
    initial_available_bitrate: u32,
    available_bitrate: u32,
    last_event_at: Option<Instant>,

    epoch: Option<Instant>,
    unwrapper: SequenceUnwrapper,
    sent_infos: BTreeMap<i64, SentInfo>,
    send_transmission: Option<RateCalculator>,

    cumulative: CumulativeResult,
    probation_cumulative: CumulativeResult,

    rtt: Duration,
}

impl SenderBandwidthEstimator {
    pub fn new(initial_available_bitrate: u32) -> Self {
        Self {
            initial_available_bitrate,
            available_bitrate: 0,
            last_event_at: None,
            epoch: None,
            unwrapper: SequenceUnwrapper::new(),
            sent_infos: BTreeMap::new(),
            send_transmission: None,
            cumulative: CumulativeResult::default(),
            probation_cumulative: CumulativeResult::default(),
            rtt: Duration::from_millis(100),
        }
    }

    pub fn transport_connected(&mut self, now: Instant) {
        self.available_bitrate = self.initial_available_bitrate;
        self.last_event_at = Some(now);
    }

    pub fn transport_disconnected(&mut self) {
        self.available_bitrate = 0;
        self.sent_infos.clear();
        self.cumulative.reset();
        self.probation_cumulative.reset();
    }

    pub fn available_bitrate(&self) -> u32 {
        self.available_bitrate
    }

    pub fn set_rtt(&mut self, rtt: Duration) {
        self.rtt = rtt;
    }

    pub fn rtt(&self) -> Duration {
        self.rtt
    }

    /// Current send bitrate over acknowledged-or-not traffic.
    pub fn send_bitrate(&mut self, now: Instant) -> u32 {
        self.send_transmission
            .as_mut()
            .map(|rate| rate.rate(now))
            .unwrap_or(0)
    }

    fn us_since_epoch(&mut self, now: Instant) -> i64 {
        let epoch = *self.epoch.get_or_insert(now);
        now.saturating_duration_since(epoch).as_micros() as i64
    }

    /// Records a packet leaving with a transport-wide sequence number.
    pub fn rtp_packet_sent(
        &mut self,
        now: Instant,
        wide_seq: u16,
        size: usize,
        is_probation: bool,
    ) {
        let sent_at_us = self.us_since_epoch(now);
        let unwrapped = self.unwrapper.unwrap(wide_seq);

        // Age out history the feedback can no longer reference.
        let floor = unwrapped - MAX_SENT_INFO_AGE + 1;
        while let Some((&oldest, _)) = self.sent_infos.iter().next() {
            if oldest >= floor {
                break;
            }
            self.sent_infos.remove(&oldest);
        }

        self.sent_infos.insert(
            unwrapped,
            SentInfo {
                size,
                sent_at_us,
                is_probation,
            },
        );

        self.send_transmission
            .get_or_insert_with(|| RateCalculator::new(now))
            .update(size, now);
    }

    /// Feeds a TWCC feedback packet. Returns an event when the available
    /// bitrate changed and the notification interval allows reporting it.
    pub fn receive_transport_feedback(
        &mut self,
        now: Instant,
        feedback: &TransportLayerCc,
    ) -> Option<BitrateEvent> {
        let now_us = self.us_since_epoch(now);

        // Drop a stale accumulation run. The window is anchored at the
        // oldest sent packet in the run.
        if self.cumulative.num_packets > 0
            && now_us - self.cumulative.first_sent_us > MAX_CUMULATIVE_AGE.as_micros() as i64
        {
            self.cumulative.reset();
        }

        // Resolve feedback seqs in the same number space as our history.
        let mut peek = match self.sent_infos.keys().next() {
            Some(&first) => SequenceUnwrapper::with_base(first),
            None => SequenceUnwrapper::new(),
        };

        for result in feedback.packet_results() {
            if !result.received {
                continue;
            }
            let Some(received_at_us) = result.received_at_us else {
                continue;
            };
            let unwrapped = peek.unwrap(result.sequence_number);
            let Some(info) = self.sent_infos.get(&unwrapped) else {
                debug!(
                    "feedback for unknown wide seq {}",
                    result.sequence_number
                );
                continue;
            };

            if info.is_probation {
                self.probation_cumulative
                    .add_packet(info.size, info.sent_at_us, received_at_us);
            } else {
                self.cumulative
                    .add_packet(info.size, info.sent_at_us, received_at_us);
            }
        }

        let mut event = None;

        // Probation runs are meaningful with very few packets.
        if self.probation_cumulative.num_packets >= MIN_PROBATION_PACKETS {
            event = self.estimate(now, true).or(event);
        }
        self.probation_cumulative.reset();

        let elapsed_us = now_us - self.cumulative.first_sent_us;
        if self.cumulative.num_packets >= MIN_REAL_PACKETS
            && elapsed_us >= MIN_REAL_WINDOW.as_micros() as i64
        {
            event = self.estimate(now, false).or(event);
            self.cumulative.reset();
        }

        event
    }

    fn estimate(&mut self, now: Instant, probation: bool) -> Option<BitrateEvent> {
        let result = if probation {
            &self.probation_cumulative
        } else {
            &self.cumulative
        };

        let send_bitrate = result.send_bitrate();
        let receive_bitrate = result.receive_bitrate();
        if send_bitrate == 0 {
            return None;
        }

        let previous = self.available_bitrate;
        let ratio = receive_bitrate as f64 / send_bitrate as f64;
        let bitrate = send_bitrate.min(receive_bitrate);

        if (0.75..=1.25).contains(&ratio) {
            if bitrate > self.available_bitrate {
                self.available_bitrate = bitrate;
                debug!("bwe up [ratio:{ratio:.3}, available:{}]", bitrate);
            }
        } else if bitrate < self.available_bitrate {
            self.available_bitrate = bitrate;
            debug!("bwe down [ratio:{ratio:.3}, available:{}]", bitrate);
        }

        self.emit_if_due(now, previous)
    }

    /// Applies a REMB value directly: the peer's own estimate is the hint.
    pub fn receive_remb(
        &mut self,
        now: Instant,
        remb: &ReceiverEstimatedMaximumBitrate,
    ) -> Option<BitrateEvent> {
        let previous = self.available_bitrate;
        self.available_bitrate = remb.bitrate.min(u32::MAX as u64) as u32;
        self.emit_if_due(now, previous)
    }

    fn emit_if_due(&mut self, now: Instant, previous: u32) -> Option<BitrateEvent> {
        if self.available_bitrate == previous {
            return None;
        }
        if let Some(last) = self.last_event_at {
            if now.duration_since(last) < AVAILABLE_BITRATE_EVENT_INTERVAL {
                return None;
            }
        }
        self.last_event_at = Some(now);
        Some(BitrateEvent {
            available_bitrate: self.available_bitrate,
            previous_available_bitrate: previous,
        })
    }
}
