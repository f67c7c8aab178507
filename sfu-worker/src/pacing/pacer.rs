//! The pacer: drains media from the packet router at the pacing rate,
//! injects probe padding and honors the congestion window.

use std::rc::Rc;
use std::time::{Duration, Instant};

use shared::marshal::MarshalSize;

use crate::pacing::interval_budget::IntervalBudget;
use crate::pacing::prober::BitrateProber;

/// Sentinel cluster id carried by non-probe packets.
pub const NO_PROBE_CLUSTER_ID: i32 = -1;

/// How often `process` wants to run when nothing else forces a wakeup.
const MIN_PACKET_LIMIT: Duration = Duration::from_millis(5);
/// Longest elapsed time credited to the budgets in one tick.
const MAX_ELAPSED_TIME: Duration = Duration::from_millis(2000);

/// Probe bookkeeping attached to each sent packet.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PacingInfo {
    pub probe_cluster_id: i32,
    pub probe_cluster_min_probes: u32,
    pub probe_cluster_min_bytes: u32,
}

impl PacingInfo {
    pub fn not_probing() -> Self {
        Self {
            probe_cluster_id: NO_PROBE_CLUSTER_ID,
            probe_cluster_min_probes: 0,
            probe_cluster_min_bytes: 0,
        }
    }

    pub fn is_probe(&self) -> bool {
        self.probe_cluster_id != NO_PROBE_CLUSTER_ID
    }
}

/// A packet leaving through the pacer.
pub struct PacedPacket {
    pub packet: Rc<rtp::Packet>,
    pub is_audio: bool,
    pub info: PacingInfo,
}

/// The upstream queue the pacer drains. Playing the role of the packet
/// router: it owns the per-consumer queues and can synthesize padding.
pub trait PacketRouter {
    /// The next media packet to send, if any is queued.
    fn next_packet(&mut self, info: &PacingInfo) -> Option<(Rc<rtp::Packet>, bool)>;

    /// Produce padding packets totalling roughly `target_bytes`.
    fn generate_padding(&mut self, target_bytes: usize) -> Vec<Rc<rtp::Packet>>;
}

pub struct Pacer {
    paused: bool,
    media_budget: IntervalBudget,
    padding_budget: IntervalBudget,
    prober: BitrateProber,

    congestion_window_bytes: Option<usize>,
    outstanding_bytes: usize,

    account_for_audio: bool,
    last_process: Option<Instant>,
    packet_counter: u64,
}

impl Default for Pacer {
    fn default() -> Self {
        Self::new()
    }
}

impl Pacer {
    pub fn new() -> Self {
        Self {
            paused: false,
            media_budget: IntervalBudget::new(0, false),
            padding_budget: IntervalBudget::new(0, false),
            prober: BitrateProber::new(),
            congestion_window_bytes: None,
            outstanding_bytes: 0,
            account_for_audio: false,
            last_process: None,
            packet_counter: 0,
        }
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    pub fn set_account_for_audio(&mut self, account: bool) {
        self.account_for_audio = account;
    }

    /// Sets the media and padding target rates, in bits per second.
    pub fn set_pacing_rates(&mut self, pacing_rate_bps: u32, padding_rate_bps: u32) {
        self.media_budget.set_target_rate_kbps(pacing_rate_bps / 1000);
        self.padding_budget
            .set_target_rate_kbps(padding_rate_bps / 1000);
    }

    pub fn set_congestion_window(&mut self, bytes: Option<usize>) {
        self.congestion_window_bytes = bytes;
    }

    pub fn update_outstanding_data(&mut self, outstanding_bytes: usize) {
        self.outstanding_bytes = outstanding_bytes;
    }

    pub fn congested(&self) -> bool {
        match self.congestion_window_bytes {
            Some(window) => self.outstanding_bytes > window,
            None => false,
        }
    }

    pub fn set_probing_enabled(&mut self, enabled: bool) {
        self.prober.set_enabled(enabled);
    }

    pub fn create_probe_cluster(&mut self, bitrate_bps: u32, now: Instant) -> Option<i32> {
        self.prober.create_probe_cluster(bitrate_bps, now)
    }

    pub fn packet_counter(&self) -> u64 {
        self.packet_counter
    }

    /// Suggested delay before the next `process` call.
    pub fn time_until_next_process(&mut self, now: Instant) -> Duration {
        if let Some(wait) = self.prober.time_until_next_probe(now) {
            return wait;
        }
        match self.last_process {
            Some(last) => MIN_PACKET_LIMIT.saturating_sub(now.duration_since(last)),
            None => Duration::ZERO,
        }
    }

    /// One pacer tick: refills the budgets and dequeues whatever fits.
    pub fn process(&mut self, now: Instant, router: &mut dyn PacketRouter) -> Vec<PacedPacket> {
        let elapsed = match self.last_process {
            Some(last) => now.saturating_duration_since(last).min(MAX_ELAPSED_TIME),
            None => Duration::ZERO,
        };
        self.last_process = Some(now);

        let elapsed_ms = elapsed.as_millis() as i64;
        if elapsed_ms > 0 {
            self.media_budget.increase_budget(elapsed_ms);
            self.padding_budget.increase_budget(elapsed_ms);
        }

        let mut sent = vec![];
        if self.paused {
            return sent;
        }

        let recommended_probe_size = self.prober.recommended_probe_size(now);
        let info = match self.prober.current_cluster(now) {
            Some(cluster) => PacingInfo {
                probe_cluster_id: cluster.id,
                probe_cluster_min_probes: cluster.min_probes,
                probe_cluster_min_bytes: cluster.min_bytes,
            },
            None => PacingInfo::not_probing(),
        };
        let probing = info.is_probe();

        let mut probe_bytes_sent = 0usize;
        loop {
            if self.congested() {
                break;
            }
            if !probing && self.media_budget.bytes_remaining() == 0 {
                break;
            }

            let Some((packet, is_audio)) = router.next_packet(&info) else {
                break;
            };
            let size = packet.marshal_size();

            if !is_audio || self.account_for_audio {
                self.media_budget.use_budget(size);
            }
            self.on_packet_sent(now, size, probing);
            if probing {
                probe_bytes_sent += size;
            }

            sent.push(PacedPacket {
                packet,
                is_audio,
                info,
            });

            if probing && probe_bytes_sent >= recommended_probe_size {
                break;
            }
        }

        // Top a short probe burst up with padding.
        if probing && probe_bytes_sent < recommended_probe_size && !self.congested() {
            for packet in router.generate_padding(recommended_probe_size - probe_bytes_sent) {
                let size = packet.marshal_size();
                self.padding_budget.use_budget(size);
                self.on_packet_sent(now, size, true);
                sent.push(PacedPacket {
                    packet,
                    is_audio: false,
                    info,
                });
            }
        }

        sent
    }

    fn on_packet_sent(&mut self, now: Instant, size: usize, probing: bool) {
        self.packet_counter += 1;
        self.outstanding_bytes += size;
        if probing {
            self.prober.probe_sent(now, size);
        }
    }
}
