//! Bitrate probing: short bursts sent above the current rate to test for
//! spare capacity.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// A cluster must deliver at least this many probe packets.
pub const MIN_PROBE_PACKETS_SENT: u32 = 5;
/// A cluster must span at least this long a burst.
const MIN_PROBE_DURATION: Duration = Duration::from_millis(15);
/// Spacing between consecutive probe packets.
const MIN_PROBE_DELTA: Duration = Duration::from_millis(1);
/// A cluster that could not start within this limit is abandoned.
const MAX_CLUSTER_AGE: Duration = Duration::from_secs(1);
/// Smallest useful probe payload.
const MIN_PROBE_SIZE: usize = 200;

/// One probing burst toward a target bitrate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeCluster {
    pub id: i32,
    pub target_bitrate_bps: u32,
    pub min_probes: u32,
    pub min_bytes: u32,
    sent_probes: u32,
    sent_bytes: u32,
    created_at: Instant,
    started_at: Option<Instant>,
}

impl ProbeCluster {
    fn new(id: i32, target_bitrate_bps: u32, now: Instant) -> Self {
        // Enough bytes to sustain the target bitrate over the minimum
        // probe duration.
        let min_bytes =
            (target_bitrate_bps as u64 * MIN_PROBE_DURATION.as_millis() as u64 / 8000) as u32;
        Self {
            id,
            target_bitrate_bps,
            min_probes: MIN_PROBE_PACKETS_SENT,
            min_bytes,
            sent_probes: 0,
            sent_bytes: 0,
            created_at: now,
            started_at: None,
        }
    }

    pub fn sent_probes(&self) -> u32 {
        self.sent_probes
    }

    pub fn sent_bytes(&self) -> u32 {
        self.sent_bytes
    }

    fn done(&self) -> bool {
        self.sent_probes >= self.min_probes && self.sent_bytes >= self.min_bytes
    }
}

/// Schedules probe clusters and meters probe packets out of the pacer.
pub struct BitrateProber {
    enabled: bool,
    clusters: VecDeque<ProbeCluster>,
    next_probe_at: Option<Instant>,
    next_cluster_id: i32,
}

impl Default for BitrateProber {
    fn default() -> Self {
        Self::new()
    }
}

impl BitrateProber {
    pub fn new() -> Self {
        Self {
            enabled: true,
            clusters: VecDeque::new(),
            next_probe_at: None,
            next_cluster_id: 0,
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if !enabled {
            self.clusters.clear();
        }
    }

    pub fn is_probing(&self) -> bool {
        self.enabled && !self.clusters.is_empty()
    }

    /// Queues a probing burst at `target_bitrate_bps`. Returns the cluster
    /// id, or `None` while probing is disabled.
    pub fn create_probe_cluster(
        &mut self,
        target_bitrate_bps: u32,
        now: Instant,
    ) -> Option<i32> {
        if !self.enabled || target_bitrate_bps == 0 {
            return None;
        }

        let id = self.next_cluster_id;
        self.next_cluster_id += 1;
        self.clusters
            .push_back(ProbeCluster::new(id, target_bitrate_bps, now));
        Some(id)
    }

    pub fn current_cluster(&mut self, now: Instant) -> Option<&ProbeCluster> {
        while let Some(cluster) = self.clusters.front() {
            if cluster.started_at.is_none()
                && now.duration_since(cluster.created_at) > MAX_CLUSTER_AGE
            {
                self.clusters.pop_front();
                continue;
            }
            break;
        }
        self.clusters.front()
    }

    /// Size of the next probe while a cluster is live and under budget;
    /// zero otherwise.
    pub fn recommended_probe_size(&mut self, now: Instant) -> usize {
        let Some(cluster) = self.current_cluster(now) else {
            return 0;
        };
        if cluster.done() {
            return 0;
        }
        // Two delta intervals worth of the target bitrate.
        let size = (cluster.target_bitrate_bps as u64
            * 2
            * MIN_PROBE_DELTA.as_millis() as u64
            / 8000) as usize;
        size.max(MIN_PROBE_SIZE)
    }

    /// Earliest time the next probe may leave.
    pub fn time_until_next_probe(&mut self, now: Instant) -> Option<Duration> {
        if self.current_cluster(now).is_none() {
            return None;
        }
        match self.next_probe_at {
            Some(at) if at > now => Some(at.duration_since(now)),
            _ => Some(Duration::ZERO),
        }
    }

    /// Accounts one sent probe packet against the active cluster.
    pub fn probe_sent(&mut self, now: Instant, size: usize) {
        let Some(cluster) = self.clusters.front_mut() else {
            return;
        };
        if cluster.started_at.is_none() {
            cluster.started_at = Some(now);
        }
        cluster.sent_probes += 1;
        cluster.sent_bytes += size as u32;
        self.next_probe_at = Some(now + MIN_PROBE_DELTA);

        if cluster.done() {
            self.clusters.pop_front();
            self.next_probe_at = None;
        }
    }
}
