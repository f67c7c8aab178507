//! Windowed stream health scoring from reported loss and repair rate.

use std::collections::BTreeMap;

const HISTOGRAM_LENGTH: usize = 8;
const MAX_REPAIRED_PACKET_RETRANSMISSION: u64 = 2;
const MAX_REPAIRED_PACKETS_LENGTH: usize = 1000;
/// Scores are recomputed and published every this many samples.
pub const SCORE_TRIGGER_COUNT: usize = 8;

const LOSS_PERCENTAGE_WEIGHT: f32 = -1.0;
const REPAIRED_PERCENTAGE_WEIGHT: f32 = 0.5;

/// Produces a 0-10 health score for a sent stream, fed by receiver reports
/// and retransmission activity.
pub struct StreamMonitor {
    score: u8,
    scores: Vec<u8>,
    score_trigger_counter: usize,
    repaired_packets: BTreeMap<u16, u64>,
    total_source_loss: i64,
    total_reported_loss: i64,
    total_sent_packets: u64,
}

impl StreamMonitor {
    pub fn new(initial_score: u8) -> Self {
        Self {
            score: initial_score,
            scores: vec![],
            score_trigger_counter: SCORE_TRIGGER_COUNT,
            repaired_packets: BTreeMap::new(),
            total_source_loss: 0,
            total_reported_loss: 0,
            total_sent_packets: 0,
        }
    }

    pub fn score(&self) -> u8 {
        self.score
    }

    /// Notes one retransmission of `seq`.
    pub fn packet_repaired(&mut self, seq: u16) {
        if self.repaired_packets.len() == MAX_REPAIRED_PACKETS_LENGTH
            && !self.repaired_packets.contains_key(&seq)
        {
            let oldest = *self.repaired_packets.keys().next().unwrap();
            self.repaired_packets.remove(&oldest);
        }
        *self.repaired_packets.entry(seq).or_insert(0) += 1;
    }

    /// Feeds the cumulative loss from a receiver report together with the
    /// sender-side view of the interval. Returns the new published score
    /// when it changed.
    ///
    /// `total_reported_lost` is the RR cumulative loss; `expected_packets`
    /// and `sent_packets` are the stream's running totals.
    pub fn receive_receiver_report(
        &mut self,
        total_reported_lost: u32,
        expected_packets: u64,
        sent_packets: u64,
    ) -> Option<u8> {
        let reported_loss =
            (total_reported_lost as i64 - self.total_reported_loss).max(0) as u64;
        self.total_reported_loss = total_reported_lost as i64;

        // Loss already present at the source does not count against us.
        let new_source_loss = expected_packets as i64 - sent_packets as i64;
        let source_loss = (new_source_loss - self.total_source_loss).max(0) as u64;
        self.total_source_loss = new_source_loss;

        let mut current_loss = reported_loss.saturating_sub(source_loss);

        let mut repaired_count = self.repaired_packet_count();
        self.repaired_packets.clear();

        let mut sent = sent_packets - self.total_sent_packets;
        self.total_sent_packets = sent_packets;

        // No packet was sent; still account lost and repaired ones.
        if sent == 0 {
            sent = current_loss.max(repaired_count);
        }
        if sent == 0 {
            return None;
        }

        current_loss = current_loss.min(sent);
        repaired_count = repaired_count.min(sent);

        let loss_percentage = (current_loss * 100 / sent) as f32;
        let repaired_percentage = (repaired_count * 100 / sent) as f32;

        let mut score = 100.0;
        score += loss_percentage * LOSS_PERCENTAGE_WEIGHT;
        score += repaired_percentage * REPAIRED_PERCENTAGE_WEIGHT;
        let score = score.clamp(0.0, 100.0);

        self.add_score((score / 10.0).round() as u8)
    }

    fn add_score(&mut self, sample: u8) -> Option<u8> {
        if self.scores.len() == HISTOGRAM_LENGTH {
            self.scores.remove(0);
        }
        self.scores.push(sample);

        self.score_trigger_counter -= 1;
        if self.score_trigger_counter > 0 {
            return None;
        }
        self.score_trigger_counter = SCORE_TRIGGER_COUNT;

        let score = self.compute_score();
        if score != self.score {
            self.score = score;
            Some(score)
        } else {
            None
        }
    }

    /// Weighted average where the i-th oldest of n samples has weight i.
    fn compute_score(&self) -> u8 {
        let mut weight = 0u64;
        let mut samples = 0u64;
        let mut total = 0u64;

        for &score in &self.scores {
            weight += 1;
            samples += weight;
            total += weight * score as u64;
        }

        if samples == 0 {
            10
        } else {
            ((total as f64 / samples as f64).round()) as u8
        }
    }

    /// A packet counts as repaired only if it needed at most
    /// `MAX_REPAIRED_PACKET_RETRANSMISSION` retransmissions.
    fn repaired_packet_count(&self) -> u64 {
        self.repaired_packets
            .values()
            .filter(|&&n| n <= MAX_REPAIRED_PACKET_RETRANSMISSION)
            .count() as u64
    }

    pub fn reset(&mut self) -> Option<u8> {
        self.score_trigger_counter = SCORE_TRIGGER_COUNT;
        self.total_source_loss = 0;
        self.total_reported_loss = 0;
        self.total_sent_packets = 0;
        self.repaired_packets.clear();
        self.scores.clear();

        if self.score != 0 {
            self.score = 0;
            Some(0)
        } else {
            None
        }
    }
}
