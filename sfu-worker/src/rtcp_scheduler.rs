//! Periodic compound RTCP production: interval policy and assembly.

use std::time::{Duration, Instant};

use rtcp::compound_packet::CompoundPacket;
use rtcp::extended_report::{ExtendedReport, ReceiverReferenceTimeBlock, ReportBlock};
use rtcp::packet::Packet as RtcpPacket;
use rtcp::receiver_report::ReceiverReport;
use rtcp::reception_report::ReceptionReport;
use rtcp::sender_report::SenderReport;
use rtcp::source_description::{SourceDescription, SourceDescriptionChunk};
use shared::marshal::MarshalSize;

/// Upper bound for one serialized compound.
pub const BUFFER_SIZE: usize = 65536;

/// The RTCP bandwidth target the interval is derived from.
const TARGET_BITRATE: u64 = 360_000;
const MIN_VIDEO_INTERVAL: Duration = Duration::from_millis(500);
const MAX_VIDEO_INTERVAL: Duration = Duration::from_millis(1000);
const MAX_AUDIO_INTERVAL: Duration = Duration::from_millis(5000);

/// Computes the spacing until the next compound for the current send rate.
///
/// `jitter` must be uniform in [0, 1); the result is scaled by 0.5 + jitter
/// so reports from many endpoints do not synchronize.
pub fn rtcp_interval(send_bitrate_bps: u32, audio: bool, jitter: f64) -> Duration {
    let base = if send_bitrate_bps == 0 {
        MAX_VIDEO_INTERVAL
    } else {
        // One second at the target bitrate, shrunk when sending faster.
        let ms = TARGET_BITRATE * 1000 / send_bitrate_bps as u64;
        Duration::from_millis(ms)
    };

    let clamped = if audio {
        base.clamp(MIN_VIDEO_INTERVAL, MAX_AUDIO_INTERVAL)
    } else {
        base.clamp(MIN_VIDEO_INTERVAL, MAX_VIDEO_INTERVAL)
    };

    clamped.mul_f64(0.5 + jitter.clamp(0.0, 1.0))
}

/// Tracks when the next compound is due for one transport.
pub struct RtcpScheduler {
    last_sent: Option<Instant>,
    interval: Duration,
}

impl Default for RtcpScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl RtcpScheduler {
    pub fn new() -> Self {
        Self {
            last_sent: None,
            interval: MAX_VIDEO_INTERVAL,
        }
    }

    pub fn reschedule(&mut self, send_bitrate_bps: u32, audio: bool, jitter: f64) {
        self.interval = rtcp_interval(send_bitrate_bps, audio, jitter);
    }

    pub fn is_due(&self, now: Instant) -> bool {
        match self.last_sent {
            Some(last) => now.duration_since(last) >= self.interval,
            None => true,
        }
    }

    pub fn sent(&mut self, now: Instant) {
        self.last_sent = Some(now);
    }

    pub fn time_until_due(&self, now: Instant) -> Duration {
        match self.last_sent {
            Some(last) => self
                .interval
                .saturating_sub(now.duration_since(last)),
            None => Duration::ZERO,
        }
    }
}

/// Builds the periodic compounds for one transport out of per-stream SRs,
/// RR blocks and SDES chunks, keeping each compound under [`BUFFER_SIZE`].
pub struct CompoundAssembler {
    max_size: usize,
}

impl Default for CompoundAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl CompoundAssembler {
    pub fn new() -> Self {
        Self {
            max_size: BUFFER_SIZE,
        }
    }

    #[cfg(test)]
    fn with_max_size(max_size: usize) -> Self {
        Self { max_size }
    }

    /// Assembles one or more compounds:
    /// - active send streams contribute their SRs and CNAME chunks;
    /// - receive streams contribute RR blocks, batched 31 per RR packet,
    ///   fronted by an empty RR when no SR can lead the compound.
    pub fn assemble(
        &self,
        sender_reports: Vec<(SenderReport, SourceDescriptionChunk)>,
        receiver_ssrc: u32,
        receiver_cname: &str,
        reports: Vec<ReceptionReport>,
    ) -> Vec<CompoundPacket> {
        let mut compounds = vec![];

        let mut sdes_chunks: Vec<SourceDescriptionChunk> = vec![];
        let mut packets: Vec<Box<dyn RtcpPacket>> = vec![];
        let mut size = 0usize;

        let mut flush = |packets: &mut Vec<Box<dyn RtcpPacket>>,
                         sdes_chunks: &mut Vec<SourceDescriptionChunk>,
                         size: &mut usize,
                         compounds: &mut Vec<CompoundPacket>| {
            if packets.is_empty() && sdes_chunks.is_empty() {
                return;
            }
            let mut body = std::mem::take(packets);
            if body.is_empty() {
                // SDES may not lead a compound.
                body.push(Box::new(ReceiverReport {
                    ssrc: receiver_ssrc,
                    ..Default::default()
                }));
            }
            let mut chunks = std::mem::take(sdes_chunks);
            if chunks.is_empty() {
                // Every compound carries a CNAME (RFC 3550 §6.1).
                chunks.push(SourceDescriptionChunk::cname(
                    receiver_ssrc,
                    receiver_cname,
                ));
            }
            body.push(Box::new(SourceDescription { chunks }));
            compounds.push(CompoundPacket(body));
            *size = 0;
        };

        for (sr, chunk) in sender_reports {
            let added = sr.marshal_size() + chunk_size_estimate(&chunk);
            if size + added > self.max_size {
                flush(&mut packets, &mut sdes_chunks, &mut size, &mut compounds);
            }
            size += added;
            packets.push(Box::new(sr));
            sdes_chunks.push(chunk);
        }

        // Batch RR blocks, at most 31 per packet.
        for rr in ReceiverReport::packets_for_reports(receiver_ssrc, reports) {
            if rr.reports.is_empty() && !packets.is_empty() {
                // A placeholder RR is only needed in an otherwise empty
                // compound.
                continue;
            }
            let added = rr.marshal_size();
            if size + added > self.max_size {
                flush(&mut packets, &mut sdes_chunks, &mut size, &mut compounds);
            }
            size += added;
            packets.push(Box::new(rr));
        }

        flush(&mut packets, &mut sdes_chunks, &mut size, &mut compounds);
        compounds
    }

    /// Same as [`Self::assemble`], additionally closing the last compound
    /// with an XR receiver reference time block so peers without an SR from
    /// us can still compute round-trip times.
    pub fn assemble_with_rrt(
        &self,
        sender_reports: Vec<(SenderReport, SourceDescriptionChunk)>,
        receiver_ssrc: u32,
        receiver_cname: &str,
        reports: Vec<ReceptionReport>,
        ntp_timestamp: u64,
    ) -> Vec<CompoundPacket> {
        let mut compounds =
            self.assemble(sender_reports, receiver_ssrc, receiver_cname, reports);
        if let Some(last) = compounds.last_mut() {
            last.0.push(Box::new(ExtendedReport {
                sender_ssrc: receiver_ssrc,
                reports: vec![ReportBlock::ReceiverReferenceTime(
                    ReceiverReferenceTimeBlock { ntp_timestamp },
                )],
            }));
        }
        compounds
    }
}

fn chunk_size_estimate(chunk: &SourceDescriptionChunk) -> usize {
    let items: usize = chunk.items.iter().map(|i| 2 + i.text.len()).sum();
    (4 + items + 1 + 3) & !3
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::marshal::{Marshal, Unmarshal};

    fn sr(ssrc: u32) -> (SenderReport, SourceDescriptionChunk) {
        (
            SenderReport {
                ssrc,
                ..Default::default()
            },
            SourceDescriptionChunk::cname(ssrc, "cname@test"),
        )
    }

    fn report(ssrc: u32) -> ReceptionReport {
        ReceptionReport {
            ssrc,
            ..Default::default()
        }
    }

    #[test]
    fn test_interval_follows_send_rate() {
        // Sending at exactly the target rate: 1 s before jitter.
        let interval = rtcp_interval(360_000, false, 0.5);
        assert_eq!(interval, Duration::from_millis(1000));

        // Faster sending shortens it, floored at 500 ms.
        let interval = rtcp_interval(3_600_000, false, 0.5);
        assert_eq!(interval, Duration::from_millis(500));

        // Slow audio is capped at 5 s.
        let interval = rtcp_interval(8_000, true, 0.5);
        assert_eq!(interval, Duration::from_millis(5000));
    }

    #[test]
    fn test_interval_jitter_range() {
        let low = rtcp_interval(360_000, false, 0.0);
        let high = rtcp_interval(360_000, false, 0.999);
        assert_eq!(low, Duration::from_millis(500));
        assert!(high > Duration::from_millis(1490) && high < Duration::from_millis(1500));
    }

    #[test]
    fn test_scheduler_due_and_reset() {
        let t0 = Instant::now();
        let mut scheduler = RtcpScheduler::new();
        assert!(scheduler.is_due(t0));

        scheduler.reschedule(360_000, false, 0.5);
        scheduler.sent(t0);
        assert!(!scheduler.is_due(t0 + Duration::from_millis(900)));
        assert!(scheduler.is_due(t0 + Duration::from_millis(1000)));
    }

    #[test]
    fn test_assemble_sr_leads() {
        let assembler = CompoundAssembler::new();
        let compounds = assembler.assemble(vec![sr(1), sr(2)], 99, "rx@test", vec![report(10)]);

        assert_eq!(compounds.len(), 1);
        let compound = &compounds[0];
        compound.validate().unwrap();

        let raw = compound.marshal().unwrap();
        assert!(raw.len() < BUFFER_SIZE);
        // SR leads.
        assert_eq!(raw[1], 200);
    }

    #[test]
    fn test_assemble_rr_only_compound() {
        let assembler = CompoundAssembler::new();
        let compounds = assembler.assemble(vec![], 99, "rx@test", vec![report(10), report(11)]);

        assert_eq!(compounds.len(), 1);
        let raw = compounds[0].marshal().unwrap();
        // RR leads, carrying the sender SSRC.
        assert_eq!(raw[1], 201);
        let rr = compounds[0].0[0]
            .as_any()
            .downcast_ref::<ReceiverReport>()
            .unwrap();
        assert_eq!(rr.ssrc, 99);
        assert_eq!(rr.reports.len(), 2);
    }

    #[test]
    fn test_assemble_empty_rr_when_nothing_to_report() {
        let assembler = CompoundAssembler::new();
        let compounds = assembler.assemble(vec![], 99, "rx@test", vec![]);

        assert_eq!(compounds.len(), 1);
        let rr = compounds[0].0[0]
            .as_any()
            .downcast_ref::<ReceiverReport>()
            .unwrap();
        assert!(rr.reports.is_empty());
        assert_eq!(rr.ssrc, 99);
    }

    #[test]
    fn test_assemble_batches_31_reports_per_rr() {
        let assembler = CompoundAssembler::new();
        let reports: Vec<ReceptionReport> = (0..70u32).map(report).collect();
        let compounds = assembler.assemble(vec![sr(1)], 99, "rx@test", reports);

        assert_eq!(compounds.len(), 1);
        let rr_packets: Vec<&ReceiverReport> = compounds[0]
            .0
            .iter()
            .filter_map(|p| p.as_any().downcast_ref::<ReceiverReport>())
            .collect();
        assert_eq!(rr_packets.len(), 3);
        assert!(rr_packets.iter().all(|rr| rr.reports.len() <= 31));
    }

    #[test]
    fn test_assemble_splits_on_size_budget() {
        // Force tiny compounds.
        let assembler = CompoundAssembler::with_max_size(256);
        let srs: Vec<_> = (1..=8u32).map(sr).collect();
        let compounds = assembler.assemble(srs, 99, "rx@test", vec![]);

        assert!(compounds.len() > 1);
        for compound in &compounds {
            assert!(compound.marshal().unwrap().len() <= 256 + 64);
        }
    }

    #[test]
    fn test_assemble_with_rrt_appends_xr() {
        let assembler = CompoundAssembler::new();
        let compounds =
            assembler.assemble_with_rrt(vec![sr(1)], 99, "rx@test", vec![], 0x0102030405060708);

        let compound = &compounds[0];
        compound.validate().unwrap();
        let xr = compound
            .0
            .last()
            .unwrap()
            .as_any()
            .downcast_ref::<ExtendedReport>()
            .unwrap();
        assert_eq!(xr.sender_ssrc, 99);
        assert!(matches!(
            xr.reports[0],
            ReportBlock::ReceiverReferenceTime(ReceiverReferenceTimeBlock {
                ntp_timestamp: 0x0102030405060708
            })
        ));

        // Still a valid wire compound.
        let raw = compound.marshal().unwrap();
        let mut buf = raw.clone();
        let parsed = CompoundPacket::unmarshal(&mut buf).unwrap();
        assert_eq!(parsed.marshal().unwrap(), raw);
    }

    #[test]
    fn test_compound_has_cname_when_sr_present() {
        let assembler = CompoundAssembler::new();
        let compounds = assembler.assemble(vec![sr(7)], 99, "rx@test", vec![]);
        assert_eq!(compounds[0].cname().unwrap(), "cname@test");
    }
}
