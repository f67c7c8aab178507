//! Receive side of a stream: RFC 3550 reception statistics, receiver
//! reports, NACK generation and key frame requests.

use std::collections::VecDeque;
use std::time::Instant;

use log::debug;

use rtcp::packet::Packet as RtcpPacket;
use rtcp::payload_feedbacks::full_intra_request::{FirEntry, FullIntraRequest};
use rtcp::payload_feedbacks::picture_loss_indication::PictureLossIndication;
use rtcp::reception_report::ReceptionReport;
use rtcp::sender_report::SenderReport;
use rtcp::transport_feedbacks::transport_layer_nack::TransportLayerNack;
use shared::marshal::MarshalSize;
use shared::time;

use crate::nack_generator::{NackGenerator, NackOutcome};
use crate::rtp_stream::{RtpStream, StreamParams, StreamStats};

/// Maximum cumulative loss reportable in the signed 24-bit RR field.
const MAX_TOTAL_LOST: u32 = 0x7F_FFFF;

pub struct RtpStreamRecv {
    base: RtpStream,

    // Jitter estimation state (RFC 3550 §6.4.1 / A.8).
    jitter: f64,
    last_rtp_ts: u32,
    last_rtp_at: Option<Instant>,

    // Last sender report info for LSR/DLSR.
    last_sr_timestamp: u32,
    last_sr_received: Option<Instant>,

    // Interval snapshots for fraction lost.
    expected_prior: u32,
    received_prior: u64,

    nack_generator: Option<NackGenerator>,
    fir_seq: u8,
    paused: bool,

    feedback_queue: VecDeque<Box<dyn RtcpPacket>>,
}

impl RtpStreamRecv {
    pub fn new(params: StreamParams, now: Instant) -> Self {
        let nack_generator = params.use_nack.then(NackGenerator::new);
        Self {
            base: RtpStream::new(params, now),
            jitter: 0.0,
            last_rtp_ts: 0,
            last_rtp_at: None,
            last_sr_timestamp: 0,
            last_sr_received: None,
            expected_prior: 0,
            received_prior: 0,
            nack_generator,
            fir_seq: 0,
            paused: false,
            feedback_queue: VecDeque::new(),
        }
    }

    pub fn params(&self) -> &StreamParams {
        &self.base.params
    }

    pub fn ssrc(&self) -> u32 {
        self.base.ssrc()
    }

    pub fn jitter(&self) -> u32 {
        self.jitter as u32
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    /// Processes one media packet. Returns whether the packet is valid for
    /// this stream and should be forwarded downstream.
    pub fn receive_packet(&mut self, now: Instant, packet: &rtp::Packet) -> bool {
        let seq = packet.header.sequence_number;

        if !self.base.update_seq(seq) {
            debug!(
                "invalid sequence number {seq} on ssrc {:x}, dropping",
                self.base.ssrc()
            );
            self.base.packets_discarded += 1;
            return false;
        }

        self.base
            .transmission_counter
            .update(packet.marshal_size(), now);
        self.base.update_timestamp(packet.header.timestamp, now);
        self.calculate_jitter(packet.header.timestamp, now);

        if let Some(generator) = &mut self.nack_generator {
            if generator.receive_packet(now, seq) == NackOutcome::KeyFrameRequired {
                self.request_key_frame();
            }
        }

        !self.paused
    }

    /// Processes an RTX packet for this stream, recovering the original.
    /// Returns the recovered packet when it repairs a hole.
    pub fn receive_rtx_packet(&mut self, now: Instant, packet: &rtp::Packet) -> Option<rtp::Packet> {
        let rtx_ssrc = self.base.params.rtx_ssrc?;
        let rtx_pt = self.base.params.rtx_payload_type?;
        if packet.header.ssrc != rtx_ssrc || packet.header.payload_type != rtx_pt {
            return None;
        }

        let media = match rtp::rtx::decode(
            packet,
            self.base.params.payload_type,
            self.base.params.ssrc,
        ) {
            Ok(media) => media,
            Err(e) => {
                debug!("dropping unusable rtx packet: {e}");
                return None;
            }
        };

        self.base.packets_repaired += 1;
        self.base
            .retransmission_counter
            .update(packet.marshal_size(), now);

        if self.receive_packet(now, &media) {
            Some(media)
        } else {
            None
        }
    }

    fn calculate_jitter(&mut self, rtp_ts: u32, now: Instant) {
        let clock_rate = self.base.params.clock_rate as f64;
        if let Some(last_at) = self.last_rtp_at {
            let elapsed = now.duration_since(last_at).as_secs_f64();
            let d = elapsed * clock_rate - (rtp_ts as f64 - self.last_rtp_ts as f64);
            self.jitter += (d.abs() - self.jitter) / 16.0;
        }
        self.last_rtp_ts = rtp_ts;
        self.last_rtp_at = Some(now);
    }

    pub fn receive_sender_report(&mut self, now: Instant, sr: &SenderReport) {
        self.last_sr_timestamp = time::compact(sr.ntp_time);
        self.last_sr_received = Some(now);
    }

    /// Builds the RR block for this stream.
    pub fn receiver_report(&mut self, now: Instant) -> ReceptionReport {
        let expected = self.base.expected_packets();
        let received = self.base.transmission_counter.packet_count();

        let expected_interval = expected.wrapping_sub(self.expected_prior) as i64;
        let received_interval = (received - self.received_prior) as i64;
        let lost_interval = expected_interval - received_interval;

        self.expected_prior = expected;
        self.received_prior = received;

        let fraction_lost = if expected_interval == 0 || lost_interval <= 0 {
            0
        } else {
            ((lost_interval << 8) / expected_interval) as u8
        };
        self.base.fraction_lost = fraction_lost;

        let total_lost = (expected as i64 - received as i64).clamp(0, MAX_TOTAL_LOST as i64);
        self.base.packets_lost = total_lost as u32;

        let delay = match self.last_sr_received {
            Some(at) => (now.duration_since(at).as_secs_f64() * 65536.0) as u32,
            None => 0,
        };

        ReceptionReport {
            ssrc: self.base.ssrc(),
            fraction_lost,
            total_lost: total_lost as u32,
            last_sequence_number: self.base.extended_highest_seq(),
            jitter: self.jitter as u32,
            last_sender_report: self.last_sr_timestamp,
            delay,
        }
    }

    /// Drives the NACK retry machinery; meant to fire every
    /// [`crate::nack_generator::TIMER_INTERVAL`].
    pub fn on_timer(&mut self, now: Instant) {
        if self.paused {
            return;
        }
        let Some(generator) = &mut self.nack_generator else {
            return;
        };

        let pairs = generator.on_timer(now);
        if pairs.is_empty() {
            return;
        }

        self.base.nack_count += 1;
        self.base.nack_rtp_packet_count +=
            pairs.iter().map(|p| p.packet_list().len() as u64).sum::<u64>();

        self.feedback_queue.push_back(Box::new(TransportLayerNack {
            sender_ssrc: 0,
            media_ssrc: self.base.ssrc(),
            nacks: pairs,
        }));
    }

    pub fn set_rtt(&mut self, rtt: std::time::Duration) {
        if let Some(generator) = &mut self.nack_generator {
            generator.set_rtt(rtt);
        }
    }

    /// Queues a PLI or FIR depending on what the stream negotiated.
    pub fn request_key_frame(&mut self) {
        if self.base.params.use_pli {
            self.base.pli_count += 1;
            self.feedback_queue.push_back(Box::new(PictureLossIndication {
                sender_ssrc: 0,
                media_ssrc: self.base.ssrc(),
            }));
        } else if self.base.params.use_fir {
            self.base.fir_count += 1;
            let seq = self.fir_seq;
            self.fir_seq = self.fir_seq.wrapping_add(1);
            self.feedback_queue.push_back(Box::new(FullIntraRequest {
                sender_ssrc: 0,
                media_ssrc: self.base.ssrc(),
                fir: vec![FirEntry {
                    ssrc: self.base.ssrc(),
                    sequence_number: seq,
                }],
            }));
        }
    }

    /// Drains the RTCP feedback this stream wants sent upstream.
    pub fn poll_feedback(&mut self) -> Option<Box<dyn RtcpPacket>> {
        self.feedback_queue.pop_front()
    }

    pub fn stats(&mut self, now: Instant) -> StreamStats {
        StreamStats {
            ssrc: self.base.ssrc(),
            packet_count: self.base.transmission_counter.packet_count(),
            byte_count: self.base.transmission_counter.bytes(),
            bitrate: self.base.transmission_counter.rate(now),
            packets_lost: self.base.packets_lost,
            fraction_lost: self.base.fraction_lost,
            packets_discarded: self.base.packets_discarded,
            packets_repaired: self.base.packets_repaired,
            nack_count: self.base.nack_count,
            nack_rtp_packet_count: self.base.nack_rtp_packet_count,
            pli_count: self.base.pli_count,
            fir_count: self.base.fir_count,
            jitter: self.jitter as u32,
            score: 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtp_stream::MimeType;
    use bytes::Bytes;
    use std::time::Duration;

    fn params() -> StreamParams {
        StreamParams {
            ssrc: 0x1234,
            payload_type: 100,
            mime: MimeType::Video,
            clock_rate: 90000,
            use_nack: true,
            use_pli: true,
            rtx_ssrc: Some(0x5678),
            rtx_payload_type: Some(101),
            ..Default::default()
        }
    }

    fn media_packet(seq: u16, ts: u32) -> rtp::Packet {
        rtp::Packet {
            header: rtp::header::Header {
                payload_type: 100,
                sequence_number: seq,
                timestamp: ts,
                ssrc: 0x1234,
                ..Default::default()
            },
            payload: Bytes::from_static(&[0u8; 100]),
            padding_size: 0,
        }
    }

    #[test]
    fn test_accepts_ordered_packets() {
        let now = Instant::now();
        let mut stream = RtpStreamRecv::new(params(), now);

        for seq in 0..50u16 {
            assert!(stream.receive_packet(now, &media_packet(seq, seq as u32 * 3000)));
        }
        let report = stream.receiver_report(now);
        assert_eq!(report.fraction_lost, 0);
        assert_eq!(report.total_lost, 0);
        assert_eq!(report.last_sequence_number, 49);
    }

    #[test]
    fn test_fraction_lost_from_interval() {
        let now = Instant::now();
        let mut stream = RtpStreamRecv::new(params(), now);

        // Receive 0..=9, then 20..=29: 10 of 30 expected missing.
        for seq in 0..10u16 {
            stream.receive_packet(now, &media_packet(seq, 0));
        }
        for seq in 20..30u16 {
            stream.receive_packet(now, &media_packet(seq, 0));
        }

        let report = stream.receiver_report(now);
        assert_eq!(report.total_lost, 10);
        // 10/30 of the interval lost: 256 * 10 / 30 = 85.
        assert_eq!(report.fraction_lost, 85);

        // Second report with no further traffic: interval empty.
        let report = stream.receiver_report(now);
        assert_eq!(report.fraction_lost, 0);
        assert_eq!(report.total_lost, 10);
    }

    #[test]
    fn test_lsr_dlsr() {
        let now = Instant::now();
        let mut stream = RtpStreamRecv::new(params(), now);
        stream.receive_packet(now, &media_packet(0, 0));

        let sr = SenderReport {
            ssrc: 0x9999,
            ntp_time: 0xAABBCCDD_11223344,
            ..Default::default()
        };
        stream.receive_sender_report(now, &sr);

        let report = stream.receiver_report(now + Duration::from_millis(500));
        assert_eq!(report.last_sender_report, 0xCCDD_1122);
        // 500 ms in 1/65536 s units.
        assert_eq!(report.delay, 32768);
    }

    #[test]
    fn test_nack_emitted_for_gap() {
        let now = Instant::now();
        let mut stream = RtpStreamRecv::new(params(), now);

        stream.receive_packet(now, &media_packet(10, 0));
        stream.receive_packet(now, &media_packet(13, 0));
        stream.on_timer(now);

        let feedback = stream.poll_feedback().expect("nack expected");
        let nack = feedback
            .as_any()
            .downcast_ref::<TransportLayerNack>()
            .unwrap();
        assert_eq!(nack.media_ssrc, 0x1234);
        let seqs: Vec<u16> = nack.nacks.iter().flat_map(|p| p.packet_list()).collect();
        assert_eq!(seqs, vec![11, 12]);
    }

    #[test]
    fn test_rtx_recovers_hole() {
        let now = Instant::now();
        let mut stream = RtpStreamRecv::new(params(), now);

        stream.receive_packet(now, &media_packet(10, 0));
        stream.receive_packet(now, &media_packet(12, 0));

        // RTX carrying original seq 11.
        let original = media_packet(11, 0);
        let rtx = rtp::rtx::encode(&original, 101, 0x5678, 7);
        let recovered = stream.receive_rtx_packet(now, &rtx).expect("recovered");
        assert_eq!(recovered.header.sequence_number, 11);
        assert_eq!(recovered.header.ssrc, 0x1234);

        // The hole is gone: no NACK emitted.
        stream.on_timer(now);
        assert!(stream.poll_feedback().is_none());
        assert_eq!(stream.stats(now).packets_repaired, 1);
    }

    #[test]
    fn test_rtx_wrong_ssrc_ignored() {
        let now = Instant::now();
        let mut stream = RtpStreamRecv::new(params(), now);
        stream.receive_packet(now, &media_packet(10, 0));

        let original = media_packet(11, 0);
        let rtx = rtp::rtx::encode(&original, 101, 0xDEAD, 7);
        assert!(stream.receive_rtx_packet(now, &rtx).is_none());
    }

    #[test]
    fn test_key_frame_request_pli() {
        let now = Instant::now();
        let mut stream = RtpStreamRecv::new(params(), now);

        stream.request_key_frame();
        let feedback = stream.poll_feedback().unwrap();
        let pli = feedback
            .as_any()
            .downcast_ref::<PictureLossIndication>()
            .unwrap();
        assert_eq!(pli.media_ssrc, 0x1234);
        assert_eq!(stream.stats(now).pli_count, 1);
    }

    #[test]
    fn test_key_frame_request_fir_sequence() {
        let now = Instant::now();
        let mut p = params();
        p.use_pli = false;
        p.use_fir = true;
        let mut stream = RtpStreamRecv::new(p, now);

        stream.request_key_frame();
        stream.request_key_frame();

        let first = stream.poll_feedback().unwrap();
        let second = stream.poll_feedback().unwrap();
        let first = first.as_any().downcast_ref::<FullIntraRequest>().unwrap();
        let second = second.as_any().downcast_ref::<FullIntraRequest>().unwrap();
        assert_eq!(first.fir[0].sequence_number, 0);
        assert_eq!(second.fir[0].sequence_number, 1);
    }

    #[test]
    fn test_paused_stream_keeps_stats_but_drops_media() {
        let now = Instant::now();
        let mut stream = RtpStreamRecv::new(params(), now);

        stream.pause();
        assert!(!stream.receive_packet(now, &media_packet(0, 0)));
        assert_eq!(stream.stats(now).packet_count, 1);

        stream.resume();
        assert!(stream.receive_packet(now, &media_packet(1, 0)));
    }

    #[test]
    fn test_jitter_steady_clock_is_low() {
        let t0 = Instant::now();
        let mut stream = RtpStreamRecv::new(params(), t0);

        // 30 fps video: 3000 ticks per 33.33 ms frame, arrival perfectly
        // paced.
        for i in 0..100u32 {
            let at = t0 + Duration::from_micros(i as u64 * 33_333);
            stream.receive_packet(at, &media_packet(i as u16, i * 3000));
        }
        assert!(stream.jitter() < 10, "jitter {}", stream.jitter());
    }
}
