//! Send side of a stream: sent-packet buffering, NACK-driven
//! retransmission, sender reports and health scoring.

use std::collections::VecDeque;
use std::rc::Rc;
use std::time::{Duration, Instant};

use log::debug;

use rtcp::reception_report::ReceptionReport;
use rtcp::sender_report::SenderReport;
use rtcp::source_description::SourceDescriptionChunk;
use rtcp::transport_feedbacks::transport_layer_nack::TransportLayerNack;
use shared::marshal::MarshalSize;
use shared::time::WallClock;

use crate::monitor::StreamMonitor;
use crate::rtp_stream::retransmission_buffer::{
    RetransmissionBuffer, MAX_RETRANSMISSION_DELAY_AUDIO, MAX_RETRANSMISSION_DELAY_VIDEO,
};
use crate::rtp_stream::{MimeType, RtpStream, StreamParams, StreamStats};

/// Ring capacity of the retransmission buffer, in packets.
pub const RETRANSMISSION_BUFFER_SIZE: u16 = 2048;

pub struct RtpStreamSend {
    base: RtpStream,
    buffer: Option<RetransmissionBuffer>,
    monitor: StreamMonitor,

    rtx_seq: u16,
    rtt: Duration,
    paused: bool,

    retransmission_queue: VecDeque<Rc<rtp::Packet>>,
    score_events: VecDeque<u8>,
}

impl RtpStreamSend {
    pub fn new(params: StreamParams, now: Instant) -> Self {
        let max_age = match params.mime {
            MimeType::Audio => MAX_RETRANSMISSION_DELAY_AUDIO,
            MimeType::Video => MAX_RETRANSMISSION_DELAY_VIDEO,
        };
        let buffer = params.use_nack.then(|| {
            RetransmissionBuffer::new(RETRANSMISSION_BUFFER_SIZE, max_age, params.clock_rate)
        });

        Self {
            base: RtpStream::new(params, now),
            buffer,
            monitor: StreamMonitor::new(10),
            rtx_seq: rand::random(),
            rtt: Duration::ZERO,
            paused: false,
            retransmission_queue: VecDeque::new(),
            score_events: VecDeque::new(),
        }
    }

    pub fn params(&self) -> &StreamParams {
        &self.base.params
    }

    pub fn ssrc(&self) -> u32 {
        self.base.ssrc()
    }

    pub fn score(&self) -> u8 {
        self.monitor.score()
    }

    pub fn rtt(&self) -> Duration {
        self.rtt
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    /// Resuming keeps the buffered history; only NACK service was gated.
    pub fn resume(&mut self) {
        self.paused = false;
    }

    /// Accounts one forwarded packet and stores it for retransmission.
    /// The stored handle is shared with every consumer of the packet.
    pub fn receive_packet(&mut self, now: Instant, packet: Rc<rtp::Packet>) -> bool {
        if !self.base.update_seq(packet.header.sequence_number) {
            return false;
        }

        self.base
            .transmission_counter
            .update(packet.marshal_size(), now);
        self.base.update_timestamp(packet.header.timestamp, now);

        if let Some(buffer) = &mut self.buffer {
            // A source restart invalidates everything buffered under the
            // old sequence space.
            if self.base.take_resynced() {
                buffer.clear();
            }
            buffer.insert(now, packet);
        }
        true
    }

    /// Serves a NACK: expands the items, applies the age and RTT limits and
    /// queues RTX-encoded retransmissions.
    pub fn receive_nack(&mut self, now: Instant, nack: &TransportLayerNack) {
        if self.paused {
            return;
        }
        let Some(buffer) = &mut self.buffer else {
            return;
        };

        self.base.nack_count += 1;

        let rtx = self
            .base
            .params
            .rtx_payload_type
            .zip(self.base.params.rtx_ssrc);

        for pair in &nack.nacks {
            for seq in pair.packet_list() {
                self.base.nack_rtp_packet_count += 1;

                let Some(slot) = buffer.get_mut(now, seq) else {
                    debug!("cannot retransmit seq {seq}: not in buffer");
                    continue;
                };

                // Same-item rate limit: at most one resend per RTT.
                if let Some(resent_at) = slot.resent_at {
                    if now.duration_since(resent_at) < self.rtt {
                        continue;
                    }
                }

                let outgoing = match rtx {
                    Some((rtx_pt, rtx_ssrc)) => {
                        // Encode once; later retransmissions reuse the same
                        // RTX packet, sequence number included.
                        if slot.rtx_packet.is_none() {
                            let encoded =
                                rtp::rtx::encode(&slot.packet, rtx_pt, rtx_ssrc, self.rtx_seq);
                            self.rtx_seq = self.rtx_seq.wrapping_add(1);
                            slot.rtx_packet = Some(Rc::new(encoded));
                        }
                        slot.rtx_packet.clone().unwrap()
                    }
                    None => slot.packet.clone(),
                };

                slot.resent_at = Some(now);
                self.base.packets_repaired += 1;
                self.base
                    .retransmission_counter
                    .update(outgoing.marshal_size(), now);
                self.monitor.packet_repaired(seq);
                self.retransmission_queue.push_back(outgoing);
            }
        }
    }

    /// Drains retransmissions produced by [`Self::receive_nack`].
    pub fn poll_retransmission(&mut self) -> Option<Rc<rtp::Packet>> {
        self.retransmission_queue.pop_front()
    }

    /// Feeds an incoming RR block for this stream: RTT estimation plus
    /// score keeping.
    pub fn receive_receiver_report(
        &mut self,
        now: Instant,
        clock: &WallClock,
        report: &ReceptionReport,
    ) {
        self.base.fraction_lost = report.fraction_lost;
        self.base.packets_lost = report.total_lost;

        // RTT = now - LSR - DLSR, all in 1/65536 s middle-NTP units.
        if report.last_sender_report != 0 {
            let compact_now = clock.compact_ntp(now);
            let rtt_units = compact_now
                .wrapping_sub(report.last_sender_report)
                .wrapping_sub(report.delay);
            // Garbage timestamps produce enormous values; ignore those.
            if rtt_units < 0x0100_0000 {
                let seconds = rtt_units >> 16;
                let fraction = rtt_units & 0xFFFF;
                self.rtt = Duration::from_secs(seconds as u64)
                    + Duration::from_nanos((fraction as u64 * 1_000_000_000) >> 16);
            }
        }

        let expected = self.base.expected_packets() as u64;
        let sent = self.base.transmission_counter.packet_count();
        if let Some(score) =
            self.monitor
                .receive_receiver_report(report.total_lost, expected, sent)
        {
            self.score_events.push_back(score);
        }
    }

    /// Score threshold transitions since the last poll.
    pub fn poll_score_event(&mut self) -> Option<u8> {
        self.score_events.pop_front()
    }

    /// Builds the SR for this stream: current NTP time plus the RTP
    /// timestamp interpolated from the newest sent packet.
    pub fn sender_report(&mut self, now: Instant, clock: &WallClock) -> SenderReport {
        let rtp_time = match self.base.max_packet_at {
            Some(at) => {
                let elapsed = now.saturating_duration_since(at);
                let ticks =
                    (elapsed.as_secs_f64() * self.base.params.clock_rate as f64) as u32;
                self.base.max_packet_ts.wrapping_add(ticks)
            }
            None => 0,
        };

        SenderReport {
            ssrc: self.base.ssrc(),
            ntp_time: clock.ntp(now),
            rtp_time,
            packet_count: self.base.transmission_counter.packet_count() as u32,
            octet_count: self.base.transmission_counter.bytes() as u32,
            ..Default::default()
        }
    }

    /// CNAME chunk for this stream's compound packets.
    pub fn sdes_chunk(&self) -> SourceDescriptionChunk {
        SourceDescriptionChunk::cname(self.base.ssrc(), &self.base.params.cname)
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
            jitter: 0,
            score: self.monitor.score(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use rtcp::transport_feedbacks::transport_layer_nack::NackPair;

    fn params() -> StreamParams {
        StreamParams {
            ssrc: 0x1111,
            payload_type: 100,
            mime: MimeType::Video,
            clock_rate: 90000,
            cname: "stream@test".to_string(),
            rtx_ssrc: Some(0x2222),
            rtx_payload_type: Some(101),
            use_nack: true,
            ..Default::default()
        }
    }

    fn packet(seq: u16, ts: u32) -> Rc<rtp::Packet> {
        Rc::new(rtp::Packet {
            header: rtp::header::Header {
                payload_type: 100,
                sequence_number: seq,
                timestamp: ts,
                ssrc: 0x1111,
                ..Default::default()
            },
            payload: Bytes::from_static(&[0x42; 50]),
            padding_size: 0,
        })
    }

    fn nack(pairs: Vec<(u16, u16)>) -> TransportLayerNack {
        TransportLayerNack {
            sender_ssrc: 0,
            media_ssrc: 0x1111,
            nacks: pairs
                .into_iter()
                .map(|(packet_id, lost_packets)| NackPair {
                    packet_id,
                    lost_packets,
                })
                .collect(),
        }
    }

    #[test]
    fn test_nack_produces_retransmissions_in_order() {
        let now = Instant::now();
        let mut stream = RtpStreamSend::new(params(), now);

        for seq in 21006..=21010u16 {
            assert!(stream.receive_packet(now, packet(seq, 1000)));
        }

        // PID 21006, bitmask 0x000F: 21006..21010.
        stream.receive_nack(now, &nack(vec![(21006, 0x000F)]));

        let mut original_seqs = vec![];
        while let Some(rtx) = stream.poll_retransmission() {
            assert_eq!(rtx.header.ssrc, 0x2222);
            assert_eq!(rtx.header.payload_type, 101);
            original_seqs.push(u16::from_be_bytes([rtx.payload[0], rtx.payload[1]]));
        }
        assert_eq!(original_seqs, vec![21006, 21007, 21008, 21009, 21010]);

        // A second identical NACK inside the RTT window yields nothing.
        stream.rtt = Duration::from_millis(100);
        stream.receive_nack(now, &nack(vec![(21006, 0x000F)]));
        assert!(stream.poll_retransmission().is_none());
    }

    #[test]
    fn test_rtx_seq_stable_per_packet() {
        let now = Instant::now();
        let mut stream = RtpStreamSend::new(params(), now);
        stream.receive_packet(now, packet(100, 0));

        stream.receive_nack(now, &nack(vec![(100, 0)]));
        let first = stream.poll_retransmission().unwrap();

        // Past the RTT limit, the same packet is retransmitted with the
        // same RTX sequence number.
        let later = now + Duration::from_millis(200);
        stream.rtt = Duration::from_millis(100);
        stream.receive_nack(later, &nack(vec![(100, 0)]));
        let second = stream.poll_retransmission().unwrap();
        assert_eq!(
            first.header.sequence_number,
            second.header.sequence_number
        );
    }

    #[test]
    fn test_unknown_seq_skipped() {
        let now = Instant::now();
        let mut stream = RtpStreamSend::new(params(), now);
        stream.receive_packet(now, packet(10, 0));

        stream.receive_nack(now, &nack(vec![(500, 0)]));
        assert!(stream.poll_retransmission().is_none());
    }

    #[test]
    fn test_aged_packet_not_retransmitted() {
        let now = Instant::now();
        let mut stream = RtpStreamSend::new(params(), now);
        stream.receive_packet(now, packet(10, 0));

        let later = now + MAX_RETRANSMISSION_DELAY_VIDEO + Duration::from_millis(1);
        stream.receive_nack(later, &nack(vec![(10, 0)]));
        assert!(stream.poll_retransmission().is_none());
    }

    #[test]
    fn test_source_restart_clears_buffer() {
        let now = Instant::now();
        let mut stream = RtpStreamSend::new(params(), now);
        stream.receive_packet(now, packet(30000, 0));

        // A far jump: the first occurrence is rejected, its successor
        // re-syncs the stream.
        assert!(!stream.receive_packet(now, packet(100, 0)));
        assert!(stream.receive_packet(now, packet(101, 0)));

        // The pre-restart entry is unservable, the new one is served.
        stream.receive_nack(now, &nack(vec![(30000, 0)]));
        assert!(stream.poll_retransmission().is_none());
        stream.receive_nack(now, &nack(vec![(101, 0)]));
        assert!(stream.poll_retransmission().is_some());
    }

    #[test]
    fn test_paused_stream_serves_no_nack() {
        let now = Instant::now();
        let mut stream = RtpStreamSend::new(params(), now);
        stream.receive_packet(now, packet(10, 0));

        stream.pause();
        stream.receive_nack(now, &nack(vec![(10, 0)]));
        assert!(stream.poll_retransmission().is_none());

        // The buffer survived the pause.
        stream.resume();
        stream.receive_nack(now, &nack(vec![(10, 0)]));
        assert!(stream.poll_retransmission().is_some());
    }

    #[test]
    fn test_sender_report_contents() {
        let t0 = Instant::now();
        let clock = WallClock::with_origin(t0, Duration::from_secs(1_700_000_000));
        let mut stream = RtpStreamSend::new(params(), t0);

        stream.receive_packet(t0, packet(1, 90_000));
        stream.receive_packet(t0, packet(2, 90_000));

        // One second later the RTP timestamp advances a clock-rate worth.
        let later = t0 + Duration::from_secs(1);
        let sr = stream.sender_report(later, &clock);
        assert_eq!(sr.ssrc, 0x1111);
        assert_eq!(sr.packet_count, 2);
        assert_eq!(sr.octet_count, (12 + 50) * 2);
        assert_eq!(sr.rtp_time, 90_000 + 90_000);
        assert_eq!(sr.ntp_time, clock.ntp(later));
    }

    #[test]
    fn test_sdes_chunk_carries_cname() {
        let stream = RtpStreamSend::new(params(), Instant::now());
        let chunk = stream.sdes_chunk();
        assert_eq!(chunk.source, 0x1111);
        assert_eq!(chunk.items[0].text, "stream@test");
    }

    #[test]
    fn test_rtt_from_rr() {
        let t0 = Instant::now();
        let clock = WallClock::with_origin(t0, Duration::from_secs(1_700_000_000));
        let mut stream = RtpStreamSend::new(params(), t0);
        stream.receive_packet(t0, packet(1, 0));

        // Pretend the SR went out at t0 and the RR arrives 300 ms later
        // having been held 100 ms at the receiver: RTT = 200 ms.
        let lsr = clock.compact_ntp(t0);
        let dlsr = 65536 / 10; // 100 ms
        let rr_at = t0 + Duration::from_millis(300);
        stream.receive_receiver_report(
            rr_at,
            &clock,
            &ReceptionReport {
                ssrc: 0x1111,
                last_sender_report: lsr,
                delay: dlsr,
                ..Default::default()
            },
        );

        let rtt_ms = stream.rtt().as_millis();
        assert!((190..=210).contains(&rtt_ms), "rtt {rtt_ms} ms");
    }
}
