//! End-to-end exercises of the media path: demux, producer resolution,
//! receive-side repair and send-side retransmission.

use std::rc::Rc;
use std::time::{Duration, Instant};

use bytes::Bytes;

use rtcp::packet::Packet as _;
use rtcp::transport_feedbacks::transport_layer_nack::TransportLayerNack;
use rtp::extension::{ExtensionMap, ExtensionUri};
use shared::marshal::{Marshal, Unmarshal};
use sfu_worker::listener::{EncodingMapping, ProducerMapping};
use sfu_worker::rtp_stream::{MimeType, StreamParams};
use sfu_worker::transport::{demux, PacketKind};
use sfu_worker::{ProducerId, RtpListener, RtpStreamRecv, RtpStreamSend};

fn init_log() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn media_packet(ssrc: u32, seq: u16, ts: u32) -> rtp::Packet {
    rtp::Packet {
        header: rtp::header::Header {
            payload_type: 100,
            sequence_number: seq,
            timestamp: ts,
            ssrc,
            ..Default::default()
        },
        payload: Bytes::from(vec![0x51u8; 200]),
        padding_size: 0,
    }
}

fn video_params(ssrc: u32) -> StreamParams {
    StreamParams {
        ssrc,
        payload_type: 100,
        mime: MimeType::Video,
        clock_rate: 90000,
        cname: "worker@example".to_string(),
        rtx_ssrc: Some(ssrc + 1),
        rtx_payload_type: Some(101),
        use_nack: true,
        use_pli: true,
        ..Default::default()
    }
}

#[test]
fn wire_to_producer_resolution() {
    init_log();

    let mut extensions = ExtensionMap::default();
    extensions.set(ExtensionUri::Mid, 1);

    let mut listener = RtpListener::new();
    listener
        .add_producer(
            ProducerId(1),
            &ProducerMapping {
                mid: Some("a".to_string()),
                encodings: vec![EncodingMapping {
                    ssrc: Some(1111),
                    rtx_ssrc: Some(1112),
                    rid: None,
                }],
            },
        )
        .unwrap();
    listener
        .add_producer(
            ProducerId(2),
            &ProducerMapping {
                mid: Some("b".to_string()),
                encodings: vec![EncodingMapping {
                    ssrc: Some(2222),
                    rtx_ssrc: None,
                    rid: None,
                }],
            },
        )
        .unwrap();

    // Serialize a packet, demux it off the wire, parse, resolve.
    let packet = media_packet(1111, 1, 0);
    let raw = packet.marshal().unwrap();
    assert_eq!(demux(&raw), PacketKind::Rtp);

    let mut buf = raw;
    let parsed = rtp::Packet::unmarshal(&mut buf).unwrap();
    assert_eq!(
        listener.get_producer(&parsed, &extensions),
        Some(ProducerId(1))
    );

    // Re-mapped SSRC with a MID extension resolves and learns.
    let mut rerouted = media_packet(9999, 2, 0);
    rerouted
        .header
        .set_extension(1, Bytes::from_static(b"b"))
        .unwrap();
    assert_eq!(
        listener.get_producer(&rerouted, &extensions),
        Some(ProducerId(2))
    );
    assert_eq!(listener.get_producer_by_ssrc(9999), Some(ProducerId(2)));
}

#[test]
fn loss_detected_and_repaired_end_to_end() {
    init_log();

    let now = Instant::now();
    let ssrc = 0xCAFE;

    // The receive side of the producer and the send side of the consumer
    // share the flow: what the consumer sends is what the producer's peer
    // NACKs against.
    let mut recv = RtpStreamRecv::new(video_params(ssrc), now);
    let mut send = RtpStreamSend::new(video_params(ssrc), now);

    // Forward packets 0..10, losing 5 on the receive path.
    for seq in 0..10u16 {
        let packet = Rc::new(media_packet(ssrc, seq, seq as u32 * 3000));
        assert!(send.receive_packet(now, packet.clone()));
        if seq != 5 {
            assert!(recv.receive_packet(now, &packet));
        }
    }

    // The receiver's NACK timer fires and emits feedback for seq 5.
    recv.on_timer(now + Duration::from_millis(40));
    let feedback = recv.poll_feedback().expect("nack feedback");
    let nack = feedback
        .as_any()
        .downcast_ref::<TransportLayerNack>()
        .expect("transport layer nack");

    // Round-trip the NACK through its wire form, as it would travel.
    let raw = feedback.marshal().unwrap();
    let mut buf = raw;
    let packets = rtcp::unmarshal(&mut buf).unwrap();
    let nack_wire = packets[0]
        .as_any()
        .downcast_ref::<TransportLayerNack>()
        .unwrap();
    assert_eq!(nack_wire, nack);

    // The sender answers with an RTX retransmission.
    send.receive_nack(now + Duration::from_millis(50), nack_wire);
    let rtx = send.poll_retransmission().expect("rtx packet");
    assert_eq!(rtx.header.ssrc, ssrc + 1);
    assert_eq!(rtx.header.payload_type, 101);

    // The receiver decodes the RTX and recovers the original.
    let recovered = recv
        .receive_rtx_packet(now + Duration::from_millis(60), &rtx)
        .expect("recovered packet");
    assert_eq!(recovered.header.sequence_number, 5);
    assert_eq!(recovered.header.ssrc, ssrc);

    // No residual hole: the next timer emits nothing.
    recv.on_timer(now + Duration::from_millis(200));
    assert!(recv.poll_feedback().is_none());
}

#[test]
fn receiver_report_reflects_loss_over_the_wire() {
    init_log();

    let now = Instant::now();
    let ssrc = 0xBEEF;
    let mut recv = RtpStreamRecv::new(video_params(ssrc), now);

    for seq in 0..20u16 {
        if seq % 4 != 3 {
            recv.receive_packet(now, &media_packet(ssrc, seq, 0));
        }
    }

    // Holes at 3, 7, 11, 15; 19 is missing too but nothing after it has
    // arrived, so it is not yet expected.
    let report = recv.receiver_report(now);
    assert_eq!(report.ssrc, ssrc);
    assert_eq!(report.total_lost, 4);

    // Carry it inside an RR packet across the wire.
    let rr = rtcp::receiver_report::ReceiverReport {
        ssrc: 1,
        reports: vec![report],
        ..Default::default()
    };
    let mut buf = rr.marshal().unwrap();
    let parsed = rtcp::receiver_report::ReceiverReport::unmarshal(&mut buf).unwrap();
    assert_eq!(parsed.reports[0].total_lost, 4);
    assert_eq!(parsed.reports[0].last_sequence_number, 18);
}
