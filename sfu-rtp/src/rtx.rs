//! RFC 4588 retransmission payload format.
//!
//! An RTX packet carries a copy of an original packet on a separate
//! SSRC/payload type, with the original sequence number prepended to the
//! payload.

use bytes::{BufMut, Bytes, BytesMut};

use shared::error::{Error, Result};

use crate::packet::Packet;

/// Wraps `packet` into its RTX form. Payload padding does not survive the
/// rewrite (the payload grows by the 2-byte original sequence number).
pub fn encode(packet: &Packet, payload_type: u8, ssrc: u32, sequence_number: u16) -> Packet {
    let mut header = packet.header.clone();
    header.payload_type = payload_type;
    header.ssrc = ssrc;
    header.sequence_number = sequence_number;
    header.padding = false;

    let mut payload = BytesMut::with_capacity(2 + packet.payload.len());
    payload.put_u16(packet.header.sequence_number);
    payload.extend_from_slice(&packet.payload);

    Packet {
        header,
        payload: payload.freeze(),
        padding_size: 0,
    }
}

/// Unwraps an RTX packet back into the original stream identified by
/// `payload_type` / `ssrc`. Padding never survives the rewrite, whatever
/// the RTX wire packet carried.
pub fn decode(packet: &Packet, payload_type: u8, ssrc: u32) -> Result<Packet> {
    if packet.payload.len() < 2 {
        return Err(Error::RtxPayloadTooShort);
    }

    let original_seq = u16::from_be_bytes([packet.payload[0], packet.payload[1]]);

    let mut header = packet.header.clone();
    header.payload_type = payload_type;
    header.ssrc = ssrc;
    header.sequence_number = original_seq;
    header.padding = false;

    Ok(Packet {
        header,
        payload: packet.payload.slice(2..),
        padding_size: 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::Header;
    use shared::marshal::{Marshal, MarshalSize};

    fn media_packet(seq: u16, payload: &'static [u8]) -> Packet {
        Packet {
            header: Header {
                payload_type: 100,
                sequence_number: seq,
                timestamp: 90000,
                ssrc: 0x1234,
                marker: true,
                ..Default::default()
            },
            payload: Bytes::from_static(payload),
            padding_size: 0,
        }
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let original = media_packet(80, &[1, 2, 3, 4]);

        let rtx = encode(&original, 102, 6, 500);
        assert_eq!(rtx.header.payload_type, 102);
        assert_eq!(rtx.header.ssrc, 6);
        assert_eq!(rtx.header.sequence_number, 500);
        assert_eq!(rtx.header.timestamp, original.header.timestamp);
        assert_eq!(rtx.payload.len(), original.payload.len() + 2);
        assert_eq!(&rtx.payload[..2], &[0, 80]);

        let decoded = decode(&rtx, 100, 0x1234).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_encode_removes_padding() {
        // 30-byte packet: 12 header + 14 payload + 4 padding.
        let mut original = media_packet(80, &[0xAB; 14]);
        original.set_padding(4);
        assert_eq!(original.marshal_size(), 30);

        let rtx = encode(&original, 102, 6, 80);
        assert_eq!(rtx.padding_size, 0);
        assert!(!rtx.header.padding);
        assert_eq!(rtx.marshal_size(), 28);

        let decoded = decode(&rtx, 100, 0x1234).unwrap();
        assert_eq!(decoded.header.sequence_number, 80);
        assert_eq!(decoded.payload, original.payload);
        assert_eq!(decoded.padding_size, 0);
    }

    #[test]
    fn test_decode_strips_rtx_packet_padding() {
        // An RTX packet that itself carries padding: the decoded packet
        // must not inherit it.
        let original = media_packet(80, &[1, 2, 3, 4]);
        let mut rtx = encode(&original, 102, 6, 500);
        rtx.set_padding(4);

        let decoded = decode(&rtx, 100, 0x1234).unwrap();
        assert_eq!(decoded.padding_size, 0);
        assert!(!decoded.header.padding);
        assert_eq!(decoded.payload, original.payload);
    }

    #[test]
    fn test_decode_short_payload_rejected() {
        let rtx = Packet {
            payload: Bytes::from_static(&[0x01]),
            ..Default::default()
        };
        assert_eq!(decode(&rtx, 100, 1), Err(Error::RtxPayloadTooShort));
    }

    #[test]
    fn test_rtx_wire_shape() {
        let original = media_packet(0x0102, &[9, 8, 7]);
        let rtx = encode(&original, 97, 0xAABB, 3);
        let raw = rtx.marshal().unwrap();
        // Original seq sits right after the fixed header.
        assert_eq!(raw[12], 0x01);
        assert_eq!(raw[13], 0x02);
    }
}
