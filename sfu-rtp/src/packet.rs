//! RTP packet: header, payload and trailing padding.

use std::fmt;

use bytes::{Buf, Bytes};

use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize, Unmarshal};

use crate::header::Header;

/// An RTP packet.
///
/// When `padding_size` is non zero the header padding flag is set and the
/// serialized form carries `padding_size` trailing bytes, the last of which
/// holds the count (RFC 3550 §5.1).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Packet {
    pub header: Header,
    pub payload: Bytes,
    pub padding_size: u8,
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "RTP PACKET:")?;
        writeln!(f, "\tVersion: {}", self.header.version)?;
        writeln!(f, "\tMarker: {}", self.header.marker)?;
        writeln!(f, "\tPayload Type: {}", self.header.payload_type)?;
        writeln!(f, "\tSequence Number: {}", self.header.sequence_number)?;
        writeln!(f, "\tTimestamp: {}", self.header.timestamp)?;
        writeln!(f, "\tSSRC: {} ({:x})", self.header.ssrc, self.header.ssrc)?;
        writeln!(f, "\tPayload Length: {}", self.payload.len())?;
        writeln!(f, "\tPadding: {}", self.padding_size)
    }
}

impl Packet {
    /// Replaces the payload. Any payload padding is removed, per the
    /// behavior of every payload-rewriting operation.
    pub fn set_payload(&mut self, payload: Bytes) {
        self.payload = payload;
        self.clear_padding();
    }

    pub fn set_padding(&mut self, size: u8) {
        self.padding_size = size;
        self.header.padding = size != 0;
    }

    pub fn clear_padding(&mut self) {
        self.padding_size = 0;
        self.header.padding = false;
    }
}

impl MarshalSize for Packet {
    fn marshal_size(&self) -> usize {
        self.header.marshal_size() + self.payload.len() + self.padding_size as usize
    }
}

impl Unmarshal for Packet {
    fn unmarshal<B>(buf: &mut B) -> Result<Self>
    where
        B: Buf,
    {
        let header = Header::unmarshal(buf)?;
        let rest = buf.copy_to_bytes(buf.remaining());

        let (payload, padding_size) = if header.padding {
            if rest.is_empty() {
                return Err(Error::WrongPadding);
            }
            let padding_size = rest[rest.len() - 1];
            if padding_size == 0 || padding_size as usize > rest.len() {
                return Err(Error::WrongPadding);
            }
            (rest.slice(..rest.len() - padding_size as usize), padding_size)
        } else {
            (rest, 0)
        };

        Ok(Packet {
            header,
            payload,
            padding_size,
        })
    }
}

impl Marshal for Packet {
    fn marshal_to(&self, buf: &mut [u8]) -> Result<usize> {
        if self.header.padding != (self.padding_size != 0) {
            return Err(Error::WrongPadding);
        }
        if buf.len() < self.marshal_size() {
            return Err(Error::BufferTooShort);
        }

        let mut offset = self.header.marshal_to(buf)?;
        buf[offset..offset + self.payload.len()].copy_from_slice(&self.payload);
        offset += self.payload.len();

        if self.padding_size > 0 {
            for b in &mut buf[offset..offset + self.padding_size as usize - 1] {
                *b = 0;
            }
            buf[offset + self.padding_size as usize - 1] = self.padding_size;
            offset += self.padding_size as usize;
        }

        Ok(offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::HEADER_LENGTH;

    #[test]
    fn test_packet_round_trip() {
        let packet = Packet {
            header: Header {
                marker: true,
                payload_type: 111,
                sequence_number: 1234,
                timestamp: 160000,
                ssrc: 0x01020304,
                ..Default::default()
            },
            payload: Bytes::from_static(&[0xDE, 0xAD, 0xBE, 0xEF]),
            padding_size: 0,
        };

        let raw = packet.marshal().unwrap();
        assert_eq!(raw.len(), HEADER_LENGTH + 4);

        let mut buf = raw.clone();
        let parsed = Packet::unmarshal(&mut buf).unwrap();
        assert_eq!(parsed, packet);
    }

    #[test]
    fn test_packet_with_padding_round_trip() {
        let mut packet = Packet {
            payload: Bytes::from_static(&[1, 2, 3]),
            ..Default::default()
        };
        packet.set_padding(5);

        let raw = packet.marshal().unwrap();
        assert_eq!(raw.len(), HEADER_LENGTH + 3 + 5);
        assert_eq!(raw[raw.len() - 1], 5);

        let mut buf = raw.clone();
        let parsed = Packet::unmarshal(&mut buf).unwrap();
        assert_eq!(parsed.payload, packet.payload);
        assert_eq!(parsed.padding_size, 5);
        assert!(parsed.header.padding);
    }

    #[test]
    fn test_packet_zero_padding_rejected() {
        // Padding flag set but last byte is 0.
        let raw = Bytes::from_static(&[
            0xA0, 0x60, 0x00, 0x01, 0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00, 0x03, 0xAA,
            0xBB, 0xCC, 0x00,
        ]);
        let mut buf = raw;
        assert_eq!(Packet::unmarshal(&mut buf), Err(Error::WrongPadding));
    }

    #[test]
    fn test_packet_padding_larger_than_body_rejected() {
        let raw = Bytes::from_static(&[
            0xA0, 0x60, 0x00, 0x01, 0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00, 0x03, 0x00,
            0x00, 0x00, 0x11,
        ]);
        let mut buf = raw;
        assert_eq!(Packet::unmarshal(&mut buf), Err(Error::WrongPadding));
    }

    #[test]
    fn test_set_payload_clears_padding() {
        let mut packet = Packet {
            payload: Bytes::from_static(&[1, 2, 3]),
            ..Default::default()
        };
        packet.set_padding(4);
        packet.set_payload(Bytes::from_static(&[9, 9]));
        assert_eq!(packet.padding_size, 0);
        assert!(!packet.header.padding);
        assert_eq!(packet.marshal_size(), HEADER_LENGTH + 2);
    }

    #[test]
    fn test_unmarshal_never_panics_on_truncation() {
        let mut packet = Packet {
            header: Header {
                csrc: vec![1, 2],
                ..Default::default()
            },
            payload: Bytes::from_static(&[9u8; 23]),
            padding_size: 0,
        };
        packet
            .header
            .set_extension(3, Bytes::from_static(&[1, 2, 3]))
            .unwrap();
        packet.set_padding(5);

        let raw = packet.marshal().unwrap();
        for len in 0..raw.len() {
            let mut buf = raw.slice(..len);
            let _ = Packet::unmarshal(&mut buf);
        }
    }

    #[test]
    fn test_size_invariant() {
        let mut packet = Packet {
            payload: Bytes::from(vec![0u8; 99]),
            ..Default::default()
        };
        packet.set_padding(1);
        packet
            .header
            .set_extension(2, Bytes::from_static(&[7, 7, 7]))
            .unwrap();

        let raw = packet.marshal().unwrap();
        assert_eq!(raw.len(), packet.marshal_size());
        assert_eq!(
            raw.len(),
            packet.header.marshal_size() + packet.payload.len() + packet.padding_size as usize
        );
    }
}
