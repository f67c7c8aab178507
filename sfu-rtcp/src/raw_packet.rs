//! Passthrough for APP packets and unrecognized packet types.

use std::any::Any;
use std::fmt;

use bytes::{Buf, Bytes};

use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize, Unmarshal};

use crate::header::{Header, HEADER_LENGTH};
use crate::packet::Packet;

/// An RTCP packet kept as raw bytes, header included.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawPacket(pub Bytes);

impl fmt::Display for RawPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RawPacket({} bytes)", self.0.len())
    }
}

impl RawPacket {
    fn parsed_header(&self) -> Header {
        let mut buf = self.0.clone();
        Header::unmarshal(&mut buf).unwrap_or_default()
    }
}

impl MarshalSize for RawPacket {
    fn marshal_size(&self) -> usize {
        self.0.len()
    }
}

impl Packet for RawPacket {
    fn header(&self) -> Header {
        self.parsed_header()
    }

    fn destination_ssrc(&self) -> Vec<u32> {
        vec![]
    }

    fn as_any(&self) -> &(dyn Any + 'static) {
        self
    }

    fn equal(&self, other: &(dyn Packet + 'static)) -> bool {
        other
            .as_any()
            .downcast_ref::<RawPacket>()
            .is_some_and(|p| self == p)
    }

    fn cloned(&self) -> Box<dyn Packet + 'static> {
        Box::new(self.clone())
    }
}

impl Unmarshal for RawPacket {
    fn unmarshal<B>(buf: &mut B) -> Result<Self>
    where
        B: Buf,
    {
        if buf.remaining() < HEADER_LENGTH {
            return Err(Error::PacketTooShort);
        }
        // Validate the common header even though the body is opaque.
        let raw = buf.copy_to_bytes(buf.remaining());
        let mut peek = raw.clone();
        Header::unmarshal(&mut peek)?;
        Ok(RawPacket(raw))
    }
}

impl Marshal for RawPacket {
    fn marshal_to(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.len() < self.0.len() {
            return Err(Error::BufferTooShort);
        }
        buf[..self.0.len()].copy_from_slice(&self.0);
        Ok(self.0.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::PacketType;

    #[test]
    fn test_raw_packet_round_trip() {
        let mut buf = Bytes::from_static(&[
            0x80, 0xCC, 0x00, 0x02, 0x00, 0x00, 0x00, 0x01, 0x61, 0x62, 0x63, 0x64,
        ]);
        let packet = RawPacket::unmarshal(&mut buf).unwrap();
        assert_eq!(packet.header().packet_type, PacketType::ApplicationDefined);

        let raw = packet.marshal().unwrap();
        assert_eq!(raw, packet.0);
    }

    #[test]
    fn test_raw_packet_invalid_header() {
        let mut buf = Bytes::from_static(&[0x00, 0xCC, 0x00, 0x00]);
        assert_eq!(RawPacket::unmarshal(&mut buf), Err(Error::BadVersion));
    }
}
