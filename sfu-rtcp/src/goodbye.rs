//! Goodbye (BYE) packet.

use std::any::Any;
use std::fmt;

use bytes::Buf;

use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize, Unmarshal};

use crate::header::{Header, PacketType, COUNT_MAX, HEADER_LENGTH, SSRC_LENGTH};
use crate::packet::Packet;

/// A BYE packet indicating one or more sources are no longer active
/// (RFC 3550 §6.6).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Goodbye {
    pub sources: Vec<u32>,
    pub reason: String,
}

impl fmt::Display for Goodbye {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Goodbye(sources: {:?}, reason: {:?})", self.sources, self.reason)
    }
}

impl MarshalSize for Goodbye {
    fn marshal_size(&self) -> usize {
        let mut size = HEADER_LENGTH + self.sources.len() * SSRC_LENGTH;
        if !self.reason.is_empty() {
            size += (1 + self.reason.len() + 3) & !3;
        }
        size
    }
}

impl Packet for Goodbye {
    fn header(&self) -> Header {
        Header {
            padding: false,
            count: self.sources.len() as u8,
            packet_type: PacketType::Goodbye,
            length: (self.marshal_size() / 4 - 1) as u16,
        }
    }

    fn destination_ssrc(&self) -> Vec<u32> {
        self.sources.clone()
    }

    fn as_any(&self) -> &(dyn Any + 'static) {
        self
    }

    fn equal(&self, other: &(dyn Packet + 'static)) -> bool {
        other
            .as_any()
            .downcast_ref::<Goodbye>()
            .is_some_and(|p| self == p)
    }

    fn cloned(&self) -> Box<dyn Packet + 'static> {
        Box::new(self.clone())
    }
}

impl Unmarshal for Goodbye {
    fn unmarshal<B>(buf: &mut B) -> Result<Self>
    where
        B: Buf,
    {
        let header = Header::unmarshal(buf)?;
        if header.packet_type != PacketType::Goodbye {
            return Err(Error::WrongType);
        }
        if buf.remaining() < header.count as usize * SSRC_LENGTH {
            return Err(Error::PacketTooShort);
        }

        let mut sources = Vec::with_capacity(header.count as usize);
        for _ in 0..header.count {
            sources.push(buf.get_u32());
        }

        let reason = if buf.remaining() > 0 {
            let len = buf.get_u8() as usize;
            if len > buf.remaining() {
                return Err(Error::PacketTooShort);
            }
            let raw = buf.copy_to_bytes(len);
            String::from_utf8_lossy(&raw).into_owned()
        } else {
            String::new()
        };

        Ok(Goodbye { sources, reason })
    }
}

impl Marshal for Goodbye {
    fn marshal_to(&self, buf: &mut [u8]) -> Result<usize> {
        if self.sources.len() > COUNT_MAX {
            return Err(Error::TooManySources);
        }
        if self.reason.len() > 255 {
            return Err(Error::ReasonTooLong);
        }
        if buf.len() < self.marshal_size() {
            return Err(Error::BufferTooShort);
        }

        let mut offset = self.header().marshal_to(buf)?;
        for source in &self.sources {
            buf[offset..offset + 4].copy_from_slice(&source.to_be_bytes());
            offset += SSRC_LENGTH;
        }

        if !self.reason.is_empty() {
            buf[offset] = self.reason.len() as u8;
            offset += 1;
            buf[offset..offset + self.reason.len()].copy_from_slice(self.reason.as_bytes());
            offset += self.reason.len();
            while offset % 4 != 0 {
                buf[offset] = 0;
                offset += 1;
            }
        }

        Ok(offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn test_goodbye_round_trip() {
        let bye = Goodbye {
            sources: vec![0x01020304, 0x05060708],
            reason: "done".to_string(),
        };

        let raw = bye.marshal().unwrap();
        assert_eq!(raw.len() % 4, 0);

        let mut buf = raw;
        assert_eq!(Goodbye::unmarshal(&mut buf).unwrap(), bye);
    }

    #[test]
    fn test_goodbye_no_reason() {
        let bye = Goodbye {
            sources: vec![7],
            ..Default::default()
        };
        let raw = bye.marshal().unwrap();
        assert_eq!(raw.len(), 8);

        let mut buf = raw;
        assert_eq!(Goodbye::unmarshal(&mut buf).unwrap(), bye);
    }

    #[test]
    fn test_goodbye_truncated_reason() {
        let mut raw = Bytes::from_static(&[
            0x81, 0xCB, 0x00, 0x02, 0x00, 0x00, 0x00, 0x07, 0x10, 0x61, 0x62, 0x00,
        ]);
        assert_eq!(Goodbye::unmarshal(&mut raw), Err(Error::PacketTooShort));
    }

    #[test]
    fn test_goodbye_reason_too_long() {
        let bye = Goodbye {
            sources: vec![],
            reason: "x".repeat(256),
        };
        assert_eq!(bye.marshal(), Err(Error::ReasonTooLong));
    }
}
