//! Payload-specific third-party loss early indication (PSLEI).

use std::any::Any;
use std::fmt;

use bytes::Buf;

use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize, Unmarshal};

use crate::header::{Header, PacketType, FORMAT_PSLEI, HEADER_LENGTH, SSRC_LENGTH};
use crate::packet::Packet;

/// A PSLEI (RFC 6642): each FCI item names one SSRC the sender has detected
/// loss for on behalf of a third party.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PayloadSpecificLei {
    pub sender_ssrc: u32,
    pub media_ssrc: u32,
    pub ssrcs: Vec<u32>,
}

impl fmt::Display for PayloadSpecificLei {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PSLEI {:x} {:x} {:?}",
            self.sender_ssrc, self.media_ssrc, self.ssrcs
        )
    }
}

impl MarshalSize for PayloadSpecificLei {
    fn marshal_size(&self) -> usize {
        HEADER_LENGTH + 2 * SSRC_LENGTH + self.ssrcs.len() * SSRC_LENGTH
    }
}

impl Packet for PayloadSpecificLei {
    fn header(&self) -> Header {
        Header {
            padding: false,
            count: FORMAT_PSLEI,
            packet_type: PacketType::PayloadSpecificFeedback,
            length: (self.marshal_size() / 4 - 1) as u16,
        }
    }

    fn destination_ssrc(&self) -> Vec<u32> {
        self.ssrcs.clone()
    }

    fn as_any(&self) -> &(dyn Any + 'static) {
        self
    }

    fn equal(&self, other: &(dyn Packet + 'static)) -> bool {
        other
            .as_any()
            .downcast_ref::<PayloadSpecificLei>()
            .is_some_and(|p| self == p)
    }

    fn cloned(&self) -> Box<dyn Packet + 'static> {
        Box::new(self.clone())
    }
}

impl Unmarshal for PayloadSpecificLei {
    fn unmarshal<B>(buf: &mut B) -> Result<Self>
    where
        B: Buf,
    {
        let header = Header::unmarshal(buf)?;
        if header.packet_type != PacketType::PayloadSpecificFeedback
            || header.count != FORMAT_PSLEI
        {
            return Err(Error::WrongType);
        }
        if buf.remaining() < 2 * SSRC_LENGTH {
            return Err(Error::PacketTooShort);
        }

        let sender_ssrc = buf.get_u32();
        let media_ssrc = buf.get_u32();
        let mut ssrcs = vec![];
        while buf.remaining() >= SSRC_LENGTH {
            ssrcs.push(buf.get_u32());
        }
        if buf.remaining() != 0 {
            return Err(Error::PacketTooShort);
        }

        Ok(PayloadSpecificLei {
            sender_ssrc,
            media_ssrc,
            ssrcs,
        })
    }
}

impl Marshal for PayloadSpecificLei {
    fn marshal_to(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.len() < self.marshal_size() {
            return Err(Error::BufferTooShort);
        }

        let mut offset = self.header().marshal_to(buf)?;
        buf[offset..offset + 4].copy_from_slice(&self.sender_ssrc.to_be_bytes());
        buf[offset + 4..offset + 8].copy_from_slice(&self.media_ssrc.to_be_bytes());
        offset += 2 * SSRC_LENGTH;
        for ssrc in &self.ssrcs {
            buf[offset..offset + 4].copy_from_slice(&ssrc.to_be_bytes());
            offset += SSRC_LENGTH;
        }

        Ok(offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pslei_round_trip() {
        let lei = PayloadSpecificLei {
            sender_ssrc: 1,
            media_ssrc: 2,
            ssrcs: vec![3, 4, 5],
        };
        let mut buf = lei.marshal().unwrap();
        assert_eq!(PayloadSpecificLei::unmarshal(&mut buf).unwrap(), lei);
    }
}
