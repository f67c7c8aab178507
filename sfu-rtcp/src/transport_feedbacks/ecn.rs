//! ECN feedback (RFC 6679 §5.1).

use std::any::Any;
use std::fmt;

use bytes::Buf;

use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize, Unmarshal};

use crate::header::{Header, PacketType, FORMAT_ECN, HEADER_LENGTH, SSRC_LENGTH};
use crate::packet::Packet;

const ECN_FCI_LENGTH: usize = 20;

/// Summarized ECN marking counts for one media source.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct EcnFeedback {
    pub sender_ssrc: u32,
    pub media_ssrc: u32,
    pub extended_highest_sequence_number: u32,
    pub ect0_count: u32,
    pub ect1_count: u32,
    pub ecn_ce_count: u16,
    pub not_ect_count: u16,
    pub lost_packets_count: u16,
    pub duplication_count: u16,
}

impl fmt::Display for EcnFeedback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "EcnFeedback {:x} {:x} ce {}",
            self.sender_ssrc, self.media_ssrc, self.ecn_ce_count
        )
    }
}

impl MarshalSize for EcnFeedback {
    fn marshal_size(&self) -> usize {
        HEADER_LENGTH + 2 * SSRC_LENGTH + ECN_FCI_LENGTH
    }
}

impl Packet for EcnFeedback {
    fn header(&self) -> Header {
        Header {
            padding: false,
            count: FORMAT_ECN,
            packet_type: PacketType::TransportSpecificFeedback,
            length: (self.marshal_size() / 4 - 1) as u16,
        }
    }

    fn destination_ssrc(&self) -> Vec<u32> {
        vec![self.media_ssrc]
    }

    fn as_any(&self) -> &(dyn Any + 'static) {
        self
    }

    fn equal(&self, other: &(dyn Packet + 'static)) -> bool {
        other
            .as_any()
            .downcast_ref::<EcnFeedback>()
            .is_some_and(|p| self == p)
    }

    fn cloned(&self) -> Box<dyn Packet + 'static> {
        Box::new(*self)
    }
}

impl Unmarshal for EcnFeedback {
    fn unmarshal<B>(buf: &mut B) -> Result<Self>
    where
        B: Buf,
    {
        let header = Header::unmarshal(buf)?;
        if header.packet_type != PacketType::TransportSpecificFeedback
            || header.count != FORMAT_ECN
        {
            return Err(Error::WrongType);
        }
        if buf.remaining() < 2 * SSRC_LENGTH + ECN_FCI_LENGTH {
            return Err(Error::PacketTooShort);
        }

        Ok(EcnFeedback {
            sender_ssrc: buf.get_u32(),
            media_ssrc: buf.get_u32(),
            extended_highest_sequence_number: buf.get_u32(),
            ect0_count: buf.get_u32(),
            ect1_count: buf.get_u32(),
            ecn_ce_count: buf.get_u16(),
            not_ect_count: buf.get_u16(),
            lost_packets_count: buf.get_u16(),
            duplication_count: buf.get_u16(),
        })
    }
}

impl Marshal for EcnFeedback {
    fn marshal_to(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.len() < self.marshal_size() {
            return Err(Error::BufferTooShort);
        }

        let mut offset = self.header().marshal_to(buf)?;
        buf[offset..offset + 4].copy_from_slice(&self.sender_ssrc.to_be_bytes());
        buf[offset + 4..offset + 8].copy_from_slice(&self.media_ssrc.to_be_bytes());
        offset += 2 * SSRC_LENGTH;
        buf[offset..offset + 4]
            .copy_from_slice(&self.extended_highest_sequence_number.to_be_bytes());
        buf[offset + 4..offset + 8].copy_from_slice(&self.ect0_count.to_be_bytes());
        buf[offset + 8..offset + 12].copy_from_slice(&self.ect1_count.to_be_bytes());
        buf[offset + 12..offset + 14].copy_from_slice(&self.ecn_ce_count.to_be_bytes());
        buf[offset + 14..offset + 16].copy_from_slice(&self.not_ect_count.to_be_bytes());
        buf[offset + 16..offset + 18].copy_from_slice(&self.lost_packets_count.to_be_bytes());
        buf[offset + 18..offset + 20].copy_from_slice(&self.duplication_count.to_be_bytes());
        offset += ECN_FCI_LENGTH;

        Ok(offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ecn_round_trip() {
        let ecn = EcnFeedback {
            sender_ssrc: 1,
            media_ssrc: 2,
            extended_highest_sequence_number: 0x00010002,
            ect0_count: 100,
            ect1_count: 0,
            ecn_ce_count: 3,
            not_ect_count: 4,
            lost_packets_count: 5,
            duplication_count: 6,
        };
        let raw = ecn.marshal().unwrap();
        assert_eq!(raw.len(), 32);

        let mut buf = raw;
        assert_eq!(EcnFeedback::unmarshal(&mut buf).unwrap(), ecn);
    }
}
