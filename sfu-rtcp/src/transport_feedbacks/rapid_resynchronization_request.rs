//! Rapid resynchronization request (RFC 6051 §3.1), the FMT 5 "SR-REQ".

use std::any::Any;
use std::fmt;

use bytes::Buf;

use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize, Unmarshal};

use crate::header::{Header, PacketType, FORMAT_SR_REQ, HEADER_LENGTH, SSRC_LENGTH};
use crate::packet::Packet;

const RRR_LENGTH: usize = HEADER_LENGTH + 2 * SSRC_LENGTH;

/// Asks the media sender to send an RTCP SR as soon as possible.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct RapidResynchronizationRequest {
    pub sender_ssrc: u32,
    pub media_ssrc: u32,
}

impl fmt::Display for RapidResynchronizationRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RapidResynchronizationRequest {:x} {:x}",
            self.sender_ssrc, self.media_ssrc
        )
    }
}

impl MarshalSize for RapidResynchronizationRequest {
    fn marshal_size(&self) -> usize {
        RRR_LENGTH
    }
}

impl Packet for RapidResynchronizationRequest {
    fn header(&self) -> Header {
        Header {
            padding: false,
            count: FORMAT_SR_REQ,
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
            .downcast_ref::<RapidResynchronizationRequest>()
            .is_some_and(|p| self == p)
    }

    fn cloned(&self) -> Box<dyn Packet + 'static> {
        Box::new(*self)
    }
}

impl Unmarshal for RapidResynchronizationRequest {
    fn unmarshal<B>(buf: &mut B) -> Result<Self>
    where
        B: Buf,
    {
        let header = Header::unmarshal(buf)?;
        if header.packet_type != PacketType::TransportSpecificFeedback
            || header.count != FORMAT_SR_REQ
        {
            return Err(Error::WrongType);
        }
        if buf.remaining() < 2 * SSRC_LENGTH {
            return Err(Error::PacketTooShort);
        }

        Ok(RapidResynchronizationRequest {
            sender_ssrc: buf.get_u32(),
            media_ssrc: buf.get_u32(),
        })
    }
}

impl Marshal for RapidResynchronizationRequest {
    fn marshal_to(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.len() < RRR_LENGTH {
            return Err(Error::BufferTooShort);
        }

        let offset = self.header().marshal_to(buf)?;
        buf[offset..offset + 4].copy_from_slice(&self.sender_ssrc.to_be_bytes());
        buf[offset + 4..offset + 8].copy_from_slice(&self.media_ssrc.to_be_bytes());
        Ok(RRR_LENGTH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rrr_round_trip() {
        let rrr = RapidResynchronizationRequest {
            sender_ssrc: 0x902f9e2e,
            media_ssrc: 0x902f9e2e,
        };
        let mut buf = rrr.marshal().unwrap();
        assert_eq!(
            RapidResynchronizationRequest::unmarshal(&mut buf).unwrap(),
            rrr
        );
    }
}
