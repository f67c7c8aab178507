//! Generic application layer feedback (AFB).

use std::any::Any;
use std::fmt;

use bytes::{Buf, Bytes};

use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize, Unmarshal};

use crate::header::{Header, PacketType, FORMAT_AFB, HEADER_LENGTH, SSRC_LENGTH};
use crate::packet::Packet;

/// An AFB (RFC 4585 §6.4) whose payload the engine does not interpret.
/// REMB messages are recognized upstream and parsed separately.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ApplicationLayerFeedback {
    pub sender_ssrc: u32,
    pub media_ssrc: u32,
    pub data: Bytes,
}

impl fmt::Display for ApplicationLayerFeedback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AFB {:x} {:x} ({} bytes)",
            self.sender_ssrc,
            self.media_ssrc,
            self.data.len()
        )
    }
}

impl MarshalSize for ApplicationLayerFeedback {
    fn marshal_size(&self) -> usize {
        HEADER_LENGTH + 2 * SSRC_LENGTH + ((self.data.len() + 3) & !3)
    }
}

impl Packet for ApplicationLayerFeedback {
    fn header(&self) -> Header {
        Header {
            padding: false,
            count: FORMAT_AFB,
            packet_type: PacketType::PayloadSpecificFeedback,
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
            .downcast_ref::<ApplicationLayerFeedback>()
            .is_some_and(|p| self == p)
    }

    fn cloned(&self) -> Box<dyn Packet + 'static> {
        Box::new(self.clone())
    }
}

impl Unmarshal for ApplicationLayerFeedback {
    fn unmarshal<B>(buf: &mut B) -> Result<Self>
    where
        B: Buf,
    {
        let header = Header::unmarshal(buf)?;
        if header.packet_type != PacketType::PayloadSpecificFeedback
            || header.count != FORMAT_AFB
        {
            return Err(Error::WrongType);
        }
        if buf.remaining() < 2 * SSRC_LENGTH {
            return Err(Error::PacketTooShort);
        }

        let sender_ssrc = buf.get_u32();
        let media_ssrc = buf.get_u32();
        let data = buf.copy_to_bytes(buf.remaining());

        Ok(ApplicationLayerFeedback {
            sender_ssrc,
            media_ssrc,
            data,
        })
    }
}

impl Marshal for ApplicationLayerFeedback {
    fn marshal_to(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.len() < self.marshal_size() {
            return Err(Error::BufferTooShort);
        }

        let mut offset = self.header().marshal_to(buf)?;
        buf[offset..offset + 4].copy_from_slice(&self.sender_ssrc.to_be_bytes());
        buf[offset + 4..offset + 8].copy_from_slice(&self.media_ssrc.to_be_bytes());
        offset += 2 * SSRC_LENGTH;
        buf[offset..offset + self.data.len()].copy_from_slice(&self.data);
        offset += self.data.len();
        while offset % 4 != 0 {
            buf[offset] = 0;
            offset += 1;
        }

        Ok(offset)
    }
}
