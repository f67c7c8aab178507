//! Transport layer third-party loss early indication (TLLEI, RFC 6642).
//!
//! The FCI items share the packet id + bitmask shape of generic NACK.

use std::any::Any;
use std::fmt;

use bytes::Buf;

use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize, Unmarshal};

use crate::header::{Header, PacketType, FORMAT_TLLEI, HEADER_LENGTH, SSRC_LENGTH};
use crate::packet::Packet;
use crate::transport_feedbacks::transport_layer_nack::NackPair;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TransportLayerLei {
    pub sender_ssrc: u32,
    pub media_ssrc: u32,
    pub entries: Vec<NackPair>,
}

impl fmt::Display for TransportLayerLei {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TransportLayerLei {:x} {:x} {:?}",
            self.sender_ssrc, self.media_ssrc, self.entries
        )
    }
}

impl MarshalSize for TransportLayerLei {
    fn marshal_size(&self) -> usize {
        HEADER_LENGTH + 2 * SSRC_LENGTH + self.entries.len() * 4
    }
}

impl Packet for TransportLayerLei {
    fn header(&self) -> Header {
        Header {
            padding: false,
            count: FORMAT_TLLEI,
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
            .downcast_ref::<TransportLayerLei>()
            .is_some_and(|p| self == p)
    }

    fn cloned(&self) -> Box<dyn Packet + 'static> {
        Box::new(self.clone())
    }
}

impl Unmarshal for TransportLayerLei {
    fn unmarshal<B>(buf: &mut B) -> Result<Self>
    where
        B: Buf,
    {
        let header = Header::unmarshal(buf)?;
        if header.packet_type != PacketType::TransportSpecificFeedback
            || header.count != FORMAT_TLLEI
        {
            return Err(Error::WrongType);
        }
        if buf.remaining() < 2 * SSRC_LENGTH {
            return Err(Error::PacketTooShort);
        }

        let sender_ssrc = buf.get_u32();
        let media_ssrc = buf.get_u32();
        let mut entries = vec![];
        while buf.remaining() >= 4 {
            entries.push(NackPair {
                packet_id: buf.get_u16(),
                lost_packets: buf.get_u16(),
            });
        }
        if buf.remaining() != 0 {
            return Err(Error::PacketTooShort);
        }

        Ok(TransportLayerLei {
            sender_ssrc,
            media_ssrc,
            entries,
        })
    }
}

impl Marshal for TransportLayerLei {
    fn marshal_to(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.len() < self.marshal_size() {
            return Err(Error::BufferTooShort);
        }

        let mut offset = self.header().marshal_to(buf)?;
        buf[offset..offset + 4].copy_from_slice(&self.sender_ssrc.to_be_bytes());
        buf[offset + 4..offset + 8].copy_from_slice(&self.media_ssrc.to_be_bytes());
        offset += 2 * SSRC_LENGTH;
        for entry in &self.entries {
            buf[offset..offset + 2].copy_from_slice(&entry.packet_id.to_be_bytes());
            buf[offset + 2..offset + 4].copy_from_slice(&entry.lost_packets.to_be_bytes());
            offset += 4;
        }

        Ok(offset)
    }
}
