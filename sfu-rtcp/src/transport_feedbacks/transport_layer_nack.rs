//! Generic NACK (RFC 4585 §6.2.1).

use std::any::Any;
use std::fmt;

use bytes::Buf;

use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize, Unmarshal};

use crate::header::{Header, PacketType, FORMAT_NACK, HEADER_LENGTH, SSRC_LENGTH};
use crate::packet::Packet;

const NACK_PAIR_LENGTH: usize = 4;

/// One NACK item: a packet id plus a bitmask of the 16 following sequence
/// numbers.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct NackPair {
    pub packet_id: u16,
    pub lost_packets: u16,
}

impl NackPair {
    /// All sequence numbers this pair requests, in order.
    pub fn packet_list(&self) -> Vec<u16> {
        let mut seqs = Vec::with_capacity(17);
        seqs.push(self.packet_id);
        for i in 0..16u16 {
            if self.lost_packets & (1 << i) != 0 {
                seqs.push(self.packet_id.wrapping_add(i + 1));
            }
        }
        seqs
    }
}

/// Packs sorted-by-wire-order sequence numbers into the smallest list of
/// NACK pairs.
pub fn nack_pairs_from_sequence_numbers(seq_numbers: &[u16]) -> Vec<NackPair> {
    let mut pairs: Vec<NackPair> = vec![];
    for &seq in seq_numbers {
        if let Some(last) = pairs.last_mut() {
            let distance = seq.wrapping_sub(last.packet_id);
            if distance != 0 && distance <= 16 {
                last.lost_packets |= 1 << (distance - 1);
                continue;
            }
        }
        pairs.push(NackPair {
            packet_id: seq,
            lost_packets: 0,
        });
    }
    pairs
}

/// A transport layer NACK requesting retransmission of specific packets.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TransportLayerNack {
    pub sender_ssrc: u32,
    pub media_ssrc: u32,
    pub nacks: Vec<NackPair>,
}

impl fmt::Display for TransportLayerNack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "TransportLayerNack from {:x}", self.sender_ssrc)?;
        writeln!(f, "\tMedia Ssrc {:x}", self.media_ssrc)?;
        for pair in &self.nacks {
            writeln!(f, "\t{} {:b}", pair.packet_id, pair.lost_packets)?;
        }
        Ok(())
    }
}

impl MarshalSize for TransportLayerNack {
    fn marshal_size(&self) -> usize {
        HEADER_LENGTH + 2 * SSRC_LENGTH + self.nacks.len() * NACK_PAIR_LENGTH
    }
}

impl Packet for TransportLayerNack {
    fn header(&self) -> Header {
        Header {
            padding: false,
            count: FORMAT_NACK,
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
            .downcast_ref::<TransportLayerNack>()
            .is_some_and(|p| self == p)
    }

    fn cloned(&self) -> Box<dyn Packet + 'static> {
        Box::new(self.clone())
    }
}

impl Unmarshal for TransportLayerNack {
    fn unmarshal<B>(buf: &mut B) -> Result<Self>
    where
        B: Buf,
    {
        let header = Header::unmarshal(buf)?;
        if header.packet_type != PacketType::TransportSpecificFeedback
            || header.count != FORMAT_NACK
        {
            return Err(Error::WrongType);
        }
        if buf.remaining() < 2 * SSRC_LENGTH {
            return Err(Error::PacketTooShort);
        }

        let sender_ssrc = buf.get_u32();
        let media_ssrc = buf.get_u32();

        let mut nacks = vec![];
        while buf.remaining() >= NACK_PAIR_LENGTH {
            nacks.push(NackPair {
                packet_id: buf.get_u16(),
                lost_packets: buf.get_u16(),
            });
        }
        if buf.remaining() != 0 {
            return Err(Error::PacketTooShort);
        }

        Ok(TransportLayerNack {
            sender_ssrc,
            media_ssrc,
            nacks,
        })
    }
}

impl Marshal for TransportLayerNack {
    fn marshal_to(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.len() < self.marshal_size() {
            return Err(Error::BufferTooShort);
        }

        let mut offset = self.header().marshal_to(buf)?;
        buf[offset..offset + 4].copy_from_slice(&self.sender_ssrc.to_be_bytes());
        buf[offset + 4..offset + 8].copy_from_slice(&self.media_ssrc.to_be_bytes());
        offset += 2 * SSRC_LENGTH;

        for pair in &self.nacks {
            buf[offset..offset + 2].copy_from_slice(&pair.packet_id.to_be_bytes());
            buf[offset + 2..offset + 4].copy_from_slice(&pair.lost_packets.to_be_bytes());
            offset += NACK_PAIR_LENGTH;
        }

        Ok(offset)
    }
}
