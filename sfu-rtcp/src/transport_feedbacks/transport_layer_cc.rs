//! Transport-wide congestion control feedback
//! (draft-holmer-rmcat-transport-wide-cc-extensions-01).

use std::any::Any;
use std::fmt;

use bytes::Buf;

use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize, Unmarshal};

use crate::header::{Header, PacketType, FORMAT_TCC, HEADER_LENGTH, SSRC_LENGTH};
use crate::packet::Packet;

/// Microseconds per delta tick.
pub const TYPE_TCC_DELTA_SCALE_FACTOR: i64 = 250;
/// Microseconds per reference-time tick.
pub const REFERENCE_TIME_SCALE_FACTOR: i64 = 64_000;

const CHUNK_LENGTH: usize = 2;
const ONE_BIT_CAPACITY: usize = 14;
const TWO_BIT_CAPACITY: usize = 7;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum StatusChunkTypeTcc {
    #[default]
    RunLengthChunk = 0,
    StatusVectorChunk = 1,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum SymbolSizeTypeTcc {
    #[default]
    OneBit = 0,
    TwoBit = 1,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum SymbolTypeTcc {
    #[default]
    PacketNotReceived = 0,
    PacketReceivedSmallDelta = 1,
    PacketReceivedLargeDelta = 2,
    PacketReceivedWithoutDelta = 3,
}

impl From<u16> for SymbolTypeTcc {
    fn from(v: u16) -> Self {
        match v & 0x3 {
            1 => SymbolTypeTcc::PacketReceivedSmallDelta,
            2 => SymbolTypeTcc::PacketReceivedLargeDelta,
            3 => SymbolTypeTcc::PacketReceivedWithoutDelta,
            _ => SymbolTypeTcc::PacketNotReceived,
        }
    }
}

/// A run of identical packet status symbols.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct RunLengthChunk {
    pub type_tcc: StatusChunkTypeTcc,
    pub packet_status_symbol: SymbolTypeTcc,
    /// 13-bit run length.
    pub run_length: u16,
}

/// An explicit vector of 14 one-bit or 7 two-bit symbols.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatusVectorChunk {
    pub type_tcc: StatusChunkTypeTcc,
    pub symbol_size: SymbolSizeTypeTcc,
    pub symbol_list: Vec<SymbolTypeTcc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketStatusChunk {
    RunLengthChunk(RunLengthChunk),
    StatusVectorChunk(StatusVectorChunk),
}

impl PacketStatusChunk {
    /// Status symbols carried by this chunk, capped at `max`.
    fn symbols(&self, max: usize) -> Vec<SymbolTypeTcc> {
        match self {
            PacketStatusChunk::RunLengthChunk(c) => {
                let n = (c.run_length as usize).min(max);
                vec![c.packet_status_symbol; n]
            }
            PacketStatusChunk::StatusVectorChunk(c) => {
                c.symbol_list.iter().copied().take(max).collect()
            }
        }
    }

    fn encode(&self) -> Result<u16> {
        match self {
            PacketStatusChunk::RunLengthChunk(c) => {
                if c.run_length > 0x1FFF {
                    return Err(Error::PacketStatusChunkLength);
                }
                Ok(((c.packet_status_symbol as u16) << 13) | c.run_length)
            }
            PacketStatusChunk::StatusVectorChunk(c) => {
                let mut word = 1u16 << 15;
                match c.symbol_size {
                    SymbolSizeTypeTcc::OneBit => {
                        if c.symbol_list.len() > ONE_BIT_CAPACITY {
                            return Err(Error::PacketStatusChunkLength);
                        }
                        for (i, symbol) in c.symbol_list.iter().enumerate() {
                            if *symbol == SymbolTypeTcc::PacketReceivedSmallDelta {
                                word |= 1 << (13 - i);
                            }
                        }
                    }
                    SymbolSizeTypeTcc::TwoBit => {
                        if c.symbol_list.len() > TWO_BIT_CAPACITY {
                            return Err(Error::PacketStatusChunkLength);
                        }
                        word |= 1 << 14;
                        for (i, symbol) in c.symbol_list.iter().enumerate() {
                            word |= (*symbol as u16) << (12 - 2 * i);
                        }
                    }
                }
                Ok(word)
            }
        }
    }

    fn decode(word: u16) -> PacketStatusChunk {
        if word & (1 << 15) == 0 {
            PacketStatusChunk::RunLengthChunk(RunLengthChunk {
                type_tcc: StatusChunkTypeTcc::RunLengthChunk,
                packet_status_symbol: SymbolTypeTcc::from(word >> 13),
                run_length: word & 0x1FFF,
            })
        } else if word & (1 << 14) == 0 {
            let symbol_list = (0..ONE_BIT_CAPACITY)
                .map(|i| {
                    if word & (1 << (13 - i)) != 0 {
                        SymbolTypeTcc::PacketReceivedSmallDelta
                    } else {
                        SymbolTypeTcc::PacketNotReceived
                    }
                })
                .collect();
            PacketStatusChunk::StatusVectorChunk(StatusVectorChunk {
                type_tcc: StatusChunkTypeTcc::StatusVectorChunk,
                symbol_size: SymbolSizeTypeTcc::OneBit,
                symbol_list,
            })
        } else {
            let symbol_list = (0..TWO_BIT_CAPACITY)
                .map(|i| SymbolTypeTcc::from(word >> (12 - 2 * i)))
                .collect();
            PacketStatusChunk::StatusVectorChunk(StatusVectorChunk {
                type_tcc: StatusChunkTypeTcc::StatusVectorChunk,
                symbol_size: SymbolSizeTypeTcc::TwoBit,
                symbol_list,
            })
        }
    }
}

/// One receive-time delta, in microseconds (a multiple of 250).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct RecvDelta {
    pub type_tcc_packet: SymbolTypeTcc,
    pub delta: i64,
}

impl RecvDelta {
    fn wire_size(&self) -> Result<usize> {
        let ticks = self.delta / TYPE_TCC_DELTA_SCALE_FACTOR;
        match self.type_tcc_packet {
            SymbolTypeTcc::PacketReceivedSmallDelta => {
                if !(0..=0xFF).contains(&ticks) {
                    return Err(Error::DeltaExceedLimit);
                }
                Ok(1)
            }
            SymbolTypeTcc::PacketReceivedLargeDelta => {
                if ticks < i16::MIN as i64 || ticks > i16::MAX as i64 {
                    return Err(Error::DeltaExceedLimit);
                }
                Ok(2)
            }
            _ => Err(Error::WrongFeedbackType),
        }
    }
}

/// The decoded status of one transport-wide sequence number.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PacketResult {
    pub sequence_number: u16,
    pub received: bool,
    /// Arrival time in microseconds on the reporting peer's reference
    /// clock, when received with a delta.
    pub received_at_us: Option<i64>,
}

/// A TWCC feedback packet: per-packet arrival info for a window of
/// transport-wide sequence numbers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TransportLayerCc {
    pub sender_ssrc: u32,
    pub media_ssrc: u32,
    pub base_sequence_number: u16,
    pub packet_status_count: u16,
    /// 24-bit reference time in 64 ms units.
    pub reference_time: u32,
    pub fb_pkt_count: u8,
    pub packet_chunks: Vec<PacketStatusChunk>,
    pub recv_deltas: Vec<RecvDelta>,
}

impl fmt::Display for TransportLayerCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "TransportLayerCc:")?;
        writeln!(f, "\tSender Ssrc {:x}", self.sender_ssrc)?;
        writeln!(f, "\tMedia Ssrc {:x}", self.media_ssrc)?;
        writeln!(f, "\tBase Sequence Number {}", self.base_sequence_number)?;
        writeln!(f, "\tStatus Count {}", self.packet_status_count)?;
        writeln!(f, "\tReference Time {}", self.reference_time)?;
        writeln!(f, "\tFeedback Packet Count {}", self.fb_pkt_count)
    }
}

impl TransportLayerCc {
    fn body_size(&self) -> usize {
        let deltas: usize = self
            .recv_deltas
            .iter()
            .map(|d| d.wire_size().unwrap_or(2))
            .sum();
        2 * SSRC_LENGTH + 8 + self.packet_chunks.len() * CHUNK_LENGTH + deltas
    }

    /// Expands chunks and deltas into one entry per reported sequence
    /// number.
    pub fn packet_results(&self) -> Vec<PacketResult> {
        let mut symbols = Vec::with_capacity(self.packet_status_count as usize);
        for chunk in &self.packet_chunks {
            let left = self.packet_status_count as usize - symbols.len();
            if left == 0 {
                break;
            }
            symbols.extend(chunk.symbols(left));
        }

        let mut results = Vec::with_capacity(symbols.len());
        let mut arrival_us =
            self.reference_time as i64 * REFERENCE_TIME_SCALE_FACTOR;
        let mut deltas = self.recv_deltas.iter();

        for (i, symbol) in symbols.iter().enumerate() {
            let sequence_number = self.base_sequence_number.wrapping_add(i as u16);
            match symbol {
                SymbolTypeTcc::PacketReceivedSmallDelta
                | SymbolTypeTcc::PacketReceivedLargeDelta => {
                    let received_at_us = deltas.next().map(|d| {
                        arrival_us += d.delta;
                        arrival_us
                    });
                    results.push(PacketResult {
                        sequence_number,
                        received: true,
                        received_at_us,
                    });
                }
                SymbolTypeTcc::PacketReceivedWithoutDelta => {
                    results.push(PacketResult {
                        sequence_number,
                        received: true,
                        received_at_us: None,
                    });
                }
                SymbolTypeTcc::PacketNotReceived => {
                    results.push(PacketResult {
                        sequence_number,
                        received: false,
                        received_at_us: None,
                    });
                }
            }
        }

        results
    }
}

impl MarshalSize for TransportLayerCc {
    fn marshal_size(&self) -> usize {
        let raw = HEADER_LENGTH + self.body_size();
        (raw + 3) & !3
    }
}

impl Packet for TransportLayerCc {
    fn header(&self) -> Header {
        let raw = HEADER_LENGTH + self.body_size();
        Header {
            padding: raw % 4 != 0,
            count: FORMAT_TCC,
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
            .downcast_ref::<TransportLayerCc>()
            .is_some_and(|p| self == p)
    }

    fn cloned(&self) -> Box<dyn Packet + 'static> {
        Box::new(self.clone())
    }
}

impl Unmarshal for TransportLayerCc {
    fn unmarshal<B>(buf: &mut B) -> Result<Self>
    where
        B: Buf,
    {
        let header = Header::unmarshal(buf)?;
        if header.packet_type != PacketType::TransportSpecificFeedback
            || header.count != FORMAT_TCC
        {
            return Err(Error::WrongType);
        }
        if buf.remaining() < 2 * SSRC_LENGTH + 8 {
            return Err(Error::PacketTooShort);
        }

        let sender_ssrc = buf.get_u32();
        let media_ssrc = buf.get_u32();
        let base_sequence_number = buf.get_u16();
        let packet_status_count = buf.get_u16();

        let b0 = buf.get_u8();
        let b1 = buf.get_u8();
        let b2 = buf.get_u8();
        let reference_time = ((b0 as u32) << 16) | ((b1 as u32) << 8) | b2 as u32;
        let fb_pkt_count = buf.get_u8();

        let mut packet_chunks = vec![];
        let mut symbol_count = 0usize;
        while symbol_count < packet_status_count as usize {
            if buf.remaining() < CHUNK_LENGTH {
                return Err(Error::PacketTooShort);
            }
            let chunk = PacketStatusChunk::decode(buf.get_u16());
            symbol_count += chunk.symbols(usize::MAX).len();
            packet_chunks.push(chunk);
        }

        // Deltas follow, one per received-with-delta symbol.
        let mut symbols = Vec::with_capacity(packet_status_count as usize);
        for chunk in &packet_chunks {
            let left = packet_status_count as usize - symbols.len();
            symbols.extend(chunk.symbols(left));
        }

        let mut recv_deltas = vec![];
        for symbol in symbols {
            match symbol {
                SymbolTypeTcc::PacketReceivedSmallDelta => {
                    if buf.remaining() < 1 {
                        return Err(Error::PacketTooShort);
                    }
                    recv_deltas.push(RecvDelta {
                        type_tcc_packet: symbol,
                        delta: buf.get_u8() as i64 * TYPE_TCC_DELTA_SCALE_FACTOR,
                    });
                }
                SymbolTypeTcc::PacketReceivedLargeDelta => {
                    if buf.remaining() < 2 {
                        return Err(Error::PacketTooShort);
                    }
                    recv_deltas.push(RecvDelta {
                        type_tcc_packet: symbol,
                        delta: buf.get_i16() as i64 * TYPE_TCC_DELTA_SCALE_FACTOR,
                    });
                }
                _ => {}
            }
        }

        Ok(TransportLayerCc {
            sender_ssrc,
            media_ssrc,
            base_sequence_number,
            packet_status_count,
            reference_time,
            fb_pkt_count,
            packet_chunks,
            recv_deltas,
        })
    }
}

impl Marshal for TransportLayerCc {
    fn marshal_to(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.len() < self.marshal_size() {
            return Err(Error::BufferTooShort);
        }

        let mut offset = self.header().marshal_to(buf)?;
        buf[offset..offset + 4].copy_from_slice(&self.sender_ssrc.to_be_bytes());
        buf[offset + 4..offset + 8].copy_from_slice(&self.media_ssrc.to_be_bytes());
        offset += 2 * SSRC_LENGTH;

        buf[offset..offset + 2].copy_from_slice(&self.base_sequence_number.to_be_bytes());
        buf[offset + 2..offset + 4].copy_from_slice(&self.packet_status_count.to_be_bytes());
        buf[offset + 4] = (self.reference_time >> 16) as u8;
        buf[offset + 5] = (self.reference_time >> 8) as u8;
        buf[offset + 6] = self.reference_time as u8;
        buf[offset + 7] = self.fb_pkt_count;
        offset += 8;

        for chunk in &self.packet_chunks {
            buf[offset..offset + 2].copy_from_slice(&chunk.encode()?.to_be_bytes());
            offset += CHUNK_LENGTH;
        }

        for delta in &self.recv_deltas {
            let ticks = delta.delta / TYPE_TCC_DELTA_SCALE_FACTOR;
            match delta.wire_size()? {
                1 => {
                    buf[offset] = ticks as u8;
                    offset += 1;
                }
                _ => {
                    buf[offset..offset + 2].copy_from_slice(&(ticks as i16).to_be_bytes());
                    offset += 2;
                }
            }
        }

        // Zero pad to the 32-bit boundary the length field declares.
        let end = self.marshal_size();
        let padding = end - offset;
        while offset < end {
            buf[offset] = 0;
            offset += 1;
        }
        if padding > 0 {
            buf[end - 1] = padding as u8;
        }

        Ok(offset)
    }
}
