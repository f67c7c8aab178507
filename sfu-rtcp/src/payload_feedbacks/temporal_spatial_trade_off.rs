//! Temporal-spatial trade-off request/notification (TSTR/TSTN).

use std::any::Any;
use std::fmt;

use bytes::Buf;

use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize, Unmarshal};

use crate::header::{Header, PacketType, FORMAT_TSTN, FORMAT_TSTR, HEADER_LENGTH, SSRC_LENGTH};
use crate::packet::Packet;

const TST_ENTRY_LENGTH: usize = 8;

/// One TST FCI entry: target SSRC, request sequence number and the 5-bit
/// trade-off index (RFC 5104 §4.3.2).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct TstEntry {
    pub ssrc: u32,
    pub sequence_number: u8,
    pub index: u8,
}

fn unmarshal_entries<B: Buf>(buf: &mut B) -> Result<(u32, u32, Vec<TstEntry>)> {
    if buf.remaining() < 2 * SSRC_LENGTH {
        return Err(Error::PacketTooShort);
    }
    let sender_ssrc = buf.get_u32();
    let media_ssrc = buf.get_u32();

    let mut entries = vec![];
    while buf.remaining() >= TST_ENTRY_LENGTH {
        let ssrc = buf.get_u32();
        let sequence_number = buf.get_u8();
        buf.advance(2); // reserved
        let index = buf.get_u8() & 0x1F;
        entries.push(TstEntry {
            ssrc,
            sequence_number,
            index,
        });
    }
    if buf.remaining() != 0 {
        return Err(Error::PacketTooShort);
    }
    Ok((sender_ssrc, media_ssrc, entries))
}

fn marshal_entries(
    buf: &mut [u8],
    mut offset: usize,
    sender_ssrc: u32,
    media_ssrc: u32,
    entries: &[TstEntry],
) -> usize {
    buf[offset..offset + 4].copy_from_slice(&sender_ssrc.to_be_bytes());
    buf[offset + 4..offset + 8].copy_from_slice(&media_ssrc.to_be_bytes());
    offset += 2 * SSRC_LENGTH;
    for entry in entries {
        buf[offset..offset + 4].copy_from_slice(&entry.ssrc.to_be_bytes());
        buf[offset + 4] = entry.sequence_number;
        buf[offset + 5] = 0;
        buf[offset + 6] = 0;
        buf[offset + 7] = entry.index & 0x1F;
        offset += TST_ENTRY_LENGTH;
    }
    offset
}

macro_rules! tst_packet {
    ($name:ident, $format:expr, $label:expr) => {
        #[derive(Debug, Clone, PartialEq, Eq, Default)]
        pub struct $name {
            pub sender_ssrc: u32,
            pub media_ssrc: u32,
            pub entries: Vec<TstEntry>,
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(
                    f,
                    concat!($label, " {:x} {:x} {:?}"),
                    self.sender_ssrc, self.media_ssrc, self.entries
                )
            }
        }

        impl MarshalSize for $name {
            fn marshal_size(&self) -> usize {
                HEADER_LENGTH + 2 * SSRC_LENGTH + self.entries.len() * TST_ENTRY_LENGTH
            }
        }

        impl Packet for $name {
            fn header(&self) -> Header {
                Header {
                    padding: false,
                    count: $format,
                    packet_type: PacketType::PayloadSpecificFeedback,
                    length: (self.marshal_size() / 4 - 1) as u16,
                }
            }

            fn destination_ssrc(&self) -> Vec<u32> {
                self.entries.iter().map(|e| e.ssrc).collect()
            }

            fn as_any(&self) -> &(dyn Any + 'static) {
                self
            }

            fn equal(&self, other: &(dyn Packet + 'static)) -> bool {
                other.as_any().downcast_ref::<$name>().is_some_and(|p| self == p)
            }

            fn cloned(&self) -> Box<dyn Packet + 'static> {
                Box::new(self.clone())
            }
        }

        impl Unmarshal for $name {
            fn unmarshal<B>(buf: &mut B) -> Result<Self>
            where
                B: Buf,
            {
                let header = Header::unmarshal(buf)?;
                if header.packet_type != PacketType::PayloadSpecificFeedback
                    || header.count != $format
                {
                    return Err(Error::WrongType);
                }
                let (sender_ssrc, media_ssrc, entries) = unmarshal_entries(buf)?;
                Ok($name {
                    sender_ssrc,
                    media_ssrc,
                    entries,
                })
            }
        }

        impl Marshal for $name {
            fn marshal_to(&self, buf: &mut [u8]) -> Result<usize> {
                if buf.len() < self.marshal_size() {
                    return Err(Error::BufferTooShort);
                }
                let offset = self.header().marshal_to(buf)?;
                Ok(marshal_entries(
                    buf,
                    offset,
                    self.sender_ssrc,
                    self.media_ssrc,
                    &self.entries,
                ))
            }
        }
    };
}

tst_packet!(TemporalSpatialTradeOffRequest, FORMAT_TSTR, "TSTR");
tst_packet!(TemporalSpatialTradeOffNotification, FORMAT_TSTN, "TSTN");
