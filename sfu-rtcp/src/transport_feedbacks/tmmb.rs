//! Temporary maximum media stream bit rate request/notification
//! (TMMBR/TMMBN, RFC 5104 §4.2).

use std::any::Any;
use std::fmt;

use bytes::Buf;

use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize, Unmarshal};

use crate::header::{Header, PacketType, FORMAT_TMMBN, FORMAT_TMMBR, HEADER_LENGTH, SSRC_LENGTH};
use crate::packet::Packet;

const TMMB_ENTRY_LENGTH: usize = 8;
const MANTISSA_MAX: u64 = (1 << 17) - 1;

/// One TMMB FCI entry: target SSRC, maximum total media bitrate and the
/// measured overhead per packet.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct TmmbEntry {
    pub ssrc: u32,
    /// Maximum total media bitrate in bits per second. Carried as a 17-bit
    /// mantissa with a 6-bit exponent, so large values lose precision.
    pub bitrate: u64,
    /// 9-bit per-packet overhead in bytes.
    pub overhead: u16,
}

fn encode_bitrate(bitrate: u64) -> (u8, u64) {
    let mut exp = 0u8;
    let mut mantissa = bitrate;
    while mantissa > MANTISSA_MAX {
        mantissa >>= 1;
        exp += 1;
    }
    (exp, mantissa)
}

fn unmarshal_body<B: Buf>(buf: &mut B) -> Result<(u32, u32, Vec<TmmbEntry>)> {
    if buf.remaining() < 2 * SSRC_LENGTH {
        return Err(Error::PacketTooShort);
    }
    let sender_ssrc = buf.get_u32();
    let media_ssrc = buf.get_u32();

    let mut entries = vec![];
    while buf.remaining() >= TMMB_ENTRY_LENGTH {
        let ssrc = buf.get_u32();
        let word = buf.get_u32();
        let exp = (word >> 26) as u8;
        let mantissa = ((word >> 9) & 0x1FFFF) as u64;
        let overhead = (word & 0x1FF) as u16;
        entries.push(TmmbEntry {
            ssrc,
            bitrate: mantissa << exp,
            overhead,
        });
    }
    if buf.remaining() != 0 {
        return Err(Error::PacketTooShort);
    }
    Ok((sender_ssrc, media_ssrc, entries))
}

fn marshal_body(
    buf: &mut [u8],
    mut offset: usize,
    sender_ssrc: u32,
    media_ssrc: u32,
    entries: &[TmmbEntry],
) -> usize {
    buf[offset..offset + 4].copy_from_slice(&sender_ssrc.to_be_bytes());
    buf[offset + 4..offset + 8].copy_from_slice(&media_ssrc.to_be_bytes());
    offset += 2 * SSRC_LENGTH;
    for entry in entries {
        let (exp, mantissa) = encode_bitrate(entry.bitrate);
        let word = ((exp as u32) << 26)
            | ((mantissa as u32 & 0x1FFFF) << 9)
            | (entry.overhead as u32 & 0x1FF);
        buf[offset..offset + 4].copy_from_slice(&entry.ssrc.to_be_bytes());
        buf[offset + 4..offset + 8].copy_from_slice(&word.to_be_bytes());
        offset += TMMB_ENTRY_LENGTH;
    }
    offset
}

macro_rules! tmmb_packet {
    ($name:ident, $format:expr, $label:expr) => {
        #[derive(Debug, Clone, PartialEq, Eq, Default)]
        pub struct $name {
            pub sender_ssrc: u32,
            pub media_ssrc: u32,
            pub entries: Vec<TmmbEntry>,
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
                HEADER_LENGTH + 2 * SSRC_LENGTH + self.entries.len() * TMMB_ENTRY_LENGTH
            }
        }

        impl Packet for $name {
            fn header(&self) -> Header {
                Header {
                    padding: false,
                    count: $format,
                    packet_type: PacketType::TransportSpecificFeedback,
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
                if header.packet_type != PacketType::TransportSpecificFeedback
                    || header.count != $format
                {
                    return Err(Error::WrongType);
                }
                let (sender_ssrc, media_ssrc, entries) = unmarshal_body(buf)?;
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
                Ok(marshal_body(
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

tmmb_packet!(TmmbRequest, FORMAT_TMMBR, "TMMBR");
tmmb_packet!(TmmbNotification, FORMAT_TMMBN, "TMMBN");
