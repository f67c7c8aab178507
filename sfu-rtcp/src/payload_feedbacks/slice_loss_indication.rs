//! Slice loss indication (SLI).

use std::any::Any;
use std::fmt;

use bytes::Buf;

use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize, Unmarshal};

use crate::header::{Header, PacketType, FORMAT_SLI, HEADER_LENGTH, SSRC_LENGTH};
use crate::packet::Packet;

const SLI_ENTRY_LENGTH: usize = 4;

/// One SLI item: 13-bit first macroblock, 13-bit count, 6-bit picture id.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct SliEntry {
    pub first: u16,
    pub number: u16,
    pub picture: u8,
}

/// An SLI reports the loss of one or more consecutive macroblocks
/// (RFC 4585 §6.3.2).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SliceLossIndication {
    pub sender_ssrc: u32,
    pub media_ssrc: u32,
    pub sli_entries: Vec<SliEntry>,
}

impl fmt::Display for SliceLossIndication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SliceLossIndication {:x} {:x} {:?}",
            self.sender_ssrc, self.media_ssrc, self.sli_entries
        )
    }
}

impl MarshalSize for SliceLossIndication {
    fn marshal_size(&self) -> usize {
        HEADER_LENGTH + 2 * SSRC_LENGTH + self.sli_entries.len() * SLI_ENTRY_LENGTH
    }
}

impl Packet for SliceLossIndication {
    fn header(&self) -> Header {
        Header {
            padding: false,
            count: FORMAT_SLI,
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
            .downcast_ref::<SliceLossIndication>()
            .is_some_and(|p| self == p)
    }

    fn cloned(&self) -> Box<dyn Packet + 'static> {
        Box::new(self.clone())
    }
}

impl Unmarshal for SliceLossIndication {
    fn unmarshal<B>(buf: &mut B) -> Result<Self>
    where
        B: Buf,
    {
        let header = Header::unmarshal(buf)?;
        if header.packet_type != PacketType::PayloadSpecificFeedback
            || header.count != FORMAT_SLI
        {
            return Err(Error::WrongType);
        }
        if buf.remaining() < 2 * SSRC_LENGTH {
            return Err(Error::PacketTooShort);
        }

        let sender_ssrc = buf.get_u32();
        let media_ssrc = buf.get_u32();

        let mut sli_entries = vec![];
        while buf.remaining() >= SLI_ENTRY_LENGTH {
            let word = buf.get_u32();
            sli_entries.push(SliEntry {
                first: (word >> 19) as u16,
                number: ((word >> 6) & 0x1FFF) as u16,
                picture: (word & 0x3F) as u8,
            });
        }
        if buf.remaining() != 0 {
            return Err(Error::PacketTooShort);
        }

        Ok(SliceLossIndication {
            sender_ssrc,
            media_ssrc,
            sli_entries,
        })
    }
}

impl Marshal for SliceLossIndication {
    fn marshal_to(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.len() < self.marshal_size() {
            return Err(Error::BufferTooShort);
        }

        let mut offset = self.header().marshal_to(buf)?;
        buf[offset..offset + 4].copy_from_slice(&self.sender_ssrc.to_be_bytes());
        buf[offset + 4..offset + 8].copy_from_slice(&self.media_ssrc.to_be_bytes());
        offset += 2 * SSRC_LENGTH;

        for entry in &self.sli_entries {
            let word = ((entry.first as u32 & 0x1FFF) << 19)
                | ((entry.number as u32 & 0x1FFF) << 6)
                | (entry.picture as u32 & 0x3F);
            buf[offset..offset + 4].copy_from_slice(&word.to_be_bytes());
            offset += SLI_ENTRY_LENGTH;
        }

        Ok(offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sli_round_trip() {
        let sli = SliceLossIndication {
            sender_ssrc: 0x902f9e2e,
            media_ssrc: 0x902f9e2e,
            sli_entries: vec![
                SliEntry {
                    first: 0x1FFF,
                    number: 1,
                    picture: 0x3F,
                },
                SliEntry {
                    first: 4,
                    number: 8,
                    picture: 15,
                },
            ],
        };

        let raw = sli.marshal().unwrap();
        assert_eq!(raw.len(), 12 + 8);

        let mut buf = raw;
        assert_eq!(SliceLossIndication::unmarshal(&mut buf).unwrap(), sli);
    }
}
