//! Source description (SDES) packet.

use std::any::Any;
use std::fmt;

use bytes::Buf;

use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize, Unmarshal};

use crate::header::{Header, PacketType, COUNT_MAX, HEADER_LENGTH, SSRC_LENGTH};
use crate::packet::Packet;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum SdesType {
    #[default]
    End = 0,
    Cname = 1,
    Name = 2,
    Email = 3,
    Phone = 4,
    Location = 5,
    Tool = 6,
    Note = 7,
    Private = 8,
}

impl From<u8> for SdesType {
    fn from(b: u8) -> Self {
        match b {
            1 => SdesType::Cname,
            2 => SdesType::Name,
            3 => SdesType::Email,
            4 => SdesType::Phone,
            5 => SdesType::Location,
            6 => SdesType::Tool,
            7 => SdesType::Note,
            8 => SdesType::Private,
            _ => SdesType::End,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SourceDescriptionItem {
    pub sdes_type: SdesType,
    pub text: String,
}

impl SourceDescriptionItem {
    fn size(&self) -> usize {
        // type octet + length octet + text
        2 + self.text.len()
    }
}

/// One chunk: an SSRC followed by its items, closed by a mandatory null
/// octet and padded to a 32-bit boundary.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SourceDescriptionChunk {
    pub source: u32,
    pub items: Vec<SourceDescriptionItem>,
}

impl SourceDescriptionChunk {
    pub fn cname(source: u32, cname: &str) -> Self {
        Self {
            source,
            items: vec![SourceDescriptionItem {
                sdes_type: SdesType::Cname,
                text: cname.to_string(),
            }],
        }
    }

    fn size(&self) -> usize {
        let items: usize = self.items.iter().map(|i| i.size()).sum();
        // SSRC + items + at least one terminating null, word aligned.
        (SSRC_LENGTH + items + 1 + 3) & !3
    }
}

/// An SDES packet (RFC 3550 §6.5) carrying CNAME and similar per-SSRC
/// metadata.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SourceDescription {
    pub chunks: Vec<SourceDescriptionChunk>,
}

impl fmt::Display for SourceDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "SourceDescription:")?;
        for chunk in &self.chunks {
            writeln!(f, "\t{:x}:", chunk.source)?;
            for item in &chunk.items {
                writeln!(f, "\t\t{:?}: {}", item.sdes_type, item.text)?;
            }
        }
        Ok(())
    }
}

impl MarshalSize for SourceDescription {
    fn marshal_size(&self) -> usize {
        HEADER_LENGTH + self.chunks.iter().map(|c| c.size()).sum::<usize>()
    }
}

impl Packet for SourceDescription {
    fn header(&self) -> Header {
        Header {
            padding: false,
            count: self.chunks.len() as u8,
            packet_type: PacketType::SourceDescription,
            length: (self.marshal_size() / 4 - 1) as u16,
        }
    }

    fn destination_ssrc(&self) -> Vec<u32> {
        self.chunks.iter().map(|c| c.source).collect()
    }

    fn as_any(&self) -> &(dyn Any + 'static) {
        self
    }

    fn equal(&self, other: &(dyn Packet + 'static)) -> bool {
        other
            .as_any()
            .downcast_ref::<SourceDescription>()
            .is_some_and(|p| self == p)
    }

    fn cloned(&self) -> Box<dyn Packet + 'static> {
        Box::new(self.clone())
    }
}

impl Unmarshal for SourceDescription {
    fn unmarshal<B>(buf: &mut B) -> Result<Self>
    where
        B: Buf,
    {
        let header = Header::unmarshal(buf)?;
        if header.packet_type != PacketType::SourceDescription {
            return Err(Error::WrongType);
        }

        let mut chunks = Vec::with_capacity(header.count as usize);
        for _ in 0..header.count {
            if buf.remaining() < SSRC_LENGTH {
                return Err(Error::PacketTooShort);
            }
            let source = buf.get_u32();
            let mut consumed = 0usize;
            let mut items = vec![];

            // Items run until the mandatory null octet; a chunk without one
            // is malformed.
            loop {
                if buf.remaining() == 0 {
                    return Err(Error::PacketTooShort);
                }
                let t = buf.get_u8();
                consumed += 1;
                if t == 0 {
                    break;
                }
                if buf.remaining() == 0 {
                    return Err(Error::PacketTooShort);
                }
                let len = buf.get_u8() as usize;
                consumed += 1;
                if buf.remaining() < len {
                    return Err(Error::PacketTooShort);
                }
                let raw = buf.copy_to_bytes(len);
                consumed += len;
                items.push(SourceDescriptionItem {
                    sdes_type: SdesType::from(t),
                    text: String::from_utf8_lossy(&raw).into_owned(),
                });
            }

            // Skip the 0-3 alignment nulls.
            while (SSRC_LENGTH + consumed) % 4 != 0 {
                if buf.remaining() == 0 {
                    return Err(Error::PacketTooShort);
                }
                buf.get_u8();
                consumed += 1;
            }

            chunks.push(SourceDescriptionChunk { source, items });
        }

        Ok(SourceDescription { chunks })
    }
}

impl Marshal for SourceDescription {
    fn marshal_to(&self, buf: &mut [u8]) -> Result<usize> {
        if self.chunks.len() > COUNT_MAX {
            return Err(Error::TooManyChunks);
        }
        for chunk in &self.chunks {
            for item in &chunk.items {
                if item.sdes_type == SdesType::End {
                    return Err(Error::SdesMissingType);
                }
                if item.text.len() > 255 {
                    return Err(Error::SdesTextTooLong);
                }
            }
        }
        if buf.len() < self.marshal_size() {
            return Err(Error::BufferTooShort);
        }

        let mut offset = self.header().marshal_to(buf)?;
        for chunk in &self.chunks {
            let chunk_end = offset + chunk.size();
            buf[offset..offset + 4].copy_from_slice(&chunk.source.to_be_bytes());
            offset += SSRC_LENGTH;
            for item in &chunk.items {
                buf[offset] = item.sdes_type as u8;
                buf[offset + 1] = item.text.len() as u8;
                offset += 2;
                buf[offset..offset + item.text.len()].copy_from_slice(item.text.as_bytes());
                offset += item.text.len();
            }
            // Mandatory end-of-items null plus alignment nulls.
            while offset < chunk_end {
                buf[offset] = 0;
                offset += 1;
            }
        }

        Ok(offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn test_sdes_cname_round_trip() {
        let sdes = SourceDescription {
            chunks: vec![SourceDescriptionChunk::cname(0x01020304, "sfu@example")],
        };

        let raw = sdes.marshal().unwrap();
        assert_eq!(raw.len() % 4, 0);
        assert_eq!(raw.len(), sdes.marshal_size());

        let mut buf = raw;
        assert_eq!(SourceDescription::unmarshal(&mut buf).unwrap(), sdes);
    }

    #[test]
    fn test_sdes_multiple_chunks_round_trip() {
        let sdes = SourceDescription {
            chunks: vec![
                SourceDescriptionChunk::cname(1, "a"),
                SourceDescriptionChunk {
                    source: 2,
                    items: vec![
                        SourceDescriptionItem {
                            sdes_type: SdesType::Cname,
                            text: "bb".to_string(),
                        },
                        SourceDescriptionItem {
                            sdes_type: SdesType::Tool,
                            text: "sfu".to_string(),
                        },
                    ],
                },
            ],
        };

        let raw = sdes.marshal().unwrap();
        let mut buf = raw;
        assert_eq!(SourceDescription::unmarshal(&mut buf).unwrap(), sdes);
    }

    #[test]
    fn test_sdes_chunk_missing_null_rejected() {
        // One chunk whose item claims text running to the packet end, so no
        // terminating null fits.
        let raw = Bytes::from_static(&[
            0x81, 0xCA, 0x00, 0x02, 0x00, 0x00, 0x00, 0x01, 0x01, 0x03, 0x61, 0x62,
        ]);
        let mut buf = raw;
        assert_eq!(
            SourceDescription::unmarshal(&mut buf),
            Err(Error::PacketTooShort)
        );
    }

    #[test]
    fn test_sdes_text_too_long_rejected() {
        let sdes = SourceDescription {
            chunks: vec![SourceDescriptionChunk {
                source: 1,
                items: vec![SourceDescriptionItem {
                    sdes_type: SdesType::Cname,
                    text: "x".repeat(256),
                }],
            }],
        };
        assert_eq!(sdes.marshal(), Err(Error::SdesTextTooLong));
    }

    #[test]
    fn test_sdes_end_item_rejected() {
        let sdes = SourceDescription {
            chunks: vec![SourceDescriptionChunk {
                source: 1,
                items: vec![SourceDescriptionItem {
                    sdes_type: SdesType::End,
                    text: String::new(),
                }],
            }],
        };
        assert_eq!(sdes.marshal(), Err(Error::SdesMissingType));
    }
}
