//! RTP fixed header and RFC 8285 header extensions.

use bytes::{Buf, Bytes};

use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize, Unmarshal};

/// Size of the fixed part of the RTP header, before CSRCs and extensions.
pub const HEADER_LENGTH: usize = 12;
pub const VERSION: u8 = 2;

pub const EXTENSION_PROFILE_ONE_BYTE: u16 = 0xBEDE;
pub const EXTENSION_PROFILE_TWO_BYTE: u16 = 0x1000;

const VERSION_SHIFT: u8 = 6;
const PADDING_SHIFT: u8 = 5;
const EXTENSION_SHIFT: u8 = 4;
const CC_MASK: u8 = 0x0F;
const MARKER_SHIFT: u8 = 7;
const PT_MASK: u8 = 0x7F;

/// One id/value pair inside the header extension block.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Extension {
    pub id: u8,
    pub payload: Bytes,
}

/// RTP packet header per RFC 3550 §5.1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub version: u8,
    pub padding: bool,
    pub extension: bool,
    pub marker: bool,
    pub payload_type: u8,
    pub sequence_number: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    pub csrc: Vec<u32>,
    pub extension_profile: u16,
    pub extensions: Vec<Extension>,
}

impl Default for Header {
    fn default() -> Self {
        Self {
            version: VERSION,
            padding: false,
            extension: false,
            marker: false,
            payload_type: 0,
            sequence_number: 0,
            timestamp: 0,
            ssrc: 0,
            csrc: vec![],
            extension_profile: 0,
            extensions: vec![],
        }
    }
}

/// Two-byte form covers profiles `0x100X`; the low 4 bits are appbits.
fn is_two_byte_profile(profile: u16) -> bool {
    profile & 0xFFF0 == EXTENSION_PROFILE_TWO_BYTE
}

impl Header {
    /// Unpadded length of the extension value area.
    fn extensions_raw_len(&self) -> usize {
        if self.extension_profile == EXTENSION_PROFILE_ONE_BYTE {
            self.extensions.iter().map(|e| 1 + e.payload.len()).sum()
        } else if is_two_byte_profile(self.extension_profile) {
            self.extensions.iter().map(|e| 2 + e.payload.len()).sum()
        } else {
            self.extensions.iter().map(|e| e.payload.len()).sum()
        }
    }

    /// Length of the extension value area padded to a 32-bit boundary.
    pub fn extensions_padded_len(&self) -> usize {
        (self.extensions_raw_len() + 3) & !3
    }

    pub fn get_extension(&self, id: u8) -> Option<Bytes> {
        if !self.extension {
            return None;
        }
        self.extensions
            .iter()
            .find(|e| e.id == id)
            .map(|e| e.payload.clone())
    }

    pub fn get_extension_ids(&self) -> Vec<u8> {
        self.extensions.iter().map(|e| e.id).collect()
    }

    pub fn del_extension(&mut self, id: u8) -> Result<()> {
        if !self.extension {
            return Err(Error::HeaderExtensionsNotEnabled);
        }
        let before = self.extensions.len();
        self.extensions.retain(|e| e.id != id);
        if self.extensions.len() == before {
            return Err(Error::HeaderExtensionNotFound);
        }
        Ok(())
    }

    /// Sets one extension, enabling the extension block if necessary.
    pub fn set_extension(&mut self, id: u8, payload: Bytes) -> Result<()> {
        if !self.extension {
            self.extension = true;
            self.extension_profile = if (1..=14).contains(&id) && (1..=16).contains(&payload.len())
            {
                EXTENSION_PROFILE_ONE_BYTE
            } else {
                EXTENSION_PROFILE_TWO_BYTE
            };
        }

        if self.extension_profile == EXTENSION_PROFILE_ONE_BYTE {
            if !(1..=14).contains(&id) {
                return Err(Error::Rfc8285OneByteHeaderIdRange);
            }
            if payload.is_empty() || payload.len() > 16 {
                return Err(Error::Rfc8285OneByteHeaderSize);
            }
        } else if is_two_byte_profile(self.extension_profile) {
            if id < 1 {
                return Err(Error::Rfc8285TwoByteHeaderIdRange);
            }
            if payload.len() > 255 {
                return Err(Error::Rfc8285TwoByteHeaderSize);
            }
        } else if id != 0 {
            return Err(Error::Rfc3550HeaderIdRange);
        }

        if let Some(ext) = self.extensions.iter_mut().find(|e| e.id == id) {
            ext.payload = payload;
        } else {
            self.extensions.push(Extension { id, payload });
        }
        Ok(())
    }

    /// Replaces the whole extension block with exactly the given items.
    ///
    /// Items invalid for the requested profile are dropped without error:
    /// id 0 always, and for the one-byte form id 15, empty payloads and
    /// payloads over 16 bytes.
    pub fn set_extensions(&mut self, profile: u16, items: Vec<Extension>) {
        self.extensions.clear();
        self.extension_profile = profile;

        let one_byte = profile == EXTENSION_PROFILE_ONE_BYTE;
        for item in items {
            if item.id == 0 {
                continue;
            }
            if one_byte
                && (item.id > 14 || item.payload.is_empty() || item.payload.len() > 16)
            {
                continue;
            }
            if !one_byte && item.payload.len() > 255 {
                continue;
            }
            self.extensions.push(item);
        }

        self.extension = !self.extensions.is_empty();
    }

    /// Parses the extension value area. A malformed element stops extension
    /// parsing; already collected extensions are kept and the header stays
    /// valid.
    fn parse_extensions(profile: u16, payload: &Bytes) -> Vec<Extension> {
        let mut extensions = vec![];
        let mut offset = 0usize;
        let end = payload.len();

        if profile == EXTENSION_PROFILE_ONE_BYTE {
            while offset < end {
                let b = payload[offset];
                if b == 0 {
                    // alignment padding
                    offset += 1;
                    continue;
                }
                let id = b >> 4;
                let len = ((b & 0x0F) + 1) as usize;
                if id == 15 {
                    break;
                }
                if offset + 1 + len > end {
                    break;
                }
                extensions.push(Extension {
                    id,
                    payload: payload.slice(offset + 1..offset + 1 + len),
                });
                offset += 1 + len;
            }
        } else if is_two_byte_profile(profile) {
            while offset < end {
                let id = payload[offset];
                if id == 0 {
                    offset += 1;
                    continue;
                }
                if offset + 2 > end {
                    break;
                }
                let len = payload[offset + 1] as usize;
                if offset + 2 + len > end {
                    break;
                }
                extensions.push(Extension {
                    id,
                    payload: payload.slice(offset + 2..offset + 2 + len),
                });
                offset += 2 + len;
            }
        } else {
            // RFC 3550 style: the whole area is one opaque value.
            extensions.push(Extension {
                id: 0,
                payload: payload.clone(),
            });
        }

        extensions
    }
}

impl MarshalSize for Header {
    fn marshal_size(&self) -> usize {
        let mut size = HEADER_LENGTH + 4 * self.csrc.len();
        if self.extension {
            size += 4 + self.extensions_padded_len();
        }
        size
    }
}

impl Unmarshal for Header {
    fn unmarshal<B>(buf: &mut B) -> Result<Self>
    where
        B: Buf,
    {
        if buf.remaining() < HEADER_LENGTH {
            return Err(Error::HeaderSizeInsufficient);
        }

        let b0 = buf.get_u8();
        let version = b0 >> VERSION_SHIFT;
        if version != VERSION {
            return Err(Error::BadVersion);
        }
        let padding = (b0 >> PADDING_SHIFT) & 0x1 == 1;
        let extension = (b0 >> EXTENSION_SHIFT) & 0x1 == 1;
        let cc = (b0 & CC_MASK) as usize;

        let b1 = buf.get_u8();
        let marker = b1 >> MARKER_SHIFT == 1;
        let payload_type = b1 & PT_MASK;

        let sequence_number = buf.get_u16();
        let timestamp = buf.get_u32();
        let ssrc = buf.get_u32();

        if buf.remaining() < 4 * cc {
            return Err(Error::HeaderSizeInsufficient);
        }
        let mut csrc = Vec::with_capacity(cc);
        for _ in 0..cc {
            csrc.push(buf.get_u32());
        }

        let (extension_profile, extensions) = if extension {
            if buf.remaining() < 4 {
                return Err(Error::HeaderSizeInsufficientForExtension);
            }
            let profile = buf.get_u16();
            let ext_len = buf.get_u16() as usize * 4;
            if buf.remaining() < ext_len {
                return Err(Error::HeaderSizeInsufficientForExtension);
            }
            let payload = buf.copy_to_bytes(ext_len);
            (profile, Header::parse_extensions(profile, &payload))
        } else {
            (0, vec![])
        };

        Ok(Header {
            version,
            padding,
            extension,
            marker,
            payload_type,
            sequence_number,
            timestamp,
            ssrc,
            csrc,
            extension_profile,
            extensions,
        })
    }
}

impl Marshal for Header {
    fn marshal_to(&self, buf: &mut [u8]) -> Result<usize> {
        let size = self.marshal_size();
        if buf.len() < size {
            return Err(Error::BufferTooShort);
        }

        let mut b0 = VERSION << VERSION_SHIFT;
        if self.padding {
            b0 |= 1 << PADDING_SHIFT;
        }
        if self.extension {
            b0 |= 1 << EXTENSION_SHIFT;
        }
        b0 |= self.csrc.len() as u8 & CC_MASK;
        buf[0] = b0;

        let mut b1 = self.payload_type & PT_MASK;
        if self.marker {
            b1 |= 1 << MARKER_SHIFT;
        }
        buf[1] = b1;

        buf[2..4].copy_from_slice(&self.sequence_number.to_be_bytes());
        buf[4..8].copy_from_slice(&self.timestamp.to_be_bytes());
        buf[8..12].copy_from_slice(&self.ssrc.to_be_bytes());

        let mut offset = HEADER_LENGTH;
        for csrc in &self.csrc {
            buf[offset..offset + 4].copy_from_slice(&csrc.to_be_bytes());
            offset += 4;
        }

        if self.extension {
            let padded = self.extensions_padded_len();
            if padded % 4 != 0 {
                return Err(Error::WrongMarshalSize);
            }
            buf[offset..offset + 2].copy_from_slice(&self.extension_profile.to_be_bytes());
            buf[offset + 2..offset + 4].copy_from_slice(&((padded / 4) as u16).to_be_bytes());
            offset += 4;

            let start = offset;
            if self.extension_profile == EXTENSION_PROFILE_ONE_BYTE {
                for ext in &self.extensions {
                    buf[offset] = (ext.id << 4) | (ext.payload.len() as u8 - 1);
                    offset += 1;
                    buf[offset..offset + ext.payload.len()].copy_from_slice(&ext.payload);
                    offset += ext.payload.len();
                }
            } else if is_two_byte_profile(self.extension_profile) {
                for ext in &self.extensions {
                    buf[offset] = ext.id;
                    buf[offset + 1] = ext.payload.len() as u8;
                    offset += 2;
                    buf[offset..offset + ext.payload.len()].copy_from_slice(&ext.payload);
                    offset += ext.payload.len();
                }
            } else {
                for ext in &self.extensions {
                    if ext.payload.len() % 4 != 0 {
                        return Err(Error::WrongMarshalSize);
                    }
                    buf[offset..offset + ext.payload.len()].copy_from_slice(&ext.payload);
                    offset += ext.payload.len();
                }
            }
            while offset < start + padded {
                buf[offset] = 0;
                offset += 1;
            }
        }

        Ok(offset)
    }
}
