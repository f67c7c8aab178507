//! Reference picture selection indication (RPSI).

use std::any::Any;
use std::fmt;

use bytes::{Buf, Bytes};

use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize, Unmarshal};

use crate::header::{Header, PacketType, FORMAT_RPSI, HEADER_LENGTH, SSRC_LENGTH};
use crate::packet::Packet;

/// An RPSI carries a native RPSI bit string for the codec in use
/// (RFC 4585 §6.3.3). The FCI is the padding-bits octet, the payload type
/// octet and the bit string, zero padded to a 32-bit boundary.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReferencePictureSelectionIndication {
    pub sender_ssrc: u32,
    pub media_ssrc: u32,
    pub payload_type: u8,
    pub bit_string: Bytes,
}

impl fmt::Display for ReferencePictureSelectionIndication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RPSI {:x} {:x} pt {}",
            self.sender_ssrc, self.media_ssrc, self.payload_type
        )
    }
}

impl ReferencePictureSelectionIndication {
    fn fci_size(&self) -> usize {
        (2 + self.bit_string.len() + 3) & !3
    }
}

impl MarshalSize for ReferencePictureSelectionIndication {
    fn marshal_size(&self) -> usize {
        HEADER_LENGTH + 2 * SSRC_LENGTH + self.fci_size()
    }
}

impl Packet for ReferencePictureSelectionIndication {
    fn header(&self) -> Header {
        Header {
            padding: false,
            count: FORMAT_RPSI,
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
            .downcast_ref::<ReferencePictureSelectionIndication>()
            .is_some_and(|p| self == p)
    }

    fn cloned(&self) -> Box<dyn Packet + 'static> {
        Box::new(self.clone())
    }
}

impl Unmarshal for ReferencePictureSelectionIndication {
    fn unmarshal<B>(buf: &mut B) -> Result<Self>
    where
        B: Buf,
    {
        let header = Header::unmarshal(buf)?;
        if header.packet_type != PacketType::PayloadSpecificFeedback
            || header.count != FORMAT_RPSI
        {
            return Err(Error::WrongType);
        }
        if buf.remaining() < 2 * SSRC_LENGTH + 2 {
            return Err(Error::PacketTooShort);
        }

        let sender_ssrc = buf.get_u32();
        let media_ssrc = buf.get_u32();
        let padding_bits = buf.get_u8() as usize;
        let payload_type = buf.get_u8() & 0x7F;

        if padding_bits % 8 != 0 || padding_bits / 8 > buf.remaining() {
            return Err(Error::WrongPadding);
        }
        let rest = buf.copy_to_bytes(buf.remaining());
        let bit_string = rest.slice(..rest.len() - padding_bits / 8);

        Ok(ReferencePictureSelectionIndication {
            sender_ssrc,
            media_ssrc,
            payload_type,
            bit_string,
        })
    }
}

impl Marshal for ReferencePictureSelectionIndication {
    fn marshal_to(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.len() < self.marshal_size() {
            return Err(Error::BufferTooShort);
        }

        let mut offset = self.header().marshal_to(buf)?;
        buf[offset..offset + 4].copy_from_slice(&self.sender_ssrc.to_be_bytes());
        buf[offset + 4..offset + 8].copy_from_slice(&self.media_ssrc.to_be_bytes());
        offset += 2 * SSRC_LENGTH;

        let padding = self.fci_size() - 2 - self.bit_string.len();
        buf[offset] = (padding * 8) as u8;
        buf[offset + 1] = self.payload_type & 0x7F;
        offset += 2;
        buf[offset..offset + self.bit_string.len()].copy_from_slice(&self.bit_string);
        offset += self.bit_string.len();
        for _ in 0..padding {
            buf[offset] = 0;
            offset += 1;
        }

        Ok(offset)
    }
}
