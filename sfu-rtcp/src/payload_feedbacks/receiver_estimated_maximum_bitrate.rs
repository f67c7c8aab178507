//! Receiver estimated maximum bitrate (REMB).

use std::any::Any;
use std::fmt;

use bytes::Buf;

use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize, Unmarshal};

use crate::header::{Header, PacketType, FORMAT_AFB, HEADER_LENGTH, SSRC_LENGTH};
use crate::packet::Packet;

const UNIQUE_IDENTIFIER: [u8; 4] = *b"REMB";
const MANTISSA_MAX: u64 = (1 << 18) - 1;

/// A REMB message (draft-alvestrand-rmcat-remb): an AFB carrying the
/// receiver's total estimated maximum bitrate over all named SSRCs.
///
/// The bitrate travels as an 18-bit mantissa shifted by a 6-bit exponent,
/// so encoding is lossy within one exponent step; the codec keeps that
/// loss rather than rounding.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReceiverEstimatedMaximumBitrate {
    pub sender_ssrc: u32,
    /// Always zero on the wire; kept as parsed.
    pub media_ssrc: u32,
    /// Estimated maximum bitrate in bits per second.
    pub bitrate: u64,
    pub ssrcs: Vec<u32>,
}

impl fmt::Display for ReceiverEstimatedMaximumBitrate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ReceiverEstimatedMaximumBitrate {:x} {}bps {:?}",
            self.sender_ssrc, self.bitrate, self.ssrcs
        )
    }
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

impl MarshalSize for ReceiverEstimatedMaximumBitrate {
    fn marshal_size(&self) -> usize {
        HEADER_LENGTH + 2 * SSRC_LENGTH + 4 + 4 + self.ssrcs.len() * SSRC_LENGTH
    }
}

impl Packet for ReceiverEstimatedMaximumBitrate {
    fn header(&self) -> Header {
        Header {
            padding: false,
            count: FORMAT_AFB,
            packet_type: PacketType::PayloadSpecificFeedback,
            length: (self.marshal_size() / 4 - 1) as u16,
        }
    }

    fn destination_ssrc(&self) -> Vec<u32> {
        self.ssrcs.clone()
    }

    fn as_any(&self) -> &(dyn Any + 'static) {
        self
    }

    fn equal(&self, other: &(dyn Packet + 'static)) -> bool {
        other
            .as_any()
            .downcast_ref::<ReceiverEstimatedMaximumBitrate>()
            .is_some_and(|p| self == p)
    }

    fn cloned(&self) -> Box<dyn Packet + 'static> {
        Box::new(self.clone())
    }
}

impl Unmarshal for ReceiverEstimatedMaximumBitrate {
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
        if buf.remaining() < 2 * SSRC_LENGTH + 8 {
            return Err(Error::PacketTooShort);
        }

        let sender_ssrc = buf.get_u32();
        let media_ssrc = buf.get_u32();

        let mut identifier = [0u8; 4];
        buf.copy_to_slice(&mut identifier);
        if identifier != UNIQUE_IDENTIFIER {
            return Err(Error::MissingRembIdentifier);
        }

        let num_ssrcs = buf.get_u8() as usize;
        let b = buf.get_u8();
        let exp = b >> 2;
        let mut mantissa = ((b & 0x03) as u64) << 16;
        mantissa |= (buf.get_u8() as u64) << 8;
        mantissa |= buf.get_u8() as u64;

        let bitrate = mantissa << exp;

        if buf.remaining() != num_ssrcs * SSRC_LENGTH {
            return Err(Error::SsrcNumAndLengthMismatch);
        }
        let mut ssrcs = Vec::with_capacity(num_ssrcs);
        for _ in 0..num_ssrcs {
            ssrcs.push(buf.get_u32());
        }

        Ok(ReceiverEstimatedMaximumBitrate {
            sender_ssrc,
            media_ssrc,
            bitrate,
            ssrcs,
        })
    }
}

impl Marshal for ReceiverEstimatedMaximumBitrate {
    fn marshal_to(&self, buf: &mut [u8]) -> Result<usize> {
        if self.ssrcs.len() > 255 {
            return Err(Error::TooManySources);
        }
        if buf.len() < self.marshal_size() {
            return Err(Error::BufferTooShort);
        }

        let mut offset = self.header().marshal_to(buf)?;
        buf[offset..offset + 4].copy_from_slice(&self.sender_ssrc.to_be_bytes());
        buf[offset + 4..offset + 8].copy_from_slice(&self.media_ssrc.to_be_bytes());
        offset += 2 * SSRC_LENGTH;

        buf[offset..offset + 4].copy_from_slice(&UNIQUE_IDENTIFIER);
        offset += 4;

        let (exp, mantissa) = encode_bitrate(self.bitrate);
        buf[offset] = self.ssrcs.len() as u8;
        buf[offset + 1] = (exp << 2) | ((mantissa >> 16) as u8 & 0x03);
        buf[offset + 2] = (mantissa >> 8) as u8;
        buf[offset + 3] = mantissa as u8;
        offset += 4;

        for ssrc in &self.ssrcs {
            buf[offset..offset + 4].copy_from_slice(&ssrc.to_be_bytes());
            offset += SSRC_LENGTH;
        }

        Ok(offset)
    }
}
