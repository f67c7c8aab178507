//! Video back channel message (VBCM).

use std::any::Any;
use std::fmt;

use bytes::{Buf, Bytes};

use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize, Unmarshal};

use crate::header::{Header, PacketType, FORMAT_VBCM, HEADER_LENGTH, SSRC_LENGTH};
use crate::packet::Packet;

/// One VBCM FCI entry (RFC 5104 §4.3.4): target SSRC, request sequence
/// number, payload type and an opaque message, zero padded to a word
/// boundary.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VbcmEntry {
    pub ssrc: u32,
    pub sequence_number: u8,
    pub payload_type: u8,
    pub payload: Bytes,
}

impl VbcmEntry {
    fn size(&self) -> usize {
        (8 + self.payload.len() + 3) & !3
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VideoBackChannelMessage {
    pub sender_ssrc: u32,
    pub media_ssrc: u32,
    pub entries: Vec<VbcmEntry>,
}

impl fmt::Display for VideoBackChannelMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "VBCM {:x} {:x} ({} entries)",
            self.sender_ssrc,
            self.media_ssrc,
            self.entries.len()
        )
    }
}

impl MarshalSize for VideoBackChannelMessage {
    fn marshal_size(&self) -> usize {
        HEADER_LENGTH
            + 2 * SSRC_LENGTH
            + self.entries.iter().map(|e| e.size()).sum::<usize>()
    }
}

impl Packet for VideoBackChannelMessage {
    fn header(&self) -> Header {
        Header {
            padding: false,
            count: FORMAT_VBCM,
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
        other
            .as_any()
            .downcast_ref::<VideoBackChannelMessage>()
            .is_some_and(|p| self == p)
    }

    fn cloned(&self) -> Box<dyn Packet + 'static> {
        Box::new(self.clone())
    }
}

impl Unmarshal for VideoBackChannelMessage {
    fn unmarshal<B>(buf: &mut B) -> Result<Self>
    where
        B: Buf,
    {
        let header = Header::unmarshal(buf)?;
        if header.packet_type != PacketType::PayloadSpecificFeedback
            || header.count != FORMAT_VBCM
        {
            return Err(Error::WrongType);
        }
        if buf.remaining() < 2 * SSRC_LENGTH {
            return Err(Error::PacketTooShort);
        }

        let sender_ssrc = buf.get_u32();
        let media_ssrc = buf.get_u32();

        let mut entries = vec![];
        while buf.remaining() > 0 {
            if buf.remaining() < 8 {
                return Err(Error::PacketTooShort);
            }
            let ssrc = buf.get_u32();
            let sequence_number = buf.get_u8();
            let payload_type = buf.get_u8() & 0x7F;
            let length = buf.get_u16() as usize;

            // The announced length is attacker controlled; never trust it
            // past the end of the buffer.
            if length > buf.remaining() {
                return Err(Error::PacketTooShort);
            }
            let payload = buf.copy_to_bytes(length);

            let padding = ((8 + length + 3) & !3) - 8 - length;
            if padding > buf.remaining() {
                return Err(Error::PacketTooShort);
            }
            buf.advance(padding);

            entries.push(VbcmEntry {
                ssrc,
                sequence_number,
                payload_type,
                payload,
            });
        }

        Ok(VideoBackChannelMessage {
            sender_ssrc,
            media_ssrc,
            entries,
        })
    }
}

impl Marshal for VideoBackChannelMessage {
    fn marshal_to(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.len() < self.marshal_size() {
            return Err(Error::BufferTooShort);
        }

        let mut offset = self.header().marshal_to(buf)?;
        buf[offset..offset + 4].copy_from_slice(&self.sender_ssrc.to_be_bytes());
        buf[offset + 4..offset + 8].copy_from_slice(&self.media_ssrc.to_be_bytes());
        offset += 2 * SSRC_LENGTH;

        for entry in &self.entries {
            if entry.payload.len() > u16::MAX as usize {
                return Err(Error::WrongMarshalSize);
            }
            let end = offset + entry.size();
            buf[offset..offset + 4].copy_from_slice(&entry.ssrc.to_be_bytes());
            buf[offset + 4] = entry.sequence_number;
            buf[offset + 5] = entry.payload_type & 0x7F;
            buf[offset + 6..offset + 8]
                .copy_from_slice(&(entry.payload.len() as u16).to_be_bytes());
            offset += 8;
            buf[offset..offset + entry.payload.len()].copy_from_slice(&entry.payload);
            offset += entry.payload.len();
            while offset < end {
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

    #[test]
    fn test_vbcm_round_trip() {
        let vbcm = VideoBackChannelMessage {
            sender_ssrc: 1,
            media_ssrc: 2,
            entries: vec![VbcmEntry {
                ssrc: 3,
                sequence_number: 4,
                payload_type: 5,
                payload: Bytes::from_static(&[0xAA, 0xBB, 0xCC]),
            }],
        };

        let raw = vbcm.marshal().unwrap();
        assert_eq!(raw.len() % 4, 0);

        let mut buf = raw;
        assert_eq!(VideoBackChannelMessage::unmarshal(&mut buf).unwrap(), vbcm);
    }

    #[test]
    fn test_vbcm_announced_length_beyond_buffer_rejected() {
        // Entry announces 0x0100 payload bytes but carries none.
        let mut raw = Bytes::from_static(&[
            0x87, 0xCE, 0x00, 0x04, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x02, 0x00,
            0x00, 0x00, 0x03, 0x04, 0x05, 0x01, 0x00,
        ]);
        assert_eq!(
            VideoBackChannelMessage::unmarshal(&mut raw),
            Err(Error::PacketTooShort)
        );
    }
}
