//! Full intra request (FIR).

use std::any::Any;
use std::fmt;

use bytes::Buf;

use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize, Unmarshal};

use crate::header::{Header, PacketType, FORMAT_FIR, HEADER_LENGTH, SSRC_LENGTH};
use crate::packet::Packet;

const FIR_ENTRY_LENGTH: usize = 8;

/// One FCI entry: the target SSRC and the request sequence number.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct FirEntry {
    pub ssrc: u32,
    pub sequence_number: u8,
}

/// A FIR commands the target to send a decoder refresh point
/// (RFC 5104 §4.3.1).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FullIntraRequest {
    pub sender_ssrc: u32,
    pub media_ssrc: u32,
    pub fir: Vec<FirEntry>,
}

impl fmt::Display for FullIntraRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FullIntraRequest {:x} {:x}", self.sender_ssrc, self.media_ssrc)?;
        for entry in &self.fir {
            write!(f, " ({:x} seq {})", entry.ssrc, entry.sequence_number)?;
        }
        Ok(())
    }
}

impl MarshalSize for FullIntraRequest {
    fn marshal_size(&self) -> usize {
        HEADER_LENGTH + 2 * SSRC_LENGTH + self.fir.len() * FIR_ENTRY_LENGTH
    }
}

impl Packet for FullIntraRequest {
    fn header(&self) -> Header {
        Header {
            padding: false,
            count: FORMAT_FIR,
            packet_type: PacketType::PayloadSpecificFeedback,
            length: (self.marshal_size() / 4 - 1) as u16,
        }
    }

    fn destination_ssrc(&self) -> Vec<u32> {
        self.fir.iter().map(|e| e.ssrc).collect()
    }

    fn as_any(&self) -> &(dyn Any + 'static) {
        self
    }

    fn equal(&self, other: &(dyn Packet + 'static)) -> bool {
        other
            .as_any()
            .downcast_ref::<FullIntraRequest>()
            .is_some_and(|p| self == p)
    }

    fn cloned(&self) -> Box<dyn Packet + 'static> {
        Box::new(self.clone())
    }
}

impl Unmarshal for FullIntraRequest {
    fn unmarshal<B>(buf: &mut B) -> Result<Self>
    where
        B: Buf,
    {
        let header = Header::unmarshal(buf)?;
        if header.packet_type != PacketType::PayloadSpecificFeedback
            || header.count != FORMAT_FIR
        {
            return Err(Error::WrongType);
        }
        if buf.remaining() < 2 * SSRC_LENGTH {
            return Err(Error::PacketTooShort);
        }

        let sender_ssrc = buf.get_u32();
        let media_ssrc = buf.get_u32();

        let mut fir = vec![];
        while buf.remaining() >= FIR_ENTRY_LENGTH {
            let ssrc = buf.get_u32();
            let sequence_number = buf.get_u8();
            buf.advance(3); // reserved
            fir.push(FirEntry {
                ssrc,
                sequence_number,
            });
        }
        if buf.remaining() != 0 {
            return Err(Error::PacketTooShort);
        }

        Ok(FullIntraRequest {
            sender_ssrc,
            media_ssrc,
            fir,
        })
    }
}

impl Marshal for FullIntraRequest {
    fn marshal_to(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.len() < self.marshal_size() {
            return Err(Error::BufferTooShort);
        }

        let mut offset = self.header().marshal_to(buf)?;
        buf[offset..offset + 4].copy_from_slice(&self.sender_ssrc.to_be_bytes());
        buf[offset + 4..offset + 8].copy_from_slice(&self.media_ssrc.to_be_bytes());
        offset += 2 * SSRC_LENGTH;

        for entry in &self.fir {
            buf[offset..offset + 4].copy_from_slice(&entry.ssrc.to_be_bytes());
            buf[offset + 4] = entry.sequence_number;
            buf[offset + 5] = 0;
            buf[offset + 6] = 0;
            buf[offset + 7] = 0;
            offset += FIR_ENTRY_LENGTH;
        }

        Ok(offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn test_fir_round_trip() {
        let fir = FullIntraRequest {
            sender_ssrc: 1,
            media_ssrc: 2,
            fir: vec![
                FirEntry {
                    ssrc: 3,
                    sequence_number: 42,
                },
                FirEntry {
                    ssrc: 4,
                    sequence_number: 57,
                },
            ],
        };

        let raw = fir.marshal().unwrap();
        assert_eq!(raw.len(), 12 + 16);

        let mut buf = raw;
        assert_eq!(FullIntraRequest::unmarshal(&mut buf).unwrap(), fir);
    }

    #[test]
    fn test_fir_truncated_entry() {
        let mut raw = Bytes::from_static(&[
            0x84, 0xCE, 0x00, 0x03, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x02, 0x00,
            0x00, 0x00, 0x03,
        ]);
        // 4 trailing bytes: not a full 8-byte entry.
        assert_eq!(
            FullIntraRequest::unmarshal(&mut raw),
            Err(Error::PacketTooShort)
        );
    }
}
