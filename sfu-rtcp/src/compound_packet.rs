//! RFC 3550 compound packets.

use std::any::Any;
use std::fmt;

use bytes::Buf;

use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize, Unmarshal};

use crate::header::{Header, PacketType};
use crate::packet::{self, Packet};
use crate::receiver_report::ReceiverReport;
use crate::sender_report::SenderReport;
use crate::source_description::{SdesType, SourceDescription};

/// A sequence of RTCP packets sharing one datagram. A valid compound starts
/// with an SR or RR and carries an SDES with a CNAME item.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CompoundPacket(pub Vec<Box<dyn Packet>>);

impl fmt::Display for CompoundPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for packet in &self.0 {
            write!(f, "{packet}")?;
        }
        Ok(())
    }
}

impl CompoundPacket {
    /// Checks the RFC 3550 §6.1 structural rules.
    pub fn validate(&self) -> Result<()> {
        if self.0.is_empty() {
            return Err(Error::EmptyCompound);
        }

        // The first packet must be a sender or receiver report.
        let first = self.0[0].as_any();
        if first.downcast_ref::<SenderReport>().is_none()
            && first.downcast_ref::<ReceiverReport>().is_none()
        {
            return Err(Error::BadFirstPacket);
        }

        for packet in &self.0[1..] {
            let any = packet.as_any();
            // Additional reports may directly follow the leading one.
            if any.downcast_ref::<ReceiverReport>().is_some()
                || any.downcast_ref::<SenderReport>().is_some()
            {
                continue;
            }
            if let Some(sdes) = any.downcast_ref::<SourceDescription>() {
                let has_cname = sdes
                    .chunks
                    .iter()
                    .flat_map(|c| c.items.iter())
                    .any(|i| i.sdes_type == SdesType::Cname);
                if !has_cname {
                    return Err(Error::MissingCname);
                }
                return Ok(());
            }
            // A non-SDES packet before the CNAME.
            return Err(Error::PacketBeforeCname);
        }

        Err(Error::MissingCname)
    }

    /// CNAME from the compound's SDES packet.
    pub fn cname(&self) -> Result<String> {
        self.validate()?;
        for packet in &self.0 {
            if let Some(sdes) = packet.as_any().downcast_ref::<SourceDescription>() {
                for chunk in &sdes.chunks {
                    for item in &chunk.items {
                        if item.sdes_type == SdesType::Cname {
                            return Ok(item.text.clone());
                        }
                    }
                }
            }
        }
        Err(Error::MissingCname)
    }

    pub fn destination_ssrc(&self) -> Vec<u32> {
        self.0
            .iter()
            .flat_map(|p| p.destination_ssrc())
            .collect()
    }
}

impl MarshalSize for CompoundPacket {
    fn marshal_size(&self) -> usize {
        self.0.iter().map(|p| p.marshal_size()).sum()
    }
}

impl Unmarshal for CompoundPacket {
    fn unmarshal<B>(buf: &mut B) -> Result<Self>
    where
        B: Buf,
    {
        let packets = packet::unmarshal(buf)?;
        let compound = CompoundPacket(packets);
        compound.validate()?;
        Ok(compound)
    }
}

impl Marshal for CompoundPacket {
    fn marshal_to(&self, buf: &mut [u8]) -> Result<usize> {
        self.validate()?;
        if buf.len() < self.marshal_size() {
            return Err(Error::BufferTooShort);
        }

        let mut offset = 0;
        for packet in &self.0 {
            offset += packet.marshal_to(&mut buf[offset..])?;
        }
        Ok(offset)
    }
}

impl CompoundPacket {
    /// Common header of the leading packet.
    pub fn header(&self) -> Header {
        self.0
            .first()
            .map(|p| p.header())
            .unwrap_or_else(|| Header {
                padding: false,
                count: 0,
                packet_type: PacketType::Unsupported,
                length: 0,
            })
    }

    pub fn as_any(&self) -> &(dyn Any + 'static) {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload_feedbacks::picture_loss_indication::PictureLossIndication;
    use crate::source_description::SourceDescriptionChunk;

    fn cname_sdes() -> SourceDescription {
        SourceDescription {
            chunks: vec![SourceDescriptionChunk::cname(1234, "cname")],
        }
    }

    #[test]
    fn test_compound_valid_rr_sdes() {
        let compound = CompoundPacket(vec![
            Box::new(ReceiverReport {
                ssrc: 1234,
                ..Default::default()
            }),
            Box::new(cname_sdes()),
        ]);
        assert!(compound.validate().is_ok());
        assert_eq!(compound.cname().unwrap(), "cname");
    }

    #[test]
    fn test_compound_valid_sr_rr_sdes() {
        let compound = CompoundPacket(vec![
            Box::new(SenderReport {
                ssrc: 1234,
                ..Default::default()
            }),
            Box::new(ReceiverReport {
                ssrc: 1234,
                ..Default::default()
            }),
            Box::new(cname_sdes()),
        ]);
        assert!(compound.validate().is_ok());
    }

    #[test]
    fn test_compound_bad_first_packet() {
        let compound = CompoundPacket(vec![
            Box::new(PictureLossIndication::default()),
            Box::new(cname_sdes()),
        ]);
        assert_eq!(compound.validate(), Err(Error::BadFirstPacket));
    }

    #[test]
    fn test_compound_missing_cname() {
        let compound = CompoundPacket(vec![Box::new(ReceiverReport::default())]);
        assert_eq!(compound.validate(), Err(Error::MissingCname));
    }

    #[test]
    fn test_compound_packet_before_cname() {
        let compound = CompoundPacket(vec![
            Box::new(ReceiverReport::default()),
            Box::new(PictureLossIndication::default()),
            Box::new(cname_sdes()),
        ]);
        assert_eq!(compound.validate(), Err(Error::PacketBeforeCname));
    }

    #[test]
    fn test_compound_round_trip() {
        let compound = CompoundPacket(vec![
            Box::new(ReceiverReport {
                ssrc: 1234,
                ..Default::default()
            }),
            Box::new(cname_sdes()),
        ]);

        let raw = compound.marshal().unwrap();
        let mut buf = raw.clone();
        let parsed = CompoundPacket::unmarshal(&mut buf).unwrap();
        assert_eq!(parsed.marshal().unwrap(), raw);
        assert_eq!(parsed.cname().unwrap(), "cname");
    }
}
