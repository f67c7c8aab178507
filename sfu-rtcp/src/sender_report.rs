//! Sender report (SR) packet.

use std::any::Any;
use std::fmt;

use bytes::{Buf, Bytes};

use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize, Unmarshal};

use crate::header::{Header, PacketType, COUNT_MAX, HEADER_LENGTH};
use crate::packet::Packet;
use crate::reception_report::ReceptionReport;

/// Size of the sender info section: SSRC, 64-bit NTP timestamp, RTP
/// timestamp, packet count, octet count.
pub const SENDER_INFO_LENGTH: usize = 24;

/// An SR packet: sender transmission statistics plus zero or more reception
/// report blocks (RFC 3550 §6.4.1).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SenderReport {
    pub ssrc: u32,
    /// Wallclock time this report was sent, as a 64-bit NTP timestamp.
    pub ntp_time: u64,
    /// The same instant in RTP timestamp units.
    pub rtp_time: u32,
    pub packet_count: u32,
    pub octet_count: u32,
    pub reports: Vec<ReceptionReport>,
    pub profile_extensions: Bytes,
}

impl fmt::Display for SenderReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "SenderReport from {:#x}", self.ssrc)?;
        writeln!(f, "\tNTPTime:\t{}", self.ntp_time)?;
        writeln!(f, "\tRTPTime:\t{}", self.rtp_time)?;
        writeln!(f, "\tPacketCount:\t{}", self.packet_count)?;
        writeln!(f, "\tOctetCount:\t{}", self.octet_count)?;
        for report in &self.reports {
            writeln!(f, "\t{report}")?;
        }
        Ok(())
    }
}

impl SenderReport {
    fn body_size(&self) -> usize {
        SENDER_INFO_LENGTH
            + self.reports.len() * ReceptionReport::default().marshal_size()
            + self.profile_extensions.len()
    }
}

impl MarshalSize for SenderReport {
    fn marshal_size(&self) -> usize {
        HEADER_LENGTH + self.body_size()
    }
}

impl Packet for SenderReport {
    fn header(&self) -> Header {
        Header {
            padding: false,
            count: self.reports.len() as u8,
            packet_type: PacketType::SenderReport,
            length: (self.marshal_size() / 4 - 1) as u16,
        }
    }

    fn destination_ssrc(&self) -> Vec<u32> {
        let mut out: Vec<u32> = self.reports.iter().map(|r| r.ssrc).collect();
        out.push(self.ssrc);
        out
    }

    fn as_any(&self) -> &(dyn Any + 'static) {
        self
    }

    fn equal(&self, other: &(dyn Packet + 'static)) -> bool {
        other
            .as_any()
            .downcast_ref::<SenderReport>()
            .is_some_and(|p| self == p)
    }

    fn cloned(&self) -> Box<dyn Packet + 'static> {
        Box::new(self.clone())
    }
}

impl Unmarshal for SenderReport {
    fn unmarshal<B>(buf: &mut B) -> Result<Self>
    where
        B: Buf,
    {
        let header = Header::unmarshal(buf)?;
        if header.packet_type != PacketType::SenderReport {
            return Err(Error::WrongType);
        }
        if buf.remaining() < SENDER_INFO_LENGTH {
            return Err(Error::PacketTooShort);
        }

        let ssrc = buf.get_u32();
        let ntp_time = buf.get_u64();
        let rtp_time = buf.get_u32();
        let packet_count = buf.get_u32();
        let octet_count = buf.get_u32();

        let mut reports = Vec::with_capacity(header.count as usize);
        for _ in 0..header.count {
            reports.push(ReceptionReport::unmarshal(buf)?);
        }
        let profile_extensions = buf.copy_to_bytes(buf.remaining());

        Ok(SenderReport {
            ssrc,
            ntp_time,
            rtp_time,
            packet_count,
            octet_count,
            reports,
            profile_extensions,
        })
    }
}

impl Marshal for SenderReport {
    fn marshal_to(&self, buf: &mut [u8]) -> Result<usize> {
        if self.reports.len() > COUNT_MAX {
            return Err(Error::TooManyReports);
        }
        if buf.len() < self.marshal_size() {
            return Err(Error::BufferTooShort);
        }

        let mut offset = self.header().marshal_to(buf)?;
        buf[offset..offset + 4].copy_from_slice(&self.ssrc.to_be_bytes());
        buf[offset + 4..offset + 12].copy_from_slice(&self.ntp_time.to_be_bytes());
        buf[offset + 12..offset + 16].copy_from_slice(&self.rtp_time.to_be_bytes());
        buf[offset + 16..offset + 20].copy_from_slice(&self.packet_count.to_be_bytes());
        buf[offset + 20..offset + 24].copy_from_slice(&self.octet_count.to_be_bytes());
        offset += SENDER_INFO_LENGTH;

        for report in &self.reports {
            offset += report.marshal_to(&mut buf[offset..])?;
        }
        buf[offset..offset + self.profile_extensions.len()]
            .copy_from_slice(&self.profile_extensions);
        offset += self.profile_extensions.len();

        Ok(offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sender_report_round_trip() {
        let sr = SenderReport {
            ssrc: 0x5d931534,
            ntp_time: ((3711615412u64) << 32) | 1985245553,
            rtp_time: 577280,
            packet_count: 3608,
            octet_count: 577280,
            reports: vec![ReceptionReport {
                ssrc: 0x01932db4,
                fraction_lost: 0,
                total_lost: 1,
                last_sequence_number: 0,
                jitter: 0,
                last_sender_report: 0,
                delay: 5,
            }],
            ..Default::default()
        };

        // 4 header + 24 sender info + 24 report = 52 bytes = 13 words.
        let raw = sr.marshal().unwrap();
        assert_eq!(raw.len(), 52);
        assert_eq!(sr.header().length, 12);
        assert_eq!(sr.header().count, 1);

        let mut buf = raw;
        let parsed = SenderReport::unmarshal(&mut buf).unwrap();
        assert_eq!(parsed, sr);
    }

    #[test]
    fn test_sender_report_wrong_type() {
        // RR header on SR parser.
        let mut buf = Bytes::from_static(&[
            0x80, 0xC9, 0x00, 0x06, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00,
        ]);
        assert_eq!(SenderReport::unmarshal(&mut buf), Err(Error::WrongType));
    }

    #[test]
    fn test_sender_report_truncated_report_block() {
        // Header claims one report but the block is cut off.
        let sr = SenderReport {
            ssrc: 1,
            ..Default::default()
        };
        let mut raw = sr.marshal().unwrap().to_vec();
        raw[0] |= 0x01; // count = 1
        raw.extend_from_slice(&[0x00, 0x00]);

        let mut buf = Bytes::from(raw);
        assert_eq!(SenderReport::unmarshal(&mut buf), Err(Error::PacketTooShort));
    }

    #[test]
    fn test_sender_report_destination_ssrc() {
        let sr = SenderReport {
            ssrc: 7,
            reports: vec![ReceptionReport {
                ssrc: 9,
                ..Default::default()
            }],
            ..Default::default()
        };
        assert_eq!(sr.destination_ssrc(), vec![9, 7]);
    }
}
