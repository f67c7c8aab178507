//! Receiver report (RR) packet.

use std::any::Any;
use std::fmt;

use bytes::{Buf, Bytes};

use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize, Unmarshal};

use crate::header::{Header, PacketType, COUNT_MAX, HEADER_LENGTH, SSRC_LENGTH};
use crate::packet::Packet;
use crate::reception_report::ReceptionReport;

/// An RR packet: reception statistics from a participant that is not an
/// active sender (RFC 3550 §6.4.2).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReceiverReport {
    /// The SSRC of the packet sender.
    pub ssrc: u32,
    pub reports: Vec<ReceptionReport>,
    pub profile_extensions: Bytes,
}

impl fmt::Display for ReceiverReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "ReceiverReport from {:#x}", self.ssrc)?;
        for report in &self.reports {
            writeln!(f, "\t{report}")?;
        }
        Ok(())
    }
}

impl ReceiverReport {
    /// Splits `reports` into RR packets of at most 31 blocks each, the form
    /// required inside compound packets.
    pub fn packets_for_reports(ssrc: u32, reports: Vec<ReceptionReport>) -> Vec<ReceiverReport> {
        if reports.is_empty() {
            return vec![ReceiverReport {
                ssrc,
                ..Default::default()
            }];
        }
        reports
            .chunks(COUNT_MAX)
            .map(|chunk| ReceiverReport {
                ssrc,
                reports: chunk.to_vec(),
                ..Default::default()
            })
            .collect()
    }
}

impl MarshalSize for ReceiverReport {
    fn marshal_size(&self) -> usize {
        HEADER_LENGTH
            + SSRC_LENGTH
            + self.reports.len() * ReceptionReport::default().marshal_size()
            + self.profile_extensions.len()
    }
}

impl Packet for ReceiverReport {
    fn header(&self) -> Header {
        Header {
            padding: false,
            count: self.reports.len() as u8,
            packet_type: PacketType::ReceiverReport,
            length: (self.marshal_size() / 4 - 1) as u16,
        }
    }

    fn destination_ssrc(&self) -> Vec<u32> {
        self.reports.iter().map(|r| r.ssrc).collect()
    }

    fn as_any(&self) -> &(dyn Any + 'static) {
        self
    }

    fn equal(&self, other: &(dyn Packet + 'static)) -> bool {
        other
            .as_any()
            .downcast_ref::<ReceiverReport>()
            .is_some_and(|p| self == p)
    }

    fn cloned(&self) -> Box<dyn Packet + 'static> {
        Box::new(self.clone())
    }
}

impl Unmarshal for ReceiverReport {
    fn unmarshal<B>(buf: &mut B) -> Result<Self>
    where
        B: Buf,
    {
        let header = Header::unmarshal(buf)?;
        if header.packet_type != PacketType::ReceiverReport {
            return Err(Error::WrongType);
        }
        if buf.remaining() < SSRC_LENGTH {
            return Err(Error::PacketTooShort);
        }

        let ssrc = buf.get_u32();
        let mut reports = Vec::with_capacity(header.count as usize);
        for _ in 0..header.count {
            reports.push(ReceptionReport::unmarshal(buf)?);
        }
        let profile_extensions = buf.copy_to_bytes(buf.remaining());

        Ok(ReceiverReport {
            ssrc,
            reports,
            profile_extensions,
        })
    }
}

impl Marshal for ReceiverReport {
    fn marshal_to(&self, buf: &mut [u8]) -> Result<usize> {
        if self.reports.len() > COUNT_MAX {
            return Err(Error::TooManyReports);
        }
        if buf.len() < self.marshal_size() {
            return Err(Error::BufferTooShort);
        }

        let mut offset = self.header().marshal_to(buf)?;
        buf[offset..offset + 4].copy_from_slice(&self.ssrc.to_be_bytes());
        offset += SSRC_LENGTH;

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
    fn test_receiver_report_round_trip() {
        let rr = ReceiverReport {
            ssrc: 0x902f9e2e,
            reports: vec![
                ReceptionReport {
                    ssrc: 0xbc5e9a40,
                    fraction_lost: 0,
                    total_lost: 0,
                    last_sequence_number: 0x46e1,
                    jitter: 273,
                    last_sender_report: 0x9f36432,
                    delay: 150137,
                },
                ReceptionReport {
                    ssrc: 0xdeadbeef,
                    fraction_lost: 16,
                    total_lost: 12345,
                    last_sequence_number: 0x10000,
                    jitter: 1,
                    last_sender_report: 2,
                    delay: 3,
                },
            ],
            ..Default::default()
        };

        let raw = rr.marshal().unwrap();
        assert_eq!(raw.len(), 4 + 4 + 2 * 24);
        assert_eq!(rr.header().count, 2);

        let mut buf = raw;
        assert_eq!(ReceiverReport::unmarshal(&mut buf).unwrap(), rr);
    }

    #[test]
    fn test_receiver_report_empty_round_trip() {
        let rr = ReceiverReport {
            ssrc: 42,
            ..Default::default()
        };
        let raw = rr.marshal().unwrap();
        assert_eq!(raw.len(), 8);
        assert_eq!(rr.header().length, 1);

        let mut buf = raw;
        assert_eq!(ReceiverReport::unmarshal(&mut buf).unwrap(), rr);
    }

    #[test]
    fn test_receiver_report_too_many_reports() {
        let rr = ReceiverReport {
            ssrc: 1,
            reports: vec![ReceptionReport::default(); 32],
            ..Default::default()
        };
        assert_eq!(rr.marshal(), Err(Error::TooManyReports));
    }

    #[test]
    fn test_packets_for_reports_splits_over_31() {
        let reports = vec![ReceptionReport::default(); 70];
        let packets = ReceiverReport::packets_for_reports(9, reports);
        assert_eq!(packets.len(), 3);
        assert_eq!(packets[0].reports.len(), 31);
        assert_eq!(packets[1].reports.len(), 31);
        assert_eq!(packets[2].reports.len(), 8);
        assert!(packets.iter().all(|p| p.ssrc == 9));
    }

    #[test]
    fn test_packets_for_reports_empty_yields_empty_rr() {
        let packets = ReceiverReport::packets_for_reports(9, vec![]);
        assert_eq!(packets.len(), 1);
        assert!(packets[0].reports.is_empty());
    }
}
