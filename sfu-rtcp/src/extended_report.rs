//! Extended reports (XR, RFC 3611).

use std::any::Any;
use std::fmt;

use bytes::{Buf, Bytes};

use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize, Unmarshal};

use crate::header::{Header, PacketType, HEADER_LENGTH, SSRC_LENGTH};
use crate::packet::Packet;

pub const BLOCK_TYPE_RRT: u8 = 4;
pub const BLOCK_TYPE_DLRR: u8 = 5;

const BLOCK_HEADER_LENGTH: usize = 4;

/// Receiver reference time block (RFC 3611 §4.4).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct ReceiverReferenceTimeBlock {
    pub ntp_timestamp: u64,
}

/// One DLRR sub-report (RFC 3611 §4.5).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct DlrrReport {
    pub ssrc: u32,
    pub last_rr: u32,
    pub dlrr: u32,
}

/// DLRR block: delay since the last receiver reference time report.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DlrrBlock {
    pub reports: Vec<DlrrReport>,
}

/// A block this implementation does not interpret, carried verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UnknownBlock {
    pub block_type: u8,
    pub type_specific: u8,
    pub data: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportBlock {
    ReceiverReferenceTime(ReceiverReferenceTimeBlock),
    Dlrr(DlrrBlock),
    Unknown(UnknownBlock),
}

impl ReportBlock {
    fn size(&self) -> usize {
        match self {
            ReportBlock::ReceiverReferenceTime(_) => BLOCK_HEADER_LENGTH + 8,
            ReportBlock::Dlrr(b) => BLOCK_HEADER_LENGTH + b.reports.len() * 12,
            ReportBlock::Unknown(b) => BLOCK_HEADER_LENGTH + b.data.len(),
        }
    }
}

/// An XR packet: originating SSRC plus a sequence of report blocks.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExtendedReport {
    pub sender_ssrc: u32,
    pub reports: Vec<ReportBlock>,
}

impl fmt::Display for ExtendedReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ExtendedReport from {:x} ({} blocks)",
            self.sender_ssrc,
            self.reports.len()
        )
    }
}

impl MarshalSize for ExtendedReport {
    fn marshal_size(&self) -> usize {
        HEADER_LENGTH + SSRC_LENGTH + self.reports.iter().map(|r| r.size()).sum::<usize>()
    }
}

impl Packet for ExtendedReport {
    fn header(&self) -> Header {
        Header {
            padding: false,
            count: 0,
            packet_type: PacketType::ExtendedReport,
            length: (self.marshal_size() / 4 - 1) as u16,
        }
    }

    fn destination_ssrc(&self) -> Vec<u32> {
        let mut out = vec![self.sender_ssrc];
        for report in &self.reports {
            if let ReportBlock::Dlrr(b) = report {
                out.extend(b.reports.iter().map(|r| r.ssrc));
            }
        }
        out
    }

    fn as_any(&self) -> &(dyn Any + 'static) {
        self
    }

    fn equal(&self, other: &(dyn Packet + 'static)) -> bool {
        other
            .as_any()
            .downcast_ref::<ExtendedReport>()
            .is_some_and(|p| self == p)
    }

    fn cloned(&self) -> Box<dyn Packet + 'static> {
        Box::new(self.clone())
    }
}

impl Unmarshal for ExtendedReport {
    fn unmarshal<B>(buf: &mut B) -> Result<Self>
    where
        B: Buf,
    {
        let header = Header::unmarshal(buf)?;
        if header.packet_type != PacketType::ExtendedReport {
            return Err(Error::WrongType);
        }
        if buf.remaining() < SSRC_LENGTH {
            return Err(Error::PacketTooShort);
        }
        let sender_ssrc = buf.get_u32();

        let mut reports = vec![];
        while buf.remaining() >= BLOCK_HEADER_LENGTH {
            let block_type = buf.get_u8();
            let type_specific = buf.get_u8();
            let block_len = buf.get_u16() as usize * 4;
            if buf.remaining() < block_len {
                return Err(Error::InvalidBlockSize);
            }

            match block_type {
                BLOCK_TYPE_RRT => {
                    if block_len != 8 {
                        return Err(Error::InvalidBlockSize);
                    }
                    reports.push(ReportBlock::ReceiverReferenceTime(
                        ReceiverReferenceTimeBlock {
                            ntp_timestamp: buf.get_u64(),
                        },
                    ));
                }
                BLOCK_TYPE_DLRR => {
                    if block_len % 12 != 0 {
                        return Err(Error::InvalidBlockSize);
                    }
                    let mut sub = Vec::with_capacity(block_len / 12);
                    for _ in 0..block_len / 12 {
                        sub.push(DlrrReport {
                            ssrc: buf.get_u32(),
                            last_rr: buf.get_u32(),
                            dlrr: buf.get_u32(),
                        });
                    }
                    reports.push(ReportBlock::Dlrr(DlrrBlock { reports: sub }));
                }
                _ => {
                    reports.push(ReportBlock::Unknown(UnknownBlock {
                        block_type,
                        type_specific,
                        data: buf.copy_to_bytes(block_len),
                    }));
                }
            }
        }
        if buf.remaining() != 0 {
            return Err(Error::PacketTooShort);
        }

        Ok(ExtendedReport {
            sender_ssrc,
            reports,
        })
    }
}

impl Marshal for ExtendedReport {
    fn marshal_to(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.len() < self.marshal_size() {
            return Err(Error::BufferTooShort);
        }

        let mut offset = self.header().marshal_to(buf)?;
        buf[offset..offset + 4].copy_from_slice(&self.sender_ssrc.to_be_bytes());
        offset += SSRC_LENGTH;

        for report in &self.reports {
            let block_words = ((report.size() - BLOCK_HEADER_LENGTH) / 4) as u16;
            match report {
                ReportBlock::ReceiverReferenceTime(b) => {
                    buf[offset] = BLOCK_TYPE_RRT;
                    buf[offset + 1] = 0;
                    buf[offset + 2..offset + 4].copy_from_slice(&block_words.to_be_bytes());
                    buf[offset + 4..offset + 12].copy_from_slice(&b.ntp_timestamp.to_be_bytes());
                    offset += 12;
                }
                ReportBlock::Dlrr(b) => {
                    buf[offset] = BLOCK_TYPE_DLRR;
                    buf[offset + 1] = 0;
                    buf[offset + 2..offset + 4].copy_from_slice(&block_words.to_be_bytes());
                    offset += BLOCK_HEADER_LENGTH;
                    for sub in &b.reports {
                        buf[offset..offset + 4].copy_from_slice(&sub.ssrc.to_be_bytes());
                        buf[offset + 4..offset + 8].copy_from_slice(&sub.last_rr.to_be_bytes());
                        buf[offset + 8..offset + 12].copy_from_slice(&sub.dlrr.to_be_bytes());
                        offset += 12;
                    }
                }
                ReportBlock::Unknown(b) => {
                    if b.data.len() % 4 != 0 {
                        return Err(Error::InvalidBlockSize);
                    }
                    buf[offset] = b.block_type;
                    buf[offset + 1] = b.type_specific;
                    buf[offset + 2..offset + 4].copy_from_slice(&block_words.to_be_bytes());
                    offset += BLOCK_HEADER_LENGTH;
                    buf[offset..offset + b.data.len()].copy_from_slice(&b.data);
                    offset += b.data.len();
                }
            }
        }

        Ok(offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xr_rrt_round_trip() {
        let xr = ExtendedReport {
            sender_ssrc: 0x01020304,
            reports: vec![ReportBlock::ReceiverReferenceTime(
                ReceiverReferenceTimeBlock {
                    ntp_timestamp: 0x0102030405060708,
                },
            )],
        };

        let raw = xr.marshal().unwrap();
        assert_eq!(raw.len(), 4 + 4 + 12);

        let mut buf = raw;
        assert_eq!(ExtendedReport::unmarshal(&mut buf).unwrap(), xr);
    }

    #[test]
    fn test_xr_dlrr_round_trip() {
        let xr = ExtendedReport {
            sender_ssrc: 1,
            reports: vec![ReportBlock::Dlrr(DlrrBlock {
                reports: vec![
                    DlrrReport {
                        ssrc: 2,
                        last_rr: 3,
                        dlrr: 4,
                    },
                    DlrrReport {
                        ssrc: 5,
                        last_rr: 6,
                        dlrr: 7,
                    },
                ],
            })],
        };

        let mut buf = xr.marshal().unwrap();
        assert_eq!(ExtendedReport::unmarshal(&mut buf).unwrap(), xr);
    }

    #[test]
    fn test_xr_unknown_block_passthrough() {
        let xr = ExtendedReport {
            sender_ssrc: 1,
            reports: vec![ReportBlock::Unknown(UnknownBlock {
                block_type: 6,
                type_specific: 0x40,
                data: Bytes::from_static(&[1, 2, 3, 4, 5, 6, 7, 8]),
            })],
        };

        let mut buf = xr.marshal().unwrap();
        assert_eq!(ExtendedReport::unmarshal(&mut buf).unwrap(), xr);
    }

    #[test]
    fn test_xr_block_overrunning_packet_rejected() {
        // RRT block declaring 4 words but only 8 bytes present.
        let mut raw = Bytes::from_static(&[
            0x80, 0xCF, 0x00, 0x03, 0x00, 0x00, 0x00, 0x01, 0x04, 0x00, 0x00, 0x04, 0x01,
            0x02, 0x03, 0x04,
        ]);
        assert_eq!(
            ExtendedReport::unmarshal(&mut raw),
            Err(Error::InvalidBlockSize)
        );
    }
}
