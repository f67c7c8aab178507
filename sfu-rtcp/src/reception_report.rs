//! Reception report block shared by SR and RR packets.

use std::fmt;

use bytes::Buf;

use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize, Unmarshal};

pub const RECEPTION_REPORT_LENGTH: usize = 24;

/// One reception report block (RFC 3550 §6.4.1), conveying statistics on the
/// reception of RTP packets from a single synchronization source.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct ReceptionReport {
    /// The SSRC this report is about.
    pub ssrc: u32,
    /// Fraction of packets lost since the previous report, as a fixed point
    /// number with the binary point at the left edge.
    pub fraction_lost: u8,
    /// Cumulative number of packets lost, a signed 24-bit quantity.
    pub total_lost: u32,
    /// Extended highest sequence number received: cycle count in the high
    /// 16 bits, highest sequence number in the low 16.
    pub last_sequence_number: u32,
    /// Interarrival jitter in timestamp units.
    pub jitter: u32,
    /// Middle 32 bits of the NTP timestamp of the last SR received.
    pub last_sender_report: u32,
    /// Delay since that SR, in units of 1/65536 seconds.
    pub delay: u32,
}

impl fmt::Display for ReceptionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ReceptionReport(ssrc: {:#x}, lost: {}/{}, highest: {})",
            self.ssrc, self.fraction_lost, self.total_lost, self.last_sequence_number
        )
    }
}

impl MarshalSize for ReceptionReport {
    fn marshal_size(&self) -> usize {
        RECEPTION_REPORT_LENGTH
    }
}

impl Unmarshal for ReceptionReport {
    fn unmarshal<B>(buf: &mut B) -> Result<Self>
    where
        B: Buf,
    {
        if buf.remaining() < RECEPTION_REPORT_LENGTH {
            return Err(Error::PacketTooShort);
        }

        let ssrc = buf.get_u32();
        let fraction_lost = buf.get_u8();

        let t0 = buf.get_u8();
        let t1 = buf.get_u8();
        let t2 = buf.get_u8();
        let total_lost = ((t0 as u32) << 16) | ((t1 as u32) << 8) | t2 as u32;

        let last_sequence_number = buf.get_u32();
        let jitter = buf.get_u32();
        let last_sender_report = buf.get_u32();
        let delay = buf.get_u32();

        Ok(ReceptionReport {
            ssrc,
            fraction_lost,
            total_lost,
            last_sequence_number,
            jitter,
            last_sender_report,
            delay,
        })
    }
}

impl Marshal for ReceptionReport {
    fn marshal_to(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.len() < RECEPTION_REPORT_LENGTH {
            return Err(Error::BufferTooShort);
        }
        if self.total_lost >= (1 << 24) {
            return Err(Error::InvalidTotalLost);
        }

        buf[0..4].copy_from_slice(&self.ssrc.to_be_bytes());
        buf[4] = self.fraction_lost;
        buf[5] = (self.total_lost >> 16) as u8;
        buf[6] = (self.total_lost >> 8) as u8;
        buf[7] = self.total_lost as u8;
        buf[8..12].copy_from_slice(&self.last_sequence_number.to_be_bytes());
        buf[12..16].copy_from_slice(&self.jitter.to_be_bytes());
        buf[16..20].copy_from_slice(&self.last_sender_report.to_be_bytes());
        buf[20..24].copy_from_slice(&self.delay.to_be_bytes());

        Ok(RECEPTION_REPORT_LENGTH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reception_report_round_trip() {
        let report = ReceptionReport {
            ssrc: 0x01932db4,
            fraction_lost: 0,
            total_lost: 1,
            last_sequence_number: 0,
            jitter: 0,
            last_sender_report: 0,
            delay: 5,
        };

        let raw = report.marshal().unwrap();
        assert_eq!(raw.len(), 24);
        assert_eq!(
            raw.as_ref(),
            &[
                0x01, 0x93, 0x2d, 0xb4, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00,
                0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x05,
            ]
        );

        let mut buf = raw;
        assert_eq!(ReceptionReport::unmarshal(&mut buf).unwrap(), report);
    }

    #[test]
    fn test_reception_report_overflowing_loss_rejected() {
        let report = ReceptionReport {
            total_lost: 1 << 24,
            ..Default::default()
        };
        assert_eq!(report.marshal(), Err(Error::InvalidTotalLost));
    }

    #[test]
    fn test_reception_report_too_short() {
        let mut buf = bytes::Bytes::from_static(&[0u8; 20]);
        assert_eq!(
            ReceptionReport::unmarshal(&mut buf),
            Err(Error::PacketTooShort)
        );
    }
}
