//! RTCP common packet header (RFC 3550 §6.4.1).

use bytes::Buf;

use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize, Unmarshal};

pub const HEADER_LENGTH: usize = 4;
pub const VERSION: u8 = 2;
pub const SSRC_LENGTH: usize = 4;

/// Maximum value of the 5-bit count field.
pub const COUNT_MAX: usize = (1 << 5) - 1;

const VERSION_SHIFT: u8 = 6;
const PADDING_SHIFT: u8 = 5;
const COUNT_MASK: u8 = 0x1F;

/// RTCP packet types registered in the demux range [192, 223].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum PacketType {
    #[default]
    Unsupported = 0,
    SenderReport = 200,
    ReceiverReport = 201,
    SourceDescription = 202,
    Goodbye = 203,
    ApplicationDefined = 204,
    TransportSpecificFeedback = 205,
    PayloadSpecificFeedback = 206,
    ExtendedReport = 207,
}

impl From<u8> for PacketType {
    fn from(b: u8) -> Self {
        match b {
            200 => PacketType::SenderReport,
            201 => PacketType::ReceiverReport,
            202 => PacketType::SourceDescription,
            203 => PacketType::Goodbye,
            204 => PacketType::ApplicationDefined,
            205 => PacketType::TransportSpecificFeedback,
            206 => PacketType::PayloadSpecificFeedback,
            207 => PacketType::ExtendedReport,
            _ => PacketType::Unsupported,
        }
    }
}

/// Transport-layer feedback message types (RTPFB FMT values).
pub const FORMAT_NACK: u8 = 1;
pub const FORMAT_TMMBR: u8 = 3;
pub const FORMAT_TMMBN: u8 = 4;
pub const FORMAT_SR_REQ: u8 = 5;
pub const FORMAT_TLLEI: u8 = 7;
pub const FORMAT_ECN: u8 = 8;
pub const FORMAT_TCC: u8 = 15;

/// Payload-specific feedback message types (PSFB FMT values).
pub const FORMAT_PLI: u8 = 1;
pub const FORMAT_SLI: u8 = 2;
pub const FORMAT_RPSI: u8 = 3;
pub const FORMAT_FIR: u8 = 4;
pub const FORMAT_TSTR: u8 = 5;
pub const FORMAT_TSTN: u8 = 6;
pub const FORMAT_VBCM: u8 = 7;
pub const FORMAT_PSLEI: u8 = 8;
pub const FORMAT_AFB: u8 = 15;

/// RFC 5761 demultiplexing: RTCP is version 2 with a packet type in
/// [192, 223].
pub fn is_rtcp(buf: &[u8]) -> bool {
    if buf.len() < HEADER_LENGTH {
        return false;
    }
    if buf[0] >> VERSION_SHIFT != VERSION {
        return false;
    }
    (192..=223).contains(&buf[1])
}

/// The 4-byte header every RTCP packet starts with. `count` doubles as the
/// feedback message type for RTPFB/PSFB packets.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct Header {
    pub padding: bool,
    pub count: u8,
    pub packet_type: PacketType,
    /// Packet length in 32-bit words, minus one.
    pub length: u16,
}

impl MarshalSize for Header {
    fn marshal_size(&self) -> usize {
        HEADER_LENGTH
    }
}

impl Unmarshal for Header {
    fn unmarshal<B>(buf: &mut B) -> Result<Self>
    where
        B: Buf,
    {
        if buf.remaining() < HEADER_LENGTH {
            return Err(Error::PacketTooShort);
        }

        let b0 = buf.get_u8();
        if b0 >> VERSION_SHIFT != VERSION {
            return Err(Error::BadVersion);
        }
        let padding = (b0 >> PADDING_SHIFT) & 0x1 == 1;
        let count = b0 & COUNT_MASK;
        let packet_type = PacketType::from(buf.get_u8());
        let length = buf.get_u16();

        Ok(Header {
            padding,
            count,
            packet_type,
            length,
        })
    }
}

impl Marshal for Header {
    fn marshal_to(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.len() < HEADER_LENGTH {
            return Err(Error::BufferTooShort);
        }
        if self.count > COUNT_MAX as u8 {
            return Err(Error::InvalidHeader);
        }

        let mut b0 = VERSION << VERSION_SHIFT;
        if self.padding {
            b0 |= 1 << PADDING_SHIFT;
        }
        b0 |= self.count;
        buf[0] = b0;
        buf[1] = self.packet_type as u8;
        buf[2..4].copy_from_slice(&self.length.to_be_bytes());

        Ok(HEADER_LENGTH)
    }
}
