//! Transport-facing glue: secure channel lifecycle and RTP/RTCP demux.

use shared::error::{Error, Result};

/// Lifecycle of the secure datagram channel this engine sits behind. The
/// handshake itself happens elsewhere; media may only flow in `Connected`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum SecureChannelState {
    #[default]
    New,
    Connecting,
    Connected,
    Failed,
    Closed,
}

impl SecureChannelState {
    pub fn can_transfer_media(&self) -> bool {
        *self == SecureChannelState::Connected
    }

    /// Gate for outbound traffic; a closed channel is fatal for the
    /// transport.
    pub fn check_send(&self) -> Result<()> {
        match self {
            SecureChannelState::Connected => Ok(()),
            _ => Err(Error::TransportClosed),
        }
    }
}

/// What an incoming plaintext datagram looks like (RFC 7983 / RFC 5761).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PacketKind {
    Rtp,
    Rtcp,
    Unknown,
}

pub fn demux(buf: &[u8]) -> PacketKind {
    if buf.is_empty() {
        return PacketKind::Unknown;
    }
    if !(128..=191).contains(&buf[0]) {
        return PacketKind::Unknown;
    }
    if rtcp::is_rtcp(buf) {
        PacketKind::Rtcp
    } else {
        PacketKind::Rtp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demux() {
        // RTP: version 2, payload type 96.
        assert_eq!(demux(&[0x80, 96, 0, 1, 0, 0, 0, 0, 0, 0, 0, 0]), PacketKind::Rtp);
        // RTCP: packet type 200.
        assert_eq!(demux(&[0x80, 200, 0, 1]), PacketKind::Rtcp);
        // DTLS range.
        assert_eq!(demux(&[22, 254, 253]), PacketKind::Unknown);
        // STUN range.
        assert_eq!(demux(&[0, 1, 0, 0]), PacketKind::Unknown);
        assert_eq!(demux(&[]), PacketKind::Unknown);
    }

    #[test]
    fn test_state_gates_media() {
        assert!(!SecureChannelState::New.can_transfer_media());
        assert!(!SecureChannelState::Connecting.can_transfer_media());
        assert!(SecureChannelState::Connected.can_transfer_media());
        assert!(!SecureChannelState::Closed.can_transfer_media());

        assert!(SecureChannelState::Connected.check_send().is_ok());
        assert_eq!(
            SecureChannelState::Closed.check_send(),
            Err(Error::TransportClosed)
        );
    }
}
