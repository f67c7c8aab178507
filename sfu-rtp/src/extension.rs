//! Known header extension URIs and the negotiated uri → id mapping.

use bytes::Bytes;

use crate::header::Header;

/// Header extensions the engine understands. The id each one travels under
/// is negotiated externally and supplied through [`ExtensionMap`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ExtensionUri {
    Mid,
    Rid,
    RepairedRid,
    AbsSendTime,
    TransportWideCc,
    SsrcAudioLevel,
    VideoOrientation,
    TransmissionOffset,
    FrameMarking,
    AbsCaptureTime,
    PlayoutDelay,
}

impl ExtensionUri {
    pub fn from_uri(uri: &str) -> Option<Self> {
        match uri {
            "urn:ietf:params:rtp-hdrext:sdes:mid" => Some(Self::Mid),
            "urn:ietf:params:rtp-hdrext:sdes:rtp-stream-id" => Some(Self::Rid),
            "urn:ietf:params:rtp-hdrext:sdes:repaired-rtp-stream-id" => Some(Self::RepairedRid),
            "http://www.webrtc.org/experiments/rtp-hdrext/abs-send-time" => {
                Some(Self::AbsSendTime)
            }
            "http://www.ietf.org/id/draft-holmer-rmcat-transport-wide-cc-extensions-01" => {
                Some(Self::TransportWideCc)
            }
            "urn:ietf:params:rtp-hdrext:ssrc-audio-level" => Some(Self::SsrcAudioLevel),
            "urn:3gpp:video-orientation" => Some(Self::VideoOrientation),
            "urn:ietf:params:rtp-hdrext:toffset" => Some(Self::TransmissionOffset),
            "http://tools.ietf.org/html/draft-ietf-avtext-framemarking-07" => {
                Some(Self::FrameMarking)
            }
            "http://www.webrtc.org/experiments/rtp-hdrext/abs-capture-time" => {
                Some(Self::AbsCaptureTime)
            }
            "http://www.webrtc.org/experiments/rtp-hdrext/playout-delay" => {
                Some(Self::PlayoutDelay)
            }
            _ => None,
        }
    }
}

/// The per-transport uri → id table. An id of `None` means the extension was
/// not negotiated.
///
/// Frame-marking deliberately holds whichever single id was configured
/// (draft and RFC assignments differ); there is no fallback to the other.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtensionMap {
    pub mid: Option<u8>,
    pub rid: Option<u8>,
    pub repaired_rid: Option<u8>,
    pub abs_send_time: Option<u8>,
    pub transport_wide_cc: Option<u8>,
    pub ssrc_audio_level: Option<u8>,
    pub video_orientation: Option<u8>,
    pub toffset: Option<u8>,
    pub frame_marking: Option<u8>,
    pub abs_capture_time: Option<u8>,
    pub playout_delay: Option<u8>,
}

impl ExtensionMap {
    pub fn set(&mut self, uri: ExtensionUri, id: u8) {
        let slot = match uri {
            ExtensionUri::Mid => &mut self.mid,
            ExtensionUri::Rid => &mut self.rid,
            ExtensionUri::RepairedRid => &mut self.repaired_rid,
            ExtensionUri::AbsSendTime => &mut self.abs_send_time,
            ExtensionUri::TransportWideCc => &mut self.transport_wide_cc,
            ExtensionUri::SsrcAudioLevel => &mut self.ssrc_audio_level,
            ExtensionUri::VideoOrientation => &mut self.video_orientation,
            ExtensionUri::TransmissionOffset => &mut self.toffset,
            ExtensionUri::FrameMarking => &mut self.frame_marking,
            ExtensionUri::AbsCaptureTime => &mut self.abs_capture_time,
            ExtensionUri::PlayoutDelay => &mut self.playout_delay,
        };
        *slot = Some(id);
    }

    fn get(&self, header: &Header, id: Option<u8>) -> Option<Bytes> {
        header.get_extension(id?)
    }

    pub fn read_mid(&self, header: &Header) -> Option<String> {
        read_utf8(self.get(header, self.mid)?)
    }

    pub fn read_rid(&self, header: &Header) -> Option<String> {
        read_utf8(self.get(header, self.rid)?)
    }

    pub fn read_repaired_rid(&self, header: &Header) -> Option<String> {
        read_utf8(self.get(header, self.repaired_rid)?)
    }

    /// 24-bit 6.18 fixed point send time (abs-send-time).
    pub fn read_abs_send_time(&self, header: &Header) -> Option<u32> {
        let payload = self.get(header, self.abs_send_time)?;
        if payload.len() < 3 {
            return None;
        }
        Some(((payload[0] as u32) << 16) | ((payload[1] as u32) << 8) | payload[2] as u32)
    }

    /// Transport-wide sequence number.
    pub fn read_transport_wide_cc(&self, header: &Header) -> Option<u16> {
        let payload = self.get(header, self.transport_wide_cc)?;
        if payload.len() < 2 {
            return None;
        }
        Some(u16::from_be_bytes([payload[0], payload[1]]))
    }

    /// `(voice_activity, level_dbov)` from ssrc-audio-level.
    pub fn read_audio_level(&self, header: &Header) -> Option<(bool, u8)> {
        let payload = self.get(header, self.ssrc_audio_level)?;
        let b = *payload.first()?;
        Some((b & 0x80 != 0, b & 0x7F))
    }

    /// First byte of the frame-marking extension (S/E/I/D + TID bits).
    pub fn read_frame_marking(&self, header: &Header) -> Option<u8> {
        let payload = self.get(header, self.frame_marking)?;
        payload.first().copied()
    }

    pub fn write_transport_wide_cc(&self, header: &mut Header, wide_seq: u16) -> bool {
        let Some(id) = self.transport_wide_cc else {
            return false;
        };
        header
            .set_extension(id, Bytes::copy_from_slice(&wide_seq.to_be_bytes()))
            .is_ok()
    }
}

fn read_utf8(payload: Bytes) -> Option<String> {
    let s = std::str::from_utf8(&payload).ok()?;
    if s.is_empty() {
        return None;
    }
    Some(s.to_string())
}
