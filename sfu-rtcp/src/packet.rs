//! The RTCP packet trait object and the compound-series parser.

use std::any::Any;
use std::fmt;

use bytes::{Buf, Bytes};
use log::debug;

use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize, Unmarshal};

use crate::extended_report::ExtendedReport;
use crate::goodbye::Goodbye;
use crate::header::{self, Header, PacketType, HEADER_LENGTH};
use crate::payload_feedbacks::application_layer_feedback::ApplicationLayerFeedback;
use crate::payload_feedbacks::full_intra_request::FullIntraRequest;
use crate::payload_feedbacks::payload_specific_lei::PayloadSpecificLei;
use crate::payload_feedbacks::picture_loss_indication::PictureLossIndication;
use crate::payload_feedbacks::receiver_estimated_maximum_bitrate::ReceiverEstimatedMaximumBitrate;
use crate::payload_feedbacks::reference_picture_selection_indication::ReferencePictureSelectionIndication;
use crate::payload_feedbacks::slice_loss_indication::SliceLossIndication;
use crate::payload_feedbacks::temporal_spatial_trade_off::{
    TemporalSpatialTradeOffNotification, TemporalSpatialTradeOffRequest,
};
use crate::payload_feedbacks::video_back_channel_message::VideoBackChannelMessage;
use crate::raw_packet::RawPacket;
use crate::receiver_report::ReceiverReport;
use crate::sender_report::SenderReport;
use crate::source_description::SourceDescription;
use crate::transport_feedbacks::ecn::EcnFeedback;
use crate::transport_feedbacks::rapid_resynchronization_request::RapidResynchronizationRequest;
use crate::transport_feedbacks::tmmb::{TmmbNotification, TmmbRequest};
use crate::transport_feedbacks::transport_layer_cc::TransportLayerCc;
use crate::transport_feedbacks::transport_layer_lei::TransportLayerLei;
use crate::transport_feedbacks::transport_layer_nack::TransportLayerNack;

/// A parsed RTCP packet of any type.
pub trait Packet: Marshal + fmt::Debug + fmt::Display {
    fn header(&self) -> Header;
    /// SSRC values this packet refers to.
    fn destination_ssrc(&self) -> Vec<u32>;
    fn as_any(&self) -> &(dyn Any + 'static);
    fn equal(&self, other: &(dyn Packet + 'static)) -> bool;
    fn cloned(&self) -> Box<dyn Packet + 'static>;
}

impl PartialEq for dyn Packet + 'static {
    fn eq(&self, other: &Self) -> bool {
        self.equal(other)
    }
}

impl Clone for Box<dyn Packet + 'static> {
    fn clone(&self) -> Self {
        self.cloned()
    }
}

/// Parses a chained series of RTCP packets out of `buf`.
///
/// The walk stops at the first malformed entry; packets parsed before it
/// remain valid and are returned. An input with no parseable packet at all
/// is an error.
pub fn unmarshal<B>(buf: &mut B) -> Result<Vec<Box<dyn Packet>>>
where
    B: Buf,
{
    let mut raw = buf.copy_to_bytes(buf.remaining());
    let mut packets: Vec<Box<dyn Packet>> = vec![];

    while raw.len() >= HEADER_LENGTH {
        let mut peek = raw.clone();
        let header = match Header::unmarshal(&mut peek) {
            Ok(header) => header,
            Err(e) => {
                debug!("rtcp: bad common header: {e}");
                break;
            }
        };

        let packet_len = (header.length as usize + 1) * 4;
        if packet_len > raw.len() {
            debug!(
                "rtcp: declared length {} exceeds remaining {}",
                packet_len,
                raw.len()
            );
            break;
        }

        let chunk = raw.slice(..packet_len);
        match unmarshal_one(&header, chunk) {
            Ok(packet) => packets.push(packet),
            Err(e) => {
                debug!("rtcp: dropping malformed {:?} packet: {e}", header.packet_type);
                break;
            }
        }

        raw = raw.slice(packet_len..);
    }

    if packets.is_empty() {
        return Err(Error::InvalidHeader);
    }
    Ok(packets)
}

fn unmarshal_one(header: &Header, mut chunk: Bytes) -> Result<Box<dyn Packet>> {
    let full = chunk.clone();

    let packet: Box<dyn Packet> = match header.packet_type {
        PacketType::SenderReport => Box::new(SenderReport::unmarshal(&mut chunk)?),
        PacketType::ReceiverReport => Box::new(ReceiverReport::unmarshal(&mut chunk)?),
        PacketType::SourceDescription => Box::new(SourceDescription::unmarshal(&mut chunk)?),
        PacketType::Goodbye => Box::new(Goodbye::unmarshal(&mut chunk)?),
        PacketType::TransportSpecificFeedback => match header.count {
            header::FORMAT_NACK => Box::new(TransportLayerNack::unmarshal(&mut chunk)?),
            header::FORMAT_TMMBR => Box::new(TmmbRequest::unmarshal(&mut chunk)?),
            header::FORMAT_TMMBN => Box::new(TmmbNotification::unmarshal(&mut chunk)?),
            header::FORMAT_SR_REQ => {
                Box::new(RapidResynchronizationRequest::unmarshal(&mut chunk)?)
            }
            header::FORMAT_TLLEI => Box::new(TransportLayerLei::unmarshal(&mut chunk)?),
            header::FORMAT_ECN => Box::new(EcnFeedback::unmarshal(&mut chunk)?),
            header::FORMAT_TCC => Box::new(TransportLayerCc::unmarshal(&mut chunk)?),
            _ => Box::new(RawPacket::unmarshal(&mut chunk)?),
        },
        PacketType::PayloadSpecificFeedback => match header.count {
            header::FORMAT_PLI => Box::new(PictureLossIndication::unmarshal(&mut chunk)?),
            header::FORMAT_SLI => Box::new(SliceLossIndication::unmarshal(&mut chunk)?),
            header::FORMAT_RPSI => {
                Box::new(ReferencePictureSelectionIndication::unmarshal(&mut chunk)?)
            }
            header::FORMAT_FIR => Box::new(FullIntraRequest::unmarshal(&mut chunk)?),
            header::FORMAT_TSTR => {
                Box::new(TemporalSpatialTradeOffRequest::unmarshal(&mut chunk)?)
            }
            header::FORMAT_TSTN => {
                Box::new(TemporalSpatialTradeOffNotification::unmarshal(&mut chunk)?)
            }
            header::FORMAT_VBCM => Box::new(VideoBackChannelMessage::unmarshal(&mut chunk)?),
            header::FORMAT_PSLEI => Box::new(PayloadSpecificLei::unmarshal(&mut chunk)?),
            header::FORMAT_AFB => {
                // An AFB whose payload leads with "REMB" is a receiver
                // estimated maximum bitrate message.
                if full.len() >= 16 && &full[12..16] == b"REMB" {
                    let mut remb_chunk = full.clone();
                    Box::new(ReceiverEstimatedMaximumBitrate::unmarshal(&mut remb_chunk)?)
                } else {
                    Box::new(ApplicationLayerFeedback::unmarshal(&mut chunk)?)
                }
            }
            _ => Box::new(RawPacket::unmarshal(&mut chunk)?),
        },
        PacketType::ExtendedReport => Box::new(ExtendedReport::unmarshal(&mut chunk)?),
        _ => Box::new(RawPacket::unmarshal(&mut chunk)?),
    };

    Ok(packet)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reception_report::ReceptionReport;

    #[test]
    fn test_unmarshal_chain() {
        let rr = ReceiverReport {
            ssrc: 0x902f9e2e,
            reports: vec![ReceptionReport {
                ssrc: 0x902f9e2e,
                fraction_lost: 0,
                total_lost: 0,
                last_sequence_number: 0x46e1,
                jitter: 273,
                last_sender_report: 0x9f36432,
                delay: 150137,
            }],
            ..Default::default()
        };
        let pli = PictureLossIndication {
            sender_ssrc: 0x902f9e2e,
            media_ssrc: 0x902f9e2e,
        };

        let mut raw = Vec::new();
        raw.extend_from_slice(&rr.marshal().unwrap());
        raw.extend_from_slice(&pli.marshal().unwrap());

        let mut buf = Bytes::from(raw);
        let packets = unmarshal(&mut buf).unwrap();
        assert_eq!(packets.len(), 2);
        assert!(packets[0].as_any().downcast_ref::<ReceiverReport>().is_some());
        assert!(packets[1]
            .as_any()
            .downcast_ref::<PictureLossIndication>()
            .is_some());
    }

    #[test]
    fn test_unmarshal_keeps_valid_prefix() {
        let pli = PictureLossIndication {
            sender_ssrc: 1,
            media_ssrc: 2,
        };
        let mut raw = Vec::new();
        raw.extend_from_slice(&pli.marshal().unwrap());
        // A truncated second packet: header declares more than remains.
        raw.extend_from_slice(&[0x81, 0xCE, 0x00, 0x08, 0x00, 0x00]);

        let mut buf = Bytes::from(raw);
        let packets = unmarshal(&mut buf).unwrap();
        assert_eq!(packets.len(), 1);
    }

    #[test]
    fn test_unmarshal_nothing_valid() {
        let mut buf = Bytes::from_static(&[0x00, 0x00, 0x00, 0x00]);
        assert!(unmarshal(&mut buf).is_err());

        let mut empty = Bytes::new();
        assert!(unmarshal(&mut empty).is_err());
    }

    #[test]
    fn test_unmarshal_never_panics_on_truncation() {
        let rr = ReceiverReport {
            ssrc: 0x902f9e2e,
            reports: vec![ReceptionReport {
                ssrc: 1,
                ..Default::default()
            }],
            ..Default::default()
        };
        let pli = PictureLossIndication {
            sender_ssrc: 1,
            media_ssrc: 2,
        };
        let mut raw = Vec::new();
        raw.extend_from_slice(&rr.marshal().unwrap());
        raw.extend_from_slice(&pli.marshal().unwrap());

        // Every prefix must either parse a valid prefix of the chain or
        // error out; reads beyond the slice are impossible by construction.
        for len in 0..raw.len() {
            let mut buf = Bytes::copy_from_slice(&raw[..len]);
            let _ = unmarshal(&mut buf);
        }

        // Flipping the length field of the first packet must not panic
        // either.
        for byte in 0..=255u8 {
            let mut mutated = raw.clone();
            mutated[3] = byte;
            let mut buf = Bytes::from(mutated);
            let _ = unmarshal(&mut buf);
        }
    }

    #[test]
    fn test_unmarshal_unknown_type_as_raw() {
        // APP packet (204) round-trips as a raw packet.
        let raw_bytes: &[u8] = &[
            0x80, 0xCC, 0x00, 0x02, 0x00, 0x00, 0x00, 0x01, 0x61, 0x62, 0x63, 0x64,
        ];
        let mut buf = Bytes::from_static(raw_bytes);
        let packets = unmarshal(&mut buf).unwrap();
        assert_eq!(packets.len(), 1);
        let raw = packets[0].as_any().downcast_ref::<RawPacket>().unwrap();
        assert_eq!(raw.marshal().unwrap().as_ref(), raw_bytes);
    }
}
