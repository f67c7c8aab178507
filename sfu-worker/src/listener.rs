//! Maps incoming RTP to producers by SSRC, MID or RID.

use std::collections::HashMap;

use log::debug;

use rtp::extension::ExtensionMap;
use shared::error::{Error, Result};

/// Opaque producer handle. Cross-object references travel as ids, never as
/// pointers into another component.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProducerId(pub u64);

/// One encoding of a producer, as negotiated.
#[derive(Debug, Clone, Default)]
pub struct EncodingMapping {
    pub ssrc: Option<u32>,
    pub rtx_ssrc: Option<u32>,
    pub rid: Option<String>,
}

/// The identifiers a producer can be demultiplexed by.
#[derive(Debug, Clone, Default)]
pub struct ProducerMapping {
    pub mid: Option<String>,
    pub encodings: Vec<EncodingMapping>,
}

/// Resolves packets to producers, learning SSRCs on the fly from MID/RID
/// header extensions.
#[derive(Default)]
pub struct RtpListener {
    ssrc_table: HashMap<u32, ProducerId>,
    mid_table: HashMap<String, ProducerId>,
    rid_table: HashMap<String, ProducerId>,
}

impl RtpListener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a producer's SSRCs, MID and RIDs. Any conflict rolls back
    /// every entry added for this producer and refuses the addition.
    pub fn add_producer(&mut self, id: ProducerId, mapping: &ProducerMapping) -> Result<()> {
        for encoding in &mapping.encodings {
            for ssrc in [encoding.ssrc, encoding.rtx_ssrc].into_iter().flatten() {
                if self.ssrc_table.contains_key(&ssrc) {
                    self.remove_producer(id);
                    return Err(Error::DuplicateSsrc(ssrc));
                }
                self.ssrc_table.insert(ssrc, id);
            }
        }

        if let Some(mid) = &mapping.mid {
            if self.mid_table.contains_key(mid) {
                self.remove_producer(id);
                return Err(Error::DuplicateMid(mid.clone()));
            }
            self.mid_table.insert(mid.clone(), id);
        }

        for encoding in &mapping.encodings {
            let Some(rid) = &encoding.rid else {
                continue;
            };
            if !self.rid_table.contains_key(rid) {
                self.rid_table.insert(rid.clone(), id);
            } else if mapping.mid.is_none() {
                // A RID collision is tolerable only when MID demux can
                // still tell the producers apart.
                self.remove_producer(id);
                return Err(Error::DuplicateRid(rid.clone()));
            }
        }

        Ok(())
    }

    /// Removes every table entry pointing at `id`.
    pub fn remove_producer(&mut self, id: ProducerId) {
        self.ssrc_table.retain(|_, v| *v != id);
        self.mid_table.retain(|_, v| *v != id);
        self.rid_table.retain(|_, v| *v != id);
    }

    /// Resolves a packet: SSRC first, then MID, then RID. Extension hits
    /// seed the SSRC table so later packets take the fast path.
    pub fn get_producer(
        &mut self,
        packet: &rtp::Packet,
        extensions: &ExtensionMap,
    ) -> Option<ProducerId> {
        let ssrc = packet.header.ssrc;

        if let Some(&id) = self.ssrc_table.get(&ssrc) {
            return Some(id);
        }

        if let Some(mid) = extensions.read_mid(&packet.header) {
            if let Some(&id) = self.mid_table.get(&mid) {
                debug!("learned ssrc {ssrc} for producer via mid {mid:?}");
                self.ssrc_table.insert(ssrc, id);
                return Some(id);
            }
        }

        if let Some(rid) = extensions.read_rid(&packet.header) {
            if let Some(&id) = self.rid_table.get(&rid) {
                debug!("learned ssrc {ssrc} for producer via rid {rid:?}");
                self.ssrc_table.insert(ssrc, id);
                return Some(id);
            }
        }

        None
    }

    pub fn get_producer_by_ssrc(&self, ssrc: u32) -> Option<ProducerId> {
        self.ssrc_table.get(&ssrc).copied()
    }
}
