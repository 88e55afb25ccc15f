//! Chain parameters and the beacon emission time model.
//!
//! A chain emits one beacon every `period` seconds; round 1 lands at
//! `genesis_time + period`. The V2 JSON shape is the canonical one; V1 is
//! a field-renamed projection kept for wire compatibility.

use crate::beacon::HexBytes;
use serde::{Deserialize, Serialize};

/// Wall-clock source returning the current unix second.
///
/// Injected into the handler state instead of read from a global so tests
/// can pin time.
pub type Clock = fn() -> i64;

/// The default clock, reading the system time.
#[must_use]
pub fn system_clock() -> i64 {
    match std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH) {
        Ok(elapsed) => elapsed.as_secs() as i64,
        Err(_) => 0,
    }
}

/// Chain info in its V2 JSON shape.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainInfo {
    pub public_key: HexBytes,
    pub period: u32,
    pub genesis_time: i64,
    #[serde(default, skip_serializing_if = "HexBytes::is_empty")]
    pub genesis_seed: HexBytes,
    #[serde(rename = "chain_hash")]
    pub hash: HexBytes,
    pub scheme: String,
    pub beacon_id: String,
}

/// Chain info in its V1 JSON shape: same data, renamed fields, with the
/// beacon id nested under `metadata`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainInfoV1 {
    pub public_key: HexBytes,
    pub period: u32,
    pub genesis_time: i64,
    pub hash: HexBytes,
    #[serde(rename = "groupHash")]
    pub group_hash: HexBytes,
    #[serde(rename = "schemeID", default, skip_serializing_if = "String::is_empty")]
    pub scheme_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<V1Metadata>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct V1Metadata {
    #[serde(rename = "beaconID")]
    pub beacon_id: String,
}

impl ChainInfo {
    /// Builds chain info from the wire packet.
    #[must_use]
    pub fn from_packet(packet: relay_proto::beacon::ChainInfoPacket) -> Self {
        let metadata = packet.metadata.unwrap_or_default();
        Self {
            public_key: HexBytes(packet.public_key),
            period: packet.period,
            genesis_time: packet.genesis_time,
            genesis_seed: HexBytes(packet.group_hash),
            hash: HexBytes(metadata.chain_hash),
            scheme: packet.scheme_id,
            beacon_id: metadata.beacon_id,
        }
    }

    /// Returns `(expected_time, expected_round)` for the next emission
    /// after `now` (a unix second).
    ///
    /// Integer division rounds towards zero; the `+ 1` accounts for round
    /// 1 landing at `genesis_time + period`.
    #[must_use]
    pub fn expected_next(&self, now: i64) -> (i64, u64) {
        let period = i64::from(self.period);
        let expected = (now - self.genesis_time) / period + 1;
        (expected * period + self.genesis_time, expected as u64)
    }

    /// Projects to the V1 shape. `genesis_seed` becomes `groupHash`.
    #[must_use]
    pub fn v1(&self) -> ChainInfoV1 {
        ChainInfoV1 {
            public_key: self.public_key.clone(),
            period: self.period,
            genesis_time: self.genesis_time,
            hash: self.hash.clone(),
            group_hash: self.genesis_seed.clone(),
            scheme_id: self.scheme.clone(),
            metadata: Some(V1Metadata { beacon_id: self.beacon_id.clone() }),
        }
    }
}

impl ChainInfoV1 {
    /// Projects back to the V2 shape.
    #[must_use]
    pub fn v2(&self) -> ChainInfo {
        ChainInfo {
            public_key: self.public_key.clone(),
            period: self.period,
            genesis_time: self.genesis_time,
            hash: self.hash.clone(),
            genesis_seed: self.group_hash.clone(),
            scheme: self.scheme_id.clone(),
            beacon_id: self.metadata.as_ref().map(|m| m.beacon_id.clone()).unwrap_or_default(),
        }
    }
}
