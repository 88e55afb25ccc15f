//! Hex-encoded JSON beacon envelope.
//!
//! Byte fields marshal to lowercase hex rather than the serde default of
//! an integer array, keeping compatibility with the historical JSON shape
//! served to clients. Optional fields with zero length are omitted.

use relay_proto::beacon::PublicRandResponse;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

/// A byte buffer that serializes as a lowercase hex string.
///
/// Decoding accepts upper- and lower-case digits; odd-length input fails.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HexBytes(pub Vec<u8>);

impl HexBytes {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for HexBytes {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl std::fmt::Display for HexBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&hex::encode(&self.0))
    }
}

impl Serialize for HexBytes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for HexBytes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(&s).map(HexBytes).map_err(serde::de::Error::custom)
    }
}

/// The JSON envelope served for a single beacon.
///
/// `previous_signature` and `randomness` are omitted from the output when
/// empty; backends are not expected to send `randomness` over the wire,
/// so v1 responses derive it via [`HexBeacon::set_randomness`] and v2
/// responses strip it via [`HexBeacon::unset_randomness`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HexBeacon {
    pub round: u64,
    #[serde(default, skip_serializing_if = "HexBytes::is_empty")]
    pub randomness: HexBytes,
    pub signature: HexBytes,
    #[serde(default, skip_serializing_if = "HexBytes::is_empty")]
    pub previous_signature: HexBytes,
}

impl HexBeacon {
    /// Fills `randomness` by hashing the signature. Deterministic, so any
    /// relay derives the same value the signing node would have sent.
    pub fn set_randomness(&mut self) {
        self.randomness = HexBytes(Sha256::digest(&self.signature.0).to_vec());
    }

    /// Clears `randomness` so it is omitted from the marshalled output.
    pub fn unset_randomness(&mut self) {
        self.randomness = HexBytes::default();
    }
}

impl From<PublicRandResponse> for HexBeacon {
    /// Boundary translation from the wire message. Randomness is not
    /// carried over; output shaping decides whether to derive or omit it.
    fn from(resp: PublicRandResponse) -> Self {
        Self {
            round: resp.round,
            randomness: HexBytes::default(),
            signature: HexBytes(resp.signature),
            previous_signature: HexBytes(resp.previous_signature),
        }
    }
}
