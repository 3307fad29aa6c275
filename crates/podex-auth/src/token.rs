// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Pod bearer tokens.
//!
//! Raw tokens are **never persisted**: they are shown to the operator once
//! at pod registration, then immediately hashed. Only the SHA-256 digest
//! lives in the database. Comparison uses [`subtle::ConstantTimeEq`] so a
//! token check never becomes a timing oracle.

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

pub const POD_TOKEN_PREFIX: &str = "pdx_pod_";

/// A raw pod token — displayed exactly once, then hashed and dropped.
#[derive(Debug)]
#[must_use = "display this token once, then call into_hash()"]
pub struct RawPodToken(String);

impl RawPodToken {
    /// Generate `pdx_pod_` + 43 chars of base64url (256 random bits).
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        let body = base64::Engine::encode(&base64::engine::general_purpose::URL_SAFE_NO_PAD, bytes);
        RawPodToken(format!("{POD_TOKEN_PREFIX}{body}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Hash the token and discard the plaintext.
    pub fn into_hash(self) -> PodTokenHash {
        PodTokenHash(sha256(self.0.as_bytes()))
    }
}

/// Stored form: the SHA-256 digest, serialized as lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodTokenHash(#[serde(with = "hex_digest")] [u8; 32]);

impl PodTokenHash {
    /// Constant-time verification of a presented token. Tokens without the
    /// `pdx_pod_` prefix are rejected before hashing.
    pub fn verify(&self, presented: &str) -> bool {
        if !presented.starts_with(POD_TOKEN_PREFIX) {
            return false;
        }
        bool::from(sha256(presented.as_bytes()).ct_eq(&self.0))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(digest: &str) -> Option<Self> {
        let bytes = hex::decode(digest).ok()?;
        bytes.try_into().ok().map(PodTokenHash)
    }
}

fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Serde helper: `[u8; 32]` as a lowercase hex string.
mod hex_digest {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &[u8; 32], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(v))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 32], D::Error> {
        let text = String::deserialize(d)?;
        let bytes = hex::decode(&text).map_err(D::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| D::Error::custom("expected 32-byte hex digest"))
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_tokens_carry_the_prefix() {
        let token = RawPodToken::generate();
        assert!(token.as_str().starts_with(POD_TOKEN_PREFIX));
        assert_eq!(token.as_str().len(), POD_TOKEN_PREFIX.len() + 43);
    }

    #[test]
    fn hash_verifies_the_original_token() {
        let raw = RawPodToken::generate();
        let raw_str = raw.as_str().to_string();
        let hash = raw.into_hash();
        assert!(hash.verify(&raw_str));
    }

    #[test]
    fn wrong_token_is_rejected() {
        let hash = RawPodToken::generate().into_hash();
        assert!(!hash.verify("pdx_pod_definitely-wrong"));
        assert!(!hash.verify(""));
    }

    #[test]
    fn unprefixed_token_is_rejected_before_hashing() {
        let raw = RawPodToken::generate();
        let stripped = raw.as_str().trim_start_matches(POD_TOKEN_PREFIX).to_string();
        let hash = raw.into_hash();
        assert!(!hash.verify(&stripped));
    }

    #[test]
    fn two_tokens_never_collide() {
        let a = RawPodToken::generate().into_hash();
        let b = RawPodToken::generate().into_hash();
        assert_ne!(a.to_hex(), b.to_hex());
    }

    #[test]
    fn hex_round_trip() {
        let hash = RawPodToken::generate().into_hash();
        let restored = PodTokenHash::from_hex(&hash.to_hex()).unwrap();
        assert_eq!(hash, restored);
    }

    #[test]
    fn json_round_trip_is_hex_encoded() {
        let hash = RawPodToken::generate().into_hash();
        let json = serde_json::to_string(&hash).unwrap();
        assert!(json.len() == 66, "64 hex chars plus quotes: {json}");
        let back: PodTokenHash = serde_json::from_str(&json).unwrap();
        assert_eq!(hash, back);
    }
}
