//! Lossless conversion between a data source's native identifiers and the
//! string form used in cache keys and URLs.
//!
//! Every codec must satisfy `decode(&encode(id)) == Ok(id)` for all valid
//! ids. `decode` is total over strings: anything it cannot map to an id is
//! reported as a [`KeyDecodeError`], never coerced.

use crate::error::KeyDecodeError;
use std::fmt;
use std::hash::Hash;
use std::str::FromStr;

/// Explicit, invertible identifier codec.
pub trait IdCodec: Send + Sync + 'static {
    /// The data source's native identifier type.
    type Id: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static;

    /// Canonical string form of `id`.
    fn encode(id: &Self::Id) -> String;

    /// Parse a client-supplied string.
    fn decode(raw: &str) -> Result<Self::Id, KeyDecodeError>;

    /// Decode then re-encode, yielding the canonical spelling of `raw`.
    fn canonicalize(raw: &str) -> Result<String, KeyDecodeError> {
        Self::decode(raw).map(|id| Self::encode(&id))
    }
}

// ============================================================================
// OBJECT IDS
// ============================================================================

/// A 12-byte document identifier: 4-byte big-endian seconds since the
/// epoch, 5 bytes of per-process discriminator, 3-byte big-endian counter.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId([u8; 12]);

impl ObjectId {
    pub const fn from_bytes(bytes: [u8; 12]) -> Self {
        Self(bytes)
    }

    pub fn from_parts(timestamp: u32, process: [u8; 5], counter: u32) -> Self {
        let mut bytes = [0u8; 12];
        bytes[0..4].copy_from_slice(&timestamp.to_be_bytes());
        bytes[4..9].copy_from_slice(&process);
        // Counter is truncated to its low 24 bits.
        bytes[9..12].copy_from_slice(&counter.to_be_bytes()[1..4]);
        Self(bytes)
    }

    pub fn bytes(&self) -> [u8; 12] {
        self.0
    }

    /// Seconds since the epoch embedded in the id.
    pub fn timestamp(&self) -> u32 {
        u32::from_be_bytes([self.0[0], self.0[1], self.0[2], self.0[3]])
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.to_hex())
    }
}

impl FromStr for ObjectId {
    type Err = KeyDecodeError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        if raw.len() != 24 {
            return Err(KeyDecodeError::new(
                raw,
                format!("expected 24 hex characters, got {}", raw.len()),
            ));
        }
        let mut bytes = [0u8; 12];
        hex::decode_to_slice(raw, &mut bytes)
            .map_err(|e| KeyDecodeError::new(raw, e.to_string()))?;
        Ok(Self(bytes))
    }
}

/// Codec for [`ObjectId`]s: lowercase hex out, case-insensitive hex in.
#[derive(Debug, Clone, Copy, Default)]
pub struct ObjectIdCodec;

impl IdCodec for ObjectIdCodec {
    type Id = ObjectId;

    fn encode(id: &ObjectId) -> String {
        id.to_hex()
    }

    fn decode(raw: &str) -> Result<ObjectId, KeyDecodeError> {
        raw.parse()
    }
}

// ============================================================================
// SLUGS
// ============================================================================

/// Codec for sources keyed by short opaque strings such as `m1`.
///
/// Accepts non-empty ASCII alphanumerics plus `-` and `_`; anything else is
/// rejected rather than normalized, so the mapping stays a bijection.
#[derive(Debug, Clone, Copy, Default)]
pub struct SlugCodec;

impl IdCodec for SlugCodec {
    type Id = String;

    fn encode(id: &String) -> String {
        id.clone()
    }

    fn decode(raw: &str) -> Result<String, KeyDecodeError> {
        if raw.is_empty() {
            return Err(KeyDecodeError::new(raw, "empty identifier"));
        }
        match raw
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        {
            Some(bad) => Err(KeyDecodeError::new(
                raw,
                format!("unexpected character {:?}", bad),
            )),
            None => Ok(raw.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_id_hex_round_trip() {
        let id = ObjectId::from_parts(0x6123_abcd, [1, 2, 3, 4, 5], 0x00ab_cdef);
        let encoded = ObjectIdCodec::encode(&id);
        assert_eq!(encoded, "6123abcd0102030405abcdef");
        assert_eq!(ObjectIdCodec::decode(&encoded), Ok(id));
        assert_eq!(id.timestamp(), 0x6123_abcd);
    }

    #[test]
    fn test_object_id_decode_is_case_insensitive() {
        let upper = "6123ABCD0102030405ABCDEF";
        assert_eq!(
            ObjectIdCodec::canonicalize(upper).as_deref(),
            Ok("6123abcd0102030405abcdef")
        );
    }

    #[test]
    fn test_object_id_rejects_malformed() {
        assert!(ObjectIdCodec::decode("").is_err());
        assert!(ObjectIdCodec::decode("m1").is_err());
        assert!(ObjectIdCodec::decode("zz23abcd0102030405abcdef").is_err());
        assert!(ObjectIdCodec::decode("6123abcd0102030405abcdef00").is_err());
    }

    #[test]
    fn test_slug_codec() {
        assert_eq!(SlugCodec::decode("m1"), Ok("m1".to_string()));
        assert_eq!(SlugCodec::decode("big_meetup-2"), Ok("big_meetup-2".to_string()));
        assert!(SlugCodec::decode("").is_err());
        assert!(SlugCodec::decode("../etc").is_err());
        assert!(SlugCodec::decode("m 1").is_err());
    }
}
