use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Size of an object identifier in bytes
pub const ID_SIZE: usize = 32;

/// Errors that can occur when parsing identifiers
#[derive(Debug, thiserror::Error)]
pub enum IdError {
    #[error("invalid id length, expected {expected} hex characters, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("invalid hex in id: {0}")]
    InvalidHex(#[from] hex::FromHexError),
}

/// A 32-byte object identifier, the SHA-256 digest of some byte string.
///
/// Plaintext ids name pre-encryption bytes and drive deduplication; storage
/// ids name ciphertext as stored and double as backend object names. The
/// text form is always 64 lowercase hex characters.
///
/// Equality is constant-time; ordering is lexicographic over the raw bytes.
#[derive(Clone, Copy, Default)]
pub struct Id([u8; ID_SIZE]);

impl Id {
    /// Compute the identifier of a byte string
    pub fn digest(data: impl AsRef<[u8]>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data.as_ref());
        Id(hasher.finalize().into())
    }

    /// Parse an identifier from a 64-character hex string
    pub fn from_hex(hex: &str) -> Result<Self, IdError> {
        if hex.len() != 2 * ID_SIZE {
            return Err(IdError::InvalidLength {
                expected: 2 * ID_SIZE,
                actual: hex.len(),
            });
        }
        let mut buff = [0; ID_SIZE];
        hex::decode_to_slice(hex, &mut buff)?;
        Ok(Id(buff))
    }

    /// Encode the identifier as lowercase hex
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Get a reference to the raw bytes
    pub fn as_bytes(&self) -> &[u8; ID_SIZE] {
        &self.0
    }

    /// True if this is the all-zero placeholder id
    pub fn is_zero(&self) -> bool {
        self.0 == [0; ID_SIZE]
    }
}

impl From<[u8; ID_SIZE]> for Id {
    fn from(bytes: [u8; ID_SIZE]) -> Self {
        Id(bytes)
    }
}

impl TryFrom<&[u8]> for Id {
    type Error = IdError;
    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        if bytes.len() != ID_SIZE {
            return Err(IdError::InvalidLength {
                expected: ID_SIZE,
                actual: bytes.len(),
            });
        }
        let mut buff = [0; ID_SIZE];
        buff.copy_from_slice(bytes);
        Ok(Id(buff))
    }
}

impl PartialEq for Id {
    // Timing-independent comparison; ids are digests of possibly secret
    // plaintext.
    fn eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl Eq for Id {}

impl std::hash::Hash for Id {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl Ord for Id {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl PartialOrd for Id {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id({})", self.to_hex())
    }
}

impl FromStr for Id {
    type Err = IdError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Id::from_hex(s)
    }
}

impl Serialize for Id {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Id {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let hex = String::deserialize(deserializer)?;
        Id::from_hex(&hex).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_digest_known_value() {
        // SHA-256 of the 6 bytes "hello\n"
        let id = Id::digest(b"hello\n");
        assert_eq!(
            id.to_hex(),
            "5891b5b522d5df086d0ff0b110fbd9d21bb4fc7163af34d08286a2e846f6be03"
        );
    }

    #[test]
    fn test_hex_round_trip() {
        let id = Id::digest(b"some data");
        let parsed = Id::from_hex(&id.to_hex()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_from_hex_rejects_bad_input() {
        assert!(Id::from_hex("abcd").is_err());
        assert!(Id::from_hex(&"g".repeat(64)).is_err());
        assert!(Id::from_hex(&"a".repeat(63)).is_err());
        assert!(Id::from_hex(&"a".repeat(65)).is_err());
    }

    #[test]
    fn test_ordering_is_lexicographic() {
        let a = Id::from([0u8; ID_SIZE]);
        let mut high = [0u8; ID_SIZE];
        high[0] = 1;
        let b = Id::from(high);
        assert!(a < b);
        assert_eq!(a.cmp(&a), Ordering::Equal);
    }

    #[test]
    fn test_serde_as_hex_string() {
        let id = Id::digest(b"serde");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id.to_hex()));
        let back: Id = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }

    #[test]
    fn test_zero_placeholder() {
        assert!(Id::default().is_zero());
        assert!(!Id::digest(b"x").is_zero());
    }
}
