use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::GuardError;

/// Width of every fingerprint in bits.
pub const FINGERPRINT_BITS: u32 = 64;
/// Hex digits in the persisted form.
pub const FINGERPRINT_HEX_LEN: usize = (FINGERPRINT_BITS / 4) as usize;

/// A 64-bit perceptual fingerprint.
///
/// Persisted as 16 lowercase hex digits. The width is fixed by the type, so two
/// fingerprints can always be compared; anything else is rejected when decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Fingerprint(u64);

impl Fingerprint {
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u64 {
        self.0
    }

    /// Builds a fingerprint from hasher output, which must be exactly 8 bytes.
    pub fn from_hash_bytes(bytes: &[u8]) -> Result<Self, GuardError> {
        let arr: [u8; 8] = bytes.try_into().map_err(|_| GuardError::MalformedFingerprint {
            value: hex::encode(bytes),
            reason: format!("expected 8 bytes, got {}", bytes.len()),
        })?;
        Ok(Self(u64::from_be_bytes(arr)))
    }

    /// Population count of the XOR of both bit vectors.
    pub fn distance(self, other: Fingerprint) -> u32 {
        (self.0 ^ other.0).count_ones()
    }

    pub fn to_hex(self) -> String {
        hex::encode(self.0.to_be_bytes())
    }

    pub fn from_hex(s: &str) -> Result<Self, GuardError> {
        if s.len() != FINGERPRINT_HEX_LEN {
            return Err(GuardError::MalformedFingerprint {
                value: s.to_string(),
                reason: format!("expected {FINGERPRINT_HEX_LEN} hex digits, got {}", s.len()),
            });
        }
        let mut buf = [0u8; 8];
        hex::decode_to_slice(s, &mut buf).map_err(|e| GuardError::MalformedFingerprint {
            value: s.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self(u64::from_be_bytes(buf)))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl FromStr for Fingerprint {
    type Err = GuardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl TryFrom<String> for Fingerprint {
    type Error = GuardError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::from_hex(&s)
    }
}

impl From<Fingerprint> for String {
    fn from(f: Fingerprint) -> Self {
        f.to_hex()
    }
}
