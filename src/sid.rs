use std::{
    fmt::{Debug, Display, Formatter},
    str::FromStr,
};

use rand::RngCore;
use sha1::{Digest, Sha1};

const HEX_CHARS: &[u8; 16] = b"0123456789abcdef";

/// A session id: 40 lowercase hex chars, the SHA-1 digest of 20 random bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Sid([u8; 40]);

impl Sid {
    /// Generate a new random session id.
    pub fn new() -> Self {
        let mut seed = [0u8; 20];
        rand::thread_rng().fill_bytes(&mut seed);

        let digest = Sha1::digest(seed);
        let mut id = [0u8; 40];
        for (i, byte) in digest.iter().enumerate() {
            id[i * 2] = HEX_CHARS[(byte >> 4) as usize];
            id[i * 2 + 1] = HEX_CHARS[(byte & 0x0f) as usize];
        }

        let id = Sid(id);
        tracing::debug!("generated new session id: {}", id);
        id
    }

    fn as_str(&self) -> &str {
        // SAFETY: a Sid only ever holds ascii hex chars
        unsafe { std::str::from_utf8_unchecked(&self.0) }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SidDecodeError {
    #[error("invalid sid length")]
    InvalidLength,
    #[error("invalid hex string")]
    InvalidHexString,
}

impl FromStr for Sid {
    type Err = SidDecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use SidDecodeError::*;

        if s.len() != 40 {
            return Err(InvalidLength);
        }

        let mut id = [0u8; 40];
        for (i, byte) in s.bytes().enumerate() {
            if !matches!(byte, b'0'..=b'9' | b'a'..=b'f') {
                return Err(InvalidHexString);
            }
            id[i] = byte;
        }
        Ok(Sid(id))
    }
}

impl Default for Sid {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for Sid {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Debug for Sid {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl serde::Serialize for Sid {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

struct SidVisitor;
impl serde::de::Visitor<'_> for SidVisitor {
    type Value = Sid;

    fn expecting(&self, formatter: &mut Formatter) -> std::fmt::Result {
        formatter.write_str("a valid sid")
    }

    fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<Self::Value, E> {
        Sid::from_str(v).map_err(serde::de::Error::custom)
    }
}
impl<'de> serde::Deserialize<'de> for Sid {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_str(SidVisitor)
    }
}
