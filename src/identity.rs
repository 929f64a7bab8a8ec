//! Content-derived vertex identity
//!
//! Every vertex id is a pure function of the object's semantic identity, so
//! the same file, entity or mapping lands on the same vertex no matter which
//! document introduced it or in which run it was loaded.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Separator between identifying fields inside a key
const FIELD_SEPARATOR: char = '\u{1f}';

/// 128-bit vertex identifier (first 16 bytes of a SHA256 digest, big-endian)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VertexId(u128);

impl VertexId {
    /// Hash an arbitrary identity key
    pub fn from_key(key: &str) -> Self {
        let digest = Sha256::digest(key.as_bytes());
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&digest[..16]);
        Self(u128::from_be_bytes(bytes))
    }

    /// Raw integer value
    pub fn as_u128(&self) -> u128 {
        self.0
    }
}

impl From<u128> for VertexId {
    fn from(value: u128) -> Self {
        Self(value)
    }
}

impl fmt::Display for VertexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl FromStr for VertexId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        u128::from_str_radix(s, 16).map(Self)
    }
}

impl Serialize for VertexId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for VertexId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

fn key(kind: &str, fields: &[&str]) -> String {
    let mut key = String::from(kind);
    key.push(':');
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            key.push(FIELD_SEPARATOR);
        }
        key.push_str(field);
    }
    key
}

/// Id of a File vertex: derived from the path's basename only
pub fn file_id(path: &Path) -> VertexId {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy())
        .unwrap_or_else(|| path.to_string_lossy());
    VertexId::from_key(&key("file", &[&name]))
}

/// Id of an Entity vertex
pub fn entity_id(model_code: &str, entity_code: &str) -> VertexId {
    VertexId::from_key(&key("entity", &[model_code, entity_code]))
}

/// Id of a Mapping vertex (keyed by the target model)
pub fn mapping_id(model_code: &str, mapping_code: &str) -> VertexId {
    VertexId::from_key(&key("mapping", &[model_code, mapping_code]))
}
