//! Partitioned cache keys and compact identifiers
//!
//! Every cached entity key is `(server_mask << 32) | entity_id`, where the
//! server mask is a stable hash of the logical server code. One physical
//! store multiplexes many upstream servers; masks must be collision-free
//! within a deployment's configured server set (validated at facade
//! construction, not here).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Compacted string id assigned by the dictionary.
///
/// `StringId::NONE` (-1) means "unknown/null" and is never allocated to a
/// real string. Real ids are monotonic from 0 and never change or get
/// reused once assigned.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StringId(pub i32);

impl StringId {
    /// Sentinel for "unknown/null"
    pub const NONE: StringId = StringId(-1);

    /// Whether this id refers to an actual dictionary entry
    pub fn is_present(self) -> bool {
        self.0 >= 0
    }

    /// Serde default hook for optional compacted fields.
    pub fn none() -> StringId {
        StringId::NONE
    }
}

impl fmt::Display for StringId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Upstream build id
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BuildId(pub u32);

impl fmt::Display for BuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-server partition component folded into composite store keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerMask(pub u32);

impl ServerMask {
    /// Derive the mask for a logical server code.
    ///
    /// FNV-1a over the UTF-8 bytes: stable across processes and platforms,
    /// which matters because masks are baked into persisted keys.
    pub fn of(server_code: &str) -> Self {
        const FNV_OFFSET: u32 = 0x811c_9dc5;
        const FNV_PRIME: u32 = 0x0100_0193;
        let mut hash = FNV_OFFSET;
        for byte in server_code.as_bytes() {
            hash ^= u32::from(*byte);
            hash = hash.wrapping_mul(FNV_PRIME);
        }
        ServerMask(hash)
    }

    /// Fold an entity id into this partition's composite key.
    pub fn key(self, entity_id: u32) -> u64 {
        (u64::from(self.0) << 32) | u64::from(entity_id)
    }

    /// Split a composite key back into (mask, entity id).
    pub fn split(key: u64) -> (ServerMask, u32) {
        (ServerMask((key >> 32) as u32), key as u32)
    }

    /// Inclusive lower bound of this partition's key range.
    pub fn range_start(self) -> u64 {
        u64::from(self.0) << 32
    }

    /// Inclusive upper bound of this partition's key range.
    pub fn range_end(self) -> u64 {
        (u64::from(self.0) << 32) | u64::from(u32::MAX)
    }
}

impl fmt::Display for ServerMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}
