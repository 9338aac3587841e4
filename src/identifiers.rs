//! Identifier types for multisearch
//!
//! Type-safe wrappers that keep shard positions and query identifiers from being
//! mixed up. Shards are addressed by their position in the configured endpoint
//! list; queries get a ULID so log lines from one fan-out can be correlated.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use ulid::Ulid;

/// Position of a shard in the coordinator's configured shard list
///
/// Ordering follows the configuration order, which is also the order used for
/// diagnostics and for merge tie-breaking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShardId(u32);

/// ULID-based identifier of one logical query fan-out
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct QueryId(Ulid);

impl ShardId {
    /// Create a shard identifier from its configuration index
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Configuration index of this shard
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl QueryId {
    /// Generate a new ULID-based query identifier
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Create a QueryId from a ULID
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    /// Convert to ULID
    pub fn as_ulid(self) -> Ulid {
        self.0
    }
}

impl Default for QueryId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for ShardId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Display for QueryId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for ShardId {
    fn from(index: u32) -> Self {
        Self(index)
    }
}

impl FromStr for QueryId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Ulid::from_str(s)?))
    }
}
