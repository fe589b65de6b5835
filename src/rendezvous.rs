//! Rendezvous shard selection shared by clients and the shard supervisor.
//!
//! Every shard is scored against the requested key and the highest score
//! wins. The client and the supervisor never talk to each other about
//! ownership, so both sides must run exactly this scan over exactly the same
//! ordered identity list:
//!
//! ```text
//! weight(shard) = (codepoints(key) + codepoints(shard.name)) mod 17
//! ```
//!
//! Ties go to the lowest index: the running maximum is only replaced when a
//! later shard scores strictly higher. Changing either the scan order or the
//! comparison silently reassigns keys, and a shard receiving a key it does not
//! own serves it like any other request.

use serde::{Deserialize, Serialize};

/// Modulus applied to every shard weight.
pub const WEIGHT_MODULUS: u64 = 17;

/// One member of the fixed shard set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct ShardIdentity {
    /// Stable shard name; the only input to the weight besides the key.
    pub name: String,
    /// Port the shard listens on.
    pub port: u16,
}

impl ShardIdentity {
    /// Create a new identity.
    pub fn new(name: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            port,
        }
    }
}

/// Sum of the Unicode scalar values of `s`.
///
/// This is the single integer hash used by both the selector and the
/// membership filter.
pub fn codepoint_sum(s: &str) -> u64 {
    s.chars().map(|c| u64::from(u32::from(c))).sum()
}

/// Score a shard for a key.
pub fn weight(key: &str, shard: &ShardIdentity) -> u64 {
    (codepoint_sum(key) + codepoint_sum(&shard.name)) % WEIGHT_MODULUS
}

/// Select the index of the shard that owns `key`.
///
/// Returns `None` only for an empty shard list. Configuration validation
/// rejects empty lists, so callers holding a validated list can rely on
/// [`select`].
pub fn try_select(key: &str, shards: &[ShardIdentity]) -> Option<usize> {
    let key_sum = codepoint_sum(key);
    let mut best: Option<(usize, u64)> = None;

    for (index, shard) in shards.iter().enumerate() {
        let w = (key_sum + codepoint_sum(&shard.name)) % WEIGHT_MODULUS;
        match best {
            Some((_, max)) if max < w => best = Some((index, w)),
            None => best = Some((index, w)),
            _ => {}
        }
    }

    best.map(|(index, _)| index)
}

/// Select the owning shard index from a non-empty, validated shard list.
///
/// An empty list maps every key to index 0.
pub fn select(key: &str, shards: &[ShardIdentity]) -> usize {
    try_select(key, shards).unwrap_or(0)
}

/// Return the identity owning `key`, or `None` for an empty list.
pub fn owner<'a>(key: &str, shards: &'a [ShardIdentity]) -> Option<&'a ShardIdentity> {
    try_select(key, shards).map(|index| &shards[index])
}
