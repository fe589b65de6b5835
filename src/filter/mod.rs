//! Blacklist filtering for a single shard.
//!
//! Two structures back the access gate:
//! - [`MembershipFilter`]: a fixed-size bit array with five probes derived
//!   from one integer hash. No false negatives, tunable false positives.
//! - [`Blacklist`]: the exact set of denied keys this shard owns.
//!
//! Both are populated once at shard startup from the shared blacklist
//! source, keeping only the lines the rendezvous selector assigns to the
//! loading shard, and are read-only afterwards.

mod blacklist;
mod bloom;
mod error;

pub use blacklist::Blacklist;
pub use bloom::{DEFAULT_FILTER_BITS, FIXED_MODULI, MembershipFilter, PROBE_COUNT};
pub use error::FilterError;
