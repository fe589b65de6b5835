//! Blacklist access gate.
//!
//! Every requested key passes through the gate before the cache or origin is
//! touched. The gate holds the shard's exact blacklist partition and a
//! membership filter built from it.
//!
//! # Evaluation Order
//!
//! 1. Probe the membership filter
//! 2. On a filter hit, apply the [`FilterPolicy`]:
//!    - `FailClosed` denies without further checks
//!    - `Confirm` denies only if the exact blacklist holds the key
//! 3. On a filter miss, deny if the exact blacklist holds the key, else allow
//!
//! # Example
//!
//! ```ignore
//! use shardproxy::filter::Blacklist;
//! use shardproxy::proxy::policy::{AccessGate, FilterPolicy, GateDecision};
//!
//! let blacklist = Blacklist::from_keys(["secret.txt"]);
//! let gate = AccessGate::new(blacklist, 1 << 20, FilterPolicy::FailClosed)?;
//!
//! match gate.check("hello.txt") {
//!     GateDecision::Allow => println!("Allowed"),
//!     GateDecision::Deny(reason) => println!("Denied: {}", reason),
//! }
//! ```

use crate::filter::{Blacklist, FilterError, MembershipFilter};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::trace;

/// How a membership filter hit is treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterPolicy {
    /// A filter hit denies the request, false positives included.
    #[default]
    FailClosed,
    /// A filter hit is confirmed against the exact blacklist.
    Confirm,
}

/// Why the gate denied a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    /// The membership filter reported a hit.
    Filter,
    /// The exact blacklist holds the key.
    Blacklist,
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenyReason::Filter => write!(f, "membership filter hit"),
            DenyReason::Blacklist => write!(f, "blacklisted"),
        }
    }
}

/// Result of gating a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// Proceed to the cache and origin.
    Allow,
    /// Reply with the denial sentinel.
    Deny(DenyReason),
}

impl GateDecision {
    /// True for [`GateDecision::Allow`].
    pub fn is_allowed(&self) -> bool {
        matches!(self, GateDecision::Allow)
    }
}

/// Read-only blacklist gate shared by all handlers of one shard.
#[derive(Debug, Clone)]
pub struct AccessGate {
    filter: MembershipFilter,
    blacklist: Blacklist,
    policy: FilterPolicy,
}

impl AccessGate {
    /// Build the gate, inserting every blacklist key into a new filter.
    ///
    /// # Errors
    ///
    /// Returns [`FilterError::TooSmall`] if `filter_bits` is too small.
    pub fn new(
        blacklist: Blacklist,
        filter_bits: usize,
        policy: FilterPolicy,
    ) -> Result<Self, FilterError> {
        let mut filter = MembershipFilter::new(filter_bits)?;
        for key in blacklist.iter() {
            filter.insert(key);
        }

        Ok(Self {
            filter,
            blacklist,
            policy,
        })
    }

    /// Decide whether `key` may be served.
    pub fn check(&self, key: &str) -> GateDecision {
        if !self.filter.probably_contains(key) {
            // Unreachable while the filter is built from this blacklist.
            if self.blacklist.contains(key) {
                return GateDecision::Deny(DenyReason::Blacklist);
            }
            return GateDecision::Allow;
        }

        match self.policy {
            FilterPolicy::FailClosed => GateDecision::Deny(DenyReason::Filter),
            FilterPolicy::Confirm if self.blacklist.contains(key) => {
                GateDecision::Deny(DenyReason::Blacklist)
            }
            FilterPolicy::Confirm => {
                trace!("Filter false positive for '{}', allowing", key);
                GateDecision::Allow
            }
        }
    }

    /// The configured filter policy.
    pub fn policy(&self) -> FilterPolicy {
        self.policy
    }

    /// Number of blacklist keys this gate holds.
    pub fn blacklist_len(&self) -> usize {
        self.blacklist.len()
    }

    /// The underlying membership filter.
    pub fn filter(&self) -> &MembershipFilter {
        &self.filter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::DEFAULT_FILTER_BITS;

    fn gate(policy: FilterPolicy) -> AccessGate {
        AccessGate::new(
            Blacklist::from_keys(["secret.txt", "abc.txt"]),
            DEFAULT_FILTER_BITS,
            policy,
        )
        .unwrap()
    }

    #[test]
    fn test_blacklisted_key_denied() {
        assert!(!gate(FilterPolicy::FailClosed).check("secret.txt").is_allowed());
        assert_eq!(
            gate(FilterPolicy::Confirm).check("secret.txt"),
            GateDecision::Deny(DenyReason::Blacklist)
        );
    }

    #[test]
    fn test_unrelated_key_allowed() {
        // "hello.txt" sums to 930, whose probes share nothing with the blacklist.
        assert_eq!(gate(FilterPolicy::FailClosed).check("hello.txt"), GateDecision::Allow);
        assert_eq!(gate(FilterPolicy::Confirm).check("hello.txt"), GateDecision::Allow);
    }

    #[test]
    fn test_fail_closed_denies_false_positive() {
        // An anagram of a blacklisted key hits every probe.
        assert_eq!(
            gate(FilterPolicy::FailClosed).check("cba.txt"),
            GateDecision::Deny(DenyReason::Filter)
        );
    }

    #[test]
    fn test_confirm_allows_false_positive() {
        assert_eq!(gate(FilterPolicy::Confirm).check("cba.txt"), GateDecision::Allow);
    }

    #[test]
    fn test_empty_blacklist_allows_everything() {
        let gate = AccessGate::new(Blacklist::default(), DEFAULT_FILTER_BITS, FilterPolicy::FailClosed)
            .unwrap();
        assert!(gate.check("secret.txt").is_allowed());
        assert_eq!(gate.blacklist_len(), 0);
    }

    #[test]
    fn test_filter_miss_still_checks_blacklist() {
        let gate = AccessGate {
            filter: MembershipFilter::new(DEFAULT_FILTER_BITS).unwrap(),
            blacklist: Blacklist::from_keys(["secret.txt"]),
            policy: FilterPolicy::FailClosed,
        };
        assert!(!gate.filter().probably_contains("secret.txt"));
        assert_eq!(
            gate.check("secret.txt"),
            GateDecision::Deny(DenyReason::Blacklist)
        );
        assert_eq!(gate.check("hello.txt"), GateDecision::Allow);
    }

    #[test]
    fn test_undersized_filter_rejected() {
        let result = AccessGate::new(Blacklist::default(), 100, FilterPolicy::FailClosed);
        assert!(matches!(result, Err(FilterError::TooSmall { .. })));
    }

    #[test]
    fn test_filter_policy_serde() {
        #[derive(Deserialize)]
        struct Wrapper {
            policy: FilterPolicy,
        }
        let w: Wrapper = toml::from_str("policy = \"confirm\"").unwrap();
        assert_eq!(w.policy, FilterPolicy::Confirm);
        let w: Wrapper = toml::from_str("policy = \"fail_closed\"").unwrap();
        assert_eq!(w.policy, FilterPolicy::FailClosed);
    }
}
