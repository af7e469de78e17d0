//! Freshness resolution: which copy of a payload is authoritative.
//!
//! Ordering is by `timestamp` alone. There is no merge and no vector clock, so two
//! writers saving within the same millisecond race; the outcome depends on which write
//! the transport keeps.

use crate::payload::Payload;

/// Outcome of comparing a candidate against a reference timestamp.
#[derive(Debug, Clone, PartialEq)]
pub enum Freshness {
    Fresh(Payload),
    Stale,
}

impl Freshness {
    pub fn is_fresh(&self) -> bool {
        matches!(self, Freshness::Fresh(_))
    }

    pub fn into_fresh(self) -> Option<Payload> {
        match self {
            Freshness::Fresh(payload) => Some(payload),
            Freshness::Stale => None,
        }
    }
}

/// `candidate` wins iff its timestamp is strictly greater than `reference_timestamp`.
pub fn resolve(candidate: Payload, reference_timestamp: i64) -> Freshness {
    if is_newer(candidate.timestamp, reference_timestamp) {
        Freshness::Fresh(candidate)
    } else {
        Freshness::Stale
    }
}

pub fn is_newer(candidate_timestamp: i64, reference_timestamp: i64) -> bool {
    candidate_timestamp > reference_timestamp
}
