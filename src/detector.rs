//! Fatal-line detection.
//!
//! Scans multiplexed log records for the small set of conditions the
//! clients cannot recover from on their own. A match means the session
//! should be paused and restarted; whether an interrupt is actually sent
//! is governed by the session's one-shot guard, not here.

use regex::RegexSet;

const FATAL_PATTERNS: &[&str] = &[
    // Consensus backfill abort: the beacon node keeps running but never
    // finishes syncing. Only a restart clears it.
    r"Beacon backfilling failed",
];

pub struct FatalLogDetector {
    set: RegexSet,
}

impl Default for FatalLogDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl FatalLogDetector {
    pub fn new() -> Self {
        Self {
            set: RegexSet::new(FATAL_PATTERNS).unwrap(),
        }
    }

    /// True when any non-null record matches a known fatal marker.
    pub fn scan(&self, records: &[Option<String>]) -> bool {
        records
            .iter()
            .flatten()
            .any(|line| self.set.is_match(line))
    }
}
