use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Record of source segments already accepted by the destination.
///
/// Only the trailing `window` sequence numbers are remembered by URL. Anything
/// below `floor` counts as settled: it was either transferred or fell out of
/// the source's sliding window before a retry could succeed. A `window` of
/// zero keeps every URL and never raises the floor.
///
/// The transfer totals live here so they always match what has been recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentLedger {
    window: u64,
    floor: u64,
    highest_sequence: Option<u64>,
    /// Resolved segment URL -> media sequence number
    recent: BTreeMap<String, u64>,
    segments: u64,
    bytes: u64,
}

impl SegmentLedger {
    #[must_use]
    pub const fn new(window: u64) -> Self {
        Self {
            window,
            floor: 0,
            highest_sequence: None,
            recent: BTreeMap::new(),
            segments: 0,
            bytes: 0,
        }
    }

    /// Whether the segment needs no further transfer.
    #[must_use]
    pub fn is_processed(&self, sequence: u64, url: &str) -> bool {
        sequence < self.floor || self.recent.contains_key(url)
    }

    /// Record a segment whose bytes the destination has accepted.
    pub fn record(&mut self, sequence: u64, url: String, bytes: u64) {
        if self.recent.insert(url, sequence).is_some() {
            tracing::warn!(sequence, "Segment recorded twice in dedup ledger");
        }
        self.segments += 1;
        self.bytes += bytes;

        let highest = self.highest_sequence.map_or(sequence, |h| h.max(sequence));
        self.highest_sequence = Some(highest);

        if self.window > 0 {
            let floor = highest.saturating_add(1).saturating_sub(self.window);
            if floor > self.floor {
                self.floor = floor;
                let floor = self.floor;
                self.recent.retain(|_, seq| *seq >= floor);
            }
        }
    }

    /// Reset the watermark when the source restarted its sequence numbering.
    ///
    /// `manifest_highest` is the largest sequence number in the latest manifest.
    /// Returns true when a rebase happened. Retained URLs are kept, so segments
    /// that were already sent are still recognised by URL.
    pub fn rebase_if_reset(&mut self, manifest_highest: u64) -> bool {
        if self.floor == 0 || manifest_highest >= self.floor {
            return false;
        }
        self.floor = 0;
        self.highest_sequence = None;
        for seq in self.recent.values_mut() {
            *seq = 0;
        }
        true
    }

    #[must_use]
    pub const fn segments(&self) -> u64 {
        self.segments
    }

    #[must_use]
    pub const fn bytes(&self) -> u64 {
        self.bytes
    }

    #[must_use]
    pub const fn floor(&self) -> u64 {
        self.floor
    }

    /// Number of URLs currently remembered
    #[must_use]
    pub fn retained(&self) -> usize {
        self.recent.len()
    }
}

impl Default for SegmentLedger {
    fn default() -> Self {
        Self::new(0)
    }
}
