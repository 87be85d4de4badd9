use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ledger::SegmentLedger;

/// Lifecycle of a relay session once it has been started.
///
/// A stream id without a stored record is the uninitialized state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Stopped,
    /// The source stayed unreachable past the configured limit
    Failed,
}

impl SessionStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        }
    }
}

/// Durable state of one stream's transfer, keyed by `stream_id`.
///
/// Written only by the relay actor that owns the stream id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelaySessionState {
    pub stream_id: String,
    #[serde(rename = "sourceManifestURL")]
    pub source_manifest_url: String,
    pub destination_stream_key: String,
    pub destination_upload_id: String,
    #[serde(rename = "destinationUploadURL")]
    pub destination_upload_url: String,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub stopped_at: Option<DateTime<Utc>>,
    /// Next write position in the destination upload
    pub next_byte_offset: u64,
    pub processed_segments: SegmentLedger,
    #[serde(default)]
    pub consecutive_manifest_failures: u32,
    #[serde(default)]
    pub last_error: Option<String>,
    /// Whether the closing zero-length write was accepted
    #[serde(default)]
    pub finalized: bool,
}

impl RelaySessionState {
    #[must_use]
    pub fn new(
        stream_id: String,
        source_manifest_url: String,
        destination_stream_key: String,
        destination_upload_id: String,
        destination_upload_url: String,
        dedup_window: u64,
    ) -> Self {
        Self {
            stream_id,
            source_manifest_url,
            destination_stream_key,
            destination_upload_id,
            destination_upload_url,
            status: SessionStatus::Active,
            started_at: Utc::now(),
            stopped_at: None,
            next_byte_offset: 0,
            processed_segments: SegmentLedger::new(dedup_window),
            consecutive_manifest_failures: 0,
            last_error: None,
            finalized: false,
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    #[must_use]
    pub const fn segments_transferred(&self) -> u64 {
        self.processed_segments.segments()
    }

    #[must_use]
    pub const fn bytes_transferred(&self) -> u64 {
        self.processed_segments.bytes()
    }

    /// Account for a segment the destination accepted at `next_byte_offset`.
    pub fn record_transfer(&mut self, sequence: u64, url: String, size: u64) {
        self.processed_segments.record(sequence, url, size);
        self.next_byte_offset += size;
    }

    /// Seconds since start; frozen at `stopped_at` once the session has ended.
    #[must_use]
    pub fn uptime_seconds(&self, now: DateTime<Utc>) -> i64 {
        let end = self.stopped_at.unwrap_or(now);
        (end - self.started_at).num_seconds().max(0)
    }

    #[must_use]
    pub fn masked_stream_key(&self) -> String {
        mask_secret(&self.destination_stream_key)
    }

    pub fn mark_stopped(&mut self, now: DateTime<Utc>) {
        if self.stopped_at.is_none() {
            self.stopped_at = Some(now);
        }
        self.status = SessionStatus::Stopped;
    }

    pub fn mark_failed(&mut self, reason: String, now: DateTime<Utc>) {
        self.stopped_at = Some(now);
        self.status = SessionStatus::Failed;
        self.last_error = Some(reason);
    }
}

/// Hide all but the last four characters of a secret.
#[must_use]
pub fn mask_secret(secret: &str) -> String {
    let count = secret.chars().count();
    if count <= 4 {
        return "****".to_string();
    }
    let tail: String = secret.chars().skip(count - 4).collect();
    format!("****{tail}")
}
