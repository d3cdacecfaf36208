//! Metadata sidecar stored next to every QR code image.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Provenance and access statistics for one image.
///
/// Persisted as a flat JSON object; timestamps are RFC 3339 in UTC.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct QrMetadata {
    /// Identifier of the owning image, without the image suffix.
    pub code_id: String,

    /// Text encoded into the image. Empty for uploads without a hint.
    pub data: String,

    /// Requested square dimension in pixels.
    pub size: u32,

    /// Set on the first write and never changed afterwards.
    pub created_at: DateTime<Utc>,

    pub last_accessed: DateTime<Utc>,

    /// Starts at 1 and grows by one per image retrieval.
    pub access_count: u64,
}

impl QrMetadata {
    pub fn new(
        code_id: impl Into<String>,
        data: impl Into<String>,
        size: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            code_id: code_id.into(),
            data: data.into(),
            size,
            created_at: now,
            last_accessed: now,
            access_count: 1,
        }
    }

    pub fn record_access(&mut self, now: DateTime<Utc>) {
        self.access_count += 1;
        // Clock skew between writers must not break created_at <= last_accessed.
        self.last_accessed = now.max(self.created_at);
    }

    /// Strict decode of a stored record.
    pub fn from_json(raw: &[u8]) -> Result<Self, String> {
        let record: Self = serde_json::from_slice(raw).map_err(|err| err.to_string())?;
        if record.access_count == 0 {
            return Err("access_count must be at least 1".into());
        }
        if record.created_at > record.last_accessed {
            return Err("created_at is later than last_accessed".into());
        }
        Ok(record)
    }

    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}
