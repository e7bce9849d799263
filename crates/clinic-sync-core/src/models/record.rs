//! Bookkeeping shared by every syncable record.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

text_enum! {
    /// Whether a local row may be overwritten by an incoming server copy.
    ///
    /// Transitions: `Pending -> Done`, `Pending -> Invalid`, and anything `-> Pending` on a
    /// local mutation.
    #[derive(Default)]
    pub enum SyncStatus {
        /// Locally mutated, not yet acknowledged by the server.
        #[default]
        Pending => "pending",
        /// Acknowledged; the server copy is authoritative until the next local edit.
        Done => "done",
        /// Rejected by the server. Overwritable, never retried automatically.
        Invalid => "invalid",
    }
}

impl SyncStatus {
    /// A pulled server record may replace a local row only when this holds.
    pub fn accepts_server_copy(&self) -> bool {
        !matches!(self, SyncStatus::Pending)
    }
}

/// Creation, update and soft-delete timestamps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timestamps {
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Timestamps {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    /// Stamp a local mutation. `updated_at` strictly increases, even when the clock stalls
    /// or steps back, so no two local versions of a row share a stamp.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now.max(self.updated_at + Duration::milliseconds(1));
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}
