//! Record synchronization with the server.
//!
//! Conflict rule: a pulled record replaces the local row unless the local row is `Pending`.
//! Acknowledgment state, not timestamps, decides who wins, because device clocks are not
//! trusted for ordering.

mod coordinator;
mod transport;

pub use coordinator::SyncCoordinator;
pub use transport::{
    batch_key, PullRequest, PullResponse, PushRequest, PushResponse, RejectedRecord,
    SyncTransport, TransportError,
};

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::db::{DbError, Table};

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Transport error on {table}: {source}")]
    Transport {
        table: Table,
        #[source]
        source: TransportError,
    },

    #[error("{operation} of {table} timed out after {after:?}")]
    Timeout {
        table: Table,
        operation: &'static str,
        after: Duration,
    },

    /// The server sent a record this client cannot decode; nothing from the page was merged.
    #[error("Malformed {table} payload: {source}")]
    Payload {
        table: Table,
        #[source]
        source: serde_json::Error,
    },

    #[error("Storage worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

impl SyncError {
    /// Transport failures and timeouts clear up on their own; retry next cycle.
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::Transport { .. } | SyncError::Timeout { .. })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushSummary {
    pub batches: usize,
    /// Rows acknowledged and marked `Done`.
    pub done: usize,
    /// Rows the server rejected, now `Invalid`.
    pub invalid: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PullSummary {
    pub pages: usize,
    /// Server records inserted or overwritten.
    pub applied: usize,
    /// Server records discarded because the local row was `Pending`.
    pub skipped: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableReport {
    pub table: Table,
    pub push: PushSummary,
    pub pull: PullSummary,
    pub errors: Vec<String>,
}

impl TableReport {
    pub fn new(table: Table) -> Self {
        Self {
            table,
            push: PushSummary::default(),
            pull: PullSummary::default(),
            errors: Vec::new(),
        }
    }
}

/// Outcome of one [`SyncCoordinator::sync_all`] cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub tables: Vec<TableReport>,
}

impl SyncReport {
    pub fn is_complete(&self) -> bool {
        self.tables.iter().all(|t| t.errors.is_empty())
    }

    pub fn failures(&self) -> impl Iterator<Item = &TableReport> {
        self.tables.iter().filter(|t| !t.errors.is_empty())
    }

    pub fn table(&self, table: Table) -> Option<&TableReport> {
        self.tables.iter().find(|t| t.table == table)
    }

    pub fn total_pushed(&self) -> usize {
        self.tables.iter().map(|t| t.push.done).sum()
    }

    pub fn total_rejected(&self) -> usize {
        self.tables.iter().map(|t| t.push.invalid).sum()
    }

    pub fn total_pulled(&self) -> usize {
        self.tables.iter().map(|t| t.pull.applied).sum()
    }
}
