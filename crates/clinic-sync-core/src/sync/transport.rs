//! Wire types and the transport seam.
//!
//! The HTTP client, authentication and retries live outside this crate behind
//! [`SyncTransport`]. Records travel as camelCase JSON objects carrying `id`, `createdAt`,
//! `updatedAt` and `deletedAt`; local sync status never leaves the device.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

use crate::db::{SyncRecord, Table};

#[derive(Error, Debug)]
pub enum TransportError {
    /// No response: offline, DNS, connection reset.
    #[error("server unreachable: {0}")]
    Unavailable(String),

    /// The server answered with something other than a push/pull result.
    #[error("server error {status}: {message}")]
    Server { status: u16, message: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// One batch of pending records for a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushRequest {
    pub table: Table,
    /// Same records in the same state always produce the same key.
    pub idempotency_key: String,
    pub records: Vec<Value>,
}

impl PushRequest {
    pub fn new<R: SyncRecord>(batch: &[R]) -> Result<Self, serde_json::Error> {
        let records = batch
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()?;
        let idempotency_key = batch_key(R::TABLE, &records)?;
        Ok(Self {
            table: R::TABLE,
            idempotency_key,
            records,
        })
    }
}

/// SHA-256 over the table name and the batch's JSON, hex encoded.
///
/// Object keys serialize in sorted order, so the encoding is canonical.
pub fn batch_key(table: Table, records: &[Value]) -> Result<String, serde_json::Error> {
    let mut hasher = Sha256::new();
    hasher.update(table.as_str().as_bytes());
    hasher.update(b"\n");
    hasher.update(serde_json::to_vec(records)?);
    Ok(hex::encode(hasher.finalize()))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectedRecord {
    pub id: Uuid,
    pub reason: String,
}

/// Server answer to a push. Records not listed as rejected were accepted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushResponse {
    #[serde(default)]
    pub rejected: Vec<RejectedRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequest {
    pub table: Table,
    /// `None` requests everything from the beginning.
    pub cursor: Option<String>,
    pub limit: usize,
}

/// One page of server changes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullResponse {
    pub records: Vec<Value>,
    /// Position after this page; stored once the page is merged.
    pub next_cursor: Option<String>,
}

#[async_trait]
pub trait SyncTransport: Send + Sync {
    async fn push(&self, request: PushRequest) -> Result<PushResponse, TransportError>;

    async fn pull(&self, request: PullRequest) -> Result<PullResponse, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PatientAddress;
    use chrono::{TimeZone, Utc};

    fn address() -> PatientAddress {
        let now = Utc.with_ymd_and_hms(2018, 1, 5, 10, 0, 0).unwrap();
        PatientAddress::new("Bathinda".into(), "Punjab".into(), now)
    }

    #[test]
    fn test_push_request_key_is_stable() {
        let batch = vec![address(), address()];
        let first = PushRequest::new(&batch).unwrap();
        let second = PushRequest::new(&batch).unwrap();

        assert_eq!(first.idempotency_key, second.idempotency_key);
        assert_eq!(first.idempotency_key.len(), 64);
        assert_eq!(first.table, Table::PatientAddress);
    }

    #[test]
    fn test_push_request_key_tracks_content() {
        let mut record = address();
        let before = PushRequest::new(std::slice::from_ref(&record)).unwrap();
        record.district = "Mansa".into();
        let after = PushRequest::new(std::slice::from_ref(&record)).unwrap();

        assert_ne!(before.idempotency_key, after.idempotency_key);
    }

    #[test]
    fn test_payload_shape() {
        let record = address();
        let request = PushRequest::new(std::slice::from_ref(&record)).unwrap();
        let payload = &request.records[0];

        assert_eq!(payload["id"], record.id.to_string());
        assert_eq!(payload["district"], "Bathinda");
        assert!(payload.get("createdAt").is_some());
        assert!(payload.get("updatedAt").is_some());
        assert!(payload.get("deletedAt").is_some());
        assert!(payload.get("syncStatus").is_none());
    }
}
