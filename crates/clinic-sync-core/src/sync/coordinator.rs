//! Push/pull driver.
//!
//! Push drains `Pending` rows in bounded batches and acknowledges exactly the versions it
//! sent. Pull merges pages of server records through the conflict rule in
//! [`Database::merge_from_server`] and stores the cursor in the same transaction.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{ConfigError, SyncConfig};
use crate::db::{Database, DbResult, PushedVersion, SyncRecord, Table};
use crate::models::{
    Appointment, BloodPressureMeasurement, BloodSugarMeasurement, BusinessId, MedicalHistory,
    Patient, PatientAddress, PatientPhoneNumber, SyncStatus,
};
use crate::store::Store;

use super::transport::{PullRequest, PushRequest, SyncTransport, TransportError};
use super::{PullSummary, PushSummary, SyncError, SyncReport, TableReport};

/// Run `$body` with `$r` bound to the record type stored in `$table`.
macro_rules! with_record_type {
    ($table:expr, $r:ident => $body:expr) => {
        match $table {
            Table::PatientAddress => {
                type $r = PatientAddress;
                $body
            }
            Table::Patient => {
                type $r = Patient;
                $body
            }
            Table::PatientPhoneNumber => {
                type $r = PatientPhoneNumber;
                $body
            }
            Table::BusinessId => {
                type $r = BusinessId;
                $body
            }
            Table::MedicalHistory => {
                type $r = MedicalHistory;
                $body
            }
            Table::BloodPressure => {
                type $r = BloodPressureMeasurement;
                $body
            }
            Table::BloodSugar => {
                type $r = BloodSugarMeasurement;
                $body
            }
            Table::Appointment => {
                type $r = Appointment;
                $body
            }
        }
    };
}

pub struct SyncCoordinator {
    store: Arc<Store>,
    transport: Arc<dyn SyncTransport>,
    config: SyncConfig,
}

impl SyncCoordinator {
    pub fn new(
        store: Arc<Store>,
        transport: Arc<dyn SyncTransport>,
        config: SyncConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            store,
            transport,
            config,
        })
    }

    /// Push every table, then pull every table, owners before dependents.
    ///
    /// A failing table is reported and skipped; the others still sync.
    pub async fn sync_all(&self) -> SyncReport {
        let mut tables: Vec<TableReport> =
            Table::ALL.iter().map(|&t| TableReport::new(t)).collect();

        for report in &mut tables {
            match self.push_table(report.table).await {
                Ok(summary) => report.push = summary,
                Err(e) => {
                    warn!(table = %report.table, error = %e, "push failed; records stay pending");
                    report.errors.push(e.to_string());
                }
            }
        }

        for report in &mut tables {
            match self.pull_table(report.table).await {
                Ok(summary) => report.pull = summary,
                Err(e) => {
                    warn!(table = %report.table, error = %e, "pull failed; cursor not advanced");
                    report.errors.push(e.to_string());
                }
            }
        }

        let report = SyncReport { tables };
        info!(
            pushed = report.total_pushed(),
            rejected = report.total_rejected(),
            pulled = report.total_pulled(),
            failed_tables = report.failures().count(),
            "sync cycle finished"
        );
        report
    }

    pub async fn push_table(&self, table: Table) -> Result<PushSummary, SyncError> {
        with_record_type!(table, R => self.push_records::<R>().await)
    }

    pub async fn pull_table(&self, table: Table) -> Result<PullSummary, SyncError> {
        with_record_type!(table, R => self.pull_records::<R>().await)
    }

    async fn push_records<R: SyncRecord>(&self) -> Result<PushSummary, SyncError> {
        let table = R::TABLE;
        let batch_size = self.config.push_batch_size;
        let mut summary = PushSummary::default();

        loop {
            let batch: Vec<R> = self
                .blocking(move |db| db.pending::<R>(batch_size))
                .await?;
            if batch.is_empty() {
                break;
            }

            let request =
                PushRequest::new(&batch).map_err(|source| SyncError::Payload { table, source })?;
            debug!(
                %table,
                records = batch.len(),
                key = %request.idempotency_key,
                "pushing batch"
            );
            let response = self
                .bounded(table, "push", self.config.push_timeout(), self.transport.push(request))
                .await?;

            let rejected: HashMap<Uuid, String> = response
                .rejected
                .into_iter()
                .map(|r| (r.id, r.reason))
                .collect();
            let (invalid, done): (Vec<PushedVersion>, Vec<PushedVersion>) = batch
                .iter()
                .map(PushedVersion::of)
                .partition(|v| rejected.contains_key(&v.id));
            for version in &invalid {
                if let Some(reason) = rejected.get(&version.id) {
                    warn!(%table, id = %version.id, %reason, "server rejected record");
                }
            }

            let (marked_done, marked_invalid) = self
                .store_write(table, move |db| {
                    let done = db.mark_pushed::<R>(&done, SyncStatus::Done)?;
                    let invalid = db.mark_pushed::<R>(&invalid, SyncStatus::Invalid)?;
                    Ok((done, invalid))
                })
                .await?;
            summary.batches += 1;
            summary.done += marked_done;
            summary.invalid += marked_invalid;

            // Nothing acknowledged means every row was edited mid-push; retry next cycle
            if batch.len() < batch_size || marked_done + marked_invalid == 0 {
                break;
            }
        }

        if summary.batches > 0 {
            debug!(%table, done = summary.done, invalid = summary.invalid, "push finished");
        }
        Ok(summary)
    }

    async fn pull_records<R: SyncRecord>(&self) -> Result<PullSummary, SyncError> {
        let table = R::TABLE;
        let limit = self.config.pull_page_size;
        let mut summary = PullSummary::default();
        let mut cursor = self.blocking(move |db| db.sync_cursor(table)).await?;

        loop {
            let request = PullRequest {
                table,
                cursor: cursor.clone(),
                limit,
            };
            let response = self
                .bounded(table, "pull", self.config.pull_timeout(), self.transport.pull(request))
                .await?;

            let received = response.records.len();
            let records = response
                .records
                .into_iter()
                .map(serde_json::from_value::<R>)
                .collect::<Result<Vec<_>, _>>()
                .map_err(|source| SyncError::Payload { table, source })?;
            let next_cursor = response.next_cursor;

            let persisted = next_cursor.clone();
            let outcome = self
                .store_write(table, move |db| {
                    let outcome = db.merge_from_server(records)?;
                    if let Some(cursor) = &persisted {
                        db.set_sync_cursor(table, cursor)?;
                    }
                    Ok(outcome)
                })
                .await?;
            summary.pages += 1;
            summary.applied += outcome.applied;
            summary.skipped += outcome.skipped;
            debug!(
                %table,
                received,
                applied = outcome.applied,
                skipped = outcome.skipped,
                "merged page"
            );

            let advanced = next_cursor.is_some() && next_cursor != cursor;
            if received < limit || !advanced {
                break;
            }
            cursor = next_cursor;
        }
        Ok(summary)
    }

    /// Bound a transport call; timing out counts as a transport failure.
    async fn bounded<T>(
        &self,
        table: Table,
        operation: &'static str,
        after: Duration,
        call: impl Future<Output = Result<T, TransportError>>,
    ) -> Result<T, SyncError> {
        match tokio::time::timeout(after, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(source)) => Err(SyncError::Transport { table, source }),
            Err(_) => Err(SyncError::Timeout {
                table,
                operation,
                after,
            }),
        }
    }

    /// Read on the blocking pool.
    async fn blocking<T, F>(&self, f: F) -> Result<T, SyncError>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> DbResult<T> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        Ok(tokio::task::spawn_blocking(move || store.read(f)).await??)
    }

    /// Transactional write on the blocking pool, refreshing live queries on `table`.
    async fn store_write<T, F>(&self, table: Table, f: F) -> Result<T, SyncError>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> DbResult<T> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        Ok(tokio::task::spawn_blocking(move || store.write(&[table], f)).await??)
    }
}
