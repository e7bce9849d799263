//! Generic operations over every syncable table.

use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use super::codec::{meta_values, ts_text, uuid_at};
use super::{Database, DbError, DbResult, Table};
use crate::models::{SyncStatus, Timestamps};

/// Columns appended to every table after the entity columns.
const META_COLUMNS: [&str; 4] = ["created_at", "updated_at", "deleted_at", "sync_status"];

/// A record stored in its own table and synced by `id`.
pub trait SyncRecord: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    const TABLE: Table;

    /// Entity columns between `id` and the shared bookkeeping columns.
    const COLUMNS: &'static [&'static str];

    fn id(&self) -> Uuid;
    fn timestamps(&self) -> &Timestamps;
    fn timestamps_mut(&mut self) -> &mut Timestamps;
    fn sync_status(&self) -> SyncStatus;
    fn set_sync_status(&mut self, status: SyncStatus);

    /// Values for [`Self::COLUMNS`], in order.
    fn column_values(&self) -> Vec<Value>;

    /// Build from a row laid out as `id, COLUMNS.., created_at, updated_at, deleted_at, sync_status`.
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self>;

    /// Index of the first bookkeeping column in a row read by [`select_sql`].
    fn meta_offset() -> usize {
        1 + Self::COLUMNS.len()
    }

    /// Number of columns [`from_row`](Self::from_row) consumes.
    fn column_count() -> usize {
        Self::meta_offset() + META_COLUMNS.len()
    }

    /// Checks a locally entered record must pass before it is saved.
    fn validate(&self) -> DbResult<()> {
        Ok(())
    }

    /// Stamp a local update of the stored row: `updated_at` moves past its stored value, back
    /// to `Pending`.
    fn stamp_local_edit(&mut self, now: DateTime<Utc>) {
        self.timestamps_mut().touch(now);
        self.set_sync_status(SyncStatus::Pending);
    }
}

/// Implements the accessor methods for structs with `id`, `timestamps` and `sync_status` fields.
macro_rules! record_accessors {
    () => {
        fn id(&self) -> uuid::Uuid {
            self.id
        }

        fn timestamps(&self) -> &crate::models::Timestamps {
            &self.timestamps
        }

        fn timestamps_mut(&mut self) -> &mut crate::models::Timestamps {
            &mut self.timestamps
        }

        fn sync_status(&self) -> crate::models::SyncStatus {
            self.sync_status
        }

        fn set_sync_status(&mut self, status: crate::models::SyncStatus) {
            self.sync_status = status;
        }
    };
}
pub(crate) use record_accessors;

/// `id, <columns>, <meta>`, each prefixed with `alias.` when given.
pub(crate) fn column_list<R: SyncRecord>(alias: Option<&str>) -> String {
    let prefix = alias.map(|a| format!("{}.", a)).unwrap_or_default();
    let columns: Vec<String> = std::iter::once("id")
        .chain(R::COLUMNS.iter().copied())
        .chain(META_COLUMNS)
        .map(|c| format!("{}{}", prefix, c))
        .collect();
    columns.join(", ")
}

/// `SELECT id, <columns>, <meta> FROM <table>` with an optional ` alias`.
pub(crate) fn select_sql<R: SyncRecord>(alias: Option<&str>) -> String {
    format!(
        "SELECT {} FROM {}{}",
        column_list::<R>(alias),
        R::TABLE.as_str(),
        alias.map(|a| format!(" {}", a)).unwrap_or_default()
    )
}

fn upsert_sql<R: SyncRecord>() -> String {
    let columns: Vec<&str> = std::iter::once("id")
        .chain(R::COLUMNS.iter().copied())
        .chain(META_COLUMNS)
        .collect();
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();
    let updates: Vec<String> = columns
        .iter()
        .skip(1)
        .map(|c| format!("{c} = excluded.{c}"))
        .collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT(id) DO UPDATE SET {}",
        R::TABLE.as_str(),
        columns.join(", "),
        placeholders.join(", "),
        updates.join(", ")
    )
}

fn row_values<R: SyncRecord>(record: &R) -> Vec<Value> {
    let mut values = Vec::with_capacity(R::COLUMNS.len() + 5);
    values.push(Value::Text(record.id().to_string()));
    values.extend(record.column_values());
    values.extend(meta_values(record.timestamps(), record.sync_status()));
    values
}

/// The `updated_at` a pushed record carried, used to acknowledge exactly that version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushedVersion {
    pub id: Uuid,
    pub updated_at: DateTime<Utc>,
}

impl PushedVersion {
    pub fn of<R: SyncRecord>(record: &R) -> Self {
        Self {
            id: record.id(),
            updated_at: record.timestamps().updated_at,
        }
    }
}

/// Result of merging one page of server records.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Inserted or overwritten.
    pub applied: usize,
    /// Discarded because the local copy is still `Pending`.
    pub skipped: usize,
}

impl Database {
    /// Upsert a record by `id`, exactly as given.
    pub fn save<R: SyncRecord>(&self, record: &R) -> DbResult<()> {
        self.conn
            .execute(&upsert_sql::<R>(), params_from_iter(row_values(record)))?;
        Ok(())
    }

    pub fn get<R: SyncRecord>(&self, id: Uuid) -> DbResult<Option<R>> {
        let sql = format!("{} WHERE id = ?", select_sql::<R>(None));
        self.conn
            .query_row(&sql, [id.to_string()], R::from_row)
            .optional()
            .map_err(Into::into)
    }

    /// Run `select_sql::<R>(alias)` followed by `tail` (a WHERE/ORDER clause).
    pub(crate) fn select<R: SyncRecord, P: rusqlite::Params>(
        &self,
        alias: Option<&str>,
        tail: &str,
        params: P,
    ) -> DbResult<Vec<R>> {
        let sql = format!("{} {}", select_sql::<R>(alias), tail);
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params, R::from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Soft-delete: set `deleted_at`, stamp `updated_at`, mark `Pending`.
    pub fn soft_delete<R: SyncRecord>(&self, id: Uuid, now: DateTime<Utc>) -> DbResult<bool> {
        let mut record = match self.get::<R>(id)? {
            Some(record) if !record.timestamps().is_deleted() => record,
            _ => return Ok(false),
        };
        record.timestamps_mut().deleted_at = Some(now);
        record.stamp_local_edit(now);
        self.save(&record)?;
        Ok(true)
    }

    /// Oldest-first page of records awaiting push.
    pub fn pending<R: SyncRecord>(&self, limit: usize) -> DbResult<Vec<R>> {
        self.select(
            None,
            "WHERE sync_status = 'pending' ORDER BY updated_at, id LIMIT ?",
            [limit as i64],
        )
    }

    /// Like [`get`](Self::get), but a missing row is [`DbError::NotFound`].
    pub fn require<R: SyncRecord>(&self, id: Uuid) -> DbResult<R> {
        self.get(id)?
            .ok_or_else(|| DbError::NotFound(format!("{} {}", R::TABLE, id)))
    }

    pub fn count_in_table(&self, table: Table, status: SyncStatus) -> DbResult<usize> {
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {} WHERE sync_status = ?", table.as_str()),
            [status.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Records the server rejected, for display.
    pub fn invalid_records<R: SyncRecord>(&self) -> DbResult<Vec<R>> {
        self.select(None, "WHERE sync_status = 'invalid' ORDER BY updated_at, id", params![])
    }

    /// Ids of the rows the server rejected in `table`.
    pub fn invalid_ids(&self, table: Table) -> DbResult<Vec<Uuid>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT id FROM {} WHERE sync_status = 'invalid' ORDER BY updated_at, id",
            table.as_str()
        ))?;
        let rows = stmt.query_map([], |row| uuid_at(row, 0))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Record the push result for exactly the pushed versions.
    ///
    /// Rows edited locally since the push (different `updated_at`) stay `Pending`.
    pub fn mark_pushed<R: SyncRecord>(
        &self,
        versions: &[PushedVersion],
        status: SyncStatus,
    ) -> DbResult<usize> {
        let sql = format!(
            "UPDATE {} SET sync_status = ?1 \
             WHERE id = ?2 AND updated_at = ?3 AND sync_status = 'pending'",
            R::TABLE.as_str()
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut marked = 0;
        for version in versions {
            marked += stmt.execute(params![
                status.as_str(),
                version.id.to_string(),
                ts_text(&version.updated_at),
            ])?;
        }
        Ok(marked)
    }

    fn local_sync_status<R: SyncRecord>(&self, id: Uuid) -> DbResult<Option<SyncStatus>> {
        let status: Option<String> = self
            .conn
            .query_row(
                &format!("SELECT sync_status FROM {} WHERE id = ?", R::TABLE.as_str()),
                [id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(status.and_then(|s| SyncStatus::parse(&s)))
    }

    /// Merge server records: insert unknown ids, overwrite `Done`/`Invalid` rows,
    /// keep `Pending` rows untouched. Every written row becomes `Done`.
    ///
    /// Callers run this inside [`Database::in_transaction`] so the status check and the
    /// overwrite cannot interleave with a local edit.
    pub fn merge_from_server<R: SyncRecord>(&self, records: Vec<R>) -> DbResult<MergeOutcome> {
        let mut outcome = MergeOutcome::default();
        for mut record in records {
            let local = self.local_sync_status::<R>(record.id())?;
            if matches!(local, Some(status) if !status.accepts_server_copy()) {
                debug!(table = %R::TABLE, id = %record.id(), "kept pending local copy over server copy");
                outcome.skipped += 1;
                continue;
            }
            record.set_sync_status(SyncStatus::Done);
            self.save(&record)?;
            outcome.applied += 1;
        }
        Ok(outcome)
    }
}
