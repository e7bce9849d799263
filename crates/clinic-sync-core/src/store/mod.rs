//! The clinic record store: one SQLite database, an injected clock and live queries.
//!
//! All writes go through [`Store::write`], which runs the closure in a single transaction and,
//! once it has committed, refreshes live queries reading any of the written tables. Lock order
//! is always database, then subscription registry.
//!
//! The one connection sits behind one mutex, so writers to different tables still take turns.
//! Each write is a short local transaction.

mod live;

pub use live::{LiveQuery, SubscriptionId};

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, NaiveDate, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::config::StoreConfig;
use crate::db::{Database, DbResult, SyncRecord, Table};
use crate::models::SyncStatus;
use live::LiveRegistry;

/// Pending and rejected record counts for one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingCount {
    pub table: Table,
    pub pending: usize,
    pub invalid: usize,
}

pub struct Store {
    db: Mutex<Database>,
    live: Arc<LiveRegistry>,
    clock: Arc<dyn Clock>,
}

impl Store {
    pub fn new(db: Database, clock: Arc<dyn Clock>) -> Self {
        Self {
            db: Mutex::new(db),
            live: Arc::new(LiveRegistry::default()),
            clock,
        }
    }

    pub fn open(config: &StoreConfig, clock: Arc<dyn Clock>) -> DbResult<Self> {
        Ok(Self::new(Database::open_with(config)?, clock))
    }

    /// In-memory store on the system clock.
    pub fn open_in_memory() -> DbResult<Self> {
        Ok(Self::new(Database::open_in_memory()?, Arc::new(SystemClock)))
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// The clock, for live queries that re-read the date on every refresh.
    pub(crate) fn shared_clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    /// Current time at the precision timestamps are stored with.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now().trunc_subsecs(3)
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    fn lock(&self) -> MutexGuard<'_, Database> {
        // A panicking writer leaves no open transaction behind; the connection stays usable
        self.db.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run read-only work against the database.
    pub fn read<T>(&self, f: impl FnOnce(&Database) -> DbResult<T>) -> DbResult<T> {
        f(&self.lock())
    }

    /// Run `f` in one transaction, then refresh live queries reading `tables`.
    ///
    /// On error nothing is committed and no subscriber is notified.
    pub fn write<T>(
        &self,
        tables: &[Table],
        f: impl FnOnce(&Database) -> DbResult<T>,
    ) -> DbResult<T> {
        let db = self.lock();
        let value = db.in_transaction(f)?;
        self.live.notify(&db, tables);
        Ok(value)
    }

    /// Subscribe to `query`: an initial snapshot now, then one per committed write to `tables`.
    pub fn observe<T, F>(&self, tables: &[Table], query: F) -> DbResult<LiveQuery<T>>
    where
        T: Send + 'static,
        F: FnMut(&Database) -> DbResult<T> + Send + 'static,
    {
        let db = self.lock();
        let (id, rx) = self.live.register(&db, tables, query)?;
        Ok(LiveQuery::new(id, rx, Arc::downgrade(&self.live)))
    }

    /// End a subscription early. Returns `false` if it was already gone.
    pub fn unobserve(&self, id: SubscriptionId) -> bool {
        self.live.remove(id)
    }

    pub fn subscription_count(&self) -> usize {
        self.live.len()
    }

    pub fn get<R: SyncRecord>(&self, id: Uuid) -> DbResult<Option<R>> {
        self.read(|db| db.get(id))
    }

    /// Save a local create or edit: validates, stamps `updated_at` and marks it `Pending`.
    ///
    /// A record that fails validation leaves the store untouched.
    pub fn save<R: SyncRecord>(&self, mut record: R) -> DbResult<R> {
        record.validate()?;
        let now = self.now();
        self.write(&[R::TABLE], |db| save_local(db, &mut record, now))?;
        Ok(record)
    }

    /// Soft-delete a record so the tombstone syncs. Returns `false` if it was already deleted
    /// or never existed.
    pub fn delete<R: SyncRecord>(&self, id: Uuid) -> DbResult<bool> {
        let now = self.now();
        self.write(&[R::TABLE], |db| db.soft_delete::<R>(id, now))
    }

    /// Hard-delete all clinical data and pull cursors. Nothing removed here is synced.
    pub fn purge_all(&self) -> DbResult<()> {
        let db = self.lock();
        db.purge_all()?;
        self.live.notify(&db, &Table::ALL);
        info!("purged all clinical data");
        Ok(())
    }

    /// Records of type `R` the server rejected. They stay until edited or overwritten.
    pub fn invalid_records<R: SyncRecord>(&self) -> DbResult<Vec<R>> {
        self.read(|db| db.invalid_records::<R>())
    }

    pub fn invalid_ids(&self, table: Table) -> DbResult<Vec<Uuid>> {
        self.read(|db| db.invalid_ids(table))
    }

    pub fn pending_counts(&self) -> DbResult<Vec<PendingCount>> {
        self.read(pending_counts)
    }

    /// Live [`pending_counts`](Self::pending_counts).
    pub fn observe_pending_counts(&self) -> DbResult<LiveQuery<Vec<PendingCount>>> {
        self.observe(&Table::ALL, pending_counts)
    }
}

/// Write a local create or edit of `record` inside an open transaction.
///
/// An edit is stamped past the stored row's `updated_at`, whatever the caller's copy carries.
pub(crate) fn save_local<R: SyncRecord>(
    db: &Database,
    record: &mut R,
    now: DateTime<Utc>,
) -> DbResult<()> {
    match db.get::<R>(record.id())? {
        Some(stored) => {
            record.timestamps_mut().updated_at = stored.timestamps().updated_at;
            record.stamp_local_edit(now);
        }
        None => {
            record.timestamps_mut().updated_at = now;
            record.set_sync_status(SyncStatus::Pending);
        }
    }
    db.save(record)
}

fn pending_counts(db: &Database) -> DbResult<Vec<PendingCount>> {
    Table::ALL
        .iter()
        .map(|&table| {
            Ok(PendingCount {
                table,
                pending: db.count_in_table(table, SyncStatus::Pending)?,
                invalid: db.count_in_table(table, SyncStatus::Invalid)?,
            })
        })
        .collect()
}
