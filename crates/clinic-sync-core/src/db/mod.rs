//! Database layer for the clinic record store.

mod appointments;
mod codec;
mod measurements;
mod medical_history;
mod overdue;
mod patients;
mod records;
mod schema;
mod sync_cursor;

pub use overdue::OverdueCandidate;
pub use records::{MergeOutcome, PushedVersion, SyncRecord};
pub use schema::*;

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::debug;

use crate::config::StoreConfig;

/// Database errors.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Record not found: {0}")]
    NotFound(String),

    /// Input violates a domain invariant; nothing was written.
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),
}

pub type DbResult<T> = Result<T, DbError>;

/// One local table per syncable entity type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    PatientAddress,
    Patient,
    PatientPhoneNumber,
    BusinessId,
    MedicalHistory,
    BloodPressure,
    BloodSugar,
    Appointment,
}

impl Table {
    /// Every table, in the order sync visits them (owners before dependents).
    pub const ALL: [Table; 8] = [
        Table::PatientAddress,
        Table::Patient,
        Table::PatientPhoneNumber,
        Table::BusinessId,
        Table::MedicalHistory,
        Table::BloodPressure,
        Table::BloodSugar,
        Table::Appointment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Table::PatientAddress => "patient_address",
            Table::Patient => "patient",
            Table::PatientPhoneNumber => "patient_phone_number",
            Table::BusinessId => "business_id",
            Table::MedicalHistory => "medical_history",
            Table::BloodPressure => "blood_pressure",
            Table::BloodSugar => "blood_sugar",
            Table::Appointment => "appointment",
        }
    }

    pub fn parse(name: &str) -> Option<Table> {
        Table::ALL.into_iter().find(|table| table.as_str() == name)
    }
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Database connection wrapper.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open database at path, creating if needed.
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.initialize()?;
        Ok(db)
    }

    /// Create in-memory database (for testing).
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.initialize()?;
        Ok(db)
    }

    pub fn open_with(config: &StoreConfig) -> DbResult<Self> {
        let db = match &config.path {
            Some(path) => {
                let db = Self::open(path)?;
                if config.enable_wal {
                    db.conn
                        .query_row("PRAGMA journal_mode = WAL", [], |row| row.get::<_, String>(0))?;
                }
                db
            }
            None => Self::open_in_memory()?,
        };
        debug!(path = ?config.path, "opened clinic database");
        Ok(db)
    }

    /// Initialize schema.
    fn initialize(&self) -> DbResult<()> {
        self.conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Get raw connection (for advanced queries).
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Run `f` inside one transaction; any error rolls every statement back.
    pub fn in_transaction<T>(&self, f: impl FnOnce(&Database) -> DbResult<T>) -> DbResult<T> {
        let tx = self.conn.unchecked_transaction()?;
        let value = f(self)?;
        tx.commit()?;
        Ok(value)
    }

    /// Hard-delete every clinical row and forget all pull cursors.
    ///
    /// Only for resetting a device; nothing deleted here is ever pushed.
    pub fn purge_all(&self) -> DbResult<()> {
        self.in_transaction(|db| {
            for table in Table::ALL {
                db.conn.execute(&format!("DELETE FROM {}", table.as_str()), [])?;
            }
            db.conn.execute("DELETE FROM sync_cursor", [])?;
            Ok(())
        })
    }
}
