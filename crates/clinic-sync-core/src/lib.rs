//! Clinic Sync Core Library
//!
//! Offline-first record store for hypertension clinics, with push/pull sync and a ranked
//! overdue follow-up list.
//!
//! # Architecture
//!
//! ```text
//!   Caregiver action ──► Store::write ──► SQLite (row marked Pending)
//!                              │
//!                              ▼
//!                    live queries re-run ──► overdue list, search, counts
//!
//!   SyncCoordinator
//!     push: Pending rows ──► server ──► Done / Invalid (only the version sent)
//!     pull: server pages ──► merge (Pending rows win) ──► cursor saved with the page
//! ```
//!
//! # Modules
//!
//! - [`db`]: SQLite tables, generic record operations and the overdue candidate query
//! - [`models`]: Patients, appointments, measurements, medical history
//! - [`store`]: Transactional writes, injected clock and live queries
//! - [`appointments`]: Appointment lifecycle
//! - [`overdue`]: Overdue list and risk classification
//! - [`sync`]: Push/pull coordinator and the transport seam
//! - [`patients`], [`clinical`]: Registration, search and measurement entry

pub mod appointments;
pub mod clinical;
pub mod clock;
pub mod config;
pub mod db;
pub mod models;
pub mod overdue;
pub mod patients;
pub mod store;
pub mod sync;

// Re-export commonly used types
pub use appointments::NewAppointment;
pub use clinical::ReadingContext;
pub use clock::{Clock, SystemClock, TestClock};
pub use config::{ConfigError, StoreConfig, SyncConfig};
pub use db::{Database, DbError, DbResult, SyncRecord, Table};
pub use models::{
    Appointment, AppointmentStatus, AppointmentType, BloodPressureMeasurement,
    BloodSugarMeasurement, CancelReason, MedicalHistory, OverdueAppointment, Patient,
    PatientStatus, SyncStatus,
};
pub use patients::{NewBusinessId, NewPatientEntry, RegisteredPatient};
pub use store::{LiveQuery, PendingCount, Store};
pub use sync::{SyncCoordinator, SyncError, SyncReport, SyncTransport};

// UniFFI setup - using proc macros
uniffi::setup_scaffolding!();

use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;

use chrono::{NaiveDate, SecondsFormat};
use tracing::debug;
use uuid::Uuid;

use models::{Gender, IdentifierType, PhoneNumberType};

// =========================================================================
// FFI Error Type
// =========================================================================

#[derive(Debug, thiserror::Error, uniffi::Error)]
pub enum ClinicError {
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Sync error: {0}")]
    SyncError(String),
}

impl From<DbError> for ClinicError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::NotFound(what) => ClinicError::NotFound(what),
            DbError::Validation(msg) | DbError::Constraint(msg) => ClinicError::InvalidInput(msg),
            other => ClinicError::DatabaseError(other.to_string()),
        }
    }
}

impl From<SyncError> for ClinicError {
    fn from(e: SyncError) -> Self {
        ClinicError::SyncError(e.to_string())
    }
}

impl From<ConfigError> for ClinicError {
    fn from(e: ConfigError) -> Self {
        ClinicError::InvalidInput(e.to_string())
    }
}

fn parse_id(id: &str) -> Result<Uuid, ClinicError> {
    Uuid::parse_str(id).map_err(|e| ClinicError::InvalidInput(format!("bad id {}: {}", id, e)))
}

fn parse_date(date: &str) -> Result<NaiveDate, ClinicError> {
    NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map_err(|e| ClinicError::InvalidInput(format!("bad date {}: {}", date, e)))
}

fn parse_text<E>(value: &str, what: &str, parse: fn(&str) -> Option<E>) -> Result<E, ClinicError> {
    parse(value).ok_or_else(|| ClinicError::InvalidInput(format!("unknown {}: {}", what, value)))
}

// =========================================================================
// Factory Functions (exported to FFI)
// =========================================================================

/// Open or create a clinic store at the given path.
#[uniffi::export]
pub fn open_clinic_store(path: String) -> Result<Arc<ClinicCore>, ClinicError> {
    let config = StoreConfig {
        path: Some(path.into()),
        ..StoreConfig::default()
    };
    let store = Store::open(&config, Arc::new(SystemClock))?;
    Ok(Arc::new(ClinicCore {
        store: Arc::new(store),
    }))
}

/// Create an in-memory store (for testing).
#[uniffi::export]
pub fn open_clinic_store_in_memory() -> Result<Arc<ClinicCore>, ClinicError> {
    Ok(Arc::new(ClinicCore {
        store: Arc::new(Store::open_in_memory()?),
    }))
}

// =========================================================================
// Callback Interfaces
// =========================================================================

/// Receives a fresh overdue list after every relevant change.
#[uniffi::export(callback_interface)]
pub trait OverdueListener: Send + Sync {
    fn on_update(&self, appointments: Vec<FfiOverdueAppointment>);
}

// =========================================================================
// Main API Object
// =========================================================================

/// Thread-safe store wrapper for FFI.
#[derive(uniffi::Object)]
pub struct ClinicCore {
    store: Arc<Store>,
}

impl ClinicCore {
    pub fn store(&self) -> Arc<Store> {
        Arc::clone(&self.store)
    }

    fn to_ffi_overdue(&self, list: Vec<OverdueAppointment>) -> Vec<FfiOverdueAppointment> {
        let today = self.store.today();
        list.into_iter()
            .map(|o| FfiOverdueAppointment::new(o, today))
            .collect()
    }
}

#[uniffi::export]
impl ClinicCore {
    // =========================================================================
    // Patient Operations
    // =========================================================================

    /// Register a patient from a completed entry form.
    pub fn register_patient(&self, entry: FfiNewPatient) -> Result<FfiPatient, ClinicError> {
        let registered = self.store.register_patient(entry.try_into()?)?;
        Ok(FfiPatient::new(registered.patient, registered.phone_number, self.store.today()))
    }

    pub fn get_patient(&self, patient_id: String) -> Result<Option<FfiPatient>, ClinicError> {
        let id = parse_id(&patient_id)?;
        let found = self.store.read(|db| match db.get::<Patient>(id)? {
            Some(patient) if !patient.is_deleted() => {
                Ok(Some((patient, db.latest_phone_number(id)?)))
            }
            _ => Ok(None),
        })?;
        let today = self.store.today();
        Ok(found.map(|(patient, phone)| FfiPatient::new(patient, phone, today)))
    }

    /// Search patients by name.
    pub fn search_patients(&self, query: String, limit: u32) -> Result<Vec<FfiPatient>, ClinicError> {
        let today = self.store.today();
        let results = self.store.search_patients(&query, limit as usize)?;
        Ok(results
            .into_iter()
            .map(|r| FfiPatient::new(r.patient, None, today))
            .collect())
    }

    pub fn update_patient_status(&self, patient_id: String, status: String) -> Result<(), ClinicError> {
        let status = parse_text(&status, "patient status", PatientStatus::parse)?;
        self.store.update_patient_status(parse_id(&patient_id)?, status)?;
        Ok(())
    }

    pub fn delete_patient(&self, patient_id: String) -> Result<bool, ClinicError> {
        Ok(self.store.delete::<Patient>(parse_id(&patient_id)?)?)
    }

    // =========================================================================
    // Measurement Operations
    // =========================================================================

    /// Record a blood pressure taken now. Returns the measurement id.
    pub fn record_blood_pressure(
        &self,
        patient_id: String,
        facility_id: String,
        user_id: String,
        systolic: i32,
        diastolic: i32,
    ) -> Result<String, ClinicError> {
        let context = ReadingContext {
            patient_id: parse_id(&patient_id)?,
            facility_id: parse_id(&facility_id)?,
            user_id: parse_id(&user_id)?,
            recorded_at: None,
        };
        let bp = self.store.record_blood_pressure(context, systolic, diastolic)?;
        Ok(bp.id.to_string())
    }

    /// Record a blood sugar taken now. Returns the measurement id.
    pub fn record_blood_sugar(
        &self,
        patient_id: String,
        facility_id: String,
        user_id: String,
        reading_type: String,
        reading_value: f64,
    ) -> Result<String, ClinicError> {
        let reading_type =
            parse_text(&reading_type, "reading type", models::BloodSugarReadingType::parse)?;
        let context = ReadingContext {
            patient_id: parse_id(&patient_id)?,
            facility_id: parse_id(&facility_id)?,
            user_id: parse_id(&user_id)?,
            recorded_at: None,
        };
        let sugar = self
            .store
            .record_blood_sugar(context, reading_type, reading_value)?;
        Ok(sugar.id.to_string())
    }

    // =========================================================================
    // Appointment Operations
    // =========================================================================

    pub fn schedule_appointment(
        &self,
        patient_id: String,
        facility_id: String,
        creation_facility_id: Option<String>,
        scheduled_date: String,
        appointment_type: String,
    ) -> Result<FfiAppointment, ClinicError> {
        let new = NewAppointment {
            patient_id: parse_id(&patient_id)?,
            facility_id: parse_id(&facility_id)?,
            creation_facility_id: creation_facility_id.as_deref().map(parse_id).transpose()?,
            scheduled_date: parse_date(&scheduled_date)?,
            appointment_type: parse_text(
                &appointment_type,
                "appointment type",
                AppointmentType::parse,
            )?,
        };
        Ok(self.store.schedule_appointment(new)?.into())
    }

    pub fn set_appointment_reminder(
        &self,
        appointment_id: String,
        remind_on: String,
    ) -> Result<FfiAppointment, ClinicError> {
        let appointment = self
            .store
            .set_appointment_reminder(parse_id(&appointment_id)?, parse_date(&remind_on)?)?;
        Ok(appointment.into())
    }

    pub fn mark_agreed_to_visit(&self, appointment_id: String) -> Result<FfiAppointment, ClinicError> {
        Ok(self.store.mark_agreed_to_visit(parse_id(&appointment_id)?)?.into())
    }

    pub fn cancel_appointment(
        &self,
        appointment_id: String,
        reason: String,
    ) -> Result<FfiAppointment, ClinicError> {
        let reason = parse_text(&reason, "cancel reason", CancelReason::parse)?;
        Ok(self
            .store
            .cancel_appointment(parse_id(&appointment_id)?, reason)?
            .into())
    }

    /// Close a patient's appointments created before today. Returns how many were closed.
    pub fn mark_older_appointments_as_visited(&self, patient_id: String) -> Result<u32, ClinicError> {
        let closed = self
            .store
            .mark_older_appointments_as_visited(parse_id(&patient_id)?)?;
        Ok(closed as u32)
    }

    pub fn appointments_for_patient(&self, patient_id: String) -> Result<Vec<FfiAppointment>, ClinicError> {
        let appointments = self.store.appointments_for_patient(parse_id(&patient_id)?)?;
        Ok(appointments.into_iter().map(Into::into).collect())
    }

    // =========================================================================
    // Overdue Operations
    // =========================================================================

    pub fn overdue_appointments(&self, facility_id: String) -> Result<Vec<FfiOverdueAppointment>, ClinicError> {
        let list = self.store.overdue_appointments(parse_id(&facility_id)?)?;
        Ok(self.to_ffi_overdue(list))
    }

    /// Deliver the overdue list now and after every change, until cancelled.
    pub fn observe_overdue_appointments(
        &self,
        facility_id: String,
        listener: Box<dyn OverdueListener>,
    ) -> Result<Arc<OverdueSubscription>, ClinicError> {
        let mut live = self
            .store
            .observe_overdue_appointments(parse_id(&facility_id)?)?;
        let id = live.id();
        let store = Arc::clone(&self.store);

        // Callbacks run on their own thread so a listener calling back into the store
        // never re-enters the write path
        let worker = std::thread::spawn(move || {
            while let Some(list) = live.blocking_recv() {
                let today = store.today();
                listener.on_update(
                    list.into_iter()
                        .map(|o| FfiOverdueAppointment::new(o, today))
                        .collect(),
                );
            }
            debug!(subscription = id, "overdue listener stopped");
        });

        Ok(Arc::new(OverdueSubscription {
            store: Arc::clone(&self.store),
            id,
            worker: Mutex::new(Some(worker)),
        }))
    }

    // =========================================================================
    // Sync Bookkeeping
    // =========================================================================

    pub fn pending_counts(&self) -> Result<Vec<FfiPendingCount>, ClinicError> {
        let counts = self.store.pending_counts()?;
        Ok(counts.into_iter().map(Into::into).collect())
    }

    /// Ids of the records in `table` the server rejected.
    pub fn invalid_record_ids(&self, table: String) -> Result<Vec<String>, ClinicError> {
        let table = parse_text(&table, "table", Table::parse)?;
        let ids = self.store.invalid_ids(table)?;
        Ok(ids.iter().map(Uuid::to_string).collect())
    }

    /// Check if there are unsynced changes.
    pub fn has_unsynced_changes(&self) -> Result<bool, ClinicError> {
        Ok(self.store.pending_counts()?.iter().any(|c| c.pending > 0))
    }

    /// Wipe every clinical record on this device. Nothing wiped is synced.
    pub fn purge_all(&self) -> Result<(), ClinicError> {
        Ok(self.store.purge_all()?)
    }
}

/// Handle for a running overdue listener.
#[derive(uniffi::Object)]
pub struct OverdueSubscription {
    store: Arc<Store>,
    id: store::SubscriptionId,
    worker: Mutex<Option<JoinHandle<()>>>,
}

#[uniffi::export]
impl OverdueSubscription {
    /// Stop delivering updates. Safe to call more than once.
    pub fn cancel(&self) {
        self.store.unobserve(self.id);
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            // Don't wait on ourselves when cancelled from inside the callback
            if worker.thread().id() != std::thread::current().id() {
                let _ = worker.join();
            }
        }
    }
}

impl Drop for OverdueSubscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

// =========================================================================
// FFI Types
// =========================================================================

/// FFI-safe registration form.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiNewPatient {
    pub full_name: String,
    pub gender: String,
    /// `YYYY-MM-DD`
    pub date_of_birth: Option<String>,
    pub age: Option<i32>,
    pub phone_number: Option<String>,
    pub colony_or_village: Option<String>,
    pub district: String,
    pub state: String,
    pub business_id: Option<String>,
    pub business_id_type: Option<String>,
    pub registered_facility_id: Option<String>,
}

impl TryFrom<FfiNewPatient> for NewPatientEntry {
    type Error = ClinicError;

    fn try_from(entry: FfiNewPatient) -> Result<Self, Self::Error> {
        let business_id = match (entry.business_id, entry.business_id_type) {
            (Some(identifier), Some(kind)) => Some(NewBusinessId {
                identifier,
                identifier_type: parse_text(&kind, "identifier type", IdentifierType::parse)?,
            }),
            (Some(identifier), None) => Some(NewBusinessId {
                identifier,
                identifier_type: IdentifierType::BpPassport,
            }),
            (None, _) => None,
        };
        Ok(NewPatientEntry {
            full_name: entry.full_name,
            gender: parse_text(&entry.gender, "gender", Gender::parse)?,
            date_of_birth: entry.date_of_birth.as_deref().map(parse_date).transpose()?,
            age: entry.age,
            phone_number: entry.phone_number,
            phone_type: PhoneNumberType::Mobile,
            street_address: None,
            colony_or_village: entry.colony_or_village,
            district: entry.district,
            state: entry.state,
            country: None,
            business_id,
            registered_facility_id: entry
                .registered_facility_id
                .as_deref()
                .map(parse_id)
                .transpose()?,
        })
    }
}

/// FFI-safe patient.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiPatient {
    pub id: String,
    pub full_name: String,
    pub gender: String,
    pub status: String,
    /// Age in years today, from date of birth or the recorded estimate.
    pub current_age: Option<i32>,
    pub phone_number: Option<String>,
}

impl FfiPatient {
    fn new(
        patient: Patient,
        phone: Option<models::PatientPhoneNumber>,
        today: NaiveDate,
    ) -> Self {
        Self {
            id: patient.id.to_string(),
            current_age: patient.current_age(today),
            full_name: patient.full_name,
            gender: patient.gender.to_string(),
            status: patient.status.to_string(),
            phone_number: phone.map(|p| p.number),
        }
    }
}

/// FFI-safe appointment.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiAppointment {
    pub id: String,
    pub patient_id: String,
    pub facility_id: String,
    pub scheduled_date: String,
    pub status: String,
    pub cancel_reason: Option<String>,
    pub remind_on: Option<String>,
    pub agreed_to_visit: Option<bool>,
}

impl From<Appointment> for FfiAppointment {
    fn from(a: Appointment) -> Self {
        Self {
            id: a.id.to_string(),
            patient_id: a.patient_id.to_string(),
            facility_id: a.facility_id.to_string(),
            scheduled_date: a.scheduled_date.to_string(),
            status: a.status.to_string(),
            cancel_reason: a.cancel_reason.map(|r| r.to_string()),
            remind_on: a.remind_on.map(|d| d.to_string()),
            agreed_to_visit: a.agreed_to_visit,
        }
    }
}

/// FFI-safe overdue list row.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiOverdueAppointment {
    pub appointment: FfiAppointment,
    pub full_name: String,
    pub gender: String,
    pub current_age: Option<i32>,
    pub phone_number: Option<String>,
    /// RFC 3339 UTC.
    pub patient_last_seen: String,
    pub is_at_high_risk: bool,
}

impl FfiOverdueAppointment {
    fn new(o: OverdueAppointment, today: NaiveDate) -> Self {
        let current_age = models::age_on(o.date_of_birth, o.age.as_ref(), today);
        Self {
            appointment: o.appointment.into(),
            full_name: o.full_name,
            gender: o.gender.to_string(),
            current_age,
            phone_number: o.phone_number.map(|p| p.number),
            patient_last_seen: o
                .patient_last_seen
                .to_rfc3339_opts(SecondsFormat::Millis, true),
            is_at_high_risk: o.is_at_high_risk,
        }
    }
}

/// FFI-safe pending count.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiPendingCount {
    pub table: String,
    pub pending: u32,
    pub invalid: u32,
}

impl From<PendingCount> for FfiPendingCount {
    fn from(c: PendingCount) -> Self {
        Self {
            table: c.table.to_string(),
            pending: c.pending as u32,
            invalid: c.invalid as u32,
        }
    }
}
