//! SQLite schema definition.
//!
//! Every clinical table ends with the same bookkeeping columns:
//! `created_at`, `updated_at`, `deleted_at` (RFC 3339 UTC text, fixed width) and
//! `sync_status` (`pending` | `done` | `invalid`). Calendar dates are `YYYY-MM-DD` text.
//! There are no foreign keys: a merged row may reference a patient that has not been pulled yet.

/// Complete database schema.
pub const SCHEMA: &str = r#"
-- ============================================================================
-- Patients
-- ============================================================================

CREATE TABLE IF NOT EXISTS patient_address (
    id TEXT PRIMARY KEY,
    street_address TEXT,
    colony_or_village TEXT,
    district TEXT NOT NULL,
    state TEXT NOT NULL,
    country TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    deleted_at TEXT,
    sync_status TEXT NOT NULL DEFAULT 'pending'
);

CREATE TABLE IF NOT EXISTS patient (
    id TEXT PRIMARY KEY,
    address_id TEXT NOT NULL,
    full_name TEXT NOT NULL,
    searchable_name TEXT NOT NULL,
    gender TEXT NOT NULL,
    date_of_birth TEXT,
    age_value INTEGER,
    age_updated_at TEXT,
    status TEXT NOT NULL,
    registered_facility_id TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    deleted_at TEXT,
    sync_status TEXT NOT NULL DEFAULT 'pending'
);

CREATE INDEX IF NOT EXISTS idx_patient_searchable_name ON patient(searchable_name);

CREATE TABLE IF NOT EXISTS patient_phone_number (
    id TEXT PRIMARY KEY,
    patient_id TEXT NOT NULL,
    number TEXT NOT NULL,
    phone_type TEXT NOT NULL,
    active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    deleted_at TEXT,
    sync_status TEXT NOT NULL DEFAULT 'pending'
);

CREATE INDEX IF NOT EXISTS idx_phone_patient ON patient_phone_number(patient_id);

CREATE TABLE IF NOT EXISTS business_id (
    id TEXT PRIMARY KEY,
    patient_id TEXT NOT NULL,
    identifier TEXT NOT NULL,
    identifier_type TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    deleted_at TEXT,
    sync_status TEXT NOT NULL DEFAULT 'pending'
);

CREATE INDEX IF NOT EXISTS idx_business_id_patient ON business_id(patient_id);
CREATE INDEX IF NOT EXISTS idx_business_id_identifier ON business_id(identifier, identifier_type);

-- ============================================================================
-- Clinical records
-- ============================================================================

CREATE TABLE IF NOT EXISTS medical_history (
    id TEXT PRIMARY KEY,
    patient_id TEXT NOT NULL,
    diagnosed_with_hypertension TEXT NOT NULL,
    on_hypertension_treatment TEXT NOT NULL,
    has_had_heart_attack TEXT NOT NULL,
    has_had_stroke TEXT NOT NULL,
    has_had_kidney_disease TEXT NOT NULL,
    has_diabetes TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    deleted_at TEXT,
    sync_status TEXT NOT NULL DEFAULT 'pending'
);

CREATE INDEX IF NOT EXISTS idx_medical_history_patient ON medical_history(patient_id);

CREATE TABLE IF NOT EXISTS blood_pressure (
    id TEXT PRIMARY KEY,
    patient_id TEXT NOT NULL,
    facility_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    systolic INTEGER NOT NULL,
    diastolic INTEGER NOT NULL,
    recorded_at TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    deleted_at TEXT,
    sync_status TEXT NOT NULL DEFAULT 'pending'
);

CREATE INDEX IF NOT EXISTS idx_blood_pressure_patient ON blood_pressure(patient_id, recorded_at);

CREATE TABLE IF NOT EXISTS blood_sugar (
    id TEXT PRIMARY KEY,
    patient_id TEXT NOT NULL,
    facility_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    reading_type TEXT NOT NULL,
    reading_value REAL NOT NULL,
    recorded_at TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    deleted_at TEXT,
    sync_status TEXT NOT NULL DEFAULT 'pending'
);

CREATE INDEX IF NOT EXISTS idx_blood_sugar_patient ON blood_sugar(patient_id, recorded_at);

CREATE TABLE IF NOT EXISTS appointment (
    id TEXT PRIMARY KEY,
    patient_id TEXT NOT NULL,
    facility_id TEXT NOT NULL,
    creation_facility_id TEXT,
    scheduled_date TEXT NOT NULL,
    status TEXT NOT NULL,
    cancel_reason TEXT,
    remind_on TEXT,
    agreed_to_visit INTEGER,
    appointment_type TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    deleted_at TEXT,
    sync_status TEXT NOT NULL DEFAULT 'pending'
);

CREATE INDEX IF NOT EXISTS idx_appointment_patient ON appointment(patient_id, status);
CREATE INDEX IF NOT EXISTS idx_appointment_facility ON appointment(facility_id, status, scheduled_date);

-- ============================================================================
-- Sync State
-- ============================================================================

-- Pull position per table; the only sync state that is not a clinical record
CREATE TABLE IF NOT EXISTS sync_cursor (
    table_name TEXT PRIMARY KEY,
    cursor TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
);
"#;
