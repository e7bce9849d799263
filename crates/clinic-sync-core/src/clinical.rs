//! Recording measurements and medical history from the device.
//!
//! Range checks apply to caregiver entry only; rows merged from the server are stored as sent.

use std::ops::RangeInclusive;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::db::{Database, DbError, DbResult, Table};
use crate::models::{
    BloodPressureMeasurement, BloodSugarMeasurement, BloodSugarReadingType, MedicalHistory,
    Patient,
};
use crate::store::{save_local, LiveQuery, Store};

pub const SYSTOLIC_RANGE: RangeInclusive<i32> = 70..=300;
pub const DIASTOLIC_RANGE: RangeInclusive<i32> = 40..=180;

/// Who took a reading, where, and when.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadingContext {
    pub patient_id: Uuid,
    pub facility_id: Uuid,
    pub user_id: Uuid,
    /// Defaults to now when absent.
    pub recorded_at: Option<DateTime<Utc>>,
}

fn check_range(name: &str, value: i32, range: &RangeInclusive<i32>) -> DbResult<()> {
    if range.contains(&value) {
        Ok(())
    } else {
        Err(DbError::Validation(format!(
            "{} {} outside {}..={}",
            name,
            value,
            range.start(),
            range.end()
        )))
    }
}

/// Load the patient new clinical rows attach to. Deleted patients count as missing.
fn require_patient(db: &Database, patient_id: Uuid) -> DbResult<Patient> {
    let patient: Patient = db.require(patient_id)?;
    if patient.is_deleted() {
        return Err(DbError::NotFound(format!("{} {}", Table::Patient, patient_id)));
    }
    Ok(patient)
}

impl Store {
    pub fn record_blood_pressure(
        &self,
        context: ReadingContext,
        systolic: i32,
        diastolic: i32,
    ) -> DbResult<BloodPressureMeasurement> {
        check_range("systolic", systolic, &SYSTOLIC_RANGE)?;
        check_range("diastolic", diastolic, &DIASTOLIC_RANGE)?;

        let now = self.now();
        let bp = BloodPressureMeasurement::new(
            context.patient_id,
            context.facility_id,
            context.user_id,
            systolic,
            diastolic,
            context.recorded_at.unwrap_or(now),
            now,
        );
        self.write(&[Table::BloodPressure], |db| {
            require_patient(db, context.patient_id)?;
            db.save(&bp)
        })?;
        Ok(bp)
    }

    pub fn record_blood_sugar(
        &self,
        context: ReadingContext,
        reading_type: BloodSugarReadingType,
        reading_value: f64,
    ) -> DbResult<BloodSugarMeasurement> {
        if !reading_value.is_finite() || reading_value <= 0.0 {
            return Err(DbError::Validation(format!(
                "blood sugar {} must be a positive number",
                reading_value
            )));
        }

        let now = self.now();
        let sugar = BloodSugarMeasurement::new(
            context.patient_id,
            context.facility_id,
            context.user_id,
            reading_type,
            reading_value,
            context.recorded_at.unwrap_or(now),
            now,
        );
        self.write(&[Table::BloodSugar], |db| {
            require_patient(db, context.patient_id)?;
            db.save(&sugar)
        })?;
        Ok(sugar)
    }

    /// Save answers as the patient's current history.
    pub fn save_medical_history(&self, mut history: MedicalHistory) -> DbResult<MedicalHistory> {
        let now = self.now();
        self.write(&[Table::MedicalHistory], |db| {
            require_patient(db, history.patient_id)?;
            save_local(db, &mut history, now)
        })?;
        Ok(history)
    }

    pub fn latest_medical_history(&self, patient_id: Uuid) -> DbResult<Option<MedicalHistory>> {
        self.read(|db| db.latest_medical_history(patient_id))
    }

    /// Live list of a patient's latest blood pressures.
    pub fn observe_recent_blood_pressures(
        &self,
        patient_id: Uuid,
        limit: usize,
    ) -> DbResult<LiveQuery<Vec<BloodPressureMeasurement>>> {
        self.observe(&[Table::BloodPressure], move |db| {
            db.recent_blood_pressures(patient_id, limit)
        })
    }
}
