//! Blood pressure and blood sugar tables.

use rusqlite::types::Value;
use rusqlite::{params, Row};
use uuid::Uuid;

use super::codec::*;
use super::records::record_accessors;
use super::{Database, DbResult, SyncRecord, Table};
use crate::models::{BloodPressureMeasurement, BloodSugarMeasurement, BloodSugarReadingType};

impl SyncRecord for BloodPressureMeasurement {
    const TABLE: Table = Table::BloodPressure;
    const COLUMNS: &'static [&'static str] = &[
        "patient_id",
        "facility_id",
        "user_id",
        "systolic",
        "diastolic",
        "recorded_at",
    ];

    record_accessors!();

    fn column_values(&self) -> Vec<Value> {
        vec![
            uuid_value(&self.patient_id),
            uuid_value(&self.facility_id),
            uuid_value(&self.user_id),
            self.systolic.into(),
            self.diastolic.into(),
            ts_value(&self.recorded_at),
        ]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let (timestamps, sync_status) = meta_at(row, Self::meta_offset())?;
        Ok(BloodPressureMeasurement {
            id: uuid_at(row, 0)?,
            patient_id: uuid_at(row, 1)?,
            facility_id: uuid_at(row, 2)?,
            user_id: uuid_at(row, 3)?,
            systolic: row.get(4)?,
            diastolic: row.get(5)?,
            recorded_at: ts_at(row, 6)?,
            timestamps,
            sync_status,
        })
    }
}

impl SyncRecord for BloodSugarMeasurement {
    const TABLE: Table = Table::BloodSugar;
    const COLUMNS: &'static [&'static str] = &[
        "patient_id",
        "facility_id",
        "user_id",
        "reading_type",
        "reading_value",
        "recorded_at",
    ];

    record_accessors!();

    fn column_values(&self) -> Vec<Value> {
        vec![
            uuid_value(&self.patient_id),
            uuid_value(&self.facility_id),
            uuid_value(&self.user_id),
            Value::Text(self.reading_type.as_str().into()),
            Value::Real(self.reading_value),
            ts_value(&self.recorded_at),
        ]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let (timestamps, sync_status) = meta_at(row, Self::meta_offset())?;
        Ok(BloodSugarMeasurement {
            id: uuid_at(row, 0)?,
            patient_id: uuid_at(row, 1)?,
            facility_id: uuid_at(row, 2)?,
            user_id: uuid_at(row, 3)?,
            reading_type: enum_at(row, 4, BloodSugarReadingType::parse)?,
            reading_value: row.get(5)?,
            recorded_at: ts_at(row, 6)?,
            timestamps,
            sync_status,
        })
    }
}

impl Database {
    /// Non-deleted blood pressures of a patient, latest reading first.
    pub fn recent_blood_pressures(
        &self,
        patient_id: Uuid,
        limit: usize,
    ) -> DbResult<Vec<BloodPressureMeasurement>> {
        self.select(
            None,
            "WHERE patient_id = ?1 AND deleted_at IS NULL \
             ORDER BY recorded_at DESC, updated_at DESC LIMIT ?2",
            params![patient_id.to_string(), limit as i64],
        )
    }

    pub fn latest_blood_pressure(
        &self,
        patient_id: Uuid,
    ) -> DbResult<Option<BloodPressureMeasurement>> {
        Ok(self.recent_blood_pressures(patient_id, 1)?.into_iter().next())
    }

    pub fn recent_blood_sugars(
        &self,
        patient_id: Uuid,
        limit: usize,
    ) -> DbResult<Vec<BloodSugarMeasurement>> {
        self.select(
            None,
            "WHERE patient_id = ?1 AND deleted_at IS NULL \
             ORDER BY recorded_at DESC, updated_at DESC LIMIT ?2",
            params![patient_id.to_string(), limit as i64],
        )
    }
}
