//! Medical history table.

use rusqlite::types::Value;
use rusqlite::Row;
use uuid::Uuid;

use super::codec::*;
use super::records::record_accessors;
use super::{Database, DbResult, SyncRecord, Table};
use crate::models::{Answer, MedicalHistory};

impl SyncRecord for MedicalHistory {
    const TABLE: Table = Table::MedicalHistory;
    const COLUMNS: &'static [&'static str] = &[
        "patient_id",
        "diagnosed_with_hypertension",
        "on_hypertension_treatment",
        "has_had_heart_attack",
        "has_had_stroke",
        "has_had_kidney_disease",
        "has_diabetes",
    ];

    record_accessors!();

    fn column_values(&self) -> Vec<Value> {
        let answer = |a: Answer| Value::Text(a.as_str().into());
        vec![
            uuid_value(&self.patient_id),
            answer(self.diagnosed_with_hypertension),
            answer(self.on_hypertension_treatment),
            answer(self.has_had_heart_attack),
            answer(self.has_had_stroke),
            answer(self.has_had_kidney_disease),
            answer(self.has_diabetes),
        ]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let (timestamps, sync_status) = meta_at(row, Self::meta_offset())?;
        Ok(MedicalHistory {
            id: uuid_at(row, 0)?,
            patient_id: uuid_at(row, 1)?,
            diagnosed_with_hypertension: enum_at(row, 2, Answer::parse)?,
            on_hypertension_treatment: enum_at(row, 3, Answer::parse)?,
            has_had_heart_attack: enum_at(row, 4, Answer::parse)?,
            has_had_stroke: enum_at(row, 5, Answer::parse)?,
            has_had_kidney_disease: enum_at(row, 6, Answer::parse)?,
            has_diabetes: enum_at(row, 7, Answer::parse)?,
            timestamps,
            sync_status,
        })
    }
}

impl Database {
    /// Most recently updated non-deleted history of a patient.
    pub fn latest_medical_history(&self, patient_id: Uuid) -> DbResult<Option<MedicalHistory>> {
        let histories: Vec<MedicalHistory> = self.select(
            None,
            "WHERE patient_id = ? AND deleted_at IS NULL ORDER BY updated_at DESC LIMIT 1",
            [patient_id.to_string()],
        )?;
        Ok(histories.into_iter().next())
    }
}
