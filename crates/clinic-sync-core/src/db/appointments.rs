//! Appointment table.

use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, Row};
use uuid::Uuid;

use super::codec::*;
use super::records::record_accessors;
use super::{Database, DbResult, SyncRecord, Table};
use crate::models::{Appointment, AppointmentStatus, AppointmentType, CancelReason};

impl SyncRecord for Appointment {
    const TABLE: Table = Table::Appointment;
    const COLUMNS: &'static [&'static str] = &[
        "patient_id",
        "facility_id",
        "creation_facility_id",
        "scheduled_date",
        "status",
        "cancel_reason",
        "remind_on",
        "agreed_to_visit",
        "appointment_type",
    ];

    record_accessors!();

    fn column_values(&self) -> Vec<Value> {
        vec![
            uuid_value(&self.patient_id),
            uuid_value(&self.facility_id),
            opt_uuid_value(&self.creation_facility_id),
            date_value(&self.scheduled_date),
            Value::Text(self.status.as_str().into()),
            self.cancel_reason.map(|r| r.as_str().to_string()).into(),
            opt_date_value(&self.remind_on),
            self.agreed_to_visit.into(),
            Value::Text(self.appointment_type.as_str().into()),
        ]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let (timestamps, sync_status) = meta_at(row, Self::meta_offset())?;
        Ok(Appointment {
            id: uuid_at(row, 0)?,
            patient_id: uuid_at(row, 1)?,
            facility_id: uuid_at(row, 2)?,
            creation_facility_id: opt_uuid_at(row, 3)?,
            scheduled_date: date_at(row, 4)?,
            status: enum_at(row, 5, AppointmentStatus::parse)?,
            cancel_reason: opt_enum_at(row, 6, CancelReason::parse)?,
            remind_on: opt_date_at(row, 7)?,
            agreed_to_visit: row.get(8)?,
            appointment_type: enum_at(row, 9, AppointmentType::parse)?,
            timestamps,
            sync_status,
        })
    }
}

impl Database {
    /// Non-deleted appointments of a patient, most recently scheduled first.
    pub fn appointments_for_patient(&self, patient_id: Uuid) -> DbResult<Vec<Appointment>> {
        self.select(
            None,
            "WHERE patient_id = ? AND deleted_at IS NULL ORDER BY scheduled_date DESC, updated_at DESC",
            [patient_id.to_string()],
        )
    }

    /// Non-deleted `Scheduled` appointments of a patient.
    pub fn open_appointments_for_patient(&self, patient_id: Uuid) -> DbResult<Vec<Appointment>> {
        self.select(
            None,
            "WHERE patient_id = ?1 AND status = ?2 AND deleted_at IS NULL ORDER BY created_at",
            params![patient_id.to_string(), AppointmentStatus::Scheduled.as_str()],
        )
    }

    /// Open appointments of a patient created strictly before `cutoff`.
    pub fn open_appointments_created_before(
        &self,
        patient_id: Uuid,
        cutoff: DateTime<Utc>,
    ) -> DbResult<Vec<Appointment>> {
        self.select(
            None,
            "WHERE patient_id = ?1 AND status = ?2 AND deleted_at IS NULL AND created_at < ?3 \
             ORDER BY created_at",
            params![
                patient_id.to_string(),
                AppointmentStatus::Scheduled.as_str(),
                ts_text(&cutoff)
            ],
        )
    }
}
