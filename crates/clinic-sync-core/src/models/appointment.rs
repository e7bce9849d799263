//! Follow-up appointment models.

use chrono::{DateTime, Datelike, Months, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{SyncStatus, Timestamps};

text_enum! {
    pub enum AppointmentStatus {
        Scheduled => "scheduled",
        Visited => "visited",
        Cancelled => "cancelled",
    }
}

text_enum! {
    pub enum AppointmentType {
        Manual => "manual",
        Automatic => "automatic",
    }
}

text_enum! {
    /// Why a caregiver closed an appointment without a visit.
    pub enum CancelReason {
        PatientNotResponding => "not_responding",
        InvalidPhoneNumber => "invalid_phone_number",
        TransferredToAnotherPublicHospital => "public_hospital_transfer",
        MovedToPrivatePractitioner => "moved_to_private",
        Moved => "moved",
        Dead => "dead",
        RefusedToComeBack => "refused_to_come_back",
        PatientAlreadyVisited => "already_visited",
        Other => "other",
    }
}

impl CancelReason {
    /// Reasons that mean the visit actually happened.
    pub fn counts_as_visit(&self) -> bool {
        matches!(self, CancelReason::PatientAlreadyVisited)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Appointment {
    pub id: Uuid,
    pub patient_id: Uuid,
    /// Facility where the visit is expected.
    pub facility_id: Uuid,
    /// Facility where the appointment was scheduled.
    pub creation_facility_id: Option<Uuid>,
    pub scheduled_date: NaiveDate,
    pub status: AppointmentStatus,
    pub cancel_reason: Option<CancelReason>,
    pub remind_on: Option<NaiveDate>,
    pub agreed_to_visit: Option<bool>,
    pub appointment_type: AppointmentType,
    #[serde(flatten)]
    pub timestamps: Timestamps,
    #[serde(skip)]
    pub sync_status: SyncStatus,
}

impl Appointment {
    /// A freshly scheduled, locally created appointment.
    pub fn scheduled(
        patient_id: Uuid,
        facility_id: Uuid,
        creation_facility_id: Option<Uuid>,
        scheduled_date: NaiveDate,
        appointment_type: AppointmentType,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            patient_id,
            facility_id,
            creation_facility_id,
            scheduled_date,
            status: AppointmentStatus::Scheduled,
            cancel_reason: None,
            remind_on: None,
            agreed_to_visit: None,
            appointment_type,
            timestamps: Timestamps::new(now),
            sync_status: SyncStatus::Pending,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == AppointmentStatus::Scheduled
    }
}

/// Last day of the calendar month after the one containing `today`.
pub fn end_of_next_month(today: NaiveDate) -> NaiveDate {
    let first_of_this_month = today.with_day(1).unwrap_or(today);
    first_of_this_month
        .checked_add_months(Months::new(2))
        .and_then(|first_of_month_after_next| first_of_month_after_next.pred_opt())
        .unwrap_or(today)
}
