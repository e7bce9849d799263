//! Rows of the overdue follow-up list.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::{Age, Appointment, Gender, PatientPhoneNumber};

/// One patient whose follow-up visit is overdue at a facility.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverdueAppointment {
    pub full_name: String,
    pub gender: Gender,
    pub date_of_birth: Option<NaiveDate>,
    pub age: Option<Age>,
    pub appointment: Appointment,
    /// Most recent non-deleted phone number.
    pub phone_number: Option<PatientPhoneNumber>,
    /// Latest `recorded_at` across non-deleted blood pressure and blood sugar readings.
    pub patient_last_seen: DateTime<Utc>,
    pub is_at_high_risk: bool,
}
