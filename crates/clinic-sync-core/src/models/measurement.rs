//! Blood pressure and blood sugar readings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{SyncStatus, Timestamps};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BloodPressureMeasurement {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub facility_id: Uuid,
    pub user_id: Uuid,
    pub systolic: i32,
    pub diastolic: i32,
    /// When the reading was taken, as entered by the caregiver.
    pub recorded_at: DateTime<Utc>,
    #[serde(flatten)]
    pub timestamps: Timestamps,
    #[serde(skip)]
    pub sync_status: SyncStatus,
}

impl BloodPressureMeasurement {
    pub fn new(
        patient_id: Uuid,
        facility_id: Uuid,
        user_id: Uuid,
        systolic: i32,
        diastolic: i32,
        recorded_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            patient_id,
            facility_id,
            user_id,
            systolic,
            diastolic,
            recorded_at,
            timestamps: Timestamps::new(now),
            sync_status: SyncStatus::Pending,
        }
    }
}

text_enum! {
    pub enum BloodSugarReadingType {
        Random => "random",
        PostPrandial => "post_prandial",
        Fasting => "fasting",
        HbA1c => "hba1c",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BloodSugarMeasurement {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub facility_id: Uuid,
    pub user_id: Uuid,
    pub reading_type: BloodSugarReadingType,
    /// mg/dL, or percent for HbA1c.
    pub reading_value: f64,
    pub recorded_at: DateTime<Utc>,
    #[serde(flatten)]
    pub timestamps: Timestamps,
    #[serde(skip)]
    pub sync_status: SyncStatus,
}

impl BloodSugarMeasurement {
    pub fn new(
        patient_id: Uuid,
        facility_id: Uuid,
        user_id: Uuid,
        reading_type: BloodSugarReadingType,
        reading_value: f64,
        recorded_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            patient_id,
            facility_id,
            user_id,
            reading_type,
            reading_value,
            recorded_at,
            timestamps: Timestamps::new(now),
            sync_status: SyncStatus::Pending,
        }
    }
}
