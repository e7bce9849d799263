//! Medical history questionnaire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{SyncStatus, Timestamps};

text_enum! {
    #[derive(Default)]
    pub enum Answer {
        Yes => "yes",
        No => "no",
        #[default]
        Unknown => "unknown",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MedicalHistory {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub diagnosed_with_hypertension: Answer,
    pub on_hypertension_treatment: Answer,
    pub has_had_heart_attack: Answer,
    pub has_had_stroke: Answer,
    pub has_had_kidney_disease: Answer,
    pub has_diabetes: Answer,
    #[serde(flatten)]
    pub timestamps: Timestamps,
    #[serde(skip)]
    pub sync_status: SyncStatus,
}

impl MedicalHistory {
    /// A blank questionnaire with every answer `Unknown`.
    pub fn new(patient_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            patient_id,
            diagnosed_with_hypertension: Answer::Unknown,
            on_hypertension_treatment: Answer::Unknown,
            has_had_heart_attack: Answer::Unknown,
            has_had_stroke: Answer::Unknown,
            has_had_kidney_disease: Answer::Unknown,
            has_diabetes: Answer::Unknown,
            timestamps: Timestamps::new(now),
            sync_status: SyncStatus::Pending,
        }
    }

    /// Prior heart attack or stroke.
    pub fn has_cardiovascular_history(&self) -> bool {
        self.has_had_heart_attack == Answer::Yes || self.has_had_stroke == Answer::Yes
    }
}
