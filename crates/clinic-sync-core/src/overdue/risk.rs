//! Cardiovascular risk classification for outreach priority.
//!
//! A patient is high risk when their latest blood pressure is severely raised, or when it is
//! raised and they have had a heart attack or stroke.

use crate::models::{BloodPressureMeasurement, MedicalHistory};

pub const SEVERE_SYSTOLIC: i32 = 180;
pub const SEVERE_DIASTOLIC: i32 = 110;
pub const RAISED_SYSTOLIC: i32 = 140;
pub const RAISED_DIASTOLIC: i32 = 110;

/// Classify from the latest blood pressure and the latest medical history.
///
/// No blood pressure means low risk. A missing history answers "no" to every question.
pub fn is_at_high_risk(
    latest_bp: Option<&BloodPressureMeasurement>,
    history: Option<&MedicalHistory>,
) -> bool {
    let Some(bp) = latest_bp else {
        return false;
    };
    let cardiovascular_history = history.is_some_and(MedicalHistory::has_cardiovascular_history);
    classify(bp.systolic, bp.diastolic, cardiovascular_history)
}

/// Risk rule on raw readings.
pub fn classify(systolic: i32, diastolic: i32, cardiovascular_history: bool) -> bool {
    let severe = systolic >= SEVERE_SYSTOLIC || diastolic >= SEVERE_DIASTOLIC;
    let raised = systolic >= RAISED_SYSTOLIC || diastolic >= RAISED_DIASTOLIC;
    severe || (cardiovascular_history && raised)
}
