//! Overdue follow-up list for a facility.
//!
//! Candidates come from [`Database::overdue_candidates`]. This module keeps one row per
//! patient, attaches the latest phone number, classifies risk and orders the list:
//! high risk first, then latest scheduled date, then least recently updated.

pub mod risk;

use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::NaiveDate;
use uuid::Uuid;

use crate::db::{Database, DbResult, OverdueCandidate, Table};
use crate::models::OverdueAppointment;
use crate::store::{LiveQuery, Store};

pub use risk::is_at_high_risk;

/// Tables whose rows can change the overdue list.
pub const OVERDUE_TABLES: [Table; 6] = [
    Table::Patient,
    Table::Appointment,
    Table::PatientPhoneNumber,
    Table::MedicalHistory,
    Table::BloodPressure,
    Table::BloodSugar,
];

/// Which of a patient's candidate appointments represents them.
///
/// All candidates of one patient share the same last-seen time, so the tie is broken by the
/// latest scheduled date, then the latest edit, then id for determinism.
fn preferred(a: &OverdueCandidate, b: &OverdueCandidate) -> Ordering {
    a.patient_last_seen()
        .cmp(&b.patient_last_seen())
        .then_with(|| a.appointment.scheduled_date.cmp(&b.appointment.scheduled_date))
        .then_with(|| {
            a.appointment
                .timestamps
                .updated_at
                .cmp(&b.appointment.timestamps.updated_at)
        })
        .then_with(|| a.appointment.id.cmp(&b.appointment.id))
}

fn one_per_patient(candidates: Vec<OverdueCandidate>) -> Vec<OverdueCandidate> {
    let mut by_patient: HashMap<Uuid, OverdueCandidate> = HashMap::new();
    for candidate in candidates {
        let patient_id = candidate.appointment.patient_id;
        match by_patient.get(&patient_id) {
            Some(kept) if preferred(kept, &candidate) != Ordering::Less => {}
            _ => {
                by_patient.insert(patient_id, candidate);
            }
        }
    }
    by_patient.into_values().collect()
}

fn list_order(a: &OverdueAppointment, b: &OverdueAppointment) -> Ordering {
    b.is_at_high_risk
        .cmp(&a.is_at_high_risk)
        .then_with(|| b.appointment.scheduled_date.cmp(&a.appointment.scheduled_date))
        .then_with(|| {
            a.appointment
                .timestamps
                .updated_at
                .cmp(&b.appointment.timestamps.updated_at)
        })
        .then_with(|| a.appointment.id.cmp(&b.appointment.id))
}

/// Ranked overdue list for `facility_id` as of the local date `today`.
pub fn overdue_appointments(
    db: &Database,
    facility_id: Uuid,
    today: NaiveDate,
) -> DbResult<Vec<OverdueAppointment>> {
    let candidates = one_per_patient(db.overdue_candidates(facility_id, today)?);

    let mut list = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        // Candidates always have at least one reading
        let Some(patient_last_seen) = candidate.patient_last_seen() else {
            continue;
        };
        let patient_id = candidate.appointment.patient_id;
        let latest_bp = db.latest_blood_pressure(patient_id)?;
        let history = db.latest_medical_history(patient_id)?;

        list.push(OverdueAppointment {
            full_name: candidate.full_name,
            gender: candidate.gender,
            date_of_birth: candidate.date_of_birth,
            age: candidate.age,
            phone_number: db.latest_phone_number(patient_id)?,
            patient_last_seen,
            is_at_high_risk: is_at_high_risk(latest_bp.as_ref(), history.as_ref()),
            appointment: candidate.appointment,
        });
    }

    list.sort_by(list_order);
    Ok(list)
}

impl Store {
    /// Overdue list for today on the store's clock.
    pub fn overdue_appointments(&self, facility_id: Uuid) -> DbResult<Vec<OverdueAppointment>> {
        let today = self.today();
        self.read(|db| overdue_appointments(db, facility_id, today))
    }

    /// Live overdue list. "Today" is re-read from the clock on every refresh.
    pub fn observe_overdue_appointments(
        &self,
        facility_id: Uuid,
    ) -> DbResult<LiveQuery<Vec<OverdueAppointment>>> {
        let clock = self.shared_clock();
        self.observe(&OVERDUE_TABLES, move |db| {
            overdue_appointments(db, facility_id, clock.today())
        })
    }

    /// Live number of overdue patients.
    pub fn observe_overdue_count(&self, facility_id: Uuid) -> DbResult<LiveQuery<usize>> {
        let clock = self.shared_clock();
        self.observe(&OVERDUE_TABLES, move |db| {
            overdue_appointments(db, facility_id, clock.today()).map(|list| list.len())
        })
    }
}
