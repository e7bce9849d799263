//! Appointment lifecycle.
//!
//! ```text
//!              schedule
//!                 │
//!                 ▼
//!   ┌──────── Scheduled ────────┐
//!   │   (reminder, agreed to    │
//!   │    visit stay here)       │
//!   ▼                           ▼
//! Visited                   Cancelled(reason)
//! ```
//!
//! `Visited` is reached by scheduling a newer appointment, by the daily auto-close, or by a
//! cancellation whose reason means the patient already came in. Every transition stamps
//! `updated_at` and marks the row `Pending`.

use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use crate::db::{Database, DbError, DbResult, SyncRecord, Table};
use crate::models::{
    end_of_next_month, Appointment, AppointmentStatus, AppointmentType, CancelReason,
};
use crate::store::{LiveQuery, Store};

/// Input for [`Store::schedule_appointment`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewAppointment {
    pub patient_id: Uuid,
    pub scheduled_date: NaiveDate,
    pub appointment_type: AppointmentType,
    /// Facility where the visit should happen.
    pub facility_id: Uuid,
    /// Facility the appointment is being scheduled from.
    pub creation_facility_id: Option<Uuid>,
}

fn close_as_visited(
    db: &Database,
    mut appointment: Appointment,
    now: DateTime<Utc>,
) -> DbResult<()> {
    appointment.status = AppointmentStatus::Visited;
    appointment.stamp_local_edit(now);
    db.save(&appointment)?;
    debug!(appointment = %appointment.id, "closed appointment as visited");
    Ok(())
}

/// Load an open appointment for a transition.
fn open_appointment(db: &Database, id: Uuid) -> DbResult<Appointment> {
    let appointment: Appointment = db.require(id)?;
    if appointment.timestamps.is_deleted() {
        return Err(DbError::NotFound(format!("{} {}", Table::Appointment, id)));
    }
    if !appointment.is_open() {
        return Err(DbError::Constraint(format!(
            "appointment {} is already {}",
            id, appointment.status
        )));
    }
    Ok(appointment)
}

impl Store {
    /// Create a `Scheduled` appointment and close every other open appointment of the patient
    /// as `Visited`, atomically.
    pub fn schedule_appointment(&self, new: NewAppointment) -> DbResult<Appointment> {
        let now = self.now();
        let appointment = Appointment::scheduled(
            new.patient_id,
            new.facility_id,
            new.creation_facility_id,
            new.scheduled_date,
            new.appointment_type,
            now,
        );

        let superseded = self.write(&[Table::Appointment], |db| {
            let open = db.open_appointments_for_patient(new.patient_id)?;
            let count = open.len();
            for previous in open {
                close_as_visited(db, previous, now)?;
            }
            db.save(&appointment)?;
            Ok(count)
        })?;

        info!(
            appointment = %appointment.id,
            patient = %new.patient_id,
            superseded,
            "scheduled appointment"
        );
        Ok(appointment)
    }

    /// Snooze follow-up calls until `remind_on`.
    pub fn set_appointment_reminder(
        &self,
        appointment_id: Uuid,
        remind_on: NaiveDate,
    ) -> DbResult<Appointment> {
        self.transition(appointment_id, |appointment| {
            appointment.remind_on = Some(remind_on);
        })
    }

    /// The patient agreed to come in; check back at the end of next month.
    pub fn mark_agreed_to_visit(&self, appointment_id: Uuid) -> DbResult<Appointment> {
        let remind_on = end_of_next_month(self.today());
        self.transition(appointment_id, |appointment| {
            appointment.agreed_to_visit = Some(true);
            appointment.remind_on = Some(remind_on);
        })
    }

    /// Close an appointment without a new one. `PatientAlreadyVisited` closes it as `Visited`.
    pub fn cancel_appointment(
        &self,
        appointment_id: Uuid,
        reason: CancelReason,
    ) -> DbResult<Appointment> {
        let appointment = self.transition(appointment_id, |appointment| {
            if reason.counts_as_visit() {
                appointment.status = AppointmentStatus::Visited;
            } else {
                appointment.status = AppointmentStatus::Cancelled;
                appointment.cancel_reason = Some(reason);
            }
        })?;
        info!(
            appointment = %appointment_id,
            %reason,
            status = %appointment.status,
            "closed appointment"
        );
        Ok(appointment)
    }

    /// Close the patient's open appointments created before today as `Visited`.
    ///
    /// Appointments created today are never touched, so repeating this is harmless.
    pub fn mark_older_appointments_as_visited(&self, patient_id: Uuid) -> DbResult<usize> {
        let now = self.now();
        let cutoff = self.clock().start_of_today();
        self.write(&[Table::Appointment], |db| {
            let older = db.open_appointments_created_before(patient_id, cutoff)?;
            let count = older.len();
            for appointment in older {
                close_as_visited(db, appointment, now)?;
            }
            Ok(count)
        })
    }

    pub fn appointments_for_patient(&self, patient_id: Uuid) -> DbResult<Vec<Appointment>> {
        self.read(|db| db.appointments_for_patient(patient_id))
    }

    /// Live [`appointments_for_patient`](Self::appointments_for_patient).
    pub fn observe_patient_appointments(
        &self,
        patient_id: Uuid,
    ) -> DbResult<LiveQuery<Vec<Appointment>>> {
        self.observe(&[Table::Appointment], move |db| {
            db.appointments_for_patient(patient_id)
        })
    }

    /// Apply `change` to an open appointment, stamping it as a local edit.
    fn transition(
        &self,
        appointment_id: Uuid,
        change: impl FnOnce(&mut Appointment),
    ) -> DbResult<Appointment> {
        let now = self.now();
        self.write(&[Table::Appointment], |db| {
            let mut appointment = open_appointment(db, appointment_id)?;
            change(&mut appointment);
            appointment.stamp_local_edit(now);
            db.save(&appointment)?;
            Ok(appointment)
        })
    }
}
