//! Candidate rows for the overdue follow-up list.
//!
//! SQL applies every filter that only needs row presence; risk and per-patient grouping are
//! computed by [`crate::overdue`].

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rusqlite::params;
use uuid::Uuid;

use super::codec::*;
use super::records::column_list;
use super::{Database, DbResult, SyncRecord};
use crate::models::{Age, Appointment, AppointmentStatus, Gender};

/// Appointments older than this many days are no longer actionable.
pub const OVERDUE_WINDOW_DAYS: i64 = 365;

/// An open, past-due appointment joined with its patient and last-seen markers.
#[derive(Debug, Clone, PartialEq)]
pub struct OverdueCandidate {
    pub appointment: Appointment,
    pub full_name: String,
    pub gender: Gender,
    pub date_of_birth: Option<NaiveDate>,
    pub age: Option<Age>,
    pub last_blood_pressure_at: Option<DateTime<Utc>>,
    pub last_blood_sugar_at: Option<DateTime<Utc>>,
}

impl OverdueCandidate {
    /// Later of the latest blood pressure and blood sugar reading.
    ///
    /// The query only returns patients with at least one reading, so this is always `Some`
    /// for candidates it produced.
    pub fn patient_last_seen(&self) -> Option<DateTime<Utc>> {
        self.last_blood_pressure_at.max(self.last_blood_sugar_at)
    }
}

impl Database {
    /// Open appointments at `facility_id` that are due before `today` but inside the
    /// actionable window, not snoozed past today, for patients with a phone number and at
    /// least one reading. Every soft-deleted row is ignored.
    pub fn overdue_candidates(
        &self,
        facility_id: Uuid,
        today: NaiveDate,
    ) -> DbResult<Vec<OverdueCandidate>> {
        let window_start = today - Duration::days(OVERDUE_WINDOW_DAYS);
        let sql = format!(
            r#"
            SELECT {columns},
                P.full_name, P.gender, P.date_of_birth, P.age_value, P.age_updated_at,
                (SELECT MAX(BP.recorded_at) FROM blood_pressure BP
                    WHERE BP.patient_id = P.id AND BP.deleted_at IS NULL),
                (SELECT MAX(BS.recorded_at) FROM blood_sugar BS
                    WHERE BS.patient_id = P.id AND BS.deleted_at IS NULL)
            FROM appointment A
            INNER JOIN patient P ON P.id = A.patient_id
            WHERE A.deleted_at IS NULL AND P.deleted_at IS NULL
                AND A.facility_id = ?1
                AND A.status = ?2
                AND A.scheduled_date < ?3
                AND A.scheduled_date > ?4
                AND (A.remind_on IS NULL OR A.remind_on < ?3)
                AND EXISTS (
                    SELECT 1 FROM patient_phone_number PN
                    WHERE PN.patient_id = P.id AND PN.deleted_at IS NULL
                )
                AND (
                    EXISTS (SELECT 1 FROM blood_pressure BP
                        WHERE BP.patient_id = P.id AND BP.deleted_at IS NULL)
                    OR EXISTS (SELECT 1 FROM blood_sugar BS
                        WHERE BS.patient_id = P.id AND BS.deleted_at IS NULL)
                )
            "#,
            columns = column_list::<Appointment>(Some("A"))
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![
                facility_id.to_string(),
                AppointmentStatus::Scheduled.as_str(),
                date_text(&today),
                date_text(&window_start),
            ],
            |row| {
                let base = Appointment::column_count();
                let age_value: Option<i32> = row.get(base + 3)?;
                let age = match (age_value, opt_ts_at(row, base + 4)?) {
                    (Some(value), Some(updated_at)) => Some(Age { value, updated_at }),
                    _ => None,
                };
                Ok(OverdueCandidate {
                    appointment: Appointment::from_row(row)?,
                    full_name: row.get(base)?,
                    gender: enum_at(row, base + 1, Gender::parse)?,
                    date_of_birth: opt_date_at(row, base + 2)?,
                    age,
                    last_blood_pressure_at: opt_ts_at(row, base + 5)?,
                    last_blood_sugar_at: opt_ts_at(row, base + 6)?,
                })
            },
        )?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        AppointmentType, BloodPressureMeasurement, BloodSugarMeasurement, BloodSugarReadingType,
        Patient, PatientPhoneNumber,
    };
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2018, 1, 5, 10, 0, 0).unwrap()
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2018, 1, 5).unwrap()
    }

    struct Fixture {
        db: Database,
        facility_id: Uuid,
        patient: Patient,
    }

    fn fixture() -> Fixture {
        let db = Database::open_in_memory().unwrap();
        let patient = Patient::new("Anish".into(), Gender::Male, Uuid::new_v4(), now());
        db.save(&patient).unwrap();
        db.save(&PatientPhoneNumber::new(patient.id, "9999900001".into(), now()))
            .unwrap();
        Fixture {
            db,
            facility_id: Uuid::new_v4(),
            patient,
        }
    }

    impl Fixture {
        fn appointment(&self, days_overdue: i64) -> Appointment {
            let appt = Appointment::scheduled(
                self.patient.id,
                self.facility_id,
                None,
                today() - Duration::days(days_overdue),
                AppointmentType::Manual,
                now(),
            );
            self.db.save(&appt).unwrap();
            appt
        }

        fn blood_pressure(&self, recorded_at: DateTime<Utc>) -> BloodPressureMeasurement {
            let bp = BloodPressureMeasurement::new(
                self.patient.id,
                Uuid::new_v4(),
                Uuid::new_v4(),
                120,
                80,
                recorded_at,
                now(),
            );
            self.db.save(&bp).unwrap();
            bp
        }

        fn candidates(&self) -> Vec<OverdueCandidate> {
            self.db.overdue_candidates(self.facility_id, today()).unwrap()
        }
    }

    #[test]
    fn test_window_bounds() {
        let f = fixture();
        f.blood_pressure(now());
        f.appointment(0);
        f.appointment(1);
        f.appointment(364);
        f.appointment(365);

        let days: Vec<NaiveDate> = f
            .candidates()
            .into_iter()
            .map(|c| c.appointment.scheduled_date)
            .collect();
        assert_eq!(days.len(), 2);
        assert!(days.contains(&(today() - Duration::days(1))));
        assert!(days.contains(&(today() - Duration::days(364))));
    }

    #[test]
    fn test_remind_on_today_is_not_due_yet() {
        let f = fixture();
        f.blood_pressure(now());
        let mut appt = f.appointment(3);
        appt.remind_on = Some(today());
        f.db.save(&appt).unwrap();
        assert!(f.candidates().is_empty());

        appt.remind_on = Some(today() - Duration::days(1));
        f.db.save(&appt).unwrap();
        assert_eq!(f.candidates().len(), 1);
    }

    #[test]
    fn test_requires_a_reading() {
        let f = fixture();
        f.appointment(3);
        assert!(f.candidates().is_empty());

        let sugar = BloodSugarMeasurement::new(
            f.patient.id,
            Uuid::new_v4(),
            Uuid::new_v4(),
            BloodSugarReadingType::Random,
            140.0,
            now() - Duration::days(2),
            now(),
        );
        f.db.save(&sugar).unwrap();

        let candidates = f.candidates();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].last_blood_pressure_at, None);
        assert_eq!(candidates[0].patient_last_seen(), Some(sugar.recorded_at));
    }

    #[test]
    fn test_last_seen_ignores_deleted_readings() {
        let f = fixture();
        f.appointment(3);
        let t = now() - Duration::days(10);
        f.blood_pressure(t);
        f.blood_pressure(t + Duration::days(1));
        let latest = f.blood_pressure(t + Duration::days(2));
        f.db.soft_delete::<BloodPressureMeasurement>(latest.id, now()).unwrap();

        let candidates = f.candidates();
        assert_eq!(candidates[0].patient_last_seen(), Some(t + Duration::days(1)));
    }

    #[test]
    fn test_other_facility_excluded() {
        let f = fixture();
        f.blood_pressure(now());
        f.appointment(3);
        assert!(f
            .db
            .overdue_candidates(Uuid::new_v4(), today())
            .unwrap()
            .is_empty());
    }
}
