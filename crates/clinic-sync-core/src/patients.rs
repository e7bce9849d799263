//! Patient registration, edits and search.
//!
//! Registration takes a caller-owned [`NewPatientEntry`] draft and commits every row it
//! produces in one transaction. The store never holds a half-entered patient.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use strsim::jaro_winkler;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::db::{Database, DbError, DbResult, SyncRecord, Table};
use crate::models::{
    searchable_name, Age, BusinessId, Gender, IdentifierType, Patient, PatientAddress,
    PatientPhoneNumber, PatientStatus, PhoneNumberType,
};
use crate::store::{LiveQuery, Store};

/// Minimum similarity for a fuzzy name match.
const MIN_SEARCH_SCORE: f64 = 0.85;

/// Why a patient entry was refused.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EntryError {
    #[error("full name is empty")]
    EmptyName,

    #[error("either a date of birth or an age is required")]
    MissingDateOfBirthAndAge,

    #[error("date of birth and age cannot both be given")]
    BothDateOfBirthAndAge,

    #[error("age must be positive, got {0}")]
    NonPositiveAge(i32),

    #[error("phone number is blank")]
    BlankPhoneNumber,

    #[error("{0} is empty")]
    MissingAddressField(&'static str),
}

impl From<EntryError> for DbError {
    fn from(e: EntryError) -> Self {
        DbError::Validation(e.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewBusinessId {
    pub identifier: String,
    pub identifier_type: IdentifierType,
}

/// Everything a caregiver enters on the registration form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPatientEntry {
    pub full_name: String,
    pub gender: Gender,
    pub date_of_birth: Option<NaiveDate>,
    pub age: Option<i32>,
    pub phone_number: Option<String>,
    pub phone_type: PhoneNumberType,
    pub street_address: Option<String>,
    pub colony_or_village: Option<String>,
    pub district: String,
    pub state: String,
    pub country: Option<String>,
    pub business_id: Option<NewBusinessId>,
    pub registered_facility_id: Option<Uuid>,
}

impl NewPatientEntry {
    pub fn validate(&self) -> Result<(), EntryError> {
        if self.full_name.trim().is_empty() {
            return Err(EntryError::EmptyName);
        }
        match (self.date_of_birth, self.age) {
            (None, None) => return Err(EntryError::MissingDateOfBirthAndAge),
            (Some(_), Some(_)) => return Err(EntryError::BothDateOfBirthAndAge),
            (None, Some(age)) if age <= 0 => return Err(EntryError::NonPositiveAge(age)),
            _ => {}
        }
        if matches!(&self.phone_number, Some(number) if number.trim().is_empty()) {
            return Err(EntryError::BlankPhoneNumber);
        }
        if self.district.trim().is_empty() {
            return Err(EntryError::MissingAddressField("district"));
        }
        if self.state.trim().is_empty() {
            return Err(EntryError::MissingAddressField("state"));
        }
        Ok(())
    }

    /// Build the rows this entry registers, all stamped `now` and `Pending`.
    fn into_records(self, now: DateTime<Utc>) -> RegisteredPatient {
        let mut address = PatientAddress::new(self.district, self.state, now);
        address.street_address = self.street_address;
        address.colony_or_village = self.colony_or_village;
        address.country = self.country;

        let full_name = self.full_name.trim().to_string();
        let mut patient = Patient::new(full_name, self.gender, address.id, now);
        patient.date_of_birth = self.date_of_birth;
        patient.age = self.age.map(|value| Age {
            value,
            updated_at: now,
        });
        patient.registered_facility_id = self.registered_facility_id;

        let phone_number = self.phone_number.map(|number| {
            let mut phone = PatientPhoneNumber::new(patient.id, number.trim().to_string(), now);
            phone.phone_type = self.phone_type;
            phone
        });
        let business_id = self
            .business_id
            .map(|b| BusinessId::new(patient.id, b.identifier, b.identifier_type, now));

        RegisteredPatient {
            patient,
            address,
            phone_number,
            business_id,
        }
    }
}

/// Rows written by one registration.
#[derive(Debug, Clone, PartialEq)]
pub struct RegisteredPatient {
    pub patient: Patient,
    pub address: PatientAddress,
    pub phone_number: Option<PatientPhoneNumber>,
    pub business_id: Option<BusinessId>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientSearchResult {
    pub patient: Patient,
    /// 1.0 for a substring match, otherwise the best Jaro-Winkler similarity.
    pub score: f64,
}

/// Similarity of a normalized query to a patient's name.
fn name_score(query: &str, patient: &Patient) -> f64 {
    if patient.searchable_name.contains(query) {
        return 1.0;
    }
    let whole = jaro_winkler(query, &patient.searchable_name);
    patient
        .full_name
        .split_whitespace()
        .map(|word| jaro_winkler(query, &searchable_name(word)))
        .fold(whole, f64::max)
}

/// Non-deleted patients whose name resembles `query`, best match first.
pub fn search_patients(
    db: &Database,
    query: &str,
    limit: usize,
) -> DbResult<Vec<PatientSearchResult>> {
    let query = searchable_name(query);
    if query.is_empty() {
        return Ok(Vec::new());
    }

    let mut results: Vec<PatientSearchResult> = db
        .list_patients()?
        .into_iter()
        .map(|patient| PatientSearchResult {
            score: name_score(&query, &patient),
            patient,
        })
        .filter(|r| r.score >= MIN_SEARCH_SCORE)
        .collect();

    results.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.patient.full_name.cmp(&b.patient.full_name))
    });
    results.truncate(limit);
    Ok(results)
}

impl Store {
    /// Validate and commit a new patient with their address, phone number and business id.
    pub fn register_patient(&self, entry: NewPatientEntry) -> DbResult<RegisteredPatient> {
        entry.validate()?;
        let registered = entry.into_records(self.now());

        self.write(
            &[
                Table::PatientAddress,
                Table::Patient,
                Table::PatientPhoneNumber,
                Table::BusinessId,
            ],
            |db| {
                db.save(&registered.address)?;
                db.save(&registered.patient)?;
                if let Some(phone) = &registered.phone_number {
                    db.save(phone)?;
                }
                if let Some(business_id) = &registered.business_id {
                    db.save(business_id)?;
                }
                Ok(())
            },
        )?;

        info!(patient = %registered.patient.id, "registered patient");
        Ok(registered)
    }

    pub fn update_patient_status(
        &self,
        patient_id: Uuid,
        status: PatientStatus,
    ) -> DbResult<Patient> {
        let now = self.now();
        self.write(&[Table::Patient], |db| {
            let mut patient: Patient = db.require(patient_id)?;
            patient.status = status;
            patient.stamp_local_edit(now);
            db.save(&patient)?;
            Ok(patient)
        })
    }

    /// Add a phone number to an existing patient.
    pub fn add_phone_number(
        &self,
        patient_id: Uuid,
        number: &str,
        phone_type: PhoneNumberType,
    ) -> DbResult<PatientPhoneNumber> {
        if number.trim().is_empty() {
            return Err(EntryError::BlankPhoneNumber.into());
        }
        let mut phone = PatientPhoneNumber::new(patient_id, number.trim().to_string(), self.now());
        phone.phone_type = phone_type;
        self.write(&[Table::PatientPhoneNumber], |db| {
            db.require::<Patient>(patient_id)?;
            db.save(&phone)
        })?;
        Ok(phone)
    }

    pub fn search_patients(&self, query: &str, limit: usize) -> DbResult<Vec<PatientSearchResult>> {
        self.read(|db| search_patients(db, query, limit))
    }

    /// Live [`search_patients`](Self::search_patients).
    pub fn observe_patient_search(
        &self,
        query: String,
        limit: usize,
    ) -> DbResult<LiveQuery<Vec<PatientSearchResult>>> {
        self.observe(&[Table::Patient], move |db| search_patients(db, &query, limit))
    }

    pub fn find_patient_by_business_id(
        &self,
        identifier: &str,
        identifier_type: IdentifierType,
    ) -> DbResult<Option<Patient>> {
        self.read(|db| db.find_patient_by_business_id(identifier, identifier_type))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TestClock;
    use crate::models::SyncStatus;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn store() -> Store {
        let clock = Arc::new(TestClock::new(
            Utc.with_ymd_and_hms(2018, 1, 5, 10, 0, 0).unwrap(),
        ));
        Store::new(Database::open_in_memory().unwrap(), clock)
    }

    fn entry(name: &str) -> NewPatientEntry {
        NewPatientEntry {
            full_name: name.into(),
            gender: Gender::Female,
            date_of_birth: None,
            age: Some(45),
            phone_number: Some("9999900001".into()),
            phone_type: PhoneNumberType::Mobile,
            street_address: None,
            colony_or_village: Some("Ward 4".into()),
            district: "Bathinda".into(),
            state: "Punjab".into(),
            country: Some("India".into()),
            business_id: None,
            registered_facility_id: None,
        }
    }

    #[test]
    fn test_validation_rules() {
        let mut e = entry(" ");
        assert_eq!(e.validate(), Err(EntryError::EmptyName));

        e = entry("Asha");
        e.age = None;
        assert_eq!(e.validate(), Err(EntryError::MissingDateOfBirthAndAge));

        e.date_of_birth = NaiveDate::from_ymd_opt(1970, 1, 1);
        e.age = Some(48);
        assert_eq!(e.validate(), Err(EntryError::BothDateOfBirthAndAge));

        e = entry("Asha");
        e.age = Some(0);
        assert_eq!(e.validate(), Err(EntryError::NonPositiveAge(0)));

        e = entry("Asha");
        e.phone_number = Some("  ".into());
        assert_eq!(e.validate(), Err(EntryError::BlankPhoneNumber));

        e = entry("Asha");
        e.phone_number = None;
        assert_eq!(e.validate(), Ok(()));
    }

    #[test]
    fn test_invalid_entry_writes_nothing() {
        let store = store();
        let mut e = entry("Asha");
        e.age = None;

        let result = store.register_patient(e);
        assert!(matches!(result, Err(DbError::Validation(_))));
        assert!(store.read(|db| db.list_patients()).unwrap().is_empty());
        assert!(store
            .pending_counts()
            .unwrap()
            .iter()
            .all(|c| c.pending == 0));
    }

    #[test]
    fn test_register_patient_writes_all_rows_pending() {
        let store = store();
        let mut e = entry("Asha Kumari");
        e.business_id = Some(NewBusinessId {
            identifier: "bp-123".into(),
            identifier_type: IdentifierType::BpPassport,
        });

        let registered = store.register_patient(e).unwrap();
        let patient: Patient = store.get(registered.patient.id).unwrap().unwrap();
        assert_eq!(patient.searchable_name, "ashakumari");
        assert_eq!(patient.age.as_ref().map(|a| a.value), Some(45));
        assert_eq!(patient.address_id, registered.address.id);
        assert_eq!(patient.sync_status, SyncStatus::Pending);

        let phones = store
            .read(|db| db.phone_numbers_for_patient(patient.id))
            .unwrap();
        assert_eq!(phones.len(), 1);

        let found = store
            .find_patient_by_business_id("bp-123", IdentifierType::BpPassport)
            .unwrap();
        assert_eq!(found.map(|p| p.id), Some(patient.id));
    }

    #[test]
    fn test_search_ranks_fuzzy_matches() {
        let store = store();
        store.register_patient(entry("Anish Acharya")).unwrap();
        store.register_patient(entry("Anisha Sharma")).unwrap();
        store.register_patient(entry("Ramesh Kumar")).unwrap();

        let results = store.search_patients("anish", 10).unwrap();
        let names: Vec<&str> = results.iter().map(|r| r.patient.full_name.as_str()).collect();
        assert_eq!(names, vec!["Anish Acharya", "Anisha Sharma"]);

        let typo = store.search_patients("Ramsh", 10).unwrap();
        assert_eq!(typo.len(), 1);
        assert_eq!(typo[0].patient.full_name, "Ramesh Kumar");

        assert!(store.search_patients("  ", 10).unwrap().is_empty());
    }

    #[test]
    fn test_live_search_sees_new_registrations() {
        let store = store();
        let mut live = store.observe_patient_search("asha".into(), 10).unwrap();
        assert_eq!(live.latest().map(|r| r.len()), Some(0));

        store.register_patient(entry("Asha")).unwrap();
        assert_eq!(live.latest().map(|r| r.len()), Some(1));
    }

    #[test]
    fn test_update_status_and_add_phone() {
        let store = store();
        let registered = store.register_patient(entry("Asha")).unwrap();

        let updated = store
            .update_patient_status(registered.patient.id, PatientStatus::Dead)
            .unwrap();
        assert_eq!(updated.status, PatientStatus::Dead);

        store
            .add_phone_number(registered.patient.id, "8888800001", PhoneNumberType::Landline)
            .unwrap();
        assert!(matches!(
            store.add_phone_number(Uuid::new_v4(), "8888800002", PhoneNumberType::Mobile),
            Err(DbError::NotFound(_))
        ));
        assert!(matches!(
            store.add_phone_number(registered.patient.id, " ", PhoneNumberType::Mobile),
            Err(DbError::Validation(_))
        ));
    }
}
