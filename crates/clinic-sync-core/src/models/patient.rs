//! Patient models.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{SyncStatus, Timestamps};

text_enum! {
    pub enum Gender {
        Male => "male",
        Female => "female",
        Transgender => "transgender",
        Unknown => "unknown",
    }
}

text_enum! {
    pub enum PatientStatus {
        Active => "active",
        Dead => "dead",
        Migrated => "migrated",
        Inactive => "inactive",
        Unresponsive => "unresponsive",
    }
}

text_enum! {
    pub enum PhoneNumberType {
        Mobile => "mobile",
        Landline => "landline",
    }
}

text_enum! {
    /// Kind of external identifier attached to a patient.
    pub enum IdentifierType {
        NationalHealthId => "national_health_id",
        Passport => "passport",
        BpPassport => "bp_passport",
        Other => "other",
    }
}

/// An estimated age, recorded when the date of birth is not known.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Age {
    pub value: i32,
    /// When the estimate was taken; the age grows from here.
    pub updated_at: DateTime<Utc>,
}

/// A registered patient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Patient {
    pub id: Uuid,
    pub address_id: Uuid,
    pub full_name: String,
    /// Lowercased alphanumeric form of `full_name`, used for search.
    pub searchable_name: String,
    pub gender: Gender,
    pub date_of_birth: Option<NaiveDate>,
    pub age: Option<Age>,
    pub status: PatientStatus,
    pub registered_facility_id: Option<Uuid>,
    #[serde(flatten)]
    pub timestamps: Timestamps,
    #[serde(skip)]
    pub sync_status: SyncStatus,
}

impl Patient {
    /// Create a new active patient. Exactly one of `date_of_birth`/`age` should be set by the caller.
    pub fn new(full_name: String, gender: Gender, address_id: Uuid, now: DateTime<Utc>) -> Self {
        let searchable_name = searchable_name(&full_name);
        Self {
            id: Uuid::new_v4(),
            address_id,
            full_name,
            searchable_name,
            gender,
            date_of_birth: None,
            age: None,
            status: PatientStatus::Active,
            registered_facility_id: None,
            timestamps: Timestamps::new(now),
            sync_status: SyncStatus::Pending,
        }
    }

    /// Age in whole years on `today`, from the date of birth or the aged-forward estimate.
    pub fn current_age(&self, today: NaiveDate) -> Option<i32> {
        age_on(self.date_of_birth, self.age.as_ref(), today)
    }

    pub fn is_deleted(&self) -> bool {
        self.timestamps.is_deleted()
    }
}

/// Age in whole years on `today`. The date of birth wins over an estimate.
pub fn age_on(date_of_birth: Option<NaiveDate>, age: Option<&Age>, today: NaiveDate) -> Option<i32> {
    if let Some(dob) = date_of_birth {
        return Some(years_between(dob, today));
    }
    age.map(|age| {
        let recorded_on = age.updated_at.date_naive();
        age.value + years_between(recorded_on, today).max(0)
    })
}

/// Normalize a name for searching: lowercase, letters and digits only.
pub fn searchable_name(full_name: &str) -> String {
    full_name
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

fn years_between(from: NaiveDate, to: NaiveDate) -> i32 {
    let mut years = to.year() - from.year();
    if (to.month(), to.day()) < (from.month(), from.day()) {
        years -= 1;
    }
    years
}

/// A patient's address. Owned by exactly one patient via `Patient::address_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientAddress {
    pub id: Uuid,
    pub street_address: Option<String>,
    pub colony_or_village: Option<String>,
    pub district: String,
    pub state: String,
    pub country: Option<String>,
    #[serde(flatten)]
    pub timestamps: Timestamps,
    #[serde(skip)]
    pub sync_status: SyncStatus,
}

impl PatientAddress {
    pub fn new(district: String, state: String, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            street_address: None,
            colony_or_village: None,
            district,
            state,
            country: None,
            timestamps: Timestamps::new(now),
            sync_status: SyncStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientPhoneNumber {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub number: String,
    pub phone_type: PhoneNumberType,
    pub active: bool,
    #[serde(flatten)]
    pub timestamps: Timestamps,
    #[serde(skip)]
    pub sync_status: SyncStatus,
}

impl PatientPhoneNumber {
    pub fn new(patient_id: Uuid, number: String, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            patient_id,
            number,
            phone_type: PhoneNumberType::Mobile,
            active: true,
            timestamps: Timestamps::new(now),
            sync_status: SyncStatus::Pending,
        }
    }
}

/// External identifier such as a national health id or passport code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusinessId {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub identifier: String,
    pub identifier_type: IdentifierType,
    #[serde(flatten)]
    pub timestamps: Timestamps,
    #[serde(skip)]
    pub sync_status: SyncStatus,
}

impl BusinessId {
    pub fn new(
        patient_id: Uuid,
        identifier: String,
        identifier_type: IdentifierType,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            patient_id,
            identifier,
            identifier_type,
            timestamps: Timestamps::new(now),
            sync_status: SyncStatus::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2018, 1, 5, 10, 0, 0).unwrap()
    }

    #[test]
    fn test_new_patient() {
        let patient = Patient::new("Anish Acharya".into(), Gender::Male, Uuid::new_v4(), now());
        assert_eq!(patient.searchable_name, "anishacharya");
        assert_eq!(patient.status, PatientStatus::Active);
        assert_eq!(patient.sync_status, SyncStatus::Pending);
        assert!(!patient.is_deleted());
    }

    #[test]
    fn test_current_age_from_date_of_birth() {
        let mut patient = Patient::new("Asha".into(), Gender::Female, Uuid::new_v4(), now());
        patient.date_of_birth = NaiveDate::from_ymd_opt(1980, 6, 15);

        let before_birthday = NaiveDate::from_ymd_opt(2018, 6, 14).unwrap();
        let on_birthday = NaiveDate::from_ymd_opt(2018, 6, 15).unwrap();
        assert_eq!(patient.current_age(before_birthday), Some(37));
        assert_eq!(patient.current_age(on_birthday), Some(38));
    }

    #[test]
    fn test_current_age_ages_the_estimate_forward() {
        let mut patient = Patient::new("Asha".into(), Gender::Female, Uuid::new_v4(), now());
        patient.age = Some(Age {
            value: 40,
            updated_at: now(),
        });

        let two_years_later = NaiveDate::from_ymd_opt(2020, 1, 5).unwrap();
        assert_eq!(patient.current_age(two_years_later), Some(42));
    }

    #[test]
    fn test_sync_status_is_not_serialized() {
        let address = PatientAddress::new("Bathinda".into(), "Punjab".into(), now());
        let json = serde_json::to_value(&address).unwrap();
        assert!(json.get("syncStatus").is_none());
        assert!(json.get("createdAt").is_some());
        assert_eq!(json["district"], "Bathinda");
    }
}
