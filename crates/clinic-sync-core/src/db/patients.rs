//! Patient, address, phone number and business id tables.

use rusqlite::types::Value;
use rusqlite::{params, Row};
use uuid::Uuid;

use super::codec::*;
use super::records::record_accessors;
use super::{Database, DbResult, SyncRecord, Table};
use crate::models::{
    Age, BusinessId, Gender, IdentifierType, Patient, PatientAddress, PatientPhoneNumber,
    PatientStatus, PhoneNumberType,
};
use crate::patients::EntryError;

impl SyncRecord for Patient {
    const TABLE: Table = Table::Patient;
    const COLUMNS: &'static [&'static str] = &[
        "address_id",
        "full_name",
        "searchable_name",
        "gender",
        "date_of_birth",
        "age_value",
        "age_updated_at",
        "status",
        "registered_facility_id",
    ];

    record_accessors!();

    /// Exactly one of date of birth and age.
    fn validate(&self) -> DbResult<()> {
        match (&self.date_of_birth, &self.age) {
            (None, None) => Err(EntryError::MissingDateOfBirthAndAge.into()),
            (Some(_), Some(_)) => Err(EntryError::BothDateOfBirthAndAge.into()),
            (None, Some(age)) if age.value <= 0 => {
                Err(EntryError::NonPositiveAge(age.value).into())
            }
            _ => Ok(()),
        }
    }

    fn column_values(&self) -> Vec<Value> {
        vec![
            uuid_value(&self.address_id),
            Value::Text(self.full_name.clone()),
            Value::Text(self.searchable_name.clone()),
            Value::Text(self.gender.as_str().into()),
            opt_date_value(&self.date_of_birth),
            self.age.as_ref().map(|age| age.value).into(),
            self.age.as_ref().map(|age| ts_text(&age.updated_at)).into(),
            Value::Text(self.status.as_str().into()),
            opt_uuid_value(&self.registered_facility_id),
        ]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let age_value: Option<i32> = row.get(6)?;
        let age_updated_at = opt_ts_at(row, 7)?;
        let age = match (age_value, age_updated_at) {
            (Some(value), Some(updated_at)) => Some(Age { value, updated_at }),
            _ => None,
        };
        let (timestamps, sync_status) = meta_at(row, Self::meta_offset())?;
        Ok(Patient {
            id: uuid_at(row, 0)?,
            address_id: uuid_at(row, 1)?,
            full_name: row.get(2)?,
            searchable_name: row.get(3)?,
            gender: enum_at(row, 4, Gender::parse)?,
            date_of_birth: opt_date_at(row, 5)?,
            age,
            status: enum_at(row, 8, PatientStatus::parse)?,
            registered_facility_id: opt_uuid_at(row, 9)?,
            timestamps,
            sync_status,
        })
    }
}

impl SyncRecord for PatientAddress {
    const TABLE: Table = Table::PatientAddress;
    const COLUMNS: &'static [&'static str] = &[
        "street_address",
        "colony_or_village",
        "district",
        "state",
        "country",
    ];

    record_accessors!();

    fn column_values(&self) -> Vec<Value> {
        vec![
            self.street_address.clone().into(),
            self.colony_or_village.clone().into(),
            Value::Text(self.district.clone()),
            Value::Text(self.state.clone()),
            self.country.clone().into(),
        ]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let (timestamps, sync_status) = meta_at(row, Self::meta_offset())?;
        Ok(PatientAddress {
            id: uuid_at(row, 0)?,
            street_address: row.get(1)?,
            colony_or_village: row.get(2)?,
            district: row.get(3)?,
            state: row.get(4)?,
            country: row.get(5)?,
            timestamps,
            sync_status,
        })
    }
}

impl SyncRecord for PatientPhoneNumber {
    const TABLE: Table = Table::PatientPhoneNumber;
    const COLUMNS: &'static [&'static str] = &["patient_id", "number", "phone_type", "active"];

    record_accessors!();

    fn column_values(&self) -> Vec<Value> {
        vec![
            uuid_value(&self.patient_id),
            Value::Text(self.number.clone()),
            Value::Text(self.phone_type.as_str().into()),
            self.active.into(),
        ]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let (timestamps, sync_status) = meta_at(row, Self::meta_offset())?;
        Ok(PatientPhoneNumber {
            id: uuid_at(row, 0)?,
            patient_id: uuid_at(row, 1)?,
            number: row.get(2)?,
            phone_type: enum_at(row, 3, PhoneNumberType::parse)?,
            active: row.get(4)?,
            timestamps,
            sync_status,
        })
    }
}

impl SyncRecord for BusinessId {
    const TABLE: Table = Table::BusinessId;
    const COLUMNS: &'static [&'static str] = &["patient_id", "identifier", "identifier_type"];

    record_accessors!();

    fn column_values(&self) -> Vec<Value> {
        vec![
            uuid_value(&self.patient_id),
            Value::Text(self.identifier.clone()),
            Value::Text(self.identifier_type.as_str().into()),
        ]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let (timestamps, sync_status) = meta_at(row, Self::meta_offset())?;
        Ok(BusinessId {
            id: uuid_at(row, 0)?,
            patient_id: uuid_at(row, 1)?,
            identifier: row.get(2)?,
            identifier_type: enum_at(row, 3, IdentifierType::parse)?,
            timestamps,
            sync_status,
        })
    }
}

impl Database {
    /// All non-deleted patients, ordered by name.
    pub fn list_patients(&self) -> DbResult<Vec<Patient>> {
        self.select(
            None,
            "WHERE deleted_at IS NULL ORDER BY full_name",
            params![],
        )
    }

    /// Non-deleted phone numbers of a patient, newest first.
    pub fn phone_numbers_for_patient(&self, patient_id: Uuid) -> DbResult<Vec<PatientPhoneNumber>> {
        self.select(
            None,
            "WHERE patient_id = ? AND deleted_at IS NULL ORDER BY created_at DESC",
            [patient_id.to_string()],
        )
    }

    pub fn latest_phone_number(&self, patient_id: Uuid) -> DbResult<Option<PatientPhoneNumber>> {
        Ok(self.phone_numbers_for_patient(patient_id)?.into_iter().next())
    }

    pub fn business_ids_for_patient(&self, patient_id: Uuid) -> DbResult<Vec<BusinessId>> {
        self.select(
            None,
            "WHERE patient_id = ? AND deleted_at IS NULL ORDER BY created_at",
            [patient_id.to_string()],
        )
    }

    /// Find the non-deleted patient carrying an identifier.
    pub fn find_patient_by_business_id(
        &self,
        identifier: &str,
        identifier_type: IdentifierType,
    ) -> DbResult<Option<Patient>> {
        let patients: Vec<Patient> = self.select(
            Some("P"),
            r#"
            INNER JOIN business_id B ON B.patient_id = P.id
            WHERE B.identifier = ?1 AND B.identifier_type = ?2
              AND B.deleted_at IS NULL AND P.deleted_at IS NULL
            ORDER BY B.created_at DESC
            LIMIT 1
            "#,
            params![identifier, identifier_type.as_str()],
        )?;
        Ok(patients.into_iter().next())
    }
}
