//! Column encoding shared by all tables.
//!
//! Timestamps are written with a fixed width so text order equals time order.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::Row;
use uuid::Uuid;

use crate::models::{SyncStatus, Timestamps};

const DATE_FORMAT: &str = "%Y-%m-%d";

pub(crate) fn ts_text(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn date_text(value: &NaiveDate) -> String {
    value.format(DATE_FORMAT).to_string()
}

pub(crate) fn uuid_value(value: &Uuid) -> Value {
    Value::Text(value.to_string())
}

pub(crate) fn opt_uuid_value(value: &Option<Uuid>) -> Value {
    value.map(|v| v.to_string()).into()
}

pub(crate) fn ts_value(value: &DateTime<Utc>) -> Value {
    Value::Text(ts_text(value))
}

pub(crate) fn opt_ts_value(value: &Option<DateTime<Utc>>) -> Value {
    value.as_ref().map(ts_text).into()
}

pub(crate) fn date_value(value: &NaiveDate) -> Value {
    Value::Text(date_text(value))
}

pub(crate) fn opt_date_value(value: &Option<NaiveDate>) -> Value {
    value.as_ref().map(date_text).into()
}

fn conversion_error(
    idx: usize,
    err: impl Into<Box<dyn std::error::Error + Send + Sync>>,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, err.into())
}

pub(crate) fn uuid_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let text: String = row.get(idx)?;
    Uuid::parse_str(&text).map_err(|e| conversion_error(idx, e))
}

pub(crate) fn opt_uuid_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    let text: Option<String> = row.get(idx)?;
    text.map(|t| Uuid::parse_str(&t).map_err(|e| conversion_error(idx, e)))
        .transpose()
}

pub(crate) fn parse_ts(text: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(text).map(|dt| dt.with_timezone(&Utc))
}

pub(crate) fn ts_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    parse_ts(&text).map_err(|e| conversion_error(idx, e))
}

pub(crate) fn opt_ts_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let text: Option<String> = row.get(idx)?;
    text.map(|t| parse_ts(&t).map_err(|e| conversion_error(idx, e)))
        .transpose()
}

pub(crate) fn date_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<NaiveDate> {
    let text: String = row.get(idx)?;
    NaiveDate::parse_from_str(&text, DATE_FORMAT).map_err(|e| conversion_error(idx, e))
}

pub(crate) fn opt_date_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<NaiveDate>> {
    let text: Option<String> = row.get(idx)?;
    text.map(|t| NaiveDate::parse_from_str(&t, DATE_FORMAT).map_err(|e| conversion_error(idx, e)))
        .transpose()
}

/// Read a text-backed enum through its `parse` function.
pub(crate) fn enum_at<E>(
    row: &Row<'_>,
    idx: usize,
    parse: fn(&str) -> Option<E>,
) -> rusqlite::Result<E> {
    let text: String = row.get(idx)?;
    parse(&text).ok_or_else(|| conversion_error(idx, format!("unknown value: {}", text)))
}

pub(crate) fn opt_enum_at<E>(
    row: &Row<'_>,
    idx: usize,
    parse: fn(&str) -> Option<E>,
) -> rusqlite::Result<Option<E>> {
    let text: Option<String> = row.get(idx)?;
    text.map(|t| parse(&t).ok_or_else(|| conversion_error(idx, format!("unknown value: {}", t))))
        .transpose()
}

/// Values for the trailing bookkeeping columns.
pub(crate) fn meta_values(timestamps: &Timestamps, status: SyncStatus) -> [Value; 4] {
    [
        ts_value(&timestamps.created_at),
        ts_value(&timestamps.updated_at),
        opt_ts_value(&timestamps.deleted_at),
        Value::Text(status.as_str().to_string()),
    ]
}

/// Read the trailing bookkeeping columns starting at `offset`.
pub(crate) fn meta_at(row: &Row<'_>, offset: usize) -> rusqlite::Result<(Timestamps, SyncStatus)> {
    let timestamps = Timestamps {
        created_at: ts_at(row, offset)?,
        updated_at: ts_at(row, offset + 1)?,
        deleted_at: opt_ts_at(row, offset + 2)?,
    };
    let status = enum_at(row, offset + 3, SyncStatus::parse)?;
    Ok((timestamps, status))
}
