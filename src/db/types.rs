//! Conversion of native driver rows into backend-neutral [`Record`]s.
//!
//! # Architecture
//!
//! Type conversion uses a two-phase approach:
//! 1. `TypeCategory` classifies PostgreSQL column types into logical categories
//! 2. Backend-specific decoders handle the actual value extraction
//!
//! The pooled adapter yields `PgRow`s, the generic adapter `AnyRow`s; both
//! end up as JSON values so [`Record`] can decode them through serde.
//!
//! A value that cannot be decoded is a [`DbError::Decode`], never a NULL.
//! SQL NULL is detected from the raw value before any decoder runs.

use crate::error::{DbError, DbResult};
use crate::models::Record;
use serde_json::Value as JsonValue;
use sqlx::any::AnyRow;
use sqlx::error::BoxDynError;
use sqlx::postgres::{PgRow, PgTypeInfo, PgValueFormat, PgValueRef};
use sqlx::{Column, Decode, Row, Type, TypeInfo, ValueRef};
use std::net::{Ipv4Addr, Ipv6Addr};

// =============================================================================
// Type Classification
// =============================================================================

/// Logical category for database column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Text,
    Binary,
    Json,
    Uuid,
    Timestamp,
    TimestampTz,
    Date,
    Time,
    TimeTz,
    Interval,
    Money,
    Inet,
    Array,
    Unknown,
}

/// Classify a database type name into a logical category.
pub fn categorize_type(type_name: &str) -> TypeCategory {
    let lower = type_name.to_lowercase();

    if lower.ends_with("[]") {
        return TypeCategory::Array;
    }

    // Decimal/Numeric - check first as it overlaps with "numeric" in float checks
    if lower.contains("decimal") || lower.contains("numeric") {
        return TypeCategory::Decimal;
    }

    // Named types before integers: "interval" and "point" would otherwise match "int"
    match lower.as_str() {
        "timestamptz" | "timestamp with time zone" => return TypeCategory::TimestampTz,
        "timestamp" | "timestamp without time zone" => return TypeCategory::Timestamp,
        "date" => return TypeCategory::Date,
        "time" | "time without time zone" => return TypeCategory::Time,
        "timetz" | "time with time zone" => return TypeCategory::TimeTz,
        "interval" => return TypeCategory::Interval,
        "money" => return TypeCategory::Money,
        "inet" | "cidr" => return TypeCategory::Inet,
        "point" => return TypeCategory::Unknown,
        _ => {}
    }

    if lower == "bool" || lower == "boolean" {
        return TypeCategory::Boolean;
    }

    // Integer types
    if lower.starts_with("int")
        || lower.ends_with("int")
        || lower.contains("serial")
        || lower == "oid"
    {
        return TypeCategory::Integer;
    }

    // Float types
    if lower.contains("float") || lower.contains("double") || lower == "real" {
        return TypeCategory::Float;
    }

    if lower == "json" || lower == "jsonb" {
        return TypeCategory::Json;
    }

    if lower == "uuid" {
        return TypeCategory::Uuid;
    }

    if lower.contains("blob") || lower.contains("binary") || lower == "bytea" {
        return TypeCategory::Binary;
    }

    if lower.contains("char") || lower == "text" || lower == "name" {
        return TypeCategory::Text;
    }

    TypeCategory::Unknown
}

// =============================================================================
// Decimal Type Support
// =============================================================================

/// NUMERIC value rendered as its exact decimal string.
#[derive(Debug, PartialEq)]
pub struct RawDecimal(pub String);

impl Type<sqlx::Postgres> for RawDecimal {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_name("NUMERIC")
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("numeric") || name.contains("decimal")
    }
}

impl<'r> Decode<'r, sqlx::Postgres> for RawDecimal {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        match value.format() {
            PgValueFormat::Text => Ok(RawDecimal(value.as_str()?.to_string())),
            PgValueFormat::Binary => Ok(RawDecimal(numeric_to_string(value.as_bytes()?)?)),
        }
    }
}

const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;

/// Render PostgreSQL's binary NUMERIC (base-10000 digit groups) as text.
fn numeric_to_string(buf: &[u8]) -> Result<String, BoxDynError> {
    let read_u16 = |at: usize| -> Result<u16, BoxDynError> {
        buf.get(at..at + 2)
            .map(|b| u16::from_be_bytes([b[0], b[1]]))
            .ok_or_else(|| "truncated NUMERIC value".into())
    };

    let ndigits = read_u16(0)? as usize;
    let weight = read_u16(2)? as i16 as i32;
    let sign = read_u16(4)?;
    let dscale = read_u16(6)? as usize;

    if sign == NUMERIC_NAN {
        return Ok("NaN".to_string());
    }

    let digits = (0..ndigits)
        .map(|i| read_u16(8 + i * 2))
        .collect::<Result<Vec<_>, _>>()?;

    let mut out = String::new();
    if sign == NUMERIC_NEG {
        out.push('-');
    }

    // Integer part: groups 0..=weight
    if weight < 0 {
        out.push('0');
    } else {
        for group in 0..=weight {
            let d = digits.get(group as usize).copied().unwrap_or(0);
            if group == 0 {
                out.push_str(&d.to_string());
            } else {
                out.push_str(&format!("{:04}", d));
            }
        }
    }

    if dscale > 0 {
        let mut frac = String::new();
        let mut group = weight + 1;
        while frac.len() < dscale {
            let d = if group < 0 {
                0
            } else {
                digits.get(group as usize).copied().unwrap_or(0)
            };
            frac.push_str(&format!("{:04}", d));
            group += 1;
        }
        frac.truncate(dscale);
        out.push('.');
        out.push_str(&frac);
    }

    Ok(out)
}

// =============================================================================
// Network Address Support
// =============================================================================

/// INET or CIDR value rendered the way PostgreSQL prints it.
#[derive(Debug, PartialEq)]
pub struct RawInet(pub String);

impl Type<sqlx::Postgres> for RawInet {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_name("INET")
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        matches!(ty.name(), "INET" | "CIDR")
    }
}

impl<'r> Decode<'r, sqlx::Postgres> for RawInet {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        match value.format() {
            PgValueFormat::Text => Ok(RawInet(value.as_str()?.to_string())),
            PgValueFormat::Binary => Ok(RawInet(inet_to_string(value.as_bytes()?)?)),
        }
    }
}

const PGSQL_AF_INET: u8 = 2;
const PGSQL_AF_INET6: u8 = 3;

/// Render the binary INET layout: family, bits, is_cidr, length, address.
fn inet_to_string(buf: &[u8]) -> Result<String, BoxDynError> {
    let [family, bits, is_cidr, len, addr @ ..] = buf else {
        return Err("truncated INET value".into());
    };
    if *len as usize != addr.len() {
        return Err(format!("INET address length {} does not match {}", len, addr.len()).into());
    }

    let (host, full) = match (*family, addr.len()) {
        (PGSQL_AF_INET, 4) => {
            let octets: [u8; 4] = addr.try_into()?;
            (Ipv4Addr::from(octets).to_string(), 32)
        }
        (PGSQL_AF_INET6, 16) => {
            let octets: [u8; 16] = addr.try_into()?;
            (Ipv6Addr::from(octets).to_string(), 128)
        }
        _ => return Err(format!("unexpected INET address family {}", family).into()),
    };

    // Host addresses print without a prefix length
    if *is_cidr != 0 || *bits != full {
        Ok(format!("{}/{}", host, bits))
    } else {
        Ok(host)
    }
}

// =============================================================================
// Text Rendering
// =============================================================================

/// Binary column values are carried as base64 text.
pub fn encode_binary_value(bytes: &[u8]) -> JsonValue {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    JsonValue::String(STANDARD.encode(bytes))
}

fn float_value(v: f64) -> JsonValue {
    serde_json::Number::from_f64(v)
        .map(JsonValue::Number)
        .unwrap_or_else(|| JsonValue::String(v.to_string()))
}

/// Interval in PostgreSQL's default output style, e.g. `1 year 2 mons 3 days 04:05:06`.
fn interval_to_string(months: i32, days: i32, microseconds: i64) -> String {
    let mut parts = Vec::new();
    push_unit(&mut parts, months / 12, "year");
    push_unit(&mut parts, months % 12, "mon");
    push_unit(&mut parts, days, "day");

    if microseconds != 0 || parts.is_empty() {
        let sign = if microseconds < 0 { "-" } else { "" };
        let total = microseconds.unsigned_abs();
        let (secs, frac) = (total / 1_000_000, total % 1_000_000);
        let mut time = format!(
            "{}{:02}:{:02}:{:02}",
            sign,
            secs / 3600,
            (secs / 60) % 60,
            secs % 60
        );
        if frac != 0 {
            let digits = format!("{:06}", frac);
            time.push('.');
            time.push_str(digits.trim_end_matches('0'));
        }
        parts.push(time);
    }

    parts.join(" ")
}

fn push_unit(parts: &mut Vec<String>, value: i32, unit: &str) {
    if value != 0 {
        let plural = if value == 1 { "" } else { "s" };
        parts.push(format!("{} {}{}", value, unit, plural));
    }
}

/// UTC offset suffix as PostgreSQL prints it: `+02`, `-03:30`.
fn utc_offset(seconds: i32) -> String {
    let sign = if seconds < 0 { '-' } else { '+' };
    let abs = seconds.unsigned_abs();
    let (h, m, s) = (abs / 3600, (abs / 60) % 60, abs % 60);
    match (m, s) {
        (0, 0) => format!("{}{:02}", sign, h),
        (_, 0) => format!("{}{:02}:{:02}", sign, h, m),
        _ => format!("{}{:02}:{:02}:{:02}", sign, h, m, s),
    }
}

/// MONEY is stored in cents.
fn money_to_string(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{}{}.{:02}", sign, abs / 100, abs % 100)
}

// =============================================================================
// Row to Record Trait
// =============================================================================

/// Trait for converting native rows to records.
pub trait RowToRecord {
    fn to_record(&self) -> DbResult<Record>;
}

impl RowToRecord for PgRow {
    fn to_record(&self) -> DbResult<Record> {
        let columns = self.columns().iter().map(|c| c.name().to_string()).collect();
        let values = (0..self.len())
            .map(|idx| postgres::decode_column(self, idx))
            .collect::<DbResult<Vec<_>>>()?;
        Ok(Record::new(columns, values))
    }
}

impl RowToRecord for AnyRow {
    fn to_record(&self) -> DbResult<Record> {
        let columns = self.columns().iter().map(|c| c.name().to_string()).collect();
        let values = (0..self.len())
            .map(|idx| any::decode_column(self, idx))
            .collect::<DbResult<Vec<_>>>()?;
        Ok(Record::new(columns, values))
    }
}

fn unsupported(backend: &str, type_name: &str, column: &str) -> DbError {
    DbError::decode(format!(
        "Unsupported {} type {} in column \"{}\"",
        backend, type_name, column
    ))
}

// =============================================================================
// Backend-Specific Decoders
// =============================================================================

/// Decoders are chosen from the column's type and read the exact Rust type
/// sqlx maps it to.
mod postgres {
    use super::*;
    use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};
    use sqlx::postgres::types::{Oid, PgInterval, PgMoney, PgTimeTz};

    pub fn decode_column(row: &PgRow, idx: usize) -> DbResult<JsonValue> {
        let raw = row.try_get_raw(idx)?;
        if raw.is_null() {
            return Ok(JsonValue::Null);
        }
        let type_info = raw.type_info();
        let name = type_info.name();

        let value = match categorize_type(name) {
            TypeCategory::Integer => decode_integer(row, idx, name)?,
            TypeCategory::Float => match name {
                "FLOAT4" => float_value(row.try_get::<f32, _>(idx)? as f64),
                _ => float_value(row.try_get::<f64, _>(idx)?),
            },
            TypeCategory::Decimal => JsonValue::String(row.try_get::<RawDecimal, _>(idx)?.0),
            TypeCategory::Boolean => JsonValue::Bool(row.try_get(idx)?),
            TypeCategory::Text => JsonValue::String(row.try_get(idx)?),
            TypeCategory::Binary => encode_binary_value(&row.try_get::<Vec<u8>, _>(idx)?),
            TypeCategory::Json => row.try_get::<JsonValue, _>(idx)?,
            TypeCategory::Uuid => display(row.try_get::<sqlx::types::Uuid, _>(idx)?),
            TypeCategory::Timestamp => display(row.try_get::<NaiveDateTime, _>(idx)?),
            TypeCategory::TimestampTz => {
                JsonValue::String(row.try_get::<DateTime<Utc>, _>(idx)?.to_rfc3339())
            }
            TypeCategory::Date => display(row.try_get::<NaiveDate, _>(idx)?),
            TypeCategory::Time => display(row.try_get::<NaiveTime, _>(idx)?),
            TypeCategory::TimeTz => {
                let v = row.try_get::<PgTimeTz<NaiveTime, FixedOffset>, _>(idx)?;
                JsonValue::String(format!(
                    "{}{}",
                    v.time,
                    utc_offset(v.offset.local_minus_utc())
                ))
            }
            TypeCategory::Interval => {
                let v = row.try_get::<PgInterval, _>(idx)?;
                JsonValue::String(interval_to_string(v.months, v.days, v.microseconds))
            }
            TypeCategory::Money => {
                JsonValue::String(money_to_string(row.try_get::<PgMoney, _>(idx)?.0))
            }
            TypeCategory::Inet => JsonValue::String(row.try_get::<RawInet, _>(idx)?.0),
            TypeCategory::Array => decode_array(row, idx, name)?,
            TypeCategory::Unknown if name == "VOID" => JsonValue::Null,
            TypeCategory::Unknown => match raw.format() {
                PgValueFormat::Text => JsonValue::String(
                    raw.as_str().map_err(|e| DbError::decode(e.to_string()))?.to_string(),
                ),
                PgValueFormat::Binary => {
                    return Err(unsupported("PostgreSQL", name, row.column(idx).name()));
                }
            },
        };
        Ok(value)
    }

    fn decode_integer(row: &PgRow, idx: usize, name: &str) -> DbResult<JsonValue> {
        let v: i64 = match name {
            "INT2" => row.try_get::<i16, _>(idx)?.into(),
            "INT4" => row.try_get::<i32, _>(idx)?.into(),
            "OID" => row.try_get::<Oid, _>(idx)?.0.into(),
            _ => row.try_get::<i64, _>(idx)?,
        };
        Ok(JsonValue::Number(v.into()))
    }

    fn decode_array(row: &PgRow, idx: usize, name: &str) -> DbResult<JsonValue> {
        let items = match name.trim_end_matches("[]") {
            "INT2" => elements(row.try_get::<Vec<Option<i16>>, _>(idx)?, JsonValue::from),
            "INT4" => elements(row.try_get::<Vec<Option<i32>>, _>(idx)?, JsonValue::from),
            "INT8" => elements(row.try_get::<Vec<Option<i64>>, _>(idx)?, JsonValue::from),
            "FLOAT4" => elements(row.try_get::<Vec<Option<f32>>, _>(idx)?, |v| {
                float_value(v as f64)
            }),
            "FLOAT8" => elements(row.try_get::<Vec<Option<f64>>, _>(idx)?, float_value),
            "BOOL" => elements(row.try_get::<Vec<Option<bool>>, _>(idx)?, JsonValue::Bool),
            "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => {
                elements(row.try_get::<Vec<Option<String>>, _>(idx)?, JsonValue::String)
            }
            "UUID" => elements(
                row.try_get::<Vec<Option<sqlx::types::Uuid>>, _>(idx)?,
                display,
            ),
            _ => return Err(unsupported("PostgreSQL", name, row.column(idx).name())),
        };
        Ok(JsonValue::Array(items))
    }

    fn elements<T>(items: Vec<Option<T>>, convert: impl Fn(T) -> JsonValue) -> Vec<JsonValue> {
        items
            .into_iter()
            .map(|item| item.map(&convert).unwrap_or(JsonValue::Null))
            .collect()
    }

    fn display<T: ToString>(v: T) -> JsonValue {
        JsonValue::String(v.to_string())
    }
}

/// The generic driver maps every value to one of its primitive kinds
/// (NULL, BOOLEAN, SMALLINT, INTEGER, BIGINT, REAL, DOUBLE, TEXT, BLOB).
/// The kind is read from the value itself: SQLite expression columns such
/// as `COUNT(*)` declare no type at all.
mod any {
    use super::*;

    pub fn decode_column(row: &AnyRow, idx: usize) -> DbResult<JsonValue> {
        let raw = row.try_get_raw(idx)?;
        if raw.is_null() {
            return Ok(JsonValue::Null);
        }
        let type_info = raw.type_info();

        let value = match type_info.name() {
            "BOOLEAN" => JsonValue::Bool(row.try_get(idx)?),
            "SMALLINT" => JsonValue::from(row.try_get::<i16, _>(idx)?),
            "INTEGER" => JsonValue::from(row.try_get::<i32, _>(idx)?),
            "BIGINT" => JsonValue::from(row.try_get::<i64, _>(idx)?),
            "REAL" => float_value(row.try_get::<f32, _>(idx)? as f64),
            "DOUBLE" => float_value(row.try_get::<f64, _>(idx)?),
            "TEXT" => JsonValue::String(row.try_get(idx)?),
            "BLOB" => encode_binary_value(&row.try_get::<Vec<u8>, _>(idx)?),
            other => return Err(unsupported("generic", other, row.column(idx).name())),
        };
        Ok(value)
    }
}
