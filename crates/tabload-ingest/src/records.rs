//! Typed source records
//!
//! Raw rows are converted exactly once, here. Everything downstream works on
//! named, typed fields.

use chrono::{NaiveDate, NaiveDateTime};
use thiserror::Error;

use crate::source::RawRow;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FieldError {
    #[error("missing required field '{0}'")]
    Missing(&'static str),

    #[error("field '{field}' has invalid value '{value}': {reason}")]
    Invalid {
        field: &'static str,
        value: String,
        reason: &'static str,
    },
}

/// Conversion from a raw source row
pub trait FromRawRow: Sized {
    fn from_raw(row: &RawRow) -> Result<Self, FieldError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct CustomerRecord {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub registration_date: Option<NaiveDate>,
    pub country: Option<String>,
}

impl FromRawRow for CustomerRecord {
    fn from_raw(row: &RawRow) -> Result<Self, FieldError> {
        Ok(Self {
            id: required(row, "id", parse_int)?,
            name: required(row, "name", parse_text)?,
            email: required(row, "email", parse_text)?,
            registration_date: optional(row, "registration_date", parse_date)?,
            country: optional(row, "country", parse_text)?,
        })
    }
}

/// Product row as delivered, still naming its supplier
#[derive(Debug, Clone, PartialEq)]
pub struct ProductRecord {
    pub id: i64,
    pub name: String,
    pub category: Option<String>,
    pub price: f64,
    pub supplier: Option<String>,
}

impl FromRawRow for ProductRecord {
    fn from_raw(row: &RawRow) -> Result<Self, FieldError> {
        let price = required(row, "price", parse_float)?;
        if price < 0.0 {
            return Err(invalid("price", row, "must not be negative"));
        }

        Ok(Self {
            id: required(row, "id", parse_int)?,
            name: required(row, "name", parse_text)?,
            category: optional(row, "category", parse_text)?,
            price,
            supplier: optional(row, "supplier", parse_text)?,
        })
    }
}

/// Denormalized transaction line: one product of one transaction
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionRecord {
    pub id: i64,
    pub customer_id: i64,
    pub product_id: i64,
    pub quantity: i64,
    pub timestamp: Option<NaiveDateTime>,
    pub payment_method: Option<String>,
}

impl FromRawRow for TransactionRecord {
    fn from_raw(row: &RawRow) -> Result<Self, FieldError> {
        let quantity = required(row, "quantity", parse_int)?;
        if quantity <= 0 {
            return Err(invalid("quantity", row, "must be positive"));
        }

        Ok(Self {
            id: required(row, "id", parse_int)?,
            customer_id: required(row, "customer_id", parse_int)?,
            product_id: required(row, "product_id", parse_int)?,
            quantity,
            timestamp: optional(row, "timestamp", parse_timestamp)?,
            payment_method: optional(row, "payment_method", parse_text)?,
        })
    }
}

/// Convert a whole batch; the error carries the 1-based row number
pub fn convert_all<T: FromRawRow>(rows: &[RawRow]) -> Result<Vec<T>, (usize, FieldError)> {
    rows.iter()
        .enumerate()
        .map(|(index, row)| T::from_raw(row).map_err(|e| (index + 1, e)))
        .collect()
}

// ============================================================================
// Field Parsers
// ============================================================================

type Parser<T> = fn(&str) -> Result<T, &'static str>;

fn required<T>(row: &RawRow, field: &'static str, parse: Parser<T>) -> Result<T, FieldError> {
    optional(row, field, parse)?.ok_or(FieldError::Missing(field))
}

fn optional<T>(row: &RawRow, field: &'static str, parse: Parser<T>) -> Result<Option<T>, FieldError> {
    row.get(field)
        .map(|raw| {
            parse(raw.trim()).map_err(|reason| FieldError::Invalid {
                field,
                value: raw.to_string(),
                reason,
            })
        })
        .transpose()
}

fn invalid(field: &'static str, row: &RawRow, reason: &'static str) -> FieldError {
    FieldError::Invalid {
        field,
        value: row.get(field).unwrap_or_default().to_string(),
        reason,
    }
}

fn parse_text(raw: &str) -> Result<String, &'static str> {
    Ok(raw.to_string())
}

/// Integers, tolerating a zero fraction ("5.0") as written by float-typed exports
fn parse_int(raw: &str) -> Result<i64, &'static str> {
    if let Ok(v) = raw.parse::<i64>() {
        return Ok(v);
    }
    match raw.parse::<f64>() {
        Ok(v) if v.is_finite() && v.fract() == 0.0 && v.abs() < i64::MAX as f64 => Ok(v as i64),
        _ => Err("not an integer"),
    }
}

fn parse_float(raw: &str) -> Result<f64, &'static str> {
    match raw.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err("not a finite number"),
    }
}

fn parse_date(raw: &str) -> Result<NaiveDate, &'static str> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| parse_timestamp(raw).map(|ts| ts.date()))
        .map_err(|_| "not an ISO-8601 date")
}

fn parse_timestamp(raw: &str) -> Result<NaiveDateTime, &'static str> {
    const FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

    FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .ok_or("not an ISO-8601 timestamp")
}
