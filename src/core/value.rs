//! Purpose: Declared field types and typed parsing/comparison of raw string values.
//! Exports: `FieldType`, `TypedValue`.
//! Role: Shared by predicate validation (literals) and evaluation (record values).
//! Invariants: Parsing never panics; failures surface as `Validation` errors.
//! Invariants: Only numeric and temporal types are orderable.
use std::cmp::Ordering;

use serde::Deserialize;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime};

use crate::core::error::{Error, ErrorKind};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    #[default]
    String,
    Int,
    Long,
    Double,
    Boolean,
    Date,
    Timestamp,
    Document,
}

impl FieldType {
    pub fn is_orderable(self) -> bool {
        matches!(
            self,
            FieldType::Int
                | FieldType::Long
                | FieldType::Double
                | FieldType::Date
                | FieldType::Timestamp
        )
    }

    /// Surrounding whitespace is ignored for numeric, boolean and temporal types only.
    pub fn parse(self, raw: &str) -> Result<TypedValue, Error> {
        if let FieldType::String | FieldType::Document = self {
            return Ok(TypedValue::Str(raw.to_string()));
        }
        let raw = raw.trim();
        let parsed = match self {
            FieldType::String | FieldType::Document => Some(TypedValue::Str(raw.to_string())),
            FieldType::Int => raw
                .parse::<i32>()
                .ok()
                .map(|value| TypedValue::Int(i64::from(value))),
            FieldType::Long => raw.parse::<i64>().ok().map(TypedValue::Int),
            FieldType::Double => raw
                .parse::<f64>()
                .ok()
                .filter(|value| !value.is_nan())
                .map(TypedValue::Double),
            FieldType::Boolean => match raw.to_ascii_lowercase().as_str() {
                "true" | "y" | "1" => Some(TypedValue::Bool(true)),
                "false" | "n" | "0" => Some(TypedValue::Bool(false)),
                _ => None,
            },
            FieldType::Date => Date::parse(raw, format_description!("[year]-[month]-[day]"))
                .ok()
                .map(TypedValue::Date),
            FieldType::Timestamp => OffsetDateTime::parse(raw, &Rfc3339)
                .ok()
                .map(TypedValue::Timestamp),
        };
        parsed.ok_or_else(|| {
            Error::new(ErrorKind::Validation)
                .with_message(format!("value `{raw}` is not a valid {self:?}"))
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum TypedValue {
    Str(String),
    Int(i64),
    Double(f64),
    Bool(bool),
    Date(Date),
    Timestamp(OffsetDateTime),
}

impl TypedValue {
    /// Compares two values of the same declared type. Mixed variants never compare.
    pub fn compare(&self, other: &TypedValue) -> Option<Ordering> {
        match (self, other) {
            (TypedValue::Str(a), TypedValue::Str(b)) => Some(a.cmp(b)),
            (TypedValue::Int(a), TypedValue::Int(b)) => Some(a.cmp(b)),
            (TypedValue::Double(a), TypedValue::Double(b)) => a.partial_cmp(b),
            (TypedValue::Bool(a), TypedValue::Bool(b)) => Some(a.cmp(b)),
            (TypedValue::Date(a), TypedValue::Date(b)) => Some(a.cmp(b)),
            (TypedValue::Timestamp(a), TypedValue::Timestamp(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{FieldType, TypedValue};
    use crate::core::error::ErrorKind;
    use std::cmp::Ordering;

    #[test]
    fn int_rejects_out_of_range_but_long_accepts() {
        assert!(FieldType::Int.parse("3000000000").is_err());
        assert_eq!(
            FieldType::Long.parse("3000000000").unwrap(),
            TypedValue::Int(3_000_000_000)
        );
    }

    #[test]
    fn strings_keep_whitespace_but_numbers_trim_it() {
        assert_eq!(
            FieldType::String.parse(" Y ").unwrap(),
            TypedValue::Str(" Y ".to_string())
        );
        assert_ne!(FieldType::String.parse(" Y ").unwrap(), FieldType::String.parse("Y").unwrap());
        assert_eq!(
            FieldType::Document.parse(" {} ").unwrap(),
            TypedValue::Str(" {} ".to_string())
        );
        assert_eq!(FieldType::Long.parse(" 42 ").unwrap(), TypedValue::Int(42));
        assert!(FieldType::Date.parse(" 2017-01-31").is_ok());
    }

    #[test]
    fn dates_and_timestamps_order() {
        let a = FieldType::Date.parse("2017-01-31").unwrap();
        let b = FieldType::Date.parse("2017-02-01").unwrap();
        assert_eq!(a.compare(&b), Some(Ordering::Less));

        let t1 = FieldType::Timestamp.parse("2017-01-31T10:00:00Z").unwrap();
        let t2 = FieldType::Timestamp.parse("2017-01-31T12:00:00+02:00").unwrap();
        assert_eq!(t1.compare(&t2), Some(Ordering::Equal));
    }

    #[test]
    fn parse_failure_is_validation_error() {
        let err = FieldType::Double.parse("abc").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(FieldType::Boolean.parse("maybe").is_err());
    }

    #[test]
    fn orderable_types() {
        assert!(FieldType::Double.is_orderable());
        assert!(FieldType::Date.is_orderable());
        assert!(!FieldType::String.is_orderable());
        assert!(!FieldType::Boolean.is_orderable());
    }
}
