//! # Condition Grammar
//!
//! A filter value is a plain string whose prefixes and suffixes select the
//! operator:
//!
//! | Raw value          | Operator                                  |
//! |--------------------|-------------------------------------------|
//! | `!x`               | not equals (or the negated form below)    |
//! | `>x` / `<x`        | greater than / less than                  |
//! | `*x*`              | contains (`!*x*` does not contain)        |
//! | `x*` / `*x`        | starts with / ends with                   |
//! | `null`             | is null (`!null` is not null)             |
//! | `true` / `false`   | on boolean fields, optionally `!`-negated |
//! | `$present`         | non-null and non-empty                    |
//! | `$blank`           | null or empty                             |
//! | `$24HoursBefore`   | strictly earlier than now minus 24h       |
//! | `$24HoursAfter`    | strictly later than now minus 24h         |
//! | anything else      | equals, coerced to the field type         |
//!
//! Operator legality is checked against the field's semantic type before the
//! operand is coerced, so `>abc` on a string field reports the operator, not
//! the operand.

use chrono::{DateTime, NaiveDate, Utc};
use std::fmt;
use uuid::Uuid;

use super::dates::{parse_day, parse_timestamp};
use crate::errors::QueryError;
use crate::schema::SemanticType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    IsNull,
    IsNotNull,
    IsTrue,
    IsFalse,
    IsNotTrue,
    IsNotFalse,
    RelativeDateBefore,
    RelativeDateAfter,
    IsPresent,
    IsBlank,
}

impl Operator {
    /// Whether the operator may be applied to a field of this type
    #[must_use]
    pub fn supports(self, field_type: SemanticType) -> bool {
        match self {
            Self::Equals | Self::NotEquals => {
                !matches!(field_type, SemanticType::Json | SemanticType::Unsupported)
            }
            Self::GreaterThan | Self::LessThan => field_type.is_ordered(),
            Self::Contains
            | Self::NotContains
            | Self::StartsWith
            | Self::EndsWith
            | Self::IsPresent
            | Self::IsBlank => field_type == SemanticType::String,
            Self::IsNull | Self::IsNotNull => field_type != SemanticType::Unsupported,
            Self::IsTrue | Self::IsFalse | Self::IsNotTrue | Self::IsNotFalse => {
                field_type == SemanticType::Boolean
            }
            Self::RelativeDateBefore | Self::RelativeDateAfter => field_type.is_temporal(),
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Equals => "equals",
            Self::NotEquals => "not equals",
            Self::GreaterThan => "greater than",
            Self::LessThan => "less than",
            Self::Contains => "contains",
            Self::NotContains => "not contains",
            Self::StartsWith => "starts with",
            Self::EndsWith => "ends with",
            Self::IsNull => "is null",
            Self::IsNotNull => "is not null",
            Self::IsTrue => "is true",
            Self::IsFalse => "is false",
            Self::IsNotTrue => "is not true",
            Self::IsNotFalse => "is not false",
            Self::RelativeDateBefore => "hours before",
            Self::RelativeDateAfter => "hours after",
            Self::IsPresent => "is present",
            Self::IsBlank => "is blank",
        };
        f.write_str(label)
    }
}

/// Operand of a condition, already coerced to the field's semantic type
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    None,
    Integer(i64),
    Float(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
    Day(NaiveDate),
    Uuid(Uuid),
    /// Offset of a relative-date condition
    Hours(u32),
}

/// One parsed filter condition
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub field: String,
    /// Filter value as received, kept for diagnostics
    pub raw: String,
    pub operator: Operator,
    pub operand: Operand,
}

/// Parse a raw filter value against a field of the given type.
///
/// # Errors
///
/// [`QueryError::UnsupportedOperator`] when the operator selected by the
/// value is illegal for `field_type`; [`QueryError::TypeMismatch`] when the
/// operand cannot be coerced.
pub fn parse(field: &str, raw: &str, field_type: SemanticType) -> Result<Condition, QueryError> {
    let (operator, text) = classify(raw, field_type);
    if !operator.supports(field_type) {
        return Err(QueryError::unsupported_operator(field, raw, operator, field_type));
    }

    let operand = match operator {
        Operator::Equals | Operator::NotEquals | Operator::GreaterThan | Operator::LessThan => {
            coerce(field, raw, text, field_type)?
        }
        Operator::Contains | Operator::NotContains | Operator::StartsWith | Operator::EndsWith => {
            Operand::Text(text.to_string())
        }
        Operator::RelativeDateBefore | Operator::RelativeDateAfter => {
            // classify only yields these for digit runs
            Operand::Hours(
                text.parse()
                    .map_err(|_| QueryError::type_mismatch(field, raw, field_type))?,
            )
        }
        _ => Operand::None,
    };

    Ok(Condition {
        field: field.to_string(),
        raw: raw.to_string(),
        operator,
        operand,
    })
}

/// Exact-match condition that bypasses the grammar, for record ids
pub fn equals(field: &str, value: &str, field_type: SemanticType) -> Result<Condition, QueryError> {
    if !Operator::Equals.supports(field_type) {
        return Err(QueryError::unsupported_operator(
            field,
            value,
            Operator::Equals,
            field_type,
        ));
    }
    Ok(Condition {
        field: field.to_string(),
        raw: value.to_string(),
        operator: Operator::Equals,
        operand: coerce(field, value, value, field_type)?,
    })
}

fn classify(raw: &str, field_type: SemanticType) -> (Operator, &str) {
    let boolean = field_type == SemanticType::Boolean;

    if let Some(rest) = raw.strip_prefix('!') {
        if let Some(inner) = surrounded_by_wildcards(rest) {
            return (Operator::NotContains, inner);
        }
        return match rest {
            "null" => (Operator::IsNotNull, rest),
            "true" if boolean => (Operator::IsNotTrue, rest),
            "false" if boolean => (Operator::IsNotFalse, rest),
            _ => (Operator::NotEquals, rest),
        };
    }
    if let Some(rest) = raw.strip_prefix('>') {
        return (Operator::GreaterThan, rest);
    }
    if let Some(rest) = raw.strip_prefix('<') {
        return (Operator::LessThan, rest);
    }
    if let Some(inner) = surrounded_by_wildcards(raw) {
        return (Operator::Contains, inner);
    }
    if let Some(rest) = raw.strip_prefix('*') {
        return (Operator::EndsWith, rest);
    }
    if let Some(rest) = raw.strip_suffix('*') {
        return (Operator::StartsWith, rest);
    }

    match raw {
        "null" => (Operator::IsNull, raw),
        "true" if boolean => (Operator::IsTrue, raw),
        "false" if boolean => (Operator::IsFalse, raw),
        "$present" => (Operator::IsPresent, raw),
        "$blank" => (Operator::IsBlank, raw),
        _ => relative_hours(raw).unwrap_or((Operator::Equals, raw)),
    }
}

fn surrounded_by_wildcards(value: &str) -> Option<&str> {
    value
        .strip_prefix('*')
        .and_then(|rest| rest.strip_suffix('*'))
}

fn relative_hours(raw: &str) -> Option<(Operator, &str)> {
    let rest = raw.strip_prefix('$')?;
    let (hours, operator) = if let Some(hours) = rest.strip_suffix("HoursBefore") {
        (hours, Operator::RelativeDateBefore)
    } else {
        (rest.strip_suffix("HoursAfter")?, Operator::RelativeDateAfter)
    };
    let valid = !hours.is_empty() && hours.bytes().all(|b| b.is_ascii_digit());
    (valid && hours.parse::<u32>().is_ok()).then_some((operator, hours))
}

fn coerce(field: &str, raw: &str, text: &str, field_type: SemanticType) -> Result<Operand, QueryError> {
    let mismatch = || QueryError::type_mismatch(field, raw, field_type);
    match field_type {
        SemanticType::Number => {
            if let Ok(integer) = text.parse::<i64>() {
                return Ok(Operand::Integer(integer));
            }
            text.parse::<f64>()
                .ok()
                .filter(|float| float.is_finite())
                .map(Operand::Float)
                .ok_or_else(mismatch)
        }
        SemanticType::String | SemanticType::Enum => Ok(Operand::Text(text.to_string())),
        SemanticType::Uuid => Uuid::parse_str(text).map(Operand::Uuid).map_err(|_| mismatch()),
        SemanticType::Date => parse_timestamp(text).map(Operand::Timestamp).ok_or_else(mismatch),
        SemanticType::Dateonly => parse_day(text).map(Operand::Day).ok_or_else(mismatch),
        // Boolean literals are handled by the sentinels
        SemanticType::Boolean | SemanticType::Json | SemanticType::Unsupported => Err(mismatch()),
    }
}
