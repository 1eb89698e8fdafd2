//! Timezone handling for relative-date filters and date bucketing.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeDelta, Utc};
use chrono_tz::Tz;

use crate::errors::QueryError;

/// Parse an IANA timezone identifier
pub fn parse_timezone(timezone: &str) -> Result<Tz, QueryError> {
    timezone
        .parse::<Tz>()
        .map_err(|_| QueryError::InvalidTimezone {
            timezone: timezone.to_string(),
        })
}

/// Side of the boundary a relative-date filter keeps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelativeDirection {
    /// `$<N>HoursBefore`: strictly earlier than the boundary
    Before,
    /// `$<N>HoursAfter`: strictly later than the boundary (the last N hours)
    After,
}

/// Resolved relative-date filter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelativeBoundary {
    pub instant: DateTime<Tz>,
    pub direction: RelativeDirection,
}

/// Boundary of a `$<N>HoursBefore` / `$<N>HoursAfter` filter.
///
/// `now` is localized to `timezone`, then moved back by `offset_hours`. Both
/// directions share that instant; `direction` only picks the side kept.
pub fn resolve(
    offset_hours: u32,
    direction: RelativeDirection,
    timezone: &str,
    now: DateTime<Utc>,
) -> Result<RelativeBoundary, QueryError> {
    let tz = parse_timezone(timezone)?;
    resolve_in(offset_hours, direction, tz, now).ok_or_else(|| {
        QueryError::invalid_request(format!("Relative offset of {offset_hours} hours is out of range"))
    })
}

/// [`resolve`] with an already parsed timezone. `None` on calendar overflow.
#[must_use]
pub fn resolve_in(
    offset_hours: u32,
    direction: RelativeDirection,
    tz: Tz,
    now: DateTime<Utc>,
) -> Option<RelativeBoundary> {
    let offset = TimeDelta::try_hours(i64::from(offset_hours))?;
    let instant = now.with_timezone(&tz).checked_sub_signed(offset)?;
    Some(RelativeBoundary { instant, direction })
}

/// Parse a timestamp operand. Values without an offset are taken as UTC.
#[must_use]
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc));
    }
    if let Ok(parsed) = DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f %:z") {
        return Some(parsed.with_timezone(&Utc));
    }
    if let Ok(parsed) = DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Some(parsed.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(naive.and_utc());
        }
    }
    parse_day(text).and_then(|day| day.and_hms_opt(0, 0, 0)).map(|naive| naive.and_utc())
}

/// Parse a calendar date operand (`YYYY-MM-DD`)
#[must_use]
pub fn parse_day(text: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(text, "%Y-%m-%d").ok()
}
