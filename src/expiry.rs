//! Expiry codec: flag instants <-> local wall-clock text for editing.
//!
//! The editable form is `YYYY-MM-DDTHH:MM:SS` in the operator's timezone,
//! without an offset suffix, the shape a `datetime-local` input expects.

use chrono::{DateTime, LocalResult, NaiveDateTime, TimeZone, Timelike, Utc};
use std::fmt;
use std::str::FromStr;

use crate::errors::{FlagError, FlagResult};

pub const EDITABLE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Accepted on input, tried in order. Sub-second digits are dropped.
const INPUT_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
];

/// A validated local wall-clock time, whole seconds only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct LocalExpiry(NaiveDateTime);

impl LocalExpiry {
    pub fn from_instant<Tz: TimeZone>(tz: &Tz, instant: DateTime<Utc>) -> Self {
        let local = instant.with_timezone(tz).naive_local();
        Self(local.with_nanosecond(0).unwrap_or(local))
    }

    /// Resolve against `tz`. In a DST overlap the earlier instant wins; a
    /// wall-clock time skipped by a DST gap is rejected.
    pub fn to_instant<Tz: TimeZone>(&self, tz: &Tz) -> FlagResult<DateTime<Utc>> {
        match tz.from_local_datetime(&self.0) {
            LocalResult::Single(dt) => Ok(dt.with_timezone(&Utc)),
            LocalResult::Ambiguous(earliest, _) => Ok(earliest.with_timezone(&Utc)),
            LocalResult::None => Err(FlagError::InvalidExpiry {
                input: self.to_string(),
                reason: "time does not exist in the local timezone".to_string(),
            }),
        }
    }

    pub fn naive(&self) -> NaiveDateTime {
        self.0
    }
}

impl FromStr for LocalExpiry {
    type Err = FlagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let input = s.trim();
        INPUT_FORMATS
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(input, fmt).ok())
            .map(|dt| Self(dt.with_nanosecond(0).unwrap_or(dt)))
            .ok_or_else(|| FlagError::InvalidExpiry {
                input: s.to_string(),
                reason: format!("expected local time as {}", EDITABLE_FORMAT),
            })
    }
}

impl fmt::Display for LocalExpiry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(EDITABLE_FORMAT))
    }
}

/// Absent stays absent; an instant becomes local wall-clock text.
pub fn to_editable(expires_on: Option<DateTime<Utc>>) -> Option<String> {
    to_editable_in(&chrono::Local, expires_on)
}

/// Absent or blank input means the flag never expires.
pub fn from_editable(input: Option<&str>) -> FlagResult<Option<DateTime<Utc>>> {
    from_editable_in(&chrono::Local, input)
}

pub fn to_editable_in<Tz: TimeZone>(tz: &Tz, expires_on: Option<DateTime<Utc>>) -> Option<String> {
    expires_on.map(|at| LocalExpiry::from_instant(tz, at).to_string())
}

pub fn from_editable_in<Tz: TimeZone>(
    tz: &Tz,
    input: Option<&str>,
) -> FlagResult<Option<DateTime<Utc>>> {
    match input.map(str::trim) {
        None | Some("") => Ok(None),
        Some(text) => text.parse::<LocalExpiry>()?.to_instant(tz).map(Some),
    }
}
