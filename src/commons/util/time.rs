//! Parsing of the XML Schema date and duration types used in metadata.
//!
//! SAML metadata expresses absolute validity as `xs:dateTime` and relative
//! cache lifetimes as `xs:duration`. Chrono has no `xs:duration` parser so
//! the (small) grammar is handled here.

use std::fmt;

use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};

const MILLIS_PER_DAY: i64 = 86_400_000;

/// Parses an `xs:dateTime` value.
///
/// Values without a zone designator are taken to be in UTC.
pub fn parse_date_time(s: &str) -> Result<DateTime<Utc>, TimeError> {
    let s = s.trim();
    if let Ok(time) = DateTime::parse_from_rfc3339(s) {
        return Ok(time.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|_| TimeError::DateTime(s.to_string()))
}

/// Parses an `xs:duration` value such as `PT6H` or `P1DT12H30M`.
///
/// Negative durations are rejected: a cache duration must point into the
/// future. Years count as 365 days and months as 30 days.
pub fn parse_duration(s: &str) -> Result<TimeDelta, TimeError> {
    let err = || TimeError::Duration(s.to_string());

    let rest = s.trim().strip_prefix('P').ok_or_else(err)?;
    if rest.is_empty() {
        return Err(err());
    }

    let (date_part, time_part) = match rest.split_once('T') {
        Some((date, time)) => {
            if time.is_empty() {
                return Err(err());
            }
            (date, Some(time))
        }
        None => (rest, None),
    };

    let mut millis: i64 = 0;

    for (value, unit) in components(date_part).ok_or_else(err)? {
        let factor = match unit {
            'Y' => 365 * MILLIS_PER_DAY,
            'M' => 30 * MILLIS_PER_DAY,
            'D' => MILLIS_PER_DAY,
            _ => return Err(err()),
        };
        if value.fract() != 0.0 {
            return Err(err());
        }
        millis = millis
            .checked_add((value * factor as f64) as i64)
            .ok_or_else(err)?;
    }

    if let Some(time_part) = time_part {
        for (value, unit) in components(time_part).ok_or_else(err)? {
            let factor = match unit {
                'H' => 3_600_000.0,
                'M' => 60_000.0,
                'S' => 1_000.0,
                _ => return Err(err()),
            };
            if unit != 'S' && value.fract() != 0.0 {
                return Err(err());
            }
            millis =
                millis.checked_add((value * factor) as i64).ok_or_else(err)?;
        }
    }

    TimeDelta::try_milliseconds(millis).ok_or_else(err)
}

/// Splits `1D2H` style strings into (value, unit) pairs.
fn components(s: &str) -> Option<Vec<(f64, char)>> {
    let mut res = Vec::new();
    let mut number = String::new();
    for c in s.chars() {
        if c.is_ascii_digit() || c == '.' {
            number.push(c);
        } else {
            if number.is_empty() {
                return None;
            }
            res.push((number.parse::<f64>().ok()?, c));
            number.clear();
        }
    }
    if number.is_empty() { Some(res) } else { None }
}

//------------ TimeError -----------------------------------------------------

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TimeError {
    DateTime(String),
    Duration(String),
}

impl fmt::Display for TimeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TimeError::DateTime(s) => write!(f, "invalid xs:dateTime '{}'", s),
            TimeError::Duration(s) => write!(f, "invalid xs:duration '{}'", s),
        }
    }
}

impl std::error::Error for TimeError {}

//------------ Tests ---------------------------------------------------------
