//! Five-field cron expressions evaluated in a fixed IANA timezone.
//!
//! Fields are `minute hour day-of-month month day-of-week`, parsed by the
//! `cron` crate. Day-of-week keeps classic cron numbering (`0-7`, both 0 and
//! 7 are Sunday) or three letter names.
//!
//! The schedule runs on the zone's wall clock. Local times are resolved
//! against the zone's calendar rules:
//! - a local time skipped by a spring-forward transition fires at the first
//!   valid instant after the gap;
//! - a local time repeated by a fall-back transition fires once, at the
//!   earliest instant.

use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

const WEEKDAYS: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];

/// Wall-clock candidates inspected per lookup; only repeated local times are
/// ever passed over.
const MAX_CANDIDATES: usize = 16;

#[derive(Clone)]
pub struct CronExpr {
    source: String,
    schedule: Schedule,
}

impl CronExpr {
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Next trigger instant strictly after `after`, evaluated in `tz`.
    pub fn next_after(&self, after: &DateTime<Utc>, tz: &Tz) -> Option<DateTime<Utc>> {
        // Local wall-clock time carried as a naive UTC value.
        let wall = Utc.from_utc_datetime(&after.with_timezone(tz).naive_local());
        self.schedule
            .after(&wall)
            .take(MAX_CANDIDATES)
            .filter_map(|local| resolve_local(tz, local.naive_utc()))
            .map(|dt| dt.with_timezone(&Utc))
            .find(|instant| instant > after)
    }
}

fn resolve_local(tz: &Tz, naive: NaiveDateTime) -> Option<DateTime<Tz>> {
    if let Some(dt) = tz.from_local_datetime(&naive).earliest() {
        return Some(dt);
    }
    let mut candidate = naive;
    for _ in 0..16 {
        candidate += Duration::minutes(15);
        if let Some(dt) = tz.from_local_datetime(&candidate).earliest() {
            return Some(dt);
        }
    }
    None
}

fn weekday(token: &str) -> Result<&str, String> {
    match token.parse::<usize>() {
        Ok(n) if n <= 7 => Ok(WEEKDAYS[n % 7]),
        Ok(_) => Err(format!("day of week '{token}' outside 0-7")),
        Err(_) => Ok(token),
    }
}

/// Rewrite classic day-of-week numbers (Sunday = 0 or 7) as names, which the
/// `cron` crate reads unambiguously.
fn weekday_field(field: &str) -> Result<String, String> {
    let parts = field
        .split(',')
        .map(|part| {
            let (range, step) = match part.split_once('/') {
                Some((r, s)) => (r, Some(s)),
                None => (part, None),
            };
            let range = match range.split_once('-') {
                // "5-7" wraps to Sunday
                Some((a, "7")) if step.is_none() => format!("{}-Sat,Sun", weekday(a)?),
                Some((a, b)) => format!("{}-{}", weekday(a)?, weekday(b)?),
                None => weekday(range)?.to_string(),
            };
            Ok(match step {
                Some(s) => format!("{range}/{s}"),
                None => range,
            })
        })
        .collect::<Result<Vec<_>, String>>()?;
    Ok(parts.join(","))
}

impl FromStr for CronExpr {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(format!(
                "cron expression '{s}' must have 5 fields (minute hour day month weekday)"
            ));
        }

        let full = format!(
            "0 {} {} {} {} {}",
            fields[0],
            fields[1],
            fields[2],
            fields[3],
            weekday_field(fields[4])?
        );
        let schedule = Schedule::from_str(&full).map_err(|e| format!("invalid cron expression '{s}': {e}"))?;

        Ok(CronExpr {
            source: fields.join(" "),
            schedule,
        })
    }
}

impl PartialEq for CronExpr {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for CronExpr {}

impl fmt::Debug for CronExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CronExpr").field(&self.source).finish()
    }
}

impl fmt::Display for CronExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl Serialize for CronExpr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.source)
    }
}
