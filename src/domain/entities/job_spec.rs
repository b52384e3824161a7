use crate::domain::values::cron_expr::CronExpr;
use chrono_tz::Tz;
use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    ChipDaily,
    VideoDigest,
}

impl JobKind {
    pub fn default_name(&self) -> &'static str {
        match self {
            JobKind::ChipDaily => "chip_daily",
            JobKind::VideoDigest => "video_digest",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.default_name())
    }
}

impl FromStr for JobKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chip_daily" | "chip" => Ok(JobKind::ChipDaily),
            "video_digest" | "video" | "summary" => Ok(JobKind::VideoDigest),
            _ => Err(format!("Unknown job: '{s}'. Use 'chip_daily' or 'video_digest'")),
        }
    }
}

/// A schedulable job. Loaded once at startup.
#[derive(Debug, Clone, Serialize)]
pub struct JobSpec {
    pub job_name: String,
    pub schedule: CronExpr,
    #[serde(serialize_with = "serialize_tz")]
    pub timezone: Tz,
    pub kind: JobKind,
    /// Whether the timer path fires this job. Manual triggers always work
    /// unless the job is unavailable.
    pub enabled: bool,
}

impl JobSpec {
    pub fn new(kind: JobKind, schedule: CronExpr, timezone: Tz, enabled: bool) -> Self {
        Self {
            job_name: kind.default_name().to_string(),
            schedule,
            timezone,
            kind,
            enabled,
        }
    }
}

fn serialize_tz<S: Serializer>(tz: &Tz, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(tz.name())
}
