//! Schedule kinds and next-run computation.
//!
//! All offsets are added to the fire time, not to the previous `next_run`,
//! so a late sweep shifts every later run by the same delay. `Monthly` is a
//! fixed 30-day offset and does not follow calendar months.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::db::ParseEnumError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleKind {
    Once,
    Daily,
    Weekly,
    Monthly,
}

/// What happens to a task after it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    /// Stay active with a new `next_run`.
    Reschedule(DateTime<Utc>),
    /// Deactivate permanently; `next_run` is left as it was.
    Retire,
}

impl ScheduleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Once => "once",
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        }
    }

    /// Distance between runs, or `None` for a one-shot task.
    pub fn interval(&self) -> Option<Duration> {
        match self {
            Self::Once => None,
            Self::Daily => Some(Duration::days(1)),
            Self::Weekly => Some(Duration::days(7)),
            Self::Monthly => Some(Duration::days(30)),
        }
    }

    #[cfg(test)]
    pub(crate) fn is_recurring(&self) -> bool {
        self.interval().is_some()
    }

    /// Compute the task's state after firing at `fire_time`.
    pub fn advance(&self, fire_time: DateTime<Utc>) -> Advance {
        match self.interval() {
            Some(interval) => Advance::Reschedule(fire_time + interval),
            None => Advance::Retire,
        }
    }
}

impl fmt::Display for ScheduleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScheduleKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "once" => Ok(Self::Once),
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            other => Err(ParseEnumError::new("schedule kind", other)),
        }
    }
}
