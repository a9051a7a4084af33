//! Database model types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A URL being watched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoredTarget {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub owner: String,
    pub subscribers: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Default for MonitoredTarget {
    fn default() -> Self {
        Self {
            id: 0,
            name: String::new(),
            url: String::new(),
            owner: String::new(),
            subscribers: Vec::new(),
            created_at: Utc::now(),
        }
    }
}

/// Status recorded in a target's history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Online,
    Offline,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Online => "online",
            Status::Offline => "offline",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "online" => Ok(Status::Online),
            "offline" => Ok(Status::Offline),
            other => Err(format!("unknown status: {}", other)),
        }
    }
}

/// Status reported by queries over a history.
///
/// Variants are declared from best to worst, so `max()` picks the worst one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BucketStatus {
    Online,
    Unknown,
    Offline,
}

impl From<Status> for BucketStatus {
    fn from(status: Status) -> Self {
        match status {
            Status::Online => BucketStatus::Online,
            Status::Offline => BucketStatus::Offline,
        }
    }
}

/// The outcome of a single probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    pub status: Status,
    /// HTTP status code, or 0 when no response was received.
    pub status_code: u16,
}

impl Observation {
    pub fn online(status_code: u16) -> Self {
        Self { status: Status::Online, status_code }
    }

    pub fn offline(status_code: u16) -> Self {
        Self { status: Status::Offline, status_code }
    }
}

/// A contiguous range of time during which a target held one `(status, status_code)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusPeriod {
    pub status: Status,
    pub status_code: u16,
    pub from: DateTime<Utc>,
    /// `None` while the period is still open.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<DateTime<Utc>>,
}

impl StatusPeriod {
    pub fn open(observation: Observation, from: DateTime<Utc>) -> Self {
        Self {
            status: observation.status,
            status_code: observation.status_code,
            from,
            to: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.to.is_none()
    }

    pub fn matches(&self, observation: &Observation) -> bool {
        self.status == observation.status && self.status_code == observation.status_code
    }

    /// Whether `instant` falls within `[from, to)`, or `[from, +inf)` when open.
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.from && self.to.map_or(true, |to| instant < to)
    }

    /// Whether the period intersects the half-open range `[start, end)`.
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.from < end && self.to.map_or(true, |to| to > start)
    }
}
