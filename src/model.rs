use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Watermark value used before any successful run (and after a resync reset).
pub const EPOCH_WATERMARK: &str = "1970-01-01T00:00:00Z";

/// Outcome of a single sync run, persisted with each run log entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RunStatus {
    Success,
    Failure,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "Success",
            RunStatus::Failure => "Failure",
        }
    }

    pub fn parse_status(s: &str) -> Option<Self> {
        match s {
            "Success" => Some(RunStatus::Success),
            "Failure" => Some(RunStatus::Failure),
            _ => None,
        }
    }
}

/// A saved extraction profile: which listings to pull and the incremental
/// watermark for the next run. `cities` is kept as the comma-separated string
/// the operator enters; the filter builder splits and trims it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionProfile {
    pub id: i64,
    pub name: String,
    pub statuses: Vec<String>,
    pub cities: String,
    pub states: Vec<String>,
    pub list_agent_id: Option<String>,
    pub buyer_agent_id: Option<String>,
    pub closed_lookback_months: Option<u32>,
    pub schedule_minutes: Option<i64>,
    pub last_modified: String,
    pub last_run_status: Option<RunStatus>,
    pub last_run_time: Option<DateTime<Utc>>,
}

/// Human-readable summary of one processed listing, collected for the run log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProcessedListing {
    pub mls_number: String,
    pub address: String,
}

