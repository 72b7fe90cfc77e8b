//! Database view models used by repositories and their callers.

/// Profile fields supplied when provisioning a new extraction profile.
/// The watermark starts at the epoch; scheduling is optional.
#[derive(Debug, Clone, Default)]
pub struct NewProfile {
    pub name: String,
    pub statuses: Vec<String>,
    pub cities: String,
    pub states: Vec<String>,
    pub list_agent_id: Option<String>,
    pub buyer_agent_id: Option<String>,
    pub closed_lookback_months: Option<u32>,
    pub schedule_minutes: Option<i64>,
}

/// One persisted run log row. `processed` stays serialized here; callers that
/// need the summaries deserialize it.
#[derive(Debug, Clone)]
pub struct RunLogRow {
    pub id: i64,
    pub profile_id: i64,
    pub status: String,
    pub message: String,
    pub listings_count: i64,
    pub processed: Option<String>,
    pub created_at: String,
}
