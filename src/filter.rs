//! Builds the OData `$filter` expression for an extraction profile.
//!
//! Pure string construction; `now` is passed in so the closed-listing lookback
//! clause is deterministic under test.

use chrono::{DateTime, Months, Utc};

use crate::model::{ExtractionProfile, EPOCH_WATERMARK};

/// Statuses for which buyer-agent data exists on the remote side. The
/// buyer-agent clause is only emitted when the profile's selected statuses
/// intersect this set.
const BUYER_AGENT_STATUSES: [&str; 3] = ["Active Under Contract", "Pending", "Closed"];

/// Build the complete filter expression for one run.
///
/// Clause groups are AND-joined; values within a group are OR-joined. A
/// "historical closed search" (Closed status + lookback window) bounds the
/// query by `CloseDate` and suppresses the incremental watermark clause.
pub fn build_filter_query(
    profile: &ExtractionProfile,
    is_resync: bool,
    now: DateTime<Utc>,
) -> String {
    let mut filters: Vec<String> = Vec::new();

    if !profile.statuses.is_empty() {
        filters.push(or_group(
            profile
                .statuses
                .iter()
                .map(|s| format!("StandardStatus eq '{}'", s)),
        ));
    }

    let cities: Vec<&str> = profile
        .cities
        .split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .collect();
    if !cities.is_empty() {
        filters.push(or_group(cities.iter().map(|c| format!("City eq '{}'", c))));
    }

    if !profile.states.is_empty() {
        filters.push(or_group(
            profile
                .states
                .iter()
                .map(|s| format!("StateOrProvince eq '{}'", s)),
        ));
    }

    if let Some(agent) = non_empty(&profile.list_agent_id) {
        filters.push(format!(
            "toupper(ListAgentMlsId) eq '{}'",
            agent.to_uppercase()
        ));
    }

    if let Some(agent) = non_empty(&profile.buyer_agent_id) {
        let applicable = profile
            .statuses
            .iter()
            .any(|s| BUYER_AGENT_STATUSES.contains(&s.as_str()));
        if applicable {
            filters.push(format!(
                "toupper(BuyerAgentMlsId) eq '{}'",
                agent.to_uppercase()
            ));
        }
    }

    let lookback = profile.closed_lookback_months.filter(|m| *m > 0);
    let is_historical_closed_search =
        profile.statuses.iter().any(|s| s == "Closed") && lookback.is_some();

    if is_historical_closed_search {
        let months = lookback.unwrap_or(0);
        let since = now
            .checked_sub_months(Months::new(months))
            .unwrap_or(now)
            .format("%Y-%m-%dT%H:%M:%SZ");
        filters.push(format!("CloseDate ge {}", since));
    }

    if !is_resync && !is_historical_closed_search {
        let watermark = if profile.last_modified.trim().is_empty() {
            EPOCH_WATERMARK
        } else {
            profile.last_modified.as_str()
        };
        filters.push(format!("ModificationTimestamp gt {}", watermark));
    }

    filters.join(" and ")
}

fn or_group(clauses: impl Iterator<Item = String>) -> String {
    let clauses: Vec<String> = clauses.collect();
    if clauses.len() > 1 {
        format!("({})", clauses.join(" or "))
    } else {
        clauses.concat()
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn profile() -> ExtractionProfile {
        ExtractionProfile {
            id: 1,
            name: "test".into(),
            statuses: vec![],
            cities: String::new(),
            states: vec![],
            list_agent_id: None,
            buyer_agent_id: None,
            closed_lookback_months: None,
            schedule_minutes: None,
            last_modified: EPOCH_WATERMARK.into(),
            last_run_status: None,
            last_run_time: None,
        }
    }

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap()
    }

    #[test]
    fn statuses_or_grouped_with_incremental_clause() {
        let mut p = profile();
        p.statuses = vec!["Active".into(), "Pending".into()];
        p.last_modified = "2024-01-01T00:00:00Z".into();
        assert_eq!(
            build_filter_query(&p, false, fixed_now()),
            "(StandardStatus eq 'Active' or StandardStatus eq 'Pending') \
             and ModificationTimestamp gt 2024-01-01T00:00:00Z"
        );
    }

    #[test]
    fn single_status_not_parenthesized() {
        let mut p = profile();
        p.statuses = vec!["Active".into()];
        p.last_modified = "2024-01-01T00:00:00Z".into();
        assert_eq!(
            build_filter_query(&p, false, fixed_now()),
            "StandardStatus eq 'Active' and ModificationTimestamp gt 2024-01-01T00:00:00Z"
        );
    }

    #[test]
    fn cities_split_and_trimmed() {
        let mut p = profile();
        p.statuses = vec!["Active".into()];
        p.cities = "Boston, Cambridge ,Somerville".into();
        let q = build_filter_query(&p, true, fixed_now());
        assert!(q.contains("(City eq 'Boston' or City eq 'Cambridge' or City eq 'Somerville')"));
    }

    #[test]
    fn states_or_grouped() {
        let mut p = profile();
        p.states = vec!["MA".into(), "NH".into()];
        let q = build_filter_query(&p, true, fixed_now());
        assert!(q.contains("(StateOrProvince eq 'MA' or StateOrProvince eq 'NH')"));
    }

    #[test]
    fn list_agent_uppercased() {
        let mut p = profile();
        p.list_agent_id = Some("an1234".into());
        let q = build_filter_query(&p, true, fixed_now());
        assert!(q.contains("toupper(ListAgentMlsId) eq 'AN1234'"));
    }

    #[test]
    fn buyer_agent_requires_applicable_status() {
        let mut p = profile();
        p.statuses = vec!["Active".into()];
        p.buyer_agent_id = Some("bn5678".into());
        let q = build_filter_query(&p, false, fixed_now());
        assert!(!q.contains("BuyerAgentMlsId"));

        p.statuses = vec!["Active".into(), "Pending".into()];
        let q = build_filter_query(&p, false, fixed_now());
        assert!(q.contains("toupper(BuyerAgentMlsId) eq 'BN5678'"));
    }

    #[test]
    fn historical_closed_search_suppresses_watermark() {
        let mut p = profile();
        p.statuses = vec!["Closed".into()];
        p.closed_lookback_months = Some(6);
        p.last_modified = "2024-01-01T00:00:00Z".into();
        let q = build_filter_query(&p, false, fixed_now());
        assert!(q.contains("CloseDate ge 2023-12-15T12:00:00Z"));
        assert!(!q.contains("ModificationTimestamp gt"));
    }

    #[test]
    fn zero_lookback_is_not_historical() {
        let mut p = profile();
        p.statuses = vec!["Closed".into()];
        p.closed_lookback_months = Some(0);
        let q = build_filter_query(&p, false, fixed_now());
        assert!(!q.contains("CloseDate"));
        assert!(q.contains("ModificationTimestamp gt"));
    }

    #[test]
    fn resync_drops_incremental_clause() {
        let mut p = profile();
        p.statuses = vec!["Active".into()];
        p.last_modified = "2024-05-01T00:00:00Z".into();
        let q = build_filter_query(&p, true, fixed_now());
        assert_eq!(q, "StandardStatus eq 'Active'");
    }

    #[test]
    fn empty_watermark_defaults_to_epoch() {
        let mut p = profile();
        p.last_modified = String::new();
        let q = build_filter_query(&p, false, fixed_now());
        assert_eq!(q, "ModificationTimestamp gt 1970-01-01T00:00:00Z");
    }
}
