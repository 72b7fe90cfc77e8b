//! The sync engine: runs one extraction profile start to finish.
//!
//! A run builds the filter for the profile, pages through the remote listing
//! collection in ascending modification-timestamp order, resolves related
//! entities per page, upserts normalized rows, and advances the watermark only
//! after at least one record was processed. Every failure inside a run is
//! caught once here, recorded as a Failure run log, and reported to the caller
//! as `false` — upserts already applied stay committed (at-least-once,
//! idempotent by `ListingKey`).

use once_cell::sync::Lazy;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

use crate::bridge::{BridgeClient, MlsApi, PageQuery, Pager, Resource, PAGE_DELAY};
use crate::config;
use crate::db::{self, Pool};
use crate::filter::build_filter_query;
use crate::model::{ProcessedListing, RunStatus};
use crate::normalize::{normalize, RelatedMaps};
use crate::related;

/// Listing records requested per page.
pub const PAGE_SIZE: u32 = 100;

/// Profiles with a run currently in flight. Two triggers racing on the same
/// profile (manual run vs. scheduler tick) would interleave writes; the loser
/// is turned away instead.
static RUNNING: Lazy<Mutex<HashSet<i64>>> = Lazy::new(|| Mutex::new(HashSet::new()));

struct RunGuard(i64);

impl Drop for RunGuard {
    fn drop(&mut self) {
        if let Ok(mut running) = RUNNING.lock() {
            running.remove(&self.0);
        }
    }
}

fn try_acquire(profile_id: i64) -> Option<RunGuard> {
    let mut running = RUNNING.lock().ok()?;
    if running.insert(profile_id) {
        Some(RunGuard(profile_id))
    } else {
        None
    }
}

/// Entry point used by the scheduler and the CLI: construct the client from
/// credentials and run. Missing credentials are a hard failure recorded
/// against the profile without any fetch attempt.
pub async fn run_with_credentials(
    pool: &Pool,
    bridge: &config::Bridge,
    profile_id: i64,
    is_resync: bool,
) -> bool {
    if bridge.server_token.trim().is_empty() || bridge.endpoint_url.trim().is_empty() {
        return log_credentials_failure(pool, profile_id).await;
    }
    let client = match BridgeClient::new(bridge.server_token.clone(), &bridge.endpoint_url) {
        Ok(client) => client,
        Err(err) => {
            error!(?err, profile_id, "invalid API endpoint");
            return log_credentials_failure(pool, profile_id).await;
        }
    };
    run_extraction(pool, &client, profile_id, is_resync).await
}

async fn log_credentials_failure(pool: &Pool, profile_id: i64) -> bool {
    let message = "API credentials could not be retrieved. Please check settings.";
    error!(profile_id, "{}", message);
    if let Err(err) = db::insert_run_log(pool, profile_id, RunStatus::Failure, message, 0, &[]).await
    {
        error!(?err, profile_id, "failed to write run log");
    }
    false
}

/// Run one extraction with the production inter-page delay.
pub async fn run_extraction(
    pool: &Pool,
    api: &dyn MlsApi,
    profile_id: i64,
    is_resync: bool,
) -> bool {
    run_extraction_with_delay(pool, api, profile_id, is_resync, PAGE_DELAY).await
}

/// As `run_extraction`, with an injectable throttle (tests pass zero).
#[instrument(skip_all)]
pub async fn run_extraction_with_delay(
    pool: &Pool,
    api: &dyn MlsApi,
    profile_id: i64,
    is_resync: bool,
    page_delay: Duration,
) -> bool {
    let Some(_guard) = try_acquire(profile_id) else {
        warn!(profile_id, "a run is already in flight for this profile; skipping");
        return false;
    };

    match run_inner(pool, api, profile_id, is_resync, page_delay).await {
        Ok(report) => {
            let run_type = if is_resync { "Full Re-sync" } else { "Standard Run" };
            let message = format!(
                "{} completed. {} listings were added or updated.",
                run_type, report.total
            );
            info!(profile_id, count = report.total, "extraction succeeded");
            if let Err(err) = db::insert_run_log(
                pool,
                profile_id,
                RunStatus::Success,
                &message,
                report.total,
                &report.processed,
            )
            .await
            {
                error!(?err, profile_id, "failed to write run log");
            }
            true
        }
        Err(err) => {
            error!(?err, profile_id, "extraction failed");
            let message = format!("{:#}", err);
            if let Err(log_err) =
                db::insert_run_log(pool, profile_id, RunStatus::Failure, &message, 0, &[]).await
            {
                error!(?log_err, profile_id, "failed to write run log");
            }
            false
        }
    }
}

struct RunReport {
    total: i64,
    processed: Vec<ProcessedListing>,
}

async fn run_inner(
    pool: &Pool,
    api: &dyn MlsApi,
    profile_id: i64,
    is_resync: bool,
    page_delay: Duration,
) -> anyhow::Result<RunReport> {
    if is_resync {
        let deleted = db::delete_listings_for_profile(pool, profile_id).await?;
        db::reset_watermark(pool, profile_id).await?;
        info!(profile_id, deleted, "resync: cleared local rows and watermark");
    }

    let profile = db::get_profile(pool, profile_id).await?;
    let filter = build_filter_query(&profile, is_resync, chrono::Utc::now());
    info!(profile_id, %filter, "starting extraction");

    // Ascending order makes the last record of the run a safe high-watermark.
    let first = api.first_page_url(
        Resource::Property,
        &PageQuery {
            filter,
            top: PAGE_SIZE,
            orderby: Some("ModificationTimestamp asc".into()),
        },
    )?;
    let mut pager = Pager::new(api, first, page_delay);

    let mut new_last_modified = profile.last_modified.clone();
    let mut total: i64 = 0;
    let mut processed: Vec<ProcessedListing> = Vec::new();

    while let Some(batch) = pager.next_page().await? {
        if batch.is_empty() {
            continue;
        }

        let mut agent_ids: Vec<String> = Vec::new();
        let mut office_ids: Vec<String> = Vec::new();
        let mut open_house_keys: Vec<String> = Vec::new();
        for listing in &batch {
            collect_id(listing, "ListAgentMlsId", &mut agent_ids);
            collect_id(listing, "BuyerAgentMlsId", &mut agent_ids);
            collect_id(listing, "ListOfficeMlsId", &mut office_ids);
            collect_id(listing, "BuyerOfficeMlsId", &mut office_ids);
            collect_id(listing, "ListingKey", &mut open_house_keys);
        }

        let agents =
            related::resolve_keyed(api, Resource::Member, "MemberMlsId", &agent_ids, page_delay)
                .await;
        let offices =
            related::resolve_keyed(api, Resource::Office, "OfficeMlsId", &office_ids, page_delay)
                .await;
        let open_houses = related::resolve_grouped(
            api,
            Resource::OpenHouse,
            "ListingKey",
            &open_house_keys,
            page_delay,
        )
        .await;
        let maps = RelatedMaps {
            agents: &agents,
            offices: &offices,
            open_houses: &open_houses,
        };

        for listing in &batch {
            let Some((row, summary)) = normalize(profile_id, listing, &maps) else {
                continue;
            };
            db::upsert_listing(pool, &row).await?;
            if let Some((lat, lon)) = row.coordinates {
                db::update_coordinates(pool, &row.listing_key, lat, lon).await?;
            }
            processed.push(summary);
            total += 1;
        }

        if let Some(ts) = batch
            .last()
            .and_then(|l| l.get("ModificationTimestamp"))
            .and_then(Value::as_str)
        {
            new_last_modified = ts.to_string();
        }
    }

    // A run that fetched nothing leaves the watermark untouched so a transient
    // filter problem cannot push it past unseen records.
    if total > 0 {
        db::set_watermark(pool, profile_id, &new_last_modified).await?;
    }

    Ok(RunReport { total, processed })
}

fn collect_id(listing: &serde_json::Map<String, Value>, field: &str, out: &mut Vec<String>) {
    if let Some(id) = listing.get(field).and_then(Value::as_str) {
        if !id.is_empty() {
            out.push(id.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_is_exclusive_per_profile_and_released_on_drop() {
        let g1 = try_acquire(9001).expect("first acquire");
        assert!(try_acquire(9001).is_none());
        // A different profile is unaffected.
        let g2 = try_acquire(9002).expect("other profile");
        drop(g1);
        assert!(try_acquire(9001).is_some());
        drop(g2);
    }

    #[test]
    fn collect_id_skips_missing_and_empty() {
        let listing: serde_json::Map<String, Value> = serde_json::from_value(serde_json::json!({
            "ListAgentMlsId": "AN1",
            "BuyerAgentMlsId": "",
        }))
        .unwrap();
        let mut out = Vec::new();
        collect_id(&listing, "ListAgentMlsId", &mut out);
        collect_id(&listing, "BuyerAgentMlsId", &mut out);
        collect_id(&listing, "ListOfficeMlsId", &mut out);
        assert_eq!(out, vec!["AN1"]);
    }
}
