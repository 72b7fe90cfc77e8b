use super::model::{NewProfile, RunLogRow};
use crate::model::{ExtractionProfile, ProcessedListing, RunStatus, EPOCH_WATERMARK};
use crate::normalize::ListingRow;
use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use tracing::instrument;

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized).await?;
    // Enable WAL and stricter durability.
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/` and ensure the parent
/// directory exists. Leaves in-memory URLs untouched. Returns possibly-updated URL.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") {
        return url.to_string();
    }
    if url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);

    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };

    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = if let Some(rest) = path_part.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            format!("{}/{}", home.trim_end_matches('/'), rest)
        } else {
            path_part.to_string()
        }
    } else {
        path_part.to_string()
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let mut rebuilt = String::from("sqlite://");
    rebuilt.push_str(&expanded_path);
    if let Some(q) = query_part {
        rebuilt.push('?');
        rebuilt.push_str(q);
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn insert_profile(pool: &Pool, profile: &NewProfile) -> Result<i64> {
    let statuses = serde_json::to_string(&profile.statuses)?;
    let states = serde_json::to_string(&profile.states)?;
    let rec = sqlx::query(
        "INSERT INTO profiles (name, statuses, cities, states, list_agent_id, buyer_agent_id, \
         closed_lookback_months, schedule_minutes) VALUES (?, ?, ?, ?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(&profile.name)
    .bind(statuses)
    .bind(&profile.cities)
    .bind(states)
    .bind(&profile.list_agent_id)
    .bind(&profile.buyer_agent_id)
    .bind(profile.closed_lookback_months.map(|m| m as i64))
    .bind(profile.schedule_minutes)
    .fetch_one(pool)
    .await?;
    Ok(rec.get::<i64, _>("id"))
}

#[instrument(skip_all)]
pub async fn get_profile(pool: &Pool, profile_id: i64) -> Result<ExtractionProfile> {
    let row = sqlx::query(
        "SELECT id, name, statuses, cities, states, list_agent_id, buyer_agent_id, \
         closed_lookback_months, schedule_minutes, last_modified, last_run_status, last_run_time \
         FROM profiles WHERE id = ?",
    )
    .bind(profile_id)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Err(anyhow!("extraction profile {} not found", profile_id));
    };

    let statuses: Vec<String> = serde_json::from_str(&row.get::<String, _>("statuses"))
        .context("profile statuses column is not a JSON array")?;
    let states: Vec<String> = serde_json::from_str(&row.get::<String, _>("states"))
        .context("profile states column is not a JSON array")?;

    Ok(ExtractionProfile {
        id: row.get("id"),
        name: row.get("name"),
        statuses,
        cities: row.get("cities"),
        states,
        list_agent_id: row
            .try_get::<Option<String>, _>("list_agent_id")
            .ok()
            .flatten(),
        buyer_agent_id: row
            .try_get::<Option<String>, _>("buyer_agent_id")
            .ok()
            .flatten(),
        closed_lookback_months: row
            .try_get::<Option<i64>, _>("closed_lookback_months")
            .ok()
            .flatten()
            .map(|m| m as u32),
        schedule_minutes: row
            .try_get::<Option<i64>, _>("schedule_minutes")
            .ok()
            .flatten(),
        last_modified: row.get("last_modified"),
        last_run_status: row
            .try_get::<Option<String>, _>("last_run_status")
            .ok()
            .flatten()
            .and_then(|s| RunStatus::parse_status(&s)),
        last_run_time: row
            .try_get::<Option<String>, _>("last_run_time")
            .ok()
            .flatten()
            .and_then(|s| {
                chrono::DateTime::parse_from_rfc3339(&s)
                    .ok()
                    .map(|t| t.with_timezone(&Utc))
            }),
    })
}

/// Profiles whose schedule interval has elapsed since their last run.
#[instrument(skip_all)]
pub async fn due_profile_ids(pool: &Pool) -> Result<Vec<i64>> {
    let ids = sqlx::query_scalar::<_, i64>(
        "SELECT id FROM profiles WHERE schedule_minutes IS NOT NULL AND (\
             last_run_time IS NULL \
             OR datetime(last_run_time, '+' || schedule_minutes || ' minutes') <= datetime('now')\
         ) ORDER BY id",
    )
    .fetch_all(pool)
    .await?;
    Ok(ids)
}

#[instrument(skip_all)]
pub async fn set_watermark(pool: &Pool, profile_id: i64, watermark: &str) -> Result<()> {
    sqlx::query("UPDATE profiles SET last_modified = ? WHERE id = ?")
        .bind(watermark)
        .bind(profile_id)
        .execute(pool)
        .await
        .context("failed to persist watermark")?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn reset_watermark(pool: &Pool, profile_id: i64) -> Result<()> {
    set_watermark(pool, profile_id, EPOCH_WATERMARK).await
}

#[instrument(skip_all)]
pub async fn delete_listings_for_profile(pool: &Pool, profile_id: i64) -> Result<u64> {
    let res = sqlx::query("DELETE FROM listings WHERE source_extraction_id = ?")
        .bind(profile_id)
        .execute(pool)
        .await?;
    Ok(res.rows_affected())
}

#[instrument(skip_all)]
pub async fn clear_all_listings(pool: &Pool) -> Result<u64> {
    let res = sqlx::query("DELETE FROM listings").execute(pool).await?;
    Ok(res.rows_affected())
}

/// Replace-by-`ListingKey` upsert. The whole row is replaced; there is no
/// partial-column merge. The `Coordinates` column is written separately by
/// `update_coordinates`.
#[instrument(skip_all, fields(listing_key = %row.listing_key))]
pub async fn upsert_listing(pool: &Pool, row: &ListingRow) -> Result<()> {
    sqlx::query(
        "INSERT OR REPLACE INTO listings (\
            source_extraction_id, ListingKey, ListingId, ModificationTimestamp, \
            CreationTimestamp, StatusChangeTimestamp, CloseDate, ListingContractDate, \
            StandardStatus, MlsStatus, PropertyType, PropertySubType, \
            ListPrice, OriginalListPrice, ClosePrice, PublicRemarks, \
            UnparsedAddress, StreetNumber, StreetName, UnitNumber, \
            City, StateOrProvince, PostalCode, CountyOrParish, \
            Latitude, Longitude, \
            BedroomsTotal, BathroomsTotalInteger, LivingArea, LotSizeAcres, \
            YearBuilt, GarageSpaces, WaterfrontYN, OpenHouseYN, \
            Media, PhotosCount, VirtualTourURLUnbranded, \
            ListAgentMlsId, BuyerAgentMlsId, ListOfficeMlsId, BuyerOfficeMlsId, ListOfficeName, \
            ListAgentData, BuyerAgentData, ListOfficeData, BuyerOfficeData, OpenHouseData, \
            AdditionalData\
         ) VALUES (\
            ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, \
            ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?\
         )",
    )
    .bind(row.source_extraction_id)
    .bind(&row.listing_key)
    .bind(&row.listing_id)
    .bind(&row.modification_timestamp)
    .bind(&row.creation_timestamp)
    .bind(&row.status_change_timestamp)
    .bind(&row.close_date)
    .bind(&row.listing_contract_date)
    .bind(&row.standard_status)
    .bind(&row.mls_status)
    .bind(&row.property_type)
    .bind(&row.property_sub_type)
    .bind(row.list_price)
    .bind(row.original_list_price)
    .bind(row.close_price)
    .bind(&row.public_remarks)
    .bind(&row.unparsed_address)
    .bind(&row.street_number)
    .bind(&row.street_name)
    .bind(&row.unit_number)
    .bind(&row.city)
    .bind(&row.state_or_province)
    .bind(&row.postal_code)
    .bind(&row.county_or_parish)
    .bind(row.latitude)
    .bind(row.longitude)
    .bind(row.bedrooms_total)
    .bind(row.bathrooms_total_integer)
    .bind(row.living_area)
    .bind(row.lot_size_acres)
    .bind(row.year_built)
    .bind(row.garage_spaces)
    .bind(row.waterfront_yn.map(|b| b as i64))
    .bind(row.open_house_yn.map(|b| b as i64))
    .bind(&row.media)
    .bind(row.photos_count)
    .bind(&row.virtual_tour_url_unbranded)
    .bind(&row.list_agent_mls_id)
    .bind(&row.buyer_agent_mls_id)
    .bind(&row.list_office_mls_id)
    .bind(&row.buyer_office_mls_id)
    .bind(&row.list_office_name)
    .bind(&row.list_agent_data)
    .bind(&row.buyer_agent_data)
    .bind(&row.list_office_data)
    .bind(&row.buyer_office_data)
    .bind(&row.open_house_data)
    .bind(&row.additional_data)
    .execute(pool)
    .await
    .context("failed to upsert listing")?;
    Ok(())
}

/// Second-step geometry write. Not atomic with the upsert; a crash in between
/// leaves the row with stale coordinates until the next sync touches it.
#[instrument(skip_all)]
pub async fn update_coordinates(
    pool: &Pool,
    listing_key: &str,
    latitude: f64,
    longitude: f64,
) -> Result<()> {
    sqlx::query("UPDATE listings SET Coordinates = ? WHERE ListingKey = ?")
        .bind(format!("POINT({} {})", longitude, latitude))
        .bind(listing_key)
        .execute(pool)
        .await?;
    Ok(())
}

/// Append a run log entry and stamp the profile's last-run fields.
#[instrument(skip_all)]
pub async fn insert_run_log(
    pool: &Pool,
    profile_id: i64,
    status: RunStatus,
    message: &str,
    listings_count: i64,
    processed: &[ProcessedListing],
) -> Result<i64> {
    let processed_json = if processed.is_empty() {
        None
    } else {
        Some(serde_json::to_string(processed)?)
    };

    let mut tx = pool.begin().await?;
    let rec = sqlx::query(
        "INSERT INTO run_logs (profile_id, status, message, listings_count, processed) \
         VALUES (?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(profile_id)
    .bind(status.as_str())
    .bind(message)
    .bind(listings_count)
    .bind(processed_json)
    .fetch_one(&mut *tx)
    .await?;
    let id: i64 = rec.get("id");

    sqlx::query("UPDATE profiles SET last_run_status = ?, last_run_time = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(profile_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(id)
}

#[instrument(skip_all)]
pub async fn latest_run_log(pool: &Pool, profile_id: i64) -> Result<Option<RunLogRow>> {
    let row = sqlx::query(
        "SELECT id, profile_id, status, message, listings_count, processed, created_at \
         FROM run_logs WHERE profile_id = ? ORDER BY id DESC LIMIT 1",
    )
    .bind(profile_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|row| RunLogRow {
        id: row.get("id"),
        profile_id: row.get("profile_id"),
        status: row.get("status"),
        message: row.get("message"),
        listings_count: row.get("listings_count"),
        processed: row.try_get::<Option<String>, _>("processed").ok().flatten(),
        created_at: row.get("created_at"),
    }))
}
