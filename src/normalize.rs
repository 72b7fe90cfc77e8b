//! Maps a raw remote listing record into the local row shape.
//!
//! Known fields land in typed columns; everything else is preserved verbatim
//! in the `AdditionalData` catch-all so schema growth on the remote side never
//! loses data. Resolved related entities are embedded as serialized JSON.

use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::model::ProcessedListing;

/// Typed local row, upserted by `ListingKey`. Timestamp columns keep the
/// ISO-8601 strings the API sends.
#[derive(Debug, Clone, Default)]
pub struct ListingRow {
    pub source_extraction_id: i64,
    pub listing_key: String,
    pub listing_id: Option<String>,
    pub modification_timestamp: Option<String>,
    pub creation_timestamp: Option<String>,
    pub status_change_timestamp: Option<String>,
    pub close_date: Option<String>,
    pub listing_contract_date: Option<String>,
    pub standard_status: Option<String>,
    pub mls_status: Option<String>,
    pub property_type: Option<String>,
    pub property_sub_type: Option<String>,
    pub list_price: Option<f64>,
    pub original_list_price: Option<f64>,
    pub close_price: Option<f64>,
    pub public_remarks: Option<String>,
    pub unparsed_address: Option<String>,
    pub street_number: Option<String>,
    pub street_name: Option<String>,
    pub unit_number: Option<String>,
    pub city: Option<String>,
    pub state_or_province: Option<String>,
    pub postal_code: Option<String>,
    pub county_or_parish: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub bedrooms_total: Option<i64>,
    pub bathrooms_total_integer: Option<i64>,
    pub living_area: Option<f64>,
    pub lot_size_acres: Option<f64>,
    pub year_built: Option<i64>,
    pub garage_spaces: Option<i64>,
    pub waterfront_yn: Option<bool>,
    pub open_house_yn: Option<bool>,
    pub media: Option<String>,
    pub photos_count: Option<i64>,
    pub virtual_tour_url_unbranded: Option<String>,
    pub list_agent_mls_id: Option<String>,
    pub buyer_agent_mls_id: Option<String>,
    pub list_office_mls_id: Option<String>,
    pub buyer_office_mls_id: Option<String>,
    pub list_office_name: Option<String>,
    pub list_agent_data: Option<String>,
    pub buyer_agent_data: Option<String>,
    pub list_office_data: Option<String>,
    pub buyer_office_data: Option<String>,
    pub open_house_data: Option<String>,
    pub additional_data: Option<String>,
    /// `(latitude, longitude)`, derived when both source fields are numeric.
    /// Written to the `Coordinates` column in a second step after the upsert.
    pub coordinates: Option<(f64, f64)>,
}

/// Related-entity payloads resolved for the current page.
pub struct RelatedMaps<'a> {
    pub agents: &'a HashMap<String, Value>,
    pub offices: &'a HashMap<String, Value>,
    pub open_houses: &'a HashMap<String, Vec<Value>>,
}

/// Normalize one raw record. Returns `None` when the record has no
/// `ListingKey` (such records are skipped, not fatal).
pub fn normalize(
    profile_id: i64,
    record: &Map<String, Value>,
    related: &RelatedMaps<'_>,
) -> Option<(ListingRow, ProcessedListing)> {
    let mut row = ListingRow {
        source_extraction_id: profile_id,
        ..Default::default()
    };
    let mut extra = Map::new();

    for (key, value) in record {
        match key.as_str() {
            "ListingKey" => row.listing_key = as_text(value).unwrap_or_default(),
            "ListingId" => row.listing_id = as_text(value),
            "ModificationTimestamp" => row.modification_timestamp = as_text(value),
            "CreationTimestamp" => row.creation_timestamp = as_text(value),
            "StatusChangeTimestamp" => row.status_change_timestamp = as_text(value),
            "CloseDate" => row.close_date = as_text(value),
            "ListingContractDate" => row.listing_contract_date = as_text(value),
            "StandardStatus" => row.standard_status = as_text(value),
            "MlsStatus" => row.mls_status = as_text(value),
            "PropertyType" => row.property_type = as_text(value),
            "PropertySubType" => row.property_sub_type = as_text(value),
            "ListPrice" => row.list_price = as_real(value),
            "OriginalListPrice" => row.original_list_price = as_real(value),
            "ClosePrice" => row.close_price = as_real(value),
            "PublicRemarks" => row.public_remarks = as_text(value),
            "UnparsedAddress" => row.unparsed_address = as_text(value),
            "StreetNumber" => row.street_number = as_text(value),
            "StreetName" => row.street_name = as_text(value),
            "UnitNumber" => row.unit_number = as_text(value),
            "City" => row.city = as_text(value),
            "StateOrProvince" => row.state_or_province = as_text(value),
            "PostalCode" => row.postal_code = as_text(value),
            "CountyOrParish" => row.county_or_parish = as_text(value),
            "Latitude" => row.latitude = as_real(value),
            "Longitude" => row.longitude = as_real(value),
            "BedroomsTotal" => row.bedrooms_total = as_int(value),
            "BathroomsTotalInteger" => row.bathrooms_total_integer = as_int(value),
            "LivingArea" => row.living_area = as_real(value),
            "LotSizeAcres" => row.lot_size_acres = as_real(value),
            "YearBuilt" => row.year_built = as_int(value),
            "GarageSpaces" => row.garage_spaces = as_int(value),
            "WaterfrontYN" => row.waterfront_yn = as_bool(value),
            "OpenHouseYN" => row.open_house_yn = as_bool(value),
            "Media" => row.media = as_json_text(value),
            "PhotosCount" => row.photos_count = as_int(value),
            "VirtualTourURLUnbranded" => row.virtual_tour_url_unbranded = as_text(value),
            "ListAgentMlsId" => row.list_agent_mls_id = as_text(value),
            "BuyerAgentMlsId" => row.buyer_agent_mls_id = as_text(value),
            "ListOfficeMlsId" => row.list_office_mls_id = as_text(value),
            "BuyerOfficeMlsId" => row.buyer_office_mls_id = as_text(value),
            "ListOfficeName" => row.list_office_name = as_text(value),
            _ => {
                extra.insert(key.clone(), value.clone());
            }
        }
    }

    if row.listing_key.is_empty() {
        return None;
    }

    if !extra.is_empty() {
        row.additional_data = serde_json::to_string(&extra).ok();
    }

    row.list_agent_data = embed(related.agents, row.list_agent_mls_id.as_deref());
    row.buyer_agent_data = embed(related.agents, row.buyer_agent_mls_id.as_deref());
    row.list_office_data = embed(related.offices, row.list_office_mls_id.as_deref());
    row.buyer_office_data = embed(related.offices, row.buyer_office_mls_id.as_deref());
    row.open_house_data = related
        .open_houses
        .get(&row.listing_key)
        .and_then(|group| serde_json::to_string(group).ok());

    if let (Some(lat), Some(lon)) = (row.latitude, row.longitude) {
        row.coordinates = Some((lat, lon));
    }

    let summary = ProcessedListing {
        mls_number: row.listing_id.clone().unwrap_or_else(|| "N/A".into()),
        address: format!(
            "{} {}, {}, {} {}",
            row.street_number.as_deref().unwrap_or(""),
            row.street_name.as_deref().unwrap_or(""),
            row.city.as_deref().unwrap_or(""),
            row.state_or_province.as_deref().unwrap_or(""),
            row.postal_code.as_deref().unwrap_or("")
        )
        .trim()
        .to_string(),
    };

    Some((row, summary))
}

fn embed(map: &HashMap<String, Value>, id: Option<&str>) -> Option<String> {
    let id = id.filter(|s| !s.is_empty())?;
    map.get(id).and_then(|v| serde_json::to_string(v).ok())
}

/// Text coercion: empty string and null become NULL, scalars are stringified,
/// arrays and objects are serialized JSON.
fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(if *b { "1" } else { "0" }.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(_) | Value::Object(_) => serde_json::to_string(value).ok(),
    }
}

fn as_real(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|i| i != 0),
        Value::String(s) => match s.as_str() {
            "true" | "1" | "Y" => Some(true),
            "false" | "0" | "N" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn as_json_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        _ => serde_json::to_string(value).ok(),
    }
}
