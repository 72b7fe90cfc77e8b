//! Batched resolution of related entities (agents, offices, open houses)
//! referenced by id from a page of listing records.
//!
//! Lookups are chunked to stay under remote query-length limits. A failed
//! chunk degrades to missing enrichment for its ids; listing sync itself is
//! never aborted from here.

use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::warn;

use crate::bridge::{MlsApi, PageQuery, Pager, Resource};

/// Maximum ids per `in (...)` filter.
const CHUNK_SIZE: usize = 50;
/// Page size for secondary-resource fetches.
const RELATED_PAGE_SIZE: u32 = 200;

/// Resolve ids to single entities. Duplicate keys keep the last arrival.
pub async fn resolve_keyed(
    api: &dyn MlsApi,
    resource: Resource,
    key_field: &str,
    ids: &[String],
    delay: Duration,
) -> HashMap<String, Value> {
    let mut map = HashMap::new();
    for (key, item) in fetch_matches(api, resource, key_field, ids, delay).await {
        map.insert(key, item);
    }
    map
}

/// Resolve ids to entity groups (one listing key can map to several open
/// houses).
pub async fn resolve_grouped(
    api: &dyn MlsApi,
    resource: Resource,
    key_field: &str,
    ids: &[String],
    delay: Duration,
) -> HashMap<String, Vec<Value>> {
    let mut map: HashMap<String, Vec<Value>> = HashMap::new();
    for (key, item) in fetch_matches(api, resource, key_field, ids, delay).await {
        map.entry(key).or_default().push(item);
    }
    map
}

/// Fetch all entities matching the given ids, in arrival order, as
/// `(key, entity)` pairs. Ids are de-duplicated before chunking.
async fn fetch_matches(
    api: &dyn MlsApi,
    resource: Resource,
    key_field: &str,
    ids: &[String],
    delay: Duration,
) -> Vec<(String, Value)> {
    let mut seen = HashSet::new();
    let unique: Vec<&String> = ids.iter().filter(|id| seen.insert(id.as_str())).collect();
    if unique.is_empty() {
        return Vec::new();
    }

    let mut matches = Vec::new();
    for chunk in unique.chunks(CHUNK_SIZE) {
        let quoted: Vec<String> = chunk
            .iter()
            .map(|id| format!("'{}'", id.replace('\'', "''")))
            .collect();
        let query = PageQuery {
            filter: format!("{} in ({})", key_field, quoted.join(",")),
            top: RELATED_PAGE_SIZE,
            orderby: None,
        };

        let first = match api.first_page_url(resource, &query) {
            Ok(url) => url,
            Err(err) => {
                warn!(resource = resource.as_str(), %err, "skipping related-entity chunk");
                continue;
            }
        };

        let mut pager = Pager::new(api, first, delay);
        loop {
            match pager.next_page().await {
                Ok(Some(items)) => {
                    for item in items {
                        if let Some(key) = field_as_key(item.get(key_field)) {
                            matches.push((key, Value::Object(item)));
                        }
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    // Missing enrichment is non-fatal; the listing row simply
                    // carries no payload for these ids.
                    warn!(
                        resource = resource.as_str(),
                        chunk_len = chunk.len(),
                        %err,
                        "related-entity chunk fetch failed"
                    );
                    break;
                }
            }
        }
    }
    matches
}

fn field_as_key(value: Option<&Value>) -> Option<String> {
    match value {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}
