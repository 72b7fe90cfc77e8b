//! Wire types for the Bridge OData API responses.

use serde::Deserialize;
use serde_json::{Map, Value};

/// One page of a filtered collection. The server signals more data with
/// `@odata.nextLink` and reports request-level failures in `error` even when
/// the HTTP status is 200.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageEnvelope {
    #[serde(default)]
    pub value: Vec<Map<String, Value>>,
    #[serde(rename = "@odata.nextLink")]
    pub next_link: Option<String>,
    pub error: Option<ApiErrorBody>,
}

/// Error payload embedded in an envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    pub message: Option<String>,
}
