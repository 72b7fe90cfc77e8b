//! HTTP client and pagination for the Bridge OData API.
//!
//! `BridgeClient` holds the credentials and base URL as immutable state;
//! everything else takes them by reference. The `MlsApi` trait is the seam
//! used by the sync engine and the tests.

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde_json::{Map, Value};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::bridge::model::PageEnvelope;

pub mod model;

/// Fixed throttle between successive page requests. This is a deliberate
/// rate-limit courtesy, not an error backoff.
pub const PAGE_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("API request error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("API returned status {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("API error: {message}")]
    Api { message: String },
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

/// Remote collections addressable through the same endpoint. The configured
/// endpoint points at `Property`; the others substitute the final path segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Property,
    Member,
    Office,
    OpenHouse,
}

impl Resource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resource::Property => "Property",
            Resource::Member => "Member",
            Resource::Office => "Office",
            Resource::OpenHouse => "OpenHouse",
        }
    }
}

/// Query parameters for the first page of a filtered fetch. Follow-up pages
/// come from the server's `@odata.nextLink` verbatim.
#[derive(Debug, Clone)]
pub struct PageQuery {
    pub filter: String,
    pub top: u32,
    pub orderby: Option<String>,
}

#[async_trait]
pub trait MlsApi: Send + Sync {
    /// Issue one GET and decode the page envelope. Non-2xx statuses are
    /// surfaced as `BridgeError::Status`; the `error` field inside a 200 body
    /// is left for the caller to interpret.
    async fn fetch_page(&self, url: Url) -> Result<PageEnvelope, BridgeError>;

    /// Build the URL for the first page of a filtered fetch against a resource.
    fn first_page_url(&self, resource: Resource, query: &PageQuery) -> Result<Url, BridgeError>;
}

#[derive(Clone)]
pub struct BridgeClient {
    http: Client,
    base_url: Url,
    token: String,
}

impl fmt::Debug for BridgeClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl BridgeClient {
    /// `endpoint_url` must be the absolute URL of the `Property` resource.
    pub fn new(token: String, endpoint_url: &str) -> Result<Self, BridgeError> {
        let base_url =
            Url::parse(endpoint_url).map_err(|e| BridgeError::InvalidUrl(e.to_string()))?;
        Ok(Self::with_base_url(token, base_url))
    }

    pub fn with_base_url(token: String, base_url: Url) -> Self {
        let http = Client::builder()
            .user_agent("mls-sync/0.1")
            .timeout(Duration::from_secs(60))
            .build()
            .expect("reqwest client");
        Self {
            http,
            base_url,
            token,
        }
    }

    /// Absolute URL of a resource, derived by replacing the trailing path
    /// segment of the configured `Property` endpoint.
    fn resource_url(&self, resource: Resource) -> Result<Url, BridgeError> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| BridgeError::InvalidUrl("endpoint URL cannot be a base".into()))?;
            segments.pop();
            segments.push(resource.as_str());
        }
        Ok(url)
    }
}

#[async_trait]
impl MlsApi for BridgeClient {
    async fn fetch_page(&self, url: Url) -> Result<PageEnvelope, BridgeError> {
        debug!(url = %redact_token(&url), "fetching page");
        let res = self.http.get(url).send().await?;
        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            warn!(%status, "bridge request failed");
            return Err(BridgeError::Status { status, body });
        }
        let envelope = res.json::<PageEnvelope>().await?;
        Ok(envelope)
    }

    fn first_page_url(&self, resource: Resource, query: &PageQuery) -> Result<Url, BridgeError> {
        let mut url = self.resource_url(resource)?;
        url.query_pairs_mut()
            .append_pair("access_token", &self.token)
            .append_pair("$filter", &query.filter)
            .append_pair("$top", &query.top.to_string());
        if let Some(orderby) = &query.orderby {
            url.query_pairs_mut().append_pair("$orderby", orderby);
        }
        Ok(url)
    }
}

fn redact_token(url: &Url) -> String {
    let mut redacted = url.clone();
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            if k == "access_token" {
                (k.into_owned(), "[REDACTED]".to_string())
            } else {
                (k.into_owned(), v.into_owned())
            }
        })
        .collect();
    redacted.query_pairs_mut().clear();
    for (k, v) in &pairs {
        redacted.query_pairs_mut().append_pair(k, v);
    }
    redacted.to_string()
}

/// Pull-based cursor follower. The caller drains pages one at a time so it can
/// process each batch (and advance its watermark) before the next request.
pub struct Pager<'a> {
    api: &'a dyn MlsApi,
    next: Option<Url>,
    delay: Duration,
    fetched_any: bool,
}

impl<'a> Pager<'a> {
    pub fn new(api: &'a dyn MlsApi, first: Url, delay: Duration) -> Self {
        Self {
            api,
            next: Some(first),
            delay,
            fetched_any: false,
        }
    }

    /// Fetch the next page, or `None` once the cursor is exhausted. An `error`
    /// body in the envelope aborts pagination with `BridgeError::Api`.
    pub async fn next_page(&mut self) -> Result<Option<Vec<Map<String, Value>>>, BridgeError> {
        let Some(url) = self.next.take() else {
            return Ok(None);
        };
        if self.fetched_any && !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.fetched_any = true;

        let page = self.api.fetch_page(url).await?;
        if let Some(err) = page.error {
            return Err(BridgeError::Api {
                message: err.message.unwrap_or_else(|| "Unknown API Error".into()),
            });
        }
        self.next = match page.next_link {
            Some(link) => {
                Some(Url::parse(&link).map_err(|e| BridgeError::InvalidUrl(e.to_string()))?)
            }
            None => None,
        };
        Ok(Some(page.value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    fn record(key: &str) -> Map<String, Value> {
        let mut m = Map::new();
        m.insert("ListingKey".into(), json!(key));
        m
    }

    #[derive(Clone, Default)]
    struct ScriptedApi {
        responses: Arc<Mutex<VecDeque<Result<PageEnvelope, BridgeError>>>>,
        requested: Arc<Mutex<Vec<String>>>,
    }

    impl ScriptedApi {
        fn with_responses(responses: Vec<Result<PageEnvelope, BridgeError>>) -> Self {
            Self {
                responses: Arc::new(Mutex::new(VecDeque::from(responses))),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl MlsApi for ScriptedApi {
        async fn fetch_page(&self, url: Url) -> Result<PageEnvelope, BridgeError> {
            self.requested.lock().await.push(url.to_string());
            self.responses
                .lock()
                .await
                .pop_front()
                .unwrap_or(Ok(PageEnvelope::default()))
        }

        fn first_page_url(
            &self,
            resource: Resource,
            query: &PageQuery,
        ) -> Result<Url, BridgeError> {
            let mut url = Url::parse("https://mock.test/api").unwrap();
            url.path_segments_mut().unwrap().push(resource.as_str());
            url.query_pairs_mut().append_pair("$filter", &query.filter);
            Ok(url)
        }
    }

    #[tokio::test]
    async fn pager_follows_cursor_until_absent() {
        let api = ScriptedApi::with_responses(vec![
            Ok(PageEnvelope {
                value: vec![record("a")],
                next_link: Some("https://mock.test/api/Property?page=2".into()),
                error: None,
            }),
            Ok(PageEnvelope {
                value: vec![record("b")],
                next_link: None,
                error: None,
            }),
        ]);

        let first = Url::parse("https://mock.test/api/Property?page=1").unwrap();
        let mut pager = Pager::new(&api, first, Duration::ZERO);

        let p1 = pager.next_page().await.unwrap().unwrap();
        assert_eq!(p1.len(), 1);
        let p2 = pager.next_page().await.unwrap().unwrap();
        assert_eq!(p2[0]["ListingKey"], "b");
        assert!(pager.next_page().await.unwrap().is_none());

        let requested = api.requested.lock().await.clone();
        assert_eq!(requested.len(), 2);
        assert!(requested[1].contains("page=2"));
    }

    #[tokio::test]
    async fn pager_aborts_on_error_envelope() {
        let api = ScriptedApi::with_responses(vec![Ok(PageEnvelope {
            value: vec![],
            next_link: None,
            error: Some(model::ApiErrorBody {
                message: Some("token expired".into()),
            }),
        })]);

        let first = Url::parse("https://mock.test/api/Property").unwrap();
        let mut pager = Pager::new(&api, first, Duration::ZERO);
        let err = pager.next_page().await.unwrap_err();
        assert!(matches!(err, BridgeError::Api { .. }));
        assert!(err.to_string().contains("token expired"));
    }

    #[tokio::test]
    async fn pager_surfaces_transport_error() {
        let api = ScriptedApi::with_responses(vec![Err(BridgeError::Status {
            status: reqwest::StatusCode::BAD_GATEWAY,
            body: "bad gateway".into(),
        })]);

        let first = Url::parse("https://mock.test/api/Property").unwrap();
        let mut pager = Pager::new(&api, first, Duration::ZERO);
        assert!(pager.next_page().await.is_err());
    }

    #[test]
    fn first_page_url_includes_query_parameters() {
        let client = BridgeClient::new(
            "secret".into(),
            "https://api.bridgedataoutput.com/api/v2/OData/demo/Property",
        )
        .unwrap();
        let url = client
            .first_page_url(
                Resource::Property,
                &PageQuery {
                    filter: "StandardStatus eq 'Active'".into(),
                    top: 100,
                    orderby: Some("ModificationTimestamp asc".into()),
                },
            )
            .unwrap();
        let s = url.to_string();
        assert!(s.contains("access_token=secret"));
        assert!(s.contains("%24top=100"));
        assert!(s.contains("ModificationTimestamp"));
    }

    #[test]
    fn resource_url_substitutes_trailing_segment() {
        let client = BridgeClient::new(
            "secret".into(),
            "https://api.bridgedataoutput.com/api/v2/OData/demo/Property",
        )
        .unwrap();
        let url = client
            .first_page_url(
                Resource::Member,
                &PageQuery {
                    filter: String::new(),
                    top: 200,
                    orderby: None,
                },
            )
            .unwrap();
        assert!(url.path().ends_with("/Member"));
        assert!(!url.path().contains("Property"));
    }

    #[test]
    fn redact_token_hides_credentials() {
        let url =
            Url::parse("https://api.test/Property?access_token=secret&%24top=100").unwrap();
        let s = redact_token(&url);
        assert!(!s.contains("secret"));
        assert!(s.contains("REDACTED"));
    }
}
