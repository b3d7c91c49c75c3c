//! Paginated Resource Fetching
//!
//! Follows the `next_url` cursor of the Cloud Controller list envelope until
//! it runs out, accumulating the `resources` of every page. No retry happens
//! here: wrap the whole fetch in [`RequestExecutor::run`] for that.
//!
//! [`RequestExecutor::run`]: super::executor::RequestExecutor::run

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, trace};

use super::error::RequestError;
use super::login::LoginToken;

/// One page of a list response
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ResourcePage {
    #[serde(default)]
    pub resources: Vec<Value>,
    #[serde(default)]
    pub next_url: Option<String>,
    #[serde(default)]
    pub total_results: Option<u64>,
    #[serde(default)]
    pub total_pages: Option<u64>,
}

impl ResourcePage {
    pub fn from_json(value: Value) -> Result<Self, RequestError> {
        Ok(serde_json::from_value(value)?)
    }

    /// Cursor to the next page; empty strings count as absent
    pub fn next(&self) -> Option<&str> {
        self.next_url.as_deref().filter(|url| !url.is_empty())
    }
}

/// The paging HTTP GET primitive
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn get_json(&self, url: &str, params: &[(String, String)]) -> Result<Value, RequestError>;

    /// Use `token` for subsequent requests
    fn install_token(&self, _token: &LoginToken) {}
}

/// Page-at-a-time walk over a listing. Restart by creating a new one.
pub struct Paginator<'a> {
    source: &'a dyn PageSource,
    next_url: Option<String>,
    params: &'a [(String, String)],
    pages: u32,
}

impl<'a> Paginator<'a> {
    pub fn new(source: &'a dyn PageSource, initial_url: &str, params: &'a [(String, String)]) -> Self {
        Self {
            source,
            next_url: Some(initial_url.to_string()),
            params,
            pages: 0,
        }
    }

    /// Fetch the next page, or `None` once the cursor is exhausted
    pub async fn next_page(&mut self) -> Result<Option<ResourcePage>, RequestError> {
        let Some(url) = self.next_url.take() else {
            return Ok(None);
        };

        // Query parameters belong to the first request; next_url carries its own
        let params: &[(String, String)] = if self.pages == 0 { self.params } else { &[] };
        let page = ResourcePage::from_json(self.source.get_json(&url, params).await?)?;
        self.pages += 1;

        trace!(
            "Fetched page {} of {}: {} resources",
            self.pages,
            url,
            page.resources.len()
        );

        self.next_url = page.next().map(str::to_string);
        Ok(Some(page))
    }

    pub fn pages_fetched(&self) -> u32 {
        self.pages
    }
}

/// Fetch every page of a listing and return the records in order
pub async fn fetch_all(
    source: &dyn PageSource,
    initial_url: &str,
    params: &[(String, String)],
) -> Result<Vec<Value>, RequestError> {
    let mut paginator = Paginator::new(source, initial_url, params);
    let mut resources = Vec::new();

    while let Some(page) = paginator.next_page().await? {
        resources.extend(page.resources);
    }

    debug!(
        "Fetched {} resources from {} in {} pages",
        resources.len(),
        initial_url,
        paginator.pages_fetched()
    );
    Ok(resources)
}

/// `PageSource` over HTTP with a bearer token
pub struct HttpPageSource {
    client: reqwest::Client,
    base_url: String,
    token: RwLock<Option<String>>,
}

impl HttpPageSource {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: RwLock::new(None),
        }
    }

    pub fn set_token(&self, token: impl Into<String>) {
        *self.token.write() = Some(token.into());
    }

    /// Resolve a (possibly relative) cursor against the API base URL
    pub fn resolve(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else if url.starts_with('/') {
            format!("{}{}", self.base_url, url)
        } else {
            format!("{}/{}", self.base_url, url)
        }
    }
}

#[async_trait]
impl PageSource for HttpPageSource {
    async fn get_json(&self, url: &str, params: &[(String, String)]) -> Result<Value, RequestError> {
        let url = self.resolve(url);
        let mut request = self.client.get(&url);
        if !params.is_empty() {
            request = request.query(params);
        }
        // Clone out so the lock is not held across the await
        let token = self.token.read().clone();
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            debug!("GET {} failed: HTTP {}", url, status.as_u16());
            return Err(RequestError::from_cf_response(status.as_u16(), &body));
        }

        Ok(serde_json::from_str(&body)?)
    }

    fn install_token(&self, token: &LoginToken) {
        self.set_token(token.value.clone());
    }
}
