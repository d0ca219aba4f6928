use std::collections::VecDeque;
use std::thread;
use std::time::Duration;

use chrono::NaiveDate;
use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::cache::CacheStore;
use crate::config::ResolvedConfig;
use crate::domain::{QueryIdentity, RawPublicationRecord, clean_identifier};
use crate::error::HarvestError;

const EXTERNAL_DOI_FIELD: &str = "External DOI";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchQuery {
    pub search_for: String,
    /// 1-based, as the API counts pages.
    pub page: usize,
    pub page_size: usize,
}

impl SearchQuery {
    pub fn for_author(identity: &QueryIdentity, page_index: usize, page_size: usize) -> Self {
        Self {
            search_for: format!(":author: \"{}\"", identity.key()),
            page: page_index + 1,
            page_size,
        }
    }

    pub fn cache_key(&self) -> String {
        format!(
            "POST/articles/search?search_for={}&page={}&page_size={}",
            self.search_for, self.page, self.page_size
        )
    }
}

pub fn article_cache_key(work_id: u64) -> String {
    format!("GET/articles/{work_id}")
}

pub trait SearchClient {
    fn search(&self, query: &SearchQuery) -> Result<Value, HarvestError>;

    fn article(&self, work_id: u64) -> Result<Value, HarvestError>;

    fn has_token(&self) -> bool;
}

#[derive(Clone)]
pub struct FigshareHttpClient {
    client: Client,
    base_url: String,
    token: Option<String>,
    max_retries: u32,
    retry_base_delay: Duration,
    rate_limit_delay: Duration,
}

impl FigshareHttpClient {
    pub fn new(config: &ResolvedConfig) -> Result<Self, HarvestError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("bibharvest/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| HarvestError::FigshareHttp(err.to_string()))?,
        );
        if let Some(token) = &config.token {
            let mut value = HeaderValue::from_str(&format!("token {token}"))
                .map_err(|err| HarvestError::FigshareHttp(err.to_string()))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
            info!("Figshare API: using authenticated requests");
        } else {
            warn!(
                "Figshare API: no token configured, anonymous requests may be rate limited or rejected"
            );
        }
        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()
            .map_err(|err| HarvestError::FigshareHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: config.endpoints.figshare.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            max_retries: config.max_retries.max(1),
            retry_base_delay: config.retry_base_delay,
            rate_limit_delay: config.rate_limit_delay,
        })
    }

    /// Retries 403 responses with exponential backoff; the last 403 is an
    /// authentication failure.
    fn send_with_retries<F>(&self, what: &str, mut make_req: F) -> Result<Response, HarvestError>
    where
        F: FnMut() -> RequestBuilder,
    {
        let mut attempt = 0u32;
        loop {
            let response = make_req()
                .send()
                .map_err(|err| HarvestError::FigshareHttp(err.to_string()))?;
            let status = response.status();
            if status == StatusCode::FORBIDDEN && attempt + 1 < self.max_retries {
                let delay = self.retry_base_delay * 2u32.pow(attempt);
                warn!(
                    request = what,
                    attempt = attempt + 1,
                    max_retries = self.max_retries,
                    "403 Forbidden, retrying in {delay:?}"
                );
                thread::sleep(delay);
                attempt += 1;
                continue;
            }
            if !self.rate_limit_delay.is_zero() {
                thread::sleep(self.rate_limit_delay);
            }
            if status == StatusCode::FORBIDDEN || status == StatusCode::UNAUTHORIZED {
                let message = response
                    .text()
                    .unwrap_or_else(|_| "request rejected".to_string());
                return Err(HarvestError::Authentication {
                    status: status.as_u16(),
                    message,
                });
            }
            return Ok(response);
        }
    }

    fn decode(what: &str, response: Response) -> Result<Value, HarvestError> {
        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .unwrap_or_else(|_| "Figshare request failed".to_string());
            return Err(HarvestError::FigshareStatus {
                status: status.as_u16(),
                message,
            });
        }
        let is_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_ascii_lowercase().starts_with("application/json"))
            .unwrap_or(false);
        let body = response
            .text()
            .map_err(|err| HarvestError::FigshareHttp(err.to_string()))?;
        if !is_json || body.trim().is_empty() {
            return Err(HarvestError::TransientRequest(format!(
                "{what}: empty or non-JSON body (status {})",
                status.as_u16()
            )));
        }
        serde_json::from_str(&body)
            .map_err(|err| HarvestError::TransientRequest(format!("{what}: {err}")))
    }
}

impl SearchClient for FigshareHttpClient {
    fn search(&self, query: &SearchQuery) -> Result<Value, HarvestError> {
        let url = format!("{}/articles/search", self.base_url);
        let what = format!("POST {url} page {}", query.page);
        let response = self.send_with_retries(&what, || self.client.post(&url).json(query))?;
        Self::decode(&what, response)
    }

    fn article(&self, work_id: u64) -> Result<Value, HarvestError> {
        let url = format!("{}/articles/{work_id}", self.base_url);
        let what = format!("GET {url}");
        let response = self.send_with_retries(&what, || self.client.get(&url))?;
        Self::decode(&what, response)
    }

    fn has_token(&self) -> bool {
        self.token.is_some()
    }
}

enum PageOutcome {
    Hits(Vec<Value>),
    AuthenticationFailed,
}

pub struct MetadataFetcher<C> {
    client: C,
    cache: CacheStore<Value>,
    page_size: usize,
    repository_prefix: Option<String>,
    fetch_details: bool,
}

impl<C: SearchClient> MetadataFetcher<C> {
    pub fn new(client: C, cache: CacheStore<Value>, config: &ResolvedConfig) -> Self {
        Self {
            client,
            cache,
            page_size: config.page_size.max(1),
            repository_prefix: config.repository_prefix.clone(),
            fetch_details: config.fetch_details,
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn cache(&self) -> &CacheStore<Value> {
        &self.cache
    }

    pub fn fetch(
        &mut self,
        identity: &QueryIdentity,
        since: Option<NaiveDate>,
    ) -> Publications<'_, C> {
        info!(identity = %identity, "retrieving publications");
        Publications {
            fetcher: self,
            identity: identity.clone(),
            since,
            next_page: 0,
            pending: VecDeque::new(),
            exhausted: false,
            authentication_failed: false,
        }
    }

    fn page(&mut self, identity: &QueryIdentity, index: usize) -> PageOutcome {
        let query = SearchQuery::for_author(identity, index, self.page_size);
        let key = query.cache_key();
        if let Some(cached) = self.cache.get(&key) {
            debug!(identity = %identity, page = index, "search page from cache");
            return PageOutcome::Hits(hits_of(cached));
        }

        info!(identity = %identity, page = index, "retrieving search page");
        match self.client.search(&query) {
            Ok(body) if body.is_array() => {
                let hits = hits_of(&body);
                self.cache.put_logged(key, body);
                PageOutcome::Hits(hits)
            }
            Ok(_) => {
                warn!(identity = %identity, page = index, "search page is not a JSON list");
                PageOutcome::Hits(Vec::new())
            }
            Err(HarvestError::Authentication { status, message }) => {
                if self.client.has_token() {
                    error!(
                        identity = %identity,
                        status,
                        "Figshare rejected the token; it may be invalid or lack permissions: {message}"
                    );
                } else {
                    error!(
                        identity = %identity,
                        status,
                        "Figshare requires authentication; set FIGSHARE_TOKEN: {message}"
                    );
                }
                PageOutcome::AuthenticationFailed
            }
            Err(err) => {
                warn!(identity = %identity, page = index, "treating page as empty: {err}");
                PageOutcome::Hits(Vec::new())
            }
        }
    }

    fn details(&mut self, work_id: u64) -> Option<Value> {
        let key = article_cache_key(work_id);
        if let Some(cached) = self.cache.get(&key) {
            return Some(cached.clone());
        }
        match self.client.article(work_id) {
            Ok(body) if body.is_object() => {
                self.cache.put_logged(key, body.clone());
                Some(body)
            }
            Ok(_) => {
                warn!(work_id, "article details are not a JSON object");
                None
            }
            Err(err) => {
                warn!(work_id, "failed to retrieve article details: {err}");
                None
            }
        }
    }

    fn in_repository(&self, hit: &Value) -> bool {
        let Some(prefix) = &self.repository_prefix else {
            return true;
        };
        hit.get("url_public_html")
            .and_then(Value::as_str)
            .map(|url| url.starts_with(prefix.as_str()))
            .unwrap_or(false)
    }
}

pub struct Publications<'a, C> {
    fetcher: &'a mut MetadataFetcher<C>,
    identity: QueryIdentity,
    since: Option<NaiveDate>,
    next_page: usize,
    pending: VecDeque<Value>,
    exhausted: bool,
    authentication_failed: bool,
}

impl<C> Publications<'_, C> {
    pub fn identity(&self) -> &QueryIdentity {
        &self.identity
    }

    pub fn authentication_failed(&self) -> bool {
        self.authentication_failed
    }

    pub fn pages_consulted(&self) -> usize {
        self.next_page
    }
}

impl<C: SearchClient> Iterator for Publications<'_, C> {
    type Item = RawPublicationRecord;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(hit) = self.pending.pop_front() {
                if !self.fetcher.in_repository(&hit) {
                    debug!(identity = %self.identity, "skipping non-repository article");
                    continue;
                }
                let details = match (self.fetcher.fetch_details, work_id_of(&hit)) {
                    (true, Some(id)) => self.fetcher.details(id),
                    _ => None,
                };
                let Some(record) = record_from_json(&hit, details.as_ref()) else {
                    warn!(identity = %self.identity, "skipping search hit without an id");
                    continue;
                };
                if let (Some(since), Some(published)) = (self.since, record.published)
                    && published < since
                {
                    debug!(work_id = record.work_id, %published, "published before cutoff");
                    continue;
                }
                return Some(record);
            }

            if self.exhausted {
                return None;
            }

            let index = self.next_page;
            self.next_page += 1;
            match self.fetcher.page(&self.identity, index) {
                PageOutcome::Hits(hits) => {
                    if hits.len() < self.fetcher.page_size {
                        self.exhausted = true;
                    }
                    self.pending.extend(hits);
                }
                PageOutcome::AuthenticationFailed => {
                    self.authentication_failed = true;
                    self.exhausted = true;
                    self.pending.clear();
                    return None;
                }
            }
        }
    }
}

fn hits_of(body: &Value) -> Vec<Value> {
    body.as_array().cloned().unwrap_or_default()
}

fn work_id_of(hit: &Value) -> Option<u64> {
    hit.get("id").and_then(Value::as_u64)
}

pub fn record_from_json(hit: &Value, details: Option<&Value>) -> Option<RawPublicationRecord> {
    let work_id = work_id_of(hit)?;
    let field = |name: &str| pick(hit, details, name);

    let title = field("title")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string();
    let url = field("url_public_html")
        .and_then(Value::as_str)
        .map(str::to_string);
    let published = field("timeline")
        .and_then(|timeline| timeline.get("firstOnline"))
        .and_then(Value::as_str)
        .and_then(parse_date)
        .or_else(|| {
            field("published_date")
                .and_then(Value::as_str)
                .and_then(parse_date)
        });
    let authors = field("authors")
        .and_then(Value::as_array)
        .map(|authors| {
            authors
                .iter()
                .filter_map(|author| author.get("full_name").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    let identifier = details
        .and_then(external_doi)
        .map(|value| clean_identifier(&value))
        .filter(|value| !value.is_empty());

    Some(RawPublicationRecord {
        work_id,
        title,
        identifier,
        published,
        authors,
        url,
    })
}

fn pick<'a>(hit: &'a Value, details: Option<&'a Value>, name: &str) -> Option<&'a Value> {
    details
        .and_then(|d| d.get(name))
        .filter(|value| !value.is_null())
        .or_else(|| hit.get(name))
}

fn external_doi(details: &Value) -> Option<String> {
    let fields = details.get("custom_fields")?;
    let value = match fields {
        Value::Array(items) => items
            .iter()
            .find(|item| item.get("name").and_then(Value::as_str) == Some(EXTERNAL_DOI_FIELD))
            .and_then(|item| item.get("value")),
        Value::Object(map) => map.get(EXTERNAL_DOI_FIELD),
        _ => None,
    }?;
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Array(items) => items.first().and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}

fn parse_date(value: &str) -> Option<NaiveDate> {
    let day = value.get(..10)?;
    NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
}
