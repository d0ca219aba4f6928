use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use tracing::debug;

use crate::domain::Doi;
use crate::error::HarvestError;

const BIBTEX_MEDIA_TYPE: &str = "application/x-bibtex";

pub trait CitationClient {
    /// `Ok(None)` when the resolver does not know the DOI.
    fn bibtex(&self, doi: &Doi) -> Result<Option<String>, HarvestError>;
}

pub trait ShortDoiClient {
    /// `Ok(None)` when the service does not know the short DOI.
    fn expand(&self, short: &Doi) -> Result<Option<Doi>, HarvestError>;

    fn shorten(&self, long: &Doi) -> Result<Option<Doi>, HarvestError>;
}

#[derive(Clone)]
pub struct DoiHttpClient {
    client: Client,
    base_url: String,
}

impl DoiHttpClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, HarvestError> {
        Ok(Self {
            client: build_client(timeout).map_err(HarvestError::DoiHttp)?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

impl CitationClient for DoiHttpClient {
    fn bibtex(&self, doi: &Doi) -> Result<Option<String>, HarvestError> {
        let url = format!("{}/{}", self.base_url, encode_doi_path(doi.as_str()));
        debug!(%doi, url = %url, "requesting BibTeX");
        let response = self
            .client
            .get(&url)
            .header(ACCEPT, BIBTEX_MEDIA_TYPE)
            .send()
            .map_err(|err| HarvestError::DoiHttp(err.to_string()))?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let message = response
                .text()
                .unwrap_or_else(|_| "DOI request failed".to_string());
            return Err(HarvestError::DoiStatus {
                status: status.as_u16(),
                message,
            });
        }
        let text = response
            .text()
            .map_err(|err| HarvestError::DoiHttp(err.to_string()))?;
        if text.trim().is_empty() {
            return Err(HarvestError::TransientRequest(format!(
                "empty BibTeX body for {doi}"
            )));
        }
        Ok(Some(text))
    }
}

#[derive(Clone)]
pub struct ShortDoiHttpClient {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ShortDoiResponse {
    #[serde(rename = "DOI")]
    doi: Option<String>,
    #[serde(rename = "ShortDOI")]
    short_doi: Option<String>,
}

impl ShortDoiHttpClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, HarvestError> {
        Ok(Self {
            client: build_client(timeout).map_err(HarvestError::ShortDoiHttp)?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

impl ShortDoiHttpClient {
    fn lookup(&self, doi: &Doi) -> Result<Option<ShortDoiResponse>, HarvestError> {
        let url = format!(
            "{}/{}?format=json",
            self.base_url,
            encode_doi_path(doi.as_str())
        );
        debug!(%doi, url = %url, "querying shortDOI");
        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|err| HarvestError::ShortDoiHttp(err.to_string()))?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(HarvestError::TransientRequest(format!(
                "shortDOI returned status {} for {doi}",
                status.as_u16()
            )));
        }
        response
            .json()
            .map(Some)
            .map_err(|err| HarvestError::TransientRequest(format!("shortDOI body: {err}")))
    }
}

impl ShortDoiClient for ShortDoiHttpClient {
    fn expand(&self, short: &Doi) -> Result<Option<Doi>, HarvestError> {
        Ok(self
            .lookup(short)?
            .and_then(|payload| payload.doi)
            .and_then(|value| value.parse::<Doi>().ok())
            .filter(|doi| !doi.is_short()))
    }

    fn shorten(&self, long: &Doi) -> Result<Option<Doi>, HarvestError> {
        Ok(self
            .lookup(long)?
            .and_then(|payload| payload.short_doi)
            .and_then(|value| value.parse::<Doi>().ok())
            .filter(Doi::is_short))
    }
}

fn build_client(timeout: Duration) -> Result<Client, String> {
    let mut headers = HeaderMap::new();
    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(&format!("bibharvest/{}", env!("CARGO_PKG_VERSION")))
            .map_err(|err| err.to_string())?,
    );
    Client::builder()
        .default_headers(headers)
        .timeout(timeout)
        .build()
        .map_err(|err| err.to_string())
}

pub fn encode_doi_path(value: &str) -> String {
    let mut out = String::new();
    for byte in value.as_bytes() {
        let ch = *byte as char;
        if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.' | '~' | '/') {
            out.push(ch);
        } else {
            out.push_str(&format!("%{:02X}", byte));
        }
    }
    out
}
