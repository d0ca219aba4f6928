use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use camino::Utf8PathBuf;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::domain::QueryIdentity;
use crate::error::HarvestError;

pub const DEFAULT_CONFIG_FILE: &str = "bibharvest.json";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub page_size: Option<usize>,
    #[serde(default)]
    pub rate_limit_delay_ms: Option<u64>,
    #[serde(default)]
    pub retry_base_delay_ms: Option<u64>,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub repository_prefix: Option<String>,
    #[serde(default)]
    pub fetch_details: Option<bool>,
    #[serde(default)]
    pub similarity_threshold: Option<f64>,
    #[serde(default)]
    pub candidate_rows: Option<usize>,
    #[serde(default)]
    pub cache_dir: Option<String>,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub endpoints: EndpointsEntry,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct EndpointsEntry {
    #[serde(default)]
    pub figshare: Option<String>,
    #[serde(default)]
    pub doi: Option<String>,
    #[serde(default)]
    pub short_doi: Option<String>,
    #[serde(default)]
    pub crossref: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub figshare: String,
    pub doi: String,
    pub short_doi: String,
    pub crossref: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            figshare: "https://api.figshare.com/v2".to_string(),
            doi: "https://doi.org".to_string(),
            short_doi: "https://shortdoi.org".to_string(),
            crossref: "https://api.crossref.org".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub page_size: usize,
    pub rate_limit_delay: Duration,
    pub retry_base_delay: Duration,
    pub max_retries: u32,
    pub timeout: Duration,
    pub repository_prefix: Option<String>,
    pub fetch_details: bool,
    pub similarity_threshold: f64,
    pub candidate_rows: usize,
    pub cache_dir: Option<Utf8PathBuf>,
    pub authors: Vec<QueryIdentity>,
    pub endpoints: Endpoints,
    /// Repository API token; supplied by the caller, never read from the
    /// environment here.
    pub token: Option<String>,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            page_size: 100,
            rate_limit_delay: Duration::from_millis(1000),
            retry_base_delay: Duration::from_millis(1000),
            max_retries: 1,
            timeout: Duration::from_secs(30),
            repository_prefix: None,
            fetch_details: true,
            similarity_threshold: 0.8,
            candidate_rows: 10,
            cache_dir: None,
            authors: Vec::new(),
            endpoints: Endpoints::default(),
            token: None,
        }
    }
}

impl ResolvedConfig {
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token.filter(|value| !value.trim().is_empty());
        self
    }
}

#[derive(Debug, Clone)]
pub struct RunParameters {
    pub identities: Vec<QueryIdentity>,
    pub since: Option<NaiveDate>,
    pub force_refresh: bool,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// An explicit path must exist; without one, `bibharvest.json` in the
    /// working directory is used when present and defaults otherwise.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, HarvestError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Self::resolve_config(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| HarvestError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| HarvestError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, HarvestError> {
        let defaults = ResolvedConfig::default();

        let page_size = config.page_size.unwrap_or(defaults.page_size);
        if page_size == 0 {
            return Err(HarvestError::ConfigParse(
                "page_size must be at least 1".to_string(),
            ));
        }
        let similarity_threshold = config
            .similarity_threshold
            .unwrap_or(defaults.similarity_threshold);
        if !(0.0..=1.0).contains(&similarity_threshold) {
            return Err(HarvestError::ConfigParse(format!(
                "similarity_threshold must be within 0..=1, got {similarity_threshold}"
            )));
        }

        let authors = config
            .authors
            .iter()
            .map(|name| name.parse())
            .collect::<Result<Vec<QueryIdentity>, HarvestError>>()?;

        let endpoints = Endpoints {
            figshare: config
                .endpoints
                .figshare
                .unwrap_or(defaults.endpoints.figshare),
            doi: config.endpoints.doi.unwrap_or(defaults.endpoints.doi),
            short_doi: config
                .endpoints
                .short_doi
                .unwrap_or(defaults.endpoints.short_doi),
            crossref: config
                .endpoints
                .crossref
                .unwrap_or(defaults.endpoints.crossref),
        };

        Ok(ResolvedConfig {
            page_size,
            rate_limit_delay: config
                .rate_limit_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.rate_limit_delay),
            retry_base_delay: config
                .retry_base_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_base_delay),
            max_retries: config.max_retries.unwrap_or(defaults.max_retries).max(1),
            timeout: config
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            repository_prefix: config.repository_prefix.filter(|value| !value.is_empty()),
            fetch_details: config.fetch_details.unwrap_or(defaults.fetch_details),
            similarity_threshold,
            candidate_rows: config
                .candidate_rows
                .unwrap_or(defaults.candidate_rows)
                .max(1),
            cache_dir: config.cache_dir.map(Utf8PathBuf::from),
            authors,
            endpoints,
            token: None,
        })
    }
}

pub fn load_identities(path: &Path) -> Result<Vec<QueryIdentity>, HarvestError> {
    let content = fs::read_to_string(path)
        .map_err(|err| HarvestError::Filesystem(format!("read {}: {err}", path.display())))?;
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(str::parse)
        .collect()
}

pub fn parse_since(value: &str) -> Result<NaiveDate, HarvestError> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| HarvestError::InvalidDate(value.to_string()))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let resolved = ConfigLoader::resolve_config(Config::default()).unwrap();
        assert_eq!(resolved.page_size, 100);
        assert_eq!(resolved.max_retries, 1);
        assert!(resolved.fetch_details);
        assert_eq!(resolved.endpoints, Endpoints::default());
        assert!(resolved.token.is_none());
    }

    #[test]
    fn parses_partial_json() {
        let config: Config = serde_json::from_str(
            r#"{
                "page_size": 25,
                "authors": ["Marc Hanheide", "  Tom   Duckett "],
                "endpoints": { "crossref": "http://localhost:9000" }
            }"#,
        )
        .unwrap();
        let resolved = ConfigLoader::resolve_config(config).unwrap();
        assert_eq!(resolved.page_size, 25);
        assert_eq!(resolved.authors[1].as_str(), "Tom Duckett");
        assert_eq!(resolved.endpoints.crossref, "http://localhost:9000");
        assert_eq!(resolved.endpoints.doi, "https://doi.org");
    }

    #[test]
    fn rejects_zero_page_size() {
        let config = Config {
            page_size: Some(0),
            ..Config::default()
        };
        assert_matches!(
            ConfigLoader::resolve_config(config),
            Err(HarvestError::ConfigParse(_))
        );
    }

    #[test]
    fn blank_token_is_dropped() {
        let resolved = ResolvedConfig::default().with_token(Some("  ".to_string()));
        assert!(resolved.token.is_none());
    }

    #[test]
    fn since_date_format() {
        assert_eq!(
            parse_since("2021-01-31").unwrap(),
            NaiveDate::from_ymd_opt(2021, 1, 31).unwrap()
        );
        assert_matches!(parse_since("31/01/2021"), Err(HarvestError::InvalidDate(_)));
    }
}
