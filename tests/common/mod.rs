#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use camino::Utf8PathBuf;
use serde_json::{Value, json};

use bibharvest::aggregate::Aggregator;
use bibharvest::config::ResolvedConfig;
use bibharvest::domain::Doi;
use bibharvest::error::HarvestError;
use bibharvest::figshare::{SearchClient, SearchQuery};
use bibharvest::providers::crossref::{BibliographicSearch, Candidate};
use bibharvest::providers::doi::{CitationClient, ShortDoiClient};
use bibharvest::store::Store;

pub type Calls = Arc<Mutex<Vec<String>>>;

pub fn calls(log: &Calls) -> Vec<String> {
    log.lock().unwrap().clone()
}

#[derive(Clone, Default)]
pub struct FakeFigshare {
    /// Keyed by `(lowercased author name, 1-based page)`.
    pages: HashMap<(String, usize), Value>,
    articles: HashMap<u64, Value>,
    rejected: Vec<String>,
    token: bool,
    pub searches: Calls,
    pub details: Calls,
}

impl FakeFigshare {
    pub fn page(mut self, author: &str, page: usize, hits: Value) -> Self {
        self.pages.insert((author.to_lowercase(), page), hits);
        self
    }

    pub fn article(mut self, work_id: u64, details: Value) -> Self {
        self.articles.insert(work_id, details);
        self
    }

    pub fn reject(mut self, author: &str) -> Self {
        self.rejected.push(author.to_lowercase());
        self
    }
}

impl SearchClient for FakeFigshare {
    fn search(&self, query: &SearchQuery) -> Result<Value, HarvestError> {
        self.searches.lock().unwrap().push(query.cache_key());
        let author = query
            .search_for
            .trim_start_matches(":author: \"")
            .trim_end_matches('"')
            .to_string();
        if self.rejected.contains(&author) {
            return Err(HarvestError::Authentication {
                status: 403,
                message: "Forbidden".to_string(),
            });
        }
        Ok(self
            .pages
            .get(&(author, query.page))
            .cloned()
            .unwrap_or_else(|| json!([])))
    }

    fn article(&self, work_id: u64) -> Result<Value, HarvestError> {
        self.details.lock().unwrap().push(work_id.to_string());
        self.articles
            .get(&work_id)
            .cloned()
            .ok_or_else(|| HarvestError::FigshareStatus {
                status: 404,
                message: "no such article".to_string(),
            })
    }

    fn has_token(&self) -> bool {
        self.token
    }
}

#[derive(Clone, Default)]
pub struct FakeDoi {
    entries: HashMap<String, String>,
    failing: Vec<String>,
    pub calls: Calls,
}

impl FakeDoi {
    pub fn entry(mut self, doi: &str, bibtex: &str) -> Self {
        self.entries.insert(doi.to_string(), bibtex.to_string());
        self
    }

    /// Every request for `doi` fails with a server error.
    pub fn failing(mut self, doi: &str) -> Self {
        self.failing.push(doi.to_string());
        self
    }
}

impl CitationClient for FakeDoi {
    fn bibtex(&self, doi: &Doi) -> Result<Option<String>, HarvestError> {
        self.calls.lock().unwrap().push(doi.to_string());
        if self.failing.iter().any(|value| value == doi.as_str()) {
            return Err(HarvestError::DoiStatus {
                status: 503,
                message: "Service Unavailable".to_string(),
            });
        }
        Ok(self.entries.get(doi.as_str()).cloned())
    }
}

#[derive(Clone, Default)]
pub struct FakeShortDoi {
    expansions: HashMap<String, String>,
    shortenings: HashMap<String, String>,
    pub calls: Calls,
}

impl FakeShortDoi {
    pub fn expansion(mut self, short: &str, long: &str) -> Self {
        self.expansions.insert(short.to_string(), long.to_string());
        self
    }

    pub fn shortening(mut self, long: &str, short: &str) -> Self {
        self.shortenings.insert(long.to_string(), short.to_string());
        self
    }
}

impl ShortDoiClient for FakeShortDoi {
    fn expand(&self, short: &Doi) -> Result<Option<Doi>, HarvestError> {
        self.calls.lock().unwrap().push(short.to_string());
        Ok(self
            .expansions
            .get(short.as_str())
            .and_then(|long| long.parse().ok()))
    }

    fn shorten(&self, long: &Doi) -> Result<Option<Doi>, HarvestError> {
        self.calls.lock().unwrap().push(long.to_string());
        Ok(self
            .shortenings
            .get(long.as_str())
            .and_then(|short| short.parse().ok()))
    }
}

#[derive(Clone, Default)]
pub struct FakeCrossref {
    results: HashMap<String, Vec<Candidate>>,
    pub calls: Calls,
}

impl FakeCrossref {
    pub fn results(mut self, title: &str, candidates: Vec<Candidate>) -> Self {
        self.results.insert(title.to_string(), candidates);
        self
    }
}

impl BibliographicSearch for FakeCrossref {
    fn search(&self, title: &str, _authors: &[String]) -> Result<Vec<Candidate>, HarvestError> {
        self.calls.lock().unwrap().push(title.to_string());
        Ok(self.results.get(title).cloned().unwrap_or_default())
    }
}

pub type FakeAggregator = Aggregator<FakeFigshare, FakeDoi, FakeShortDoi, FakeCrossref>;

pub struct Fixture {
    pub figshare: FakeFigshare,
    pub doi: FakeDoi,
    pub short_doi: FakeShortDoi,
    pub crossref: FakeCrossref,
}

impl Fixture {
    pub fn new(figshare: FakeFigshare) -> Self {
        Self {
            figshare,
            doi: FakeDoi::default(),
            short_doi: FakeShortDoi::default(),
            crossref: FakeCrossref::default(),
        }
    }

    pub fn aggregator(&self, store: &Store, config: &ResolvedConfig, force: bool) -> FakeAggregator {
        Aggregator::open(
            store,
            config,
            force,
            self.figshare.clone(),
            self.doi.clone(),
            self.short_doi.clone(),
            self.crossref.clone(),
        )
    }
}

pub fn temp_store(dir: &tempfile::TempDir) -> Store {
    let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
    Store::new_with_paths(root.join("cache"), root.join("out"))
}

pub fn test_config(page_size: usize) -> ResolvedConfig {
    ResolvedConfig {
        page_size,
        ..ResolvedConfig::default()
    }
}

pub fn hit(id: u64, title: &str, online: &str) -> Value {
    json!({
        "id": id,
        "title": title,
        "url_public_html": format!("https://repository.example.ac.uk/articles/{id}"),
        "published_date": format!("{online}T00:00:00Z"),
        "timeline": { "firstOnline": format!("{online}T09:00:00") }
    })
}

pub fn details(id: u64, title: &str, doi: &str, authors: &[&str]) -> Value {
    json!({
        "id": id,
        "title": title,
        "authors": authors.iter().map(|name| json!({ "full_name": name })).collect::<Vec<_>>(),
        "custom_fields": [{ "name": "External DOI", "value": [doi] }]
    })
}

pub fn bibtex(key: &str, title: &str, doi: &str) -> String {
    format!(
        "@article{{{key}, title={{{title}}}, DOI={{{doi}}}, journal={{Robotics}}, author={{Hanheide, Marc and Duckett, Tom}}, year={{2021}}}}"
    )
}
