use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::HarvestError;

const SELECT_FIELDS: &str = "DOI,title,author,type,issued,container-title,publisher";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub doi: Option<String>,
    pub title: Option<String>,
    pub authors: Vec<String>,
    pub work_type: Option<String>,
    pub year: Option<i32>,
    pub container: Option<String>,
    pub publisher: Option<String>,
}

pub trait BibliographicSearch {
    fn search(&self, title: &str, authors: &[String]) -> Result<Vec<Candidate>, HarvestError>;
}

#[derive(Clone)]
pub struct CrossrefHttpClient {
    client: Client,
    base_url: String,
    rows: usize,
}

impl CrossrefHttpClient {
    pub fn new(base_url: &str, rows: usize, timeout: Duration) -> Result<Self, HarvestError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("bibharvest/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| HarvestError::CrossrefHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| HarvestError::CrossrefHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            rows: rows.max(1),
        })
    }
}

impl BibliographicSearch for CrossrefHttpClient {
    fn search(&self, title: &str, authors: &[String]) -> Result<Vec<Candidate>, HarvestError> {
        let url = format!("{}/works", self.base_url);
        let rows = self.rows.to_string();
        let author_query = authors.join(" ");
        let mut params = vec![
            ("query.bibliographic", title),
            ("sort", "relevance"),
            ("rows", rows.as_str()),
            ("select", SELECT_FIELDS),
        ];
        if !author_query.is_empty() {
            params.push(("query.author", author_query.as_str()));
        }
        debug!(title, "querying Crossref");
        let response = self
            .client
            .get(&url)
            .query(&params)
            .send()
            .map_err(|err| HarvestError::CrossrefHttp(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "Crossref request failed".to_string());
            return Err(HarvestError::CrossrefStatus { status, message });
        }
        let payload: CrossrefResponse = response
            .json()
            .map_err(|err| HarvestError::TransientRequest(format!("Crossref body: {err}")))?;
        Ok(payload.candidates())
    }
}

#[derive(Debug, Deserialize)]
pub struct CrossrefResponse {
    pub message: CrossrefMessage,
}

#[derive(Debug, Deserialize)]
pub struct CrossrefMessage {
    #[serde(rename = "total-results", default)]
    pub total_results: u64,
    #[serde(default)]
    pub items: Vec<CrossrefWork>,
}

#[derive(Debug, Deserialize)]
pub struct CrossrefWork {
    #[serde(rename = "DOI")]
    pub doi: Option<String>,
    #[serde(default)]
    pub title: Vec<String>,
    #[serde(default)]
    pub author: Vec<CrossrefAuthor>,
    #[serde(rename = "type")]
    pub work_type: Option<String>,
    pub issued: Option<CrossrefDate>,
    #[serde(rename = "container-title", default)]
    pub container_title: Vec<String>,
    pub publisher: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CrossrefAuthor {
    pub given: Option<String>,
    pub family: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CrossrefDate {
    #[serde(rename = "date-parts", default)]
    pub date_parts: Vec<Vec<Option<i32>>>,
}

impl CrossrefResponse {
    pub fn candidates(self) -> Vec<Candidate> {
        if self.message.total_results == 0 && self.message.items.is_empty() {
            return Vec::new();
        }
        self.message
            .items
            .into_iter()
            .map(CrossrefWork::into_candidate)
            .collect()
    }
}

impl CrossrefWork {
    fn into_candidate(self) -> Candidate {
        let authors = self
            .author
            .into_iter()
            .filter_map(|author| match (author.family, author.given, author.name) {
                (Some(family), Some(given), _) => Some(format!("{family}, {given}")),
                (Some(family), None, _) => Some(family),
                (None, _, Some(name)) => Some(name),
                _ => None,
            })
            .collect();
        let year = self
            .issued
            .and_then(|issued| issued.date_parts.into_iter().next())
            .and_then(|parts| parts.into_iter().next().flatten());
        Candidate {
            doi: self.doi,
            title: self.title.into_iter().next(),
            authors,
            work_type: self.work_type,
            year,
            container: self.container_title.into_iter().next(),
            publisher: self.publisher,
        }
    }
}

pub fn bibtex_type(work_type: Option<&str>) -> &'static str {
    match work_type {
        Some("journal-article") => "article",
        Some("proceedings-article") => "inproceedings",
        Some("book-chapter") | Some("book-section") | Some("book-part") => "incollection",
        Some("book") | Some("monograph") | Some("edited-book") => "book",
        Some("dissertation") => "phdthesis",
        Some("report") => "techreport",
        _ => "misc",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_works_response() {
        let body = r#"{
            "status": "ok",
            "message": {
                "total-results": 1,
                "items": [{
                    "DOI": "10.1109/IROS.2019.1",
                    "title": ["Learning to Navigate"],
                    "author": [
                        {"given": "Marc", "family": "Hanheide"},
                        {"name": "LCAS Consortium"}
                    ],
                    "type": "proceedings-article",
                    "issued": {"date-parts": [[2019, 11]]},
                    "container-title": ["IROS"]
                }]
            }
        }"#;
        let response: CrossrefResponse = serde_json::from_str(body).unwrap();
        let candidates = response.candidates();
        assert_eq!(candidates.len(), 1);
        let first = &candidates[0];
        assert_eq!(first.doi.as_deref(), Some("10.1109/IROS.2019.1"));
        assert_eq!(first.authors, vec!["Hanheide, Marc", "LCAS Consortium"]);
        assert_eq!(first.year, Some(2019));
        assert_eq!(bibtex_type(first.work_type.as_deref()), "inproceedings");
    }

    #[test]
    fn empty_results() {
        let body = r#"{"message": {"total-results": 0, "items": []}}"#;
        let response: CrossrefResponse = serde_json::from_str(body).unwrap();
        assert!(response.candidates().is_empty());
    }
}
