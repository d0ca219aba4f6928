use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{Datelike, NaiveDate};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::HarvestError;
use crate::similarity::normalize_title;

static LONG_DOI: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^10\.\d{4,9}/\S+$").expect("valid DOI regex"));
static SHORT_DOI: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^10/[a-z0-9]+$").expect("valid shortDOI regex"));

const DOI_PREFIXES: [&str; 6] = [
    "https://doi.org/",
    "http://doi.org/",
    "https://dx.doi.org/",
    "http://dx.doi.org/",
    "doi.org/",
    "doi:",
];

/// Equality, ordering, hashing and search keys ignore case and repeated
/// whitespace.
#[derive(Debug, Clone)]
pub struct QueryIdentity {
    name: String,
    key: String,
}

impl QueryIdentity {
    pub fn as_str(&self) -> &str {
        &self.name
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn surname(&self) -> &str {
        self.key.rsplit(' ').next().unwrap_or(&self.key)
    }
}

impl PartialEq for QueryIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for QueryIdentity {}

impl Hash for QueryIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl PartialOrd for QueryIdentity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueryIdentity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key)
    }
}

impl fmt::Display for QueryIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

impl FromStr for QueryIdentity {
    type Err = HarvestError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let name = value.split_whitespace().collect::<Vec<_>>().join(" ");
        if name.is_empty() {
            return Err(HarvestError::InvalidQueryIdentity(value.to_string()));
        }
        let key = name.to_lowercase();
        Ok(Self { name, key })
    }
}

impl Serialize for QueryIdentity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.name)
    }
}

impl<'de> Deserialize<'de> for QueryIdentity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Doi(String);

impl Doi {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_short(&self) -> bool {
        SHORT_DOI.is_match(&self.0)
    }

    pub fn link(&self) -> String {
        format!("https://doi.org/{}", self.0)
    }

    pub fn short_suffix(&self) -> Option<&str> {
        self.0.strip_prefix("10/").filter(|_| self.is_short())
    }

    pub fn parse_lenient(value: Option<&str>) -> Option<Self> {
        value.and_then(|text| text.parse().ok())
    }
}

impl fmt::Display for Doi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Doi {
    type Err = HarvestError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = clean_identifier(value).to_lowercase();
        if LONG_DOI.is_match(&normalized) || SHORT_DOI.is_match(&normalized) {
            Ok(Self(normalized))
        } else {
            Err(HarvestError::InvalidDoi(value.to_string()))
        }
    }
}

pub fn clean_identifier(value: &str) -> String {
    let mut text = value.trim();
    for prefix in DOI_PREFIXES {
        if let Some(head) = text.get(..prefix.len())
            && head.eq_ignore_ascii_case(prefix)
        {
            text = text[prefix.len()..].trim_start();
            break;
        }
    }
    text.trim_end_matches(['.', ',', ';']).to_string()
}

/// Records with neither a DOI nor any title text fall back to their work id
/// and are never merged with another record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DedupKey {
    Identifier(String),
    TitleYear { title: String, year: Option<i32> },
    Work(u64),
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DedupKey::Identifier(doi) => write!(f, "doi:{doi}"),
            DedupKey::TitleYear {
                title,
                year: Some(year),
            } => write!(f, "title:{title}|{year}"),
            DedupKey::TitleYear { title, year: None } => write!(f, "title:{title}|"),
            DedupKey::Work(work_id) => write!(f, "work:{work_id}"),
        }
    }
}

impl Serialize for DedupKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPublicationRecord {
    pub work_id: u64,
    pub title: String,
    /// Identifier text as found in repository metadata; may be malformed.
    pub identifier: Option<String>,
    pub published: Option<NaiveDate>,
    pub authors: Vec<String>,
    pub url: Option<String>,
}

impl RawPublicationRecord {
    pub fn doi(&self) -> Option<Doi> {
        Doi::parse_lenient(self.identifier.as_deref())
    }

    pub fn year(&self) -> Option<i32> {
        self.published.map(|date| date.year())
    }

    pub fn dedup_key(&self) -> DedupKey {
        if let Some(doi) = self.doi() {
            return DedupKey::Identifier(doi.as_str().to_string());
        }
        let title = normalize_title(&self.title);
        if title.is_empty() {
            DedupKey::Work(self.work_id)
        } else {
            DedupKey::TitleYear {
                title,
                year: self.year(),
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CitationRecord {
    pub cite_key: String,
    pub entry_type: String,
    pub title: String,
    pub authors: Vec<String>,
    pub year: Option<i32>,
    pub venue: Option<String>,
    pub identifier: Option<String>,
    pub link: Option<String>,
    pub raw: String,
}

impl CitationRecord {
    pub fn with_cite_key(mut self, key: &str) -> Self {
        self.raw = self
            .raw
            .replacen(&format!("{{{},", self.cite_key), &format!("{{{key},"), 1);
        self.cite_key = key.to_string();
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStage {
    Cache,
    Direct,
    ShortForm,
    Guess,
    Exhausted,
}

impl fmt::Display for ResolutionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolutionStage::Cache => write!(f, "cache"),
            ResolutionStage::Direct => write!(f, "direct"),
            ResolutionStage::ShortForm => write!(f, "short-form"),
            ResolutionStage::Guess => write!(f, "guess"),
            ResolutionStage::Exhausted => write!(f, "exhausted"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub citation: Option<CitationRecord>,
    pub stage: ResolutionStage,
}

impl Resolution {
    pub fn resolved(citation: CitationRecord, stage: ResolutionStage) -> Self {
        Self {
            citation: Some(citation),
            stage,
        }
    }

    pub fn unresolved(stage: ResolutionStage) -> Self {
        Self {
            citation: None,
            stage,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.citation.is_some()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EnrichedPublication {
    pub dedup_key: DedupKey,
    pub record: RawPublicationRecord,
    pub citation: Option<CitationRecord>,
    pub contributors: Vec<QueryIdentity>,
}

impl EnrichedPublication {
    pub fn contributed_by(&self, identity: &QueryIdentity) -> bool {
        self.contributors.contains(identity)
    }
}
