use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::bibtex::{BibtexEntry, citation_from_bibtex, generate_cite_key};
use crate::cache::{CacheDomain, CacheStore};
use crate::domain::{
    CitationRecord, Doi, QueryIdentity, RawPublicationRecord, Resolution, ResolutionStage,
};
use crate::error::HarvestError;
use crate::providers::crossref::{BibliographicSearch, Candidate, bibtex_type};
use crate::providers::doi::{CitationClient, ShortDoiClient};
use crate::similarity::{SimilarityPolicy, TitleSimilarity, normalize_title, surname};
use crate::store::Store;

/// Persisted outcome of a resolution. `Unresolved` is the negative marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CachedResolution {
    Resolved {
        citation: CitationRecord,
        stage: ResolutionStage,
    },
    Unresolved,
}

pub struct ResolverCaches {
    pub citations: CacheStore<CachedResolution>,
    pub short_dois: CacheStore<String>,
    pub searches: CacheStore<Vec<Candidate>>,
}

impl ResolverCaches {
    pub fn open(store: &Store, force_refresh: bool) -> Self {
        Self {
            citations: CacheStore::open_in(store, CacheDomain::Citations, force_refresh),
            short_dois: CacheStore::open_in(store, CacheDomain::ShortDoi, force_refresh),
            searches: CacheStore::open_in(store, CacheDomain::Search, force_refresh),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResolverStats {
    pub cached: usize,
    pub direct: usize,
    pub short_form: usize,
    pub guessed: usize,
    pub unresolved: usize,
}

/// Key under which a record's resolution is cached: the normalized DOI, or a
/// title/year key when the record has no usable DOI.
pub fn resolution_key(record: &RawPublicationRecord) -> String {
    if let Some(doi) = record.doi() {
        return doi.as_str().to_string();
    }
    let title = normalize_title(&record.title);
    if title.is_empty() {
        return format!("guess:work:{}", record.work_id);
    }
    format!(
        "guess:{title}|{}",
        record.year().map(|year| year.to_string()).unwrap_or_default()
    )
}

pub struct IdentifierResolver<D, S, X> {
    citations: D,
    short_dois: S,
    search: X,
    policy: Box<dyn SimilarityPolicy>,
    caches: ResolverCaches,
    memo: HashMap<String, Resolution>,
    stats: ResolverStats,
}

impl<D, S, X> IdentifierResolver<D, S, X>
where
    D: CitationClient,
    S: ShortDoiClient,
    X: BibliographicSearch,
{
    pub fn new(citations: D, short_dois: S, search: X, caches: ResolverCaches) -> Self {
        Self {
            citations,
            short_dois,
            search,
            policy: Box::new(TitleSimilarity::default()),
            caches,
            memo: HashMap::new(),
            stats: ResolverStats::default(),
        }
    }

    pub fn with_policy(mut self, policy: impl SimilarityPolicy + 'static) -> Self {
        self.policy = Box::new(policy);
        self
    }

    pub fn stats(&self) -> ResolverStats {
        self.stats
    }

    pub fn caches(&self) -> &ResolverCaches {
        &self.caches
    }

    pub fn resolve(&mut self, record: &RawPublicationRecord) -> Resolution {
        self.resolve_with_hint(record, None)
    }

    /// Each key is resolved at most once per resolver, even when the caches
    /// are bypassed.
    pub fn resolve_with_hint(
        &mut self,
        record: &RawPublicationRecord,
        identity: Option<&QueryIdentity>,
    ) -> Resolution {
        let key = resolution_key(record);
        if let Some(done) = self.memo.get(&key) {
            return done.clone();
        }

        let resolution = match self.caches.citations.get(&key) {
            Some(cached) => {
                debug!(key = %key, "resolution from cache");
                self.stats.cached += 1;
                match cached {
                    CachedResolution::Resolved { citation, .. } => {
                        Resolution::resolved(citation.clone(), ResolutionStage::Cache)
                    }
                    CachedResolution::Unresolved => Resolution::unresolved(ResolutionStage::Cache),
                }
            }
            None => self.run_chain(&key, record, identity),
        };
        self.memo.insert(key, resolution.clone());
        resolution
    }

    fn run_chain(
        &mut self,
        key: &str,
        record: &RawPublicationRecord,
        identity: Option<&QueryIdentity>,
    ) -> Resolution {
        let mut transient = false;
        let mut note = |stage: &str, err: HarvestError| {
            transient |= err.is_transient();
            warn!(key, stage, "resolution stage failed: {err}");
        };

        let mut outcome = None;
        match record.doi() {
            Some(doi) => {
                match self.direct(&doi) {
                    Ok(Some(citation)) => outcome = Some((citation, ResolutionStage::Direct)),
                    Ok(None) => debug!(%doi, "DOI not found by resolver"),
                    Err(err) => note("direct", err),
                }
                if outcome.is_none() && doi.is_short() {
                    match self.expand(&doi) {
                        Ok(Some(long)) => match self.direct(&long) {
                            Ok(Some(citation)) => {
                                outcome = Some((citation, ResolutionStage::ShortForm))
                            }
                            Ok(None) => debug!(%long, "expanded DOI not found by resolver"),
                            Err(err) => note("short-form", err),
                        },
                        Ok(None) => debug!(%doi, "short DOI unknown"),
                        Err(err) => note("short-form", err),
                    }
                }
            }
            None => info!(
                work_id = record.work_id,
                identifier = record.identifier.as_deref().unwrap_or_default(),
                "no usable DOI, will try to guess"
            ),
        }

        if outcome.is_none() {
            match self.guess(record, identity) {
                Ok(Some(citation)) => outcome = Some((citation, ResolutionStage::Guess)),
                Ok(None) => {}
                Err(err) => note("guess", err),
            }
        }

        match outcome {
            Some((citation, stage)) => {
                let known_short = record.doi().filter(Doi::is_short);
                let citation = self.keyed_by_short_doi(citation, known_short);
                info!(key, %stage, cite_key = %citation.cite_key, "resolved citation");
                match stage {
                    ResolutionStage::Direct => self.stats.direct += 1,
                    ResolutionStage::ShortForm => self.stats.short_form += 1,
                    _ => self.stats.guessed += 1,
                }
                self.caches.citations.put_logged(
                    key,
                    CachedResolution::Resolved {
                        citation: citation.clone(),
                        stage,
                    },
                );
                Resolution::resolved(citation, stage)
            }
            None => {
                self.stats.unresolved += 1;
                if transient {
                    warn!(key, "unresolved after a transient failure; not caching");
                } else {
                    info!(key, "unresolved; caching negative entry");
                    self.caches
                        .citations
                        .put_logged(key, CachedResolution::Unresolved);
                }
                Resolution::unresolved(ResolutionStage::Exhausted)
            }
        }
    }

    fn direct(&self, doi: &Doi) -> Result<Option<CitationRecord>, HarvestError> {
        match self.citations.bibtex(doi)? {
            Some(text) => citation_from_bibtex(&text, doi).map(Some),
            None => Ok(None),
        }
    }

    fn expand(&mut self, short: &Doi) -> Result<Option<Doi>, HarvestError> {
        if let Some(long) = self.caches.short_dois.get(short.as_str()) {
            debug!(doi = %short, %long, "short DOI expansion from cache");
            return Ok(long.parse().ok());
        }
        let expanded = self.short_dois.expand(short)?;
        if let Some(long) = &expanded {
            info!(doi = %short, %long, "expanded short DOI");
            self.caches
                .short_dois
                .put_logged(short.as_str(), long.as_str().to_string());
        }
        Ok(expanded)
    }

    fn shorten(&mut self, long: &Doi) -> Result<Option<Doi>, HarvestError> {
        if let Some(short) = self.caches.short_dois.get(long.as_str()) {
            return Ok(short.parse().ok());
        }
        let shortened = self.short_dois.shorten(long)?;
        if let Some(short) = &shortened {
            debug!(doi = %long, %short, "shortened DOI");
            self.caches
                .short_dois
                .put_logged(long.as_str(), short.as_str().to_string());
        }
        Ok(shortened)
    }

    /// Rekeys `citation` by its short DOI so that cite keys are unique per
    /// work; the upstream key is kept when no short form is known.
    fn keyed_by_short_doi(
        &mut self,
        citation: CitationRecord,
        known: Option<Doi>,
    ) -> CitationRecord {
        let short = match known {
            Some(short) => Some(short),
            None => match citation.identifier.as_deref().map(str::parse::<Doi>) {
                Some(Ok(doi)) if doi.is_short() => Some(doi),
                Some(Ok(doi)) => self.shorten(&doi).unwrap_or_else(|err| {
                    warn!(%doi, "could not shorten DOI, keeping cite key: {err}");
                    None
                }),
                _ => None,
            },
        };
        match short.as_ref().and_then(Doi::short_suffix) {
            Some(key) => citation.with_cite_key(key),
            None => citation,
        }
    }

    fn guess(
        &mut self,
        record: &RawPublicationRecord,
        identity: Option<&QueryIdentity>,
    ) -> Result<Option<CitationRecord>, HarvestError> {
        let title = record.title.trim();
        if title.is_empty() {
            warn!(work_id = record.work_id, "no title, can't guess a citation");
            return Ok(None);
        }

        let mut query_authors = record.authors.clone();
        if query_authors.is_empty()
            && let Some(identity) = identity
        {
            query_authors.push(identity.as_str().to_string());
        }

        let search_key = format!("{title}|{}", query_authors.join("; "));
        let candidates = match self.caches.searches.get(&search_key) {
            Some(cached) => cached.clone(),
            None => {
                let found = self.search.search(title, &query_authors)?;
                self.caches.searches.put_logged(search_key, found.clone());
                found
            }
        };

        let mut best: Option<(&Candidate, f64)> = None;
        for candidate in &candidates {
            let Some(candidate_title) = candidate.title.as_deref() else {
                continue;
            };
            if Doi::parse_lenient(candidate.doi.as_deref()).is_none() {
                debug!(candidate_title, "candidate has no DOI, skipping");
                continue;
            }
            let score = self.policy.score(title, candidate_title);
            debug!(title, candidate_title, score, "candidate score");
            if best.is_none_or(|(_, top)| score > top) {
                best = Some((candidate, score));
            }
        }

        let Some((candidate, score)) = best else {
            info!(title, "no candidates from bibliographic search");
            return Ok(None);
        };
        if score < self.policy.threshold() {
            warn!(
                title,
                score,
                threshold = self.policy.threshold(),
                "no good title match"
            );
            return Ok(None);
        }

        let wanted: BTreeSet<String> = query_authors.iter().map(|name| surname(name)).collect();
        if !candidate.authors.is_empty()
            && !wanted.is_empty()
            && !candidate
                .authors
                .iter()
                .any(|name| wanted.contains(&surname(name)))
        {
            warn!(title, "title matched but none of the authors did");
            return Ok(None);
        }

        info!(title, score, doi = candidate.doi.as_deref().unwrap_or_default(), "guessed citation");
        Ok(Some(citation_from_candidate(candidate)))
    }
}

pub fn citation_from_candidate(candidate: &Candidate) -> CitationRecord {
    let entry_type = bibtex_type(candidate.work_type.as_deref());
    let title = candidate.title.clone().unwrap_or_default();
    let cite_key = generate_cite_key(&candidate.authors, candidate.year, &title);
    let doi = candidate
        .doi
        .as_deref()
        .and_then(|value| value.parse::<Doi>().ok());

    let mut entry = BibtexEntry::new(entry_type, &cite_key);
    entry.set("title", title.as_str());
    if !candidate.authors.is_empty() {
        entry.set("author", candidate.authors.join(" and "));
    }
    if let Some(year) = candidate.year {
        entry.set("year", year.to_string());
    }
    if let Some(container) = &candidate.container {
        let field = match entry_type {
            "article" => "journal",
            "inproceedings" | "incollection" => "booktitle",
            _ => "howpublished",
        };
        entry.set(field, container.as_str());
    }
    if let Some(publisher) = &candidate.publisher {
        entry.set("publisher", publisher.as_str());
    }
    if let Some(doi) = &doi {
        entry.set("doi", doi.as_str());
        entry.set("link", doi.link());
    }

    CitationRecord {
        cite_key,
        entry_type: entry_type.to_string(),
        title,
        authors: candidate.authors.clone(),
        year: candidate.year,
        venue: candidate.container.clone(),
        identifier: doi.as_ref().map(|doi| doi.as_str().to_string()),
        link: doi.as_ref().map(Doi::link),
        raw: entry.render(),
    }
}
