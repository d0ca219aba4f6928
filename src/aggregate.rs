use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cache::{CacheDomain, CacheStore};
use crate::config::{ResolvedConfig, RunParameters};
use crate::domain::{DedupKey, EnrichedPublication, QueryIdentity};
use crate::figshare::{MetadataFetcher, SearchClient};
use crate::providers::crossref::BibliographicSearch;
use crate::providers::doi::{CitationClient, ShortDoiClient};
use crate::resolver::{IdentifierResolver, ResolverCaches, ResolverStats};
use crate::similarity::TitleSimilarity;
use crate::store::Store;

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn event(&self, _event: ProgressEvent) {}
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Aggregation {
    pub identities: Vec<QueryIdentity>,
    pub deduplicated: Vec<EnrichedPublication>,
    pub all_instances: Vec<EnrichedPublication>,
    pub authentication_failures: Vec<QueryIdentity>,
}

impl Aggregation {
    pub fn for_identity<'a>(
        &'a self,
        identity: &'a QueryIdentity,
    ) -> impl Iterator<Item = &'a EnrichedPublication> + 'a {
        self.all_instances
            .iter()
            .filter(move |publication| publication.contributed_by(identity))
    }

    /// True when identities were queried and every one was rejected by the
    /// repository.
    pub fn all_authentication_failed(&self) -> bool {
        !self.identities.is_empty() && self.authentication_failures.len() == self.identities.len()
    }

    pub fn resolved_count(&self) -> usize {
        self.deduplicated
            .iter()
            .filter(|publication| publication.citation.is_some())
            .count()
    }
}

pub struct Aggregator<C, D, S, X> {
    fetcher: MetadataFetcher<C>,
    resolver: IdentifierResolver<D, S, X>,
}

impl<C, D, S, X> Aggregator<C, D, S, X>
where
    C: SearchClient,
    D: CitationClient,
    S: ShortDoiClient,
    X: BibliographicSearch,
{
    pub fn new(fetcher: MetadataFetcher<C>, resolver: IdentifierResolver<D, S, X>) -> Self {
        Self { fetcher, resolver }
    }

    pub fn open(
        store: &Store,
        config: &ResolvedConfig,
        force_refresh: bool,
        search: C,
        citations: D,
        short_dois: S,
        bibliographic: X,
    ) -> Self {
        let pages = CacheStore::open_in(store, CacheDomain::RawPages, force_refresh);
        let fetcher = MetadataFetcher::new(search, pages, config);
        let resolver = IdentifierResolver::new(
            citations,
            short_dois,
            bibliographic,
            ResolverCaches::open(store, force_refresh),
        )
        .with_policy(TitleSimilarity::new(config.similarity_threshold));
        Self::new(fetcher, resolver)
    }

    pub fn fetcher(&self) -> &MetadataFetcher<C> {
        &self.fetcher
    }

    pub fn resolver(&self) -> &IdentifierResolver<D, S, X> {
        &self.resolver
    }

    pub fn resolver_stats(&self) -> ResolverStats {
        self.resolver.stats()
    }

    pub fn run(&mut self, params: &RunParameters, sink: &dyn ProgressSink) -> Aggregation {
        self.aggregate(&params.identities, params.since, sink)
    }

    pub fn aggregate(
        &mut self,
        identities: &[QueryIdentity],
        since: Option<NaiveDate>,
        sink: &dyn ProgressSink,
    ) -> Aggregation {
        let mut aggregation = Aggregation::default();
        let mut positions: HashMap<DedupKey, usize> = HashMap::new();

        for identity in identities {
            if aggregation.identities.contains(identity) {
                debug!(identity = %identity, "skipping repeated identity");
                continue;
            }
            aggregation.identities.push(identity.clone());

            let started = Instant::now();
            let mut publications = self.fetcher.fetch(identity, since);
            let records: Vec<_> = publications.by_ref().collect();
            let rejected = publications.authentication_failed();
            let pages = publications.pages_consulted();
            drop(publications);

            if rejected {
                warn!(identity = %identity, "skipping identity after authentication failure");
                aggregation.authentication_failures.push(identity.clone());
                sink.event(ProgressEvent {
                    message: format!("{identity}: authentication failed"),
                    elapsed: Some(started.elapsed()),
                });
                continue;
            }

            let total = records.len();
            for record in records {
                let resolution = self.resolver.resolve_with_hint(&record, Some(identity));
                let key = record.dedup_key();
                let instance = EnrichedPublication {
                    dedup_key: key.clone(),
                    record,
                    citation: resolution.citation,
                    contributors: vec![identity.clone()],
                };

                match positions.get(&key) {
                    Some(&index) => {
                        let canonical = &mut aggregation.deduplicated[index];
                        if !canonical.contributed_by(identity) {
                            debug!(%key, identity = %identity, "merging duplicate publication");
                            canonical.contributors.push(identity.clone());
                        }
                    }
                    None => {
                        positions.insert(key, aggregation.deduplicated.len());
                        aggregation.deduplicated.push(instance.clone());
                    }
                }
                aggregation.all_instances.push(instance);
            }

            info!(identity = %identity, publications = total, pages, "identity done");
            sink.event(ProgressEvent {
                message: format!("{identity}: {total} publications from {pages} pages"),
                elapsed: Some(started.elapsed()),
            });
        }

        info!(
            unique = aggregation.deduplicated.len(),
            instances = aggregation.all_instances.len(),
            resolved = aggregation.resolved_count(),
            "aggregation complete"
        );
        aggregation
    }
}
