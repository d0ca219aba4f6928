mod common;

use chrono::NaiveDate;
use serde_json::json;

use bibharvest::cache::{CacheDomain, CacheStore};
use bibharvest::config::ResolvedConfig;
use bibharvest::domain::QueryIdentity;
use bibharvest::figshare::{MetadataFetcher, SearchQuery, article_cache_key};

use common::{FakeFigshare, calls, details, hit, temp_store};

fn marc() -> QueryIdentity {
    "Marc Hanheide".parse().unwrap()
}

fn fetcher(
    store: &bibharvest::store::Store,
    figshare: &FakeFigshare,
    config: &ResolvedConfig,
) -> MetadataFetcher<FakeFigshare> {
    let cache = CacheStore::open_in(store, CacheDomain::RawPages, false);
    MetadataFetcher::new(figshare.clone(), cache, config)
}

fn listing_only(page_size: usize) -> ResolvedConfig {
    ResolvedConfig {
        page_size,
        fetch_details: false,
        ..ResolvedConfig::default()
    }
}

#[test]
fn stops_after_first_short_page() {
    let dir = tempfile::tempdir().unwrap();
    let store = temp_store(&dir);
    let figshare = FakeFigshare::default().page(
        "Marc Hanheide",
        1,
        json!([
            hit(1, "One", "2020-01-01"),
            hit(2, "Two", "2020-01-02"),
            hit(3, "Three", "2020-01-03")
        ]),
    );
    let mut fetcher = fetcher(&store, &figshare, &listing_only(3));

    let mut publications = fetcher.fetch(&marc(), None);
    let records: Vec<_> = publications.by_ref().collect();
    assert_eq!(records.len(), 3);
    assert_eq!(publications.pages_consulted(), 2);
    assert!(!publications.authentication_failed());
    drop(publications);

    let searches = calls(&figshare.searches);
    assert_eq!(searches.len(), 2);
    for page in 0..2 {
        let key = SearchQuery::for_author(&marc(), page, 3).cache_key();
        assert!(fetcher.cache().contains(&key), "missing {key}");
    }
    assert_eq!(fetcher.cache().len(), 2);
    assert!(searches[1].contains("page=2&page_size=3"));
}

#[test]
fn partial_page_needs_one_request() {
    let dir = tempfile::tempdir().unwrap();
    let store = temp_store(&dir);
    let figshare = FakeFigshare::default().page(
        "Marc Hanheide",
        1,
        json!([hit(1, "One", "2020-01-01")]),
    );
    let mut fetcher = fetcher(&store, &figshare, &listing_only(3));

    assert_eq!(fetcher.fetch(&marc(), None).count(), 1);
    assert_eq!(calls(&figshare.searches).len(), 1);
}

#[test]
fn sequence_is_lazy() {
    let dir = tempfile::tempdir().unwrap();
    let store = temp_store(&dir);
    let figshare = FakeFigshare::default()
        .page("Marc Hanheide", 1, json!([hit(1, "One", "2020-01-01")]))
        .page("Marc Hanheide", 2, json!([hit(2, "Two", "2020-01-02")]));
    let mut fetcher = fetcher(&store, &figshare, &listing_only(1));

    let first = fetcher.fetch(&marc(), None).next();
    assert_eq!(first.map(|record| record.work_id), Some(1));
    assert_eq!(calls(&figshare.searches).len(), 1);
}

#[test]
fn second_fetch_is_served_from_cache() {
    let dir = tempfile::tempdir().unwrap();
    let store = temp_store(&dir);
    let figshare = FakeFigshare::default()
        .page("Marc Hanheide", 1, json!([hit(1, "One", "2020-01-01")]))
        .article(1, details(1, "One", "10.1000/one", &["Marc Hanheide"]));
    let config = ResolvedConfig {
        page_size: 5,
        ..ResolvedConfig::default()
    };

    let first: Vec<_> = fetcher(&store, &figshare, &config)
        .fetch(&marc(), None)
        .collect();
    let second: Vec<_> = fetcher(&store, &figshare, &config)
        .fetch(&marc(), None)
        .collect();

    assert_eq!(first, second);
    assert_eq!(second[0].identifier.as_deref(), Some("10.1000/one"));
    assert_eq!(second[0].authors, vec!["Marc Hanheide"]);
    assert_eq!(calls(&figshare.searches).len(), 1);
    assert_eq!(calls(&figshare.details), vec!["1"]);

    let cache: CacheStore<serde_json::Value> =
        CacheStore::open_in(&store, CacheDomain::RawPages, false);
    assert!(cache.contains(&article_cache_key(1)));
}

#[test]
fn since_filter_keeps_undated_records() {
    let dir = tempfile::tempdir().unwrap();
    let store = temp_store(&dir);
    let figshare = FakeFigshare::default().page(
        "Marc Hanheide",
        1,
        json!([
            hit(1, "Old", "2018-05-05"),
            hit(2, "New", "2022-05-05"),
            { "id": 3, "title": "Undated" }
        ]),
    );
    let mut fetcher = fetcher(&store, &figshare, &listing_only(10));

    let titles: Vec<_> = fetcher
        .fetch(&marc(), NaiveDate::from_ymd_opt(2020, 1, 1))
        .map(|record| record.title)
        .collect();
    assert_eq!(titles, vec!["New", "Undated"]);
}

#[test]
fn repository_prefix_filters_foreign_articles() {
    let dir = tempfile::tempdir().unwrap();
    let store = temp_store(&dir);
    let figshare = FakeFigshare::default().page(
        "Marc Hanheide",
        1,
        json!([
            hit(1, "Ours", "2021-01-01"),
            {
                "id": 2,
                "title": "Theirs",
                "url_public_html": "https://elsewhere.figshare.com/articles/2"
            }
        ]),
    );
    let config = ResolvedConfig {
        repository_prefix: Some("https://repository.example.ac.uk".to_string()),
        ..listing_only(10)
    };
    let mut fetcher = fetcher(&store, &figshare, &config);

    let ids: Vec<_> = fetcher
        .fetch(&marc(), None)
        .map(|record| record.work_id)
        .collect();
    assert_eq!(ids, vec![1]);
}

#[test]
fn authentication_failure_ends_sequence() {
    let dir = tempfile::tempdir().unwrap();
    let store = temp_store(&dir);
    let figshare = FakeFigshare::default().reject("Marc Hanheide");
    let mut fetcher = fetcher(&store, &figshare, &listing_only(10));

    let mut publications = fetcher.fetch(&marc(), None);
    assert!(publications.next().is_none());
    assert!(publications.authentication_failed());
    assert!(publications.next().is_none());
    assert_eq!(calls(&figshare.searches).len(), 1);
}

#[test]
fn unexpected_body_is_not_cached() {
    let dir = tempfile::tempdir().unwrap();
    let store = temp_store(&dir);
    let figshare = FakeFigshare::default().page(
        "Marc Hanheide",
        1,
        json!({ "message": "rate limited" }),
    );
    let mut fetcher = fetcher(&store, &figshare, &listing_only(10));

    assert_eq!(fetcher.fetch(&marc(), None).count(), 0);
    assert!(fetcher.cache().is_empty());
}

#[test]
fn differently_cased_name_reuses_page_cache() {
    let dir = tempfile::tempdir().unwrap();
    let store = temp_store(&dir);
    let figshare = FakeFigshare::default().page(
        "Marc Hanheide",
        1,
        json!([hit(1, "One", "2020-01-01")]),
    );
    let config = listing_only(10);

    assert_eq!(fetcher(&store, &figshare, &config).fetch(&marc(), None).count(), 1);
    let typed: QueryIdentity = "marc   HANHEIDE".parse().unwrap();
    assert_eq!(fetcher(&store, &figshare, &config).fetch(&typed, None).count(), 1);

    assert_eq!(calls(&figshare.searches).len(), 1);
}
