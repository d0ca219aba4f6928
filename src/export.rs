use std::collections::HashSet;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tracing::{info, warn};

use crate::aggregate::Aggregation;
use crate::domain::{Doi, EnrichedPublication, QueryIdentity};
use crate::error::HarvestError;
use crate::store::Store;

#[derive(Debug, Serialize)]
struct PublicationRow<'a> {
    author: String,
    title: &'a str,
    doi: &'a str,
    online_date: String,
    online_year: String,
    url: &'a str,
    authors: String,
    cite_key: &'a str,
    entry_type: &'a str,
    venue: &'a str,
    link: &'a str,
    dedup_key: String,
    bibtex: &'a str,
}

impl<'a> PublicationRow<'a> {
    fn new(publication: &'a EnrichedPublication) -> Self {
        let record = &publication.record;
        let citation = publication.citation.as_ref();
        Self {
            author: publication
                .contributors
                .iter()
                .map(QueryIdentity::as_str)
                .collect::<Vec<_>>()
                .join("; "),
            title: &record.title,
            doi: record.identifier.as_deref().unwrap_or_default(),
            online_date: record
                .published
                .map(|date| date.to_string())
                .unwrap_or_default(),
            online_year: record
                .year()
                .map(|year| year.to_string())
                .unwrap_or_default(),
            url: record.url.as_deref().unwrap_or_default(),
            authors: record.authors.join("; "),
            cite_key: citation.map(|c| c.cite_key.as_str()).unwrap_or_default(),
            entry_type: citation.map(|c| c.entry_type.as_str()).unwrap_or_default(),
            venue: citation.and_then(|c| c.venue.as_deref()).unwrap_or_default(),
            link: citation.and_then(|c| c.link.as_deref()).unwrap_or_default(),
            dedup_key: publication.dedup_key.to_string(),
            bibtex: citation.map(|c| c.raw.as_str()).unwrap_or_default(),
        }
    }
}

pub fn render_csv<'a>(
    publications: impl IntoIterator<Item = &'a EnrichedPublication>,
) -> Result<Vec<u8>, HarvestError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for publication in publications {
        writer
            .serialize(PublicationRow::new(publication))
            .map_err(|err| HarvestError::Export(err.to_string()))?;
    }
    writer
        .into_inner()
        .map_err(|err| HarvestError::Export(err.to_string()))
}

/// Concatenates citations, one entry per work. A cite key already taken by
/// another work gets a numeric suffix.
pub fn render_bibliography<'a>(
    publications: impl IntoIterator<Item = &'a EnrichedPublication>,
) -> (String, usize) {
    let mut works = HashSet::new();
    let mut keys = HashSet::new();
    let mut out = String::new();
    for publication in publications {
        let Some(citation) = &publication.citation else {
            continue;
        };
        let work = Doi::parse_lenient(citation.identifier.as_deref())
            .map(|doi| format!("doi:{doi}"))
            .unwrap_or_else(|| publication.dedup_key.to_string());
        if !works.insert(work) {
            continue;
        }

        let mut key = citation.cite_key.clone();
        let mut suffix = 1;
        while !keys.insert(key.clone()) {
            suffix += 1;
            key = format!("{}_{suffix}", citation.cite_key);
        }
        if !out.is_empty() {
            out.push('\n');
        }
        if key == citation.cite_key {
            out.push_str(&citation.raw);
        } else {
            warn!(cite_key = %citation.cite_key, renamed = %key, "cite key shared by two works");
            out.push_str(&citation.clone().with_cite_key(&key).raw);
        }
    }
    (out, works.len())
}

pub fn write_deduplicated(
    store: &Store,
    path: &Utf8Path,
    aggregation: &Aggregation,
) -> Result<Utf8PathBuf, HarvestError> {
    write(store, path, &render_csv(&aggregation.deduplicated)?, aggregation.deduplicated.len())
}

pub fn write_all_instances(
    store: &Store,
    path: &Utf8Path,
    aggregation: &Aggregation,
) -> Result<Utf8PathBuf, HarvestError> {
    write(store, path, &render_csv(&aggregation.all_instances)?, aggregation.all_instances.len())
}

pub fn write_per_identity(
    store: &Store,
    dir: &Utf8Path,
    aggregation: &Aggregation,
) -> Result<Vec<Utf8PathBuf>, HarvestError> {
    let mut written = Vec::new();
    for identity in &aggregation.identities {
        let rows: Vec<_> = aggregation.for_identity(identity).collect();
        let path = dir.join(format!("{}.csv", file_stem(identity)));
        written.push(write(store, &path, &render_csv(rows.iter().copied())?, rows.len())?);
    }
    Ok(written)
}

pub fn write_bibliography(
    store: &Store,
    path: &Utf8Path,
    aggregation: &Aggregation,
) -> Result<Utf8PathBuf, HarvestError> {
    let (text, entries) = render_bibliography(&aggregation.deduplicated);
    write(store, path, text.as_bytes(), entries)
}

fn write(
    store: &Store,
    path: &Utf8Path,
    content: &[u8],
    rows: usize,
) -> Result<Utf8PathBuf, HarvestError> {
    let target = store.output_path(path);
    Store::write_bytes_atomic(&target, content)?;
    info!(path = %target, rows, "wrote export");
    Ok(target)
}

fn file_stem(identity: &QueryIdentity) -> String {
    identity
        .key()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::bibtex::citation_from_bibtex;
    use crate::domain::{CitationRecord, RawPublicationRecord};

    fn publication(
        title: &str,
        doi: &str,
        citation: Option<CitationRecord>,
        who: &[&str],
    ) -> EnrichedPublication {
        let record = RawPublicationRecord {
            work_id: 1,
            title: title.to_string(),
            identifier: Some(doi.to_string()),
            published: NaiveDate::from_ymd_opt(2021, 5, 4),
            authors: vec!["Hanheide, Marc".to_string()],
            url: Some("https://repo.example/1".to_string()),
        };
        EnrichedPublication {
            dedup_key: record.dedup_key(),
            citation,
            record,
            contributors: who.iter().map(|name| name.parse().unwrap()).collect(),
        }
    }

    fn citation(key: &str, title: &str, doi: &str) -> CitationRecord {
        let text = format!(
            "@article{{{key}, title={{{title}}}, DOI={{{doi}}}, author={{Hanheide, Marc}}, year={{2017}}}}"
        );
        citation_from_bibtex(&text, &doi.parse().unwrap()).unwrap()
    }

    #[test]
    fn csv_has_header_and_joined_contributors() {
        let rows = [publication(
            "Robots",
            "10.1000/x",
            Some(citation("k1", "Robots", "10.1000/x")),
            &["Marc Hanheide", "Tom Duckett"],
        )];
        let text = String::from_utf8(render_csv(&rows).unwrap()).unwrap();
        let mut lines = text.lines();
        assert!(lines.next().unwrap().starts_with("author,title,doi,online_date,online_year"));
        let row = lines.next().unwrap();
        assert!(row.starts_with("Marc Hanheide; Tom Duckett,Robots,10.1000/x,2021-05-04,2021,"));
    }

    #[test]
    fn bibliography_has_one_entry_per_work() {
        let rows = [
            publication("A", "10.1000/a", Some(citation("k1", "A", "10.1000/a")), &["Marc Hanheide"]),
            publication("B", "10.1000/b", None, &["Marc Hanheide"]),
            publication("A", "10.1000/A", Some(citation("k1", "A", "10.1000/A")), &["Tom Duckett"]),
            publication("D", "10.1000/d", Some(citation("k2", "D", "10.1000/d")), &["Marc Hanheide"]),
        ];
        let (text, entries) = render_bibliography(&rows);
        assert_eq!(entries, 2);
        assert_eq!(text.matches("@article{k1,").count(), 1);
        assert_eq!(text.matches("@article{k2,").count(), 1);
    }

    #[test]
    fn colliding_cite_keys_are_disambiguated() {
        let rows = [
            publication(
                "First paper",
                "10.1016/j.artint.2017.01.001",
                Some(citation("Hanheide_2017", "First paper", "10.1016/j.artint.2017.01.001")),
                &["Marc Hanheide"],
            ),
            publication(
                "Second paper",
                "10.1109/lra.2017.2222222",
                Some(citation("Hanheide_2017", "Second paper", "10.1109/lra.2017.2222222")),
                &["Marc Hanheide"],
            ),
        ];
        let (text, entries) = render_bibliography(&rows);
        assert_eq!(entries, 2);
        assert!(text.contains("@article{Hanheide_2017,\n title = {First paper},"));
        assert!(text.contains("@article{Hanheide_2017_2,\n title = {Second paper},"));
    }

    #[test]
    fn identity_file_stem() {
        let identity: QueryIdentity = "Marc  Hanheide".parse().unwrap();
        assert_eq!(file_stem(&identity), "marc_hanheide");
    }
}
