use std::collections::{BTreeMap, BTreeSet};

use crate::aggregate::Aggregation;
use crate::domain::QueryIdentity;

const UNDATED: &str = "n/a";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityCounts {
    pub identity: QueryIdentity,
    pub total: usize,
    pub by_year: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicationStats {
    pub years: Vec<String>,
    pub rows: Vec<IdentityCounts>,
    pub unique_total: usize,
    pub unique_by_year: BTreeMap<String, usize>,
}

impl PublicationStats {
    pub fn from_aggregation(aggregation: &Aggregation) -> Self {
        let mut years = BTreeSet::new();
        let mut rows = Vec::new();
        for identity in &aggregation.identities {
            let mut by_year = BTreeMap::new();
            let mut total = 0;
            for publication in aggregation.for_identity(identity) {
                let year = year_label(publication.record.year());
                years.insert(year.clone());
                *by_year.entry(year).or_insert(0) += 1;
                total += 1;
            }
            if total > 0 {
                rows.push(IdentityCounts {
                    identity: identity.clone(),
                    total,
                    by_year,
                });
            }
        }
        rows.sort_by(|a, b| b.total.cmp(&a.total).then_with(|| a.identity.cmp(&b.identity)));

        let mut unique_by_year = BTreeMap::new();
        for publication in &aggregation.deduplicated {
            *unique_by_year
                .entry(year_label(publication.record.year()))
                .or_insert(0) += 1;
        }

        let mut years: Vec<String> = years.into_iter().collect();
        years.sort_by(|a, b| match (a.as_str(), b.as_str()) {
            (UNDATED, _) => std::cmp::Ordering::Greater,
            (_, UNDATED) => std::cmp::Ordering::Less,
            _ => b.cmp(a),
        });

        Self {
            years,
            rows,
            unique_total: aggregation.deduplicated.len(),
            unique_by_year,
        }
    }

    pub fn to_markdown(&self) -> String {
        let mut lines = vec![
            "# Publication Statistics by Author and Year".to_string(),
            String::new(),
            format!("**Total Authors:** {}", self.rows.len()),
            String::new(),
            format!("**Total Publications (deduplicated):** {}", self.unique_total),
            String::new(),
        ];

        let mut header = vec!["**Author**".to_string(), "**Total**".to_string()];
        header.extend(self.years.iter().cloned());
        lines.push(table_row(&header));
        lines.push(table_row(&vec!["---".to_string(); header.len()]));

        for row in &self.rows {
            let mut cells = vec![
                format!("**{}**", row.identity),
                format!("**{}**", row.total),
            ];
            cells.extend(self.years.iter().map(|year| match row.by_year.get(year) {
                Some(count) => count.to_string(),
                None => "-".to_string(),
            }));
            lines.push(table_row(&cells));
        }

        let mut totals = vec![
            "**Total (unique)**".to_string(),
            format!("**{}**", self.unique_total),
        ];
        totals.extend(
            self.years
                .iter()
                .map(|year| self.unique_by_year.get(year).copied().unwrap_or(0).to_string()),
        );
        lines.push(table_row(&totals));
        lines.join("\n") + "\n"
    }
}

fn year_label(year: Option<i32>) -> String {
    year.map(|year| year.to_string())
        .unwrap_or_else(|| UNDATED.to_string())
}

fn table_row(cells: &[String]) -> String {
    format!("| {} |", cells.join(" | "))
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::domain::{EnrichedPublication, RawPublicationRecord};

    fn instance(title: &str, year: i32, who: &QueryIdentity) -> EnrichedPublication {
        let record = RawPublicationRecord {
            work_id: 1,
            title: title.to_string(),
            identifier: None,
            published: NaiveDate::from_ymd_opt(year, 1, 1),
            authors: Vec::new(),
            url: None,
        };
        EnrichedPublication {
            dedup_key: record.dedup_key(),
            record,
            citation: None,
            contributors: vec![who.clone()],
        }
    }

    #[test]
    fn counts_instances_and_unique_totals() {
        let marc: QueryIdentity = "Marc Hanheide".parse().unwrap();
        let tom: QueryIdentity = "Tom Duckett".parse().unwrap();
        let shared_marc = instance("Shared", 2021, &marc);
        let shared_tom = instance("Shared", 2021, &tom);
        let own = instance("Own", 2020, &marc);

        let mut canonical = shared_marc.clone();
        canonical.contributors.push(tom.clone());
        let aggregation = Aggregation {
            identities: vec![marc.clone(), tom.clone()],
            deduplicated: vec![canonical, own.clone()],
            all_instances: vec![shared_marc, own, shared_tom],
            authentication_failures: Vec::new(),
        };

        let stats = PublicationStats::from_aggregation(&aggregation);
        assert_eq!(stats.years, vec!["2021", "2020"]);
        assert_eq!(stats.rows[0].identity, marc);
        assert_eq!(stats.rows[0].total, 2);
        assert_eq!(stats.unique_total, 2);

        let markdown = stats.to_markdown();
        assert!(markdown.contains("| **Author** | **Total** | 2021 | 2020 |"));
        assert!(markdown.contains("| **Marc Hanheide** | **2** | 1 | 1 |"));
        assert!(markdown.contains("| **Tom Duckett** | **1** | 1 | - |"));
        assert!(markdown.contains("| **Total (unique)** | **2** | 1 | 1 |"));
    }
}
