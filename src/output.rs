use std::io::{self, Write};

use serde::Serialize;

use crate::aggregate::{Aggregation, ProgressEvent, ProgressSink};
use crate::resolver::ResolverStats;

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub identities: Vec<IdentitySummary>,
    pub unique_publications: usize,
    pub instances: usize,
    pub resolved: usize,
    pub resolution: ResolverStats,
    pub authentication_failures: Vec<String>,
    pub files: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IdentitySummary {
    pub identity: String,
    pub publications: usize,
}

impl RunSummary {
    pub fn new(aggregation: &Aggregation, resolution: ResolverStats, files: Vec<String>) -> Self {
        Self {
            identities: aggregation
                .identities
                .iter()
                .map(|identity| IdentitySummary {
                    identity: identity.to_string(),
                    publications: aggregation.for_identity(identity).count(),
                })
                .collect(),
            unique_publications: aggregation.deduplicated.len(),
            instances: aggregation.all_instances.len(),
            resolved: aggregation.resolved_count(),
            resolution,
            authentication_failures: aggregation
                .authentication_failures
                .iter()
                .map(ToString::to_string)
                .collect(),
            files,
        }
    }
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_summary(summary: &RunSummary) -> io::Result<()> {
        Self::print_json(summary)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

pub struct TextOutput;

impl TextOutput {
    pub fn print_summary(summary: &RunSummary) -> io::Result<()> {
        let mut stdout = io::stdout();
        for identity in &summary.identities {
            writeln!(stdout, "{}: {} publications", identity.identity, identity.publications)?;
        }
        writeln!(
            stdout,
            "{} unique publications ({} instances), {} with citations",
            summary.unique_publications, summary.instances, summary.resolved
        )?;
        for name in &summary.authentication_failures {
            writeln!(stdout, "authentication failed for {name}")?;
        }
        for file in &summary.files {
            writeln!(stdout, "wrote {file}")?;
        }
        Ok(())
    }
}

impl ProgressSink for TextOutput {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => eprintln!("{} ({:.1}s)", event.message, elapsed.as_secs_f64()),
            None => eprintln!("{}", event.message),
        }
    }
}
