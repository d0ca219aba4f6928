use std::path::PathBuf;
use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::Parser;
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use bibharvest::aggregate::{Aggregator, ProgressSink};
use bibharvest::config::{ConfigLoader, RunParameters, load_identities, parse_since};
use bibharvest::domain::QueryIdentity;
use bibharvest::error::HarvestError;
use bibharvest::export;
use bibharvest::figshare::FigshareHttpClient;
use bibharvest::output::{JsonOutput, OutputMode, RunSummary, TextOutput};
use bibharvest::providers::crossref::CrossrefHttpClient;
use bibharvest::providers::doi::{DoiHttpClient, ShortDoiHttpClient};
use bibharvest::stats::PublicationStats;
use bibharvest::store::Store;

const TOKEN_VAR: &str = "FIGSHARE_TOKEN";

#[derive(Parser)]
#[command(name = "bibharvest")]
#[command(about = "Harvest researcher publications from Figshare and resolve their citations")]
#[command(version, author)]
struct Cli {
    /// Researcher names to query.
    #[arg(long, num_args = 1..)]
    authors: Vec<String>,

    /// File with one researcher name per line.
    #[arg(long)]
    authors_file: Option<PathBuf>,

    /// Drop publications first online before this date (YYYY-MM-DD).
    #[arg(long)]
    since: Option<String>,

    /// Ignore cached responses; fresh results are still written to the caches.
    #[arg(long)]
    force_refresh: bool,

    #[arg(long)]
    config: Option<String>,

    #[arg(long)]
    cache_dir: Option<Utf8PathBuf>,

    /// Use the per-user cache instead of the project-local one.
    #[arg(long, conflicts_with = "cache_dir")]
    global_cache: bool,

    /// Delete cache files before running.
    #[arg(long)]
    clear_cache: bool,

    #[arg(long, default_value = "figshare_articles.csv")]
    output: Utf8PathBuf,

    #[arg(long, default_value = "figshare_articles_all.csv")]
    output_all: Utf8PathBuf,

    /// Directory for one CSV per researcher.
    #[arg(long)]
    per_author_dir: Option<Utf8PathBuf>,

    #[arg(long)]
    bibtex: Option<Utf8PathBuf>,

    /// Markdown statistics file.
    #[arg(long)]
    stats: Option<Utf8PathBuf>,

    #[arg(long)]
    debug: bool,

    /// Print the run summary as JSON.
    #[arg(long)]
    json: bool,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<HarvestError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &HarvestError) -> u8 {
    match error {
        HarvestError::AllAuthenticationFailed
        | HarvestError::Authentication { .. }
        | HarvestError::ConfigRead(_)
        | HarvestError::NoQueryIdentities => 2,
        HarvestError::FigshareHttp(_)
        | HarvestError::FigshareStatus { .. }
        | HarvestError::DoiHttp(_)
        | HarvestError::DoiStatus { .. }
        | HarvestError::ShortDoiHttp(_)
        | HarvestError::CrossrefHttp(_)
        | HarvestError::CrossrefStatus { .. }
        | HarvestError::TransientRequest(_) => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Text
    };

    let config = ConfigLoader::resolve(cli.config.as_deref())?
        .with_token(std::env::var(TOKEN_VAR).ok());

    let mut store = if cli.global_cache {
        Store::global()?
    } else {
        Store::new()?
    };
    if let Some(dir) = cli.cache_dir.clone().or_else(|| config.cache_dir.clone()) {
        let dir = store.output_path(&dir);
        store = store.with_cache_root(dir);
    }
    store.ensure_cache_root()?;
    if cli.clear_cache {
        for path in store.clear_caches()? {
            tracing::info!(path = %path, "removed cache file");
        }
    }

    let params = RunParameters {
        identities: identities(&cli, &config.authors)?,
        since: cli.since.as_deref().map(parse_since).transpose()?,
        force_refresh: cli.force_refresh,
    };

    let search = FigshareHttpClient::new(&config)?;
    let citations = DoiHttpClient::new(&config.endpoints.doi, config.timeout)?;
    let short_dois = ShortDoiHttpClient::new(&config.endpoints.short_doi, config.timeout)?;
    let crossref = CrossrefHttpClient::new(
        &config.endpoints.crossref,
        config.candidate_rows,
        config.timeout,
    )?;
    let mut aggregator = Aggregator::open(
        &store,
        &config,
        params.force_refresh,
        search,
        citations,
        short_dois,
        crossref,
    );

    let sink: &dyn ProgressSink = match output_mode {
        OutputMode::Json => &JsonOutput,
        OutputMode::Text => &TextOutput,
    };
    let aggregation = aggregator.run(&params, sink);
    if aggregation.all_authentication_failed() {
        return Err(HarvestError::AllAuthenticationFailed.into());
    }

    let mut files = vec![
        export::write_deduplicated(&store, &cli.output, &aggregation)?,
        export::write_all_instances(&store, &cli.output_all, &aggregation)?,
    ];
    if let Some(dir) = &cli.per_author_dir {
        files.extend(export::write_per_identity(&store, dir, &aggregation)?);
    }
    if let Some(path) = &cli.bibtex {
        files.push(export::write_bibliography(&store, path, &aggregation)?);
    }
    if let Some(path) = &cli.stats {
        let markdown = PublicationStats::from_aggregation(&aggregation).to_markdown();
        let target = store.output_path(path);
        Store::write_bytes_atomic(&target, markdown.as_bytes())?;
        files.push(target);
    }

    let summary = RunSummary::new(
        &aggregation,
        aggregator.resolver_stats(),
        files.iter().map(ToString::to_string).collect(),
    );
    match output_mode {
        OutputMode::Json => JsonOutput::print_summary(&summary).into_diagnostic()?,
        OutputMode::Text => TextOutput::print_summary(&summary).into_diagnostic()?,
    }
    Ok(())
}

fn identities(cli: &Cli, configured: &[QueryIdentity]) -> Result<Vec<QueryIdentity>, HarvestError> {
    let mut identities = cli
        .authors
        .iter()
        .map(|name| name.parse())
        .collect::<Result<Vec<QueryIdentity>, _>>()?;
    if let Some(path) = &cli.authors_file {
        identities.extend(load_identities(path)?);
    }
    if identities.is_empty() {
        identities = configured.to_vec();
    }
    if identities.is_empty() {
        return Err(HarvestError::NoQueryIdentities);
    }
    Ok(identities)
}
