//! release-harvester: checks every configured upstream for new releases and
//! republishes `catalog.json`.
//!
//! # Usage
//!
//! ```text
//! release-harvester [--sources apps.source.json] [--packages-dir packages] [--api-dir api]
//!                   [--concurrency 4] [--only <id>]... [--github-token <token>]
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use release_harvester::catalog::JsonCatalogPublisher;
use release_harvester::config::{load_sources, select_sources, DEFAULT_SOURCES_FILE};
use release_harvester::fetcher::HttpFetcher;
use release_harvester::harvest::formats::DpkgInspector;
use release_harvester::harvest::Reconciler;
use release_harvester::probes::ProbeRegistry;
use release_harvester::store::JsonFileStore;
use release_harvester::RunExecutor;

#[derive(Parser, Debug)]
#[command(
    name = "release-harvester",
    version,
    about = "Track upstream releases and publish a consolidated catalog",
    long_about = None,
)]
struct Cli {
    /// JSON list of sources to check.
    #[arg(long, default_value = DEFAULT_SOURCES_FILE)]
    sources: PathBuf,

    /// Directory holding one JSON state file per package.
    #[arg(long, default_value = "packages")]
    packages_dir: PathBuf,

    /// Directory the consolidated catalog.json is written to.
    #[arg(long, default_value = "api")]
    api_dir: PathBuf,

    /// Packages reconciled at the same time.
    #[arg(long, default_value_t = 4)]
    concurrency: usize,

    #[arg(long, default_value_t = 30)]
    probe_timeout_secs: u64,

    #[arg(long, default_value_t = 600)]
    download_timeout_secs: u64,

    /// Only reconcile these ids (repeatable). Unknown ids abort the run. The
    /// catalog still covers every package.
    #[arg(long = "only", value_name = "ID")]
    only: Vec<String>,

    /// Token for the GitHub release API; raises the rate limit when present.
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    github_token: Option<String>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let sources = load_sources(&cli.sources)
        .with_context(|| format!("loading {}", cli.sources.display()))?;
    let sources = select_sources(sources, &cli.only).context("applying --only")?;
    info!(count = sources.len(), "Loaded sources");

    let store = Arc::new(JsonFileStore::new(&cli.packages_dir));
    let registry = ProbeRegistry::with_defaults(cli.github_token.clone())
        .context("building probe clients")?;
    let reconciler = Reconciler::new(
        registry,
        store.clone(),
        Arc::new(HttpFetcher::new().context("building download client")?),
        Arc::new(DpkgInspector::new()),
    )
    .with_probe_timeout(Duration::from_secs(cli.probe_timeout_secs))
    .with_download_timeout(Duration::from_secs(cli.download_timeout_secs));

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; cancelling in-flight work");
            on_signal.cancel();
        }
    });

    let report = RunExecutor::new(cli.concurrency)
        .execute(Arc::new(reconciler), sources, cancel)
        .await;

    let publisher = JsonCatalogPublisher::new(&cli.api_dir);
    let published = RunExecutor::publish(store.as_ref(), &publisher)
        .await
        .context("publishing catalog")?;
    info!(packages = published, "Catalog up to date");

    if report.is_success() {
        Ok(ExitCode::SUCCESS)
    } else {
        warn!(failed = report.failures.len(), "Finished with errors");
        Ok(ExitCode::FAILURE)
    }
}
