//! Reconciliation engine.
//!
//! This module provides the [`Reconciler`] that decides, per package, whether
//! upstream changed since the last recorded release:
//! - Cheap short-circuit tiers (remote checksum → version → size) via [`unchanged_by`]
//! - Verified download through a [`ContentFetcher`] with a per-stage timeout
//! - Ground-truth version extraction through an [`ArtifactInspector`]
//! - Automatic removal of the staged artifact via RAII (`TempPath` drop)

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempPath;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::harvest::traits::{
    ArtifactInspector, ContentFetcher, FetchedContent, InspectError, StateStore, StoreError,
    TransferError,
};
use crate::model::{CandidateObservation, PackageRecord, Release, SourceConfig};
use crate::probes::{ProbeRegistry, UnknownStrategy};
use crate::traits::{ProbeError, UpstreamProbe};

// ============================================================================
// Outcome Types
// ============================================================================

/// Comparison that proved a package unchanged without downloading it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    /// Upstream integrity header matched the recorded checksum
    RemoteChecksum,

    /// Discovered version equals the recorded version
    Version,

    /// Static source advertised the recorded byte size
    Size,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Tier::RemoteChecksum => "remote-checksum",
            Tier::Version => "version",
            Tier::Size => "size",
        })
    }
}

/// What one reconciliation did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Nothing changed; only the last-checked time was refreshed.
    Unchanged { tier: Tier },

    /// A verified release replaced the previous one (if any).
    Updated {
        previous: Option<String>,
        version: String,
    },
}

// ============================================================================
// Errors
// ============================================================================

/// Failures that abort one package's reconciliation.
///
/// None of these touch the package's persisted state.
#[derive(thiserror::Error, Debug)]
pub enum ReconcileError {
    /// Source names a strategy the registry does not know
    #[error(transparent)]
    UnknownStrategy(#[from] UnknownStrategy),

    /// Probe could not reach or read upstream
    #[error("fetch failed: {0}")]
    FetchFailed(#[source] ProbeError),

    /// Artifact download failed
    #[error("download failed: {0}")]
    Transfer(#[from] TransferError),

    /// Neither the probe nor the artifact yielded a version
    #[error("cannot determine version of '{id}': {source}")]
    VersionUndeterminable {
        id: String,
        #[source]
        source: InspectError,
    },

    /// Loading or saving package state failed
    #[error("state store error: {0}")]
    Store(#[from] StoreError),

    /// Temporary download file could not be created
    #[error("cannot stage download: {0}")]
    Staging(#[source] std::io::Error),
}

// ============================================================================
// Short-circuit Tiers
// ============================================================================

/// Decides whether `candidate` is provably the release already recorded.
///
/// Tiers run in strict order and the first conclusive one wins:
/// 1. **Remote checksum**: integrity header equals the recorded checksum.
/// 2. **Version**: discovered version equals the recorded version.
/// 3. **Size**: only for candidates with neither version nor checksum, a
///    non-zero advertised size equals the recorded size.
///
/// Without a recorded release nothing is provable and `None` is returned.
pub fn unchanged_by(prior: Option<&Release>, candidate: &CandidateObservation) -> Option<Tier> {
    let prior = prior?;

    let remote_checksum = candidate.remote_checksum();
    if let Some(remote) = remote_checksum {
        if remote.eq_ignore_ascii_case(&prior.checksum) {
            return Some(Tier::RemoteChecksum);
        }
        warn!(previous = %prior.checksum, remote, "Remote checksum changed");
    }

    let version = candidate.discovered_version();
    if version == Some(prior.version.as_str()) {
        return Some(Tier::Version);
    }

    if version.is_none() && remote_checksum.is_none() {
        if let Some(size) = candidate.remote_size.filter(|size| *size > 0) {
            if size == prior.size {
                return Some(Tier::Size);
            }
        }
    }

    None
}

// ============================================================================
// Reconciler
// ============================================================================

/// Per-package reconciliation against upstream.
///
/// Holds no per-package state, so one instance can serve concurrent
/// `process` calls for distinct packages.
///
/// # Example
///
/// ```ignore
/// let reconciler = Reconciler::new(registry, store, fetcher, inspector)
///     .with_probe_timeout(Duration::from_secs(30))
///     .with_download_timeout(Duration::from_secs(600));
///
/// match reconciler.process(&cancel, &source).await? {
///     ReconcileOutcome::Unchanged { tier } => println!("unchanged ({tier})"),
///     ReconcileOutcome::Updated { version, .. } => println!("now {version}"),
/// }
/// ```
pub struct Reconciler {
    registry: ProbeRegistry,
    store: Arc<dyn StateStore>,
    fetcher: Arc<dyn ContentFetcher>,
    inspector: Arc<dyn ArtifactInspector>,

    /// Upper bound for the probe stage (default: 30 seconds)
    probe_timeout: Duration,

    /// Upper bound for the download stage (default: 10 minutes)
    download_timeout: Duration,

    /// Where downloads are staged (default: system temp dir)
    staging_dir: Option<PathBuf>,
}

impl Reconciler {
    pub fn new(
        registry: ProbeRegistry,
        store: Arc<dyn StateStore>,
        fetcher: Arc<dyn ContentFetcher>,
        inspector: Arc<dyn ArtifactInspector>,
    ) -> Self {
        Self {
            registry,
            store,
            fetcher,
            inspector,
            probe_timeout: Duration::from_secs(30),
            download_timeout: Duration::from_secs(600),
            staging_dir: None,
        }
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn with_download_timeout(mut self, timeout: Duration) -> Self {
        self.download_timeout = timeout;
        self
    }

    pub fn with_staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = Some(dir.into());
        self
    }

    /// Reconciles one source against its recorded state.
    ///
    /// Performs at most one artifact download, at most one metadata
    /// extraction, and exactly one save on success.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError`] if the strategy is unknown, the probe or the
    /// download fails, or no version can be established. Persisted state is
    /// left untouched in every error case.
    #[instrument(skip_all, fields(package = %source.id))]
    pub async fn process(
        &self,
        cancel: &CancellationToken,
        source: &SourceConfig,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let mut record = self.load(source).await?;

        // ====================================================================
        // Stage 1: Probe
        // ====================================================================

        let probe = self.registry.resolve(&source.strategy)?;
        let candidate = self
            .probe(cancel, probe.as_ref(), source)
            .await
            .map_err(ReconcileError::FetchFailed)?;
        debug!(
            strategy = probe.name(),
            version = ?candidate.version,
            remote_size = ?candidate.remote_size,
            "Candidate observed"
        );

        if let Some(tier) = unchanged_by(record.current_release.as_ref(), &candidate) {
            info!(%tier, "Upstream unchanged");
            record.touch();
            self.store.save(&record).await?;
            return Ok(ReconcileOutcome::Unchanged { tier });
        }

        // ====================================================================
        // Stage 2: Verified download
        // ====================================================================
        //
        // `staged` removes the file when dropped, so every early return below
        // cleans up.

        info!(url = %candidate.download_url, "Downloading for inspection");
        let staged = self.stage(&source.display.install_type)?;
        let fetched = self.download(cancel, &candidate.download_url, &staged).await?;

        if let Some(remote) = candidate.remote_checksum() {
            if !remote.eq_ignore_ascii_case(&fetched.checksum) {
                warn!(
                    remote,
                    computed = %fetched.checksum,
                    "Computed checksum differs from upstream header; trusting download"
                );
            }
        }

        // ====================================================================
        // Stage 3: Ground truth
        // ====================================================================

        let version = self.ground_truth(source, &candidate, &staged).await?;

        let previous = record
            .current_release
            .as_ref()
            .map(|release| release.version.clone());
        record.current_release = Some(Release {
            version: version.clone(),
            download_url: candidate.download_url,
            checksum: fetched.checksum,
            size: fetched.size,
        });
        record.touch();
        self.store.save(&record).await?;

        if let Err(e) = staged.close() {
            warn!(error = %e, "Failed to remove staged download");
        }

        info!(%version, size = fetched.size, "Release saved");
        Ok(ReconcileOutcome::Updated { previous, version })
    }

    async fn load(&self, source: &SourceConfig) -> Result<PackageRecord, ReconcileError> {
        match self.store.get(&source.id).await {
            Ok(Some(record)) => Ok(record),
            Ok(None) => Ok(source.seed_record()),
            Err(StoreError::Json { path, source: err }) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "Stored record is malformed; resolving from scratch"
                );
                Ok(source.seed_record())
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn probe(
        &self,
        cancel: &CancellationToken,
        probe: &dyn UpstreamProbe,
        source: &SourceConfig,
    ) -> Result<CandidateObservation, ProbeError> {
        timeout(self.probe_timeout, probe.fetch(cancel, &source.config))
            .await
            .map_err(|_| ProbeError::TimedOut(self.probe_timeout.as_secs()))?
    }

    fn stage(&self, install_type: &str) -> Result<TempPath, ReconcileError> {
        let suffix = staging_suffix(install_type);
        let mut builder = tempfile::Builder::new();
        builder.prefix("pkg-").suffix(&suffix);

        let file = match &self.staging_dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        }
        .map_err(ReconcileError::Staging)?;

        Ok(file.into_temp_path())
    }

    async fn download(
        &self,
        cancel: &CancellationToken,
        url: &str,
        dest: &Path,
    ) -> Result<FetchedContent, TransferError> {
        timeout(self.download_timeout, self.fetcher.fetch(cancel, url, dest))
            .await
            .map_err(|_| TransferError::TimedOut(self.download_timeout.as_secs()))?
    }

    /// Settles the version to record for a downloaded artifact.
    ///
    /// The inspector runs when the probe found no version or when the
    /// installer format carries readable metadata. Extracted versions win;
    /// a failed extraction is only fatal when there is nothing to fall back on.
    async fn ground_truth(
        &self,
        source: &SourceConfig,
        candidate: &CandidateObservation,
        artifact: &Path,
    ) -> Result<String, ReconcileError> {
        let discovered = candidate.discovered_version();
        let install_type = source.display.install_type.as_str();

        if let Some(version) = discovered {
            if !self.inspector.supports(install_type) {
                return Ok(version.to_string());
            }
        }
        if let Some(placeholder) = &candidate.placeholder_version {
            debug!(%placeholder, "Static source; reading version from artifact");
        }

        let extracted = self
            .inspector
            .extract_version(artifact)
            .await
            .and_then(|version| {
                let version = version.trim();
                if version.is_empty() {
                    Err(InspectError::MetadataUnavailable {
                        path: artifact.to_path_buf(),
                        reason: "empty version field".to_string(),
                    })
                } else {
                    Ok(version.to_string())
                }
            });

        match (extracted, discovered) {
            (Ok(real), Some(found)) if real != found => {
                info!(
                    from = found,
                    to = %real,
                    inspector = self.inspector.name(),
                    "Version corrected from artifact"
                );
                Ok(real)
            }
            (Ok(real), _) => Ok(real),
            (Err(err), Some(found)) => {
                warn!(
                    error = %err,
                    version = found,
                    "Artifact metadata unreadable; keeping discovered version"
                );
                Ok(found.to_string())
            }
            (Err(err), None) => Err(ReconcileError::VersionUndeterminable {
                id: source.id.clone(),
                source: err,
            }),
        }
    }
}

/// File suffix for a staged download, e.g. `.deb`. Unsafe characters dropped.
fn staging_suffix(install_type: &str) -> String {
    let clean: String = install_type
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect();
    if clean.is_empty() {
        String::new()
    } else {
        format!(".{clean}")
    }
}

// ============================================================================
// Tests
// ============================================================================
