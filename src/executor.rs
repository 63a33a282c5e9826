use crate::harvest::{
    CatalogError, CatalogPublisher, ReconcileOutcome, Reconciler, StateStore, StoreError,
};
use crate::model::SourceConfig;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("cannot enumerate packages: {0}")]
    Listing(#[from] StoreError),
    #[error("cannot publish catalog: {0}")]
    Export(#[from] CatalogError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageFailure {
    pub id: String,
    pub error: String,
}

/// Per-run tally, in source order.
#[derive(Debug, Default, Clone)]
pub struct RunReport {
    pub updated: Vec<(String, String)>,
    pub unchanged: Vec<String>,
    pub failures: Vec<PackageFailure>,
}

impl RunReport {
    pub fn processed(&self) -> usize {
        self.updated.len() + self.unchanged.len() + self.failures.len()
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Drives reconciliation over the whole source list with bounded concurrency.
pub struct RunExecutor {
    semaphore: Arc<Semaphore>,
}

impl RunExecutor {
    pub fn new(concurrency_limit: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(concurrency_limit.max(1))),
        }
    }

    /// Reconciles every source. A failing package is recorded and never stops
    /// the others.
    #[instrument(skip_all, fields(sources = sources.len()))]
    pub async fn execute(
        &self,
        reconciler: Arc<Reconciler>,
        sources: Vec<SourceConfig>,
        cancel: CancellationToken,
    ) -> RunReport {
        let mut handles = Vec::with_capacity(sources.len());
        for source in sources {
            let id = source.id.clone();
            let semaphore = self.semaphore.clone();
            let reconciler = reconciler.clone();
            let cancel = cancel.clone();

            let handle = tokio::spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(e) => return Err(format!("Semaphore error: {}", e)),
                };
                reconciler
                    .process(&cancel, &source)
                    .await
                    .map_err(|e| e.to_string())
            });
            handles.push((id, handle));
        }

        let mut report = RunReport::default();
        for (id, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => Err(format!("task failed: {}", e)),
            };
            match result {
                Ok(ReconcileOutcome::Updated { version, .. }) => report.updated.push((id, version)),
                Ok(ReconcileOutcome::Unchanged { .. }) => report.unchanged.push(id),
                Err(e) => {
                    error!(package = %id, error = %e, "Reconciliation failed");
                    report.failures.push(PackageFailure { id, error: e });
                }
            }
        }

        info!(
            updated = report.updated.len(),
            unchanged = report.unchanged.len(),
            failed = report.failures.len(),
            "Finished reconciliation"
        );
        report
    }

    /// Republishes the catalog from everything the store knows.
    pub async fn publish(
        store: &dyn StateStore,
        publisher: &dyn CatalogPublisher,
    ) -> Result<usize, PublishError> {
        let packages = store.list_all().await?;
        publisher.export(&packages).await?;
        Ok(packages.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harvest::{
        ArtifactInspector, ContentFetcher, FetchedContent, InspectError, TransferError,
    };
    use crate::model::{CandidateObservation, PackageRecord};
    use crate::probes::ProbeRegistry;
    use crate::traits::{ProbeError, UpstreamProbe};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::Mutex;

    // Probe whose answer depends on the "version" config key
    struct ConfigProbe;

    #[async_trait]
    impl UpstreamProbe for ConfigProbe {
        fn name(&self) -> &str {
            "config"
        }

        async fn fetch(
            &self,
            _cancel: &CancellationToken,
            config: &HashMap<String, String>,
        ) -> Result<CandidateObservation, ProbeError> {
            let version = crate::traits::required(config, "version")?;
            Ok(CandidateObservation {
                version: Some(version.to_string()),
                ..CandidateObservation::new(format!("https://example.com/{version}.zip"))
            })
        }
    }

    struct StubFetcher;

    #[async_trait]
    impl ContentFetcher for StubFetcher {
        async fn fetch(
            &self,
            _cancel: &CancellationToken,
            _url: &str,
            _dest: &Path,
        ) -> Result<FetchedContent, TransferError> {
            Ok(FetchedContent {
                checksum: "00".to_string(),
                size: 1,
            })
        }
    }

    struct NoInspector;

    #[async_trait]
    impl ArtifactInspector for NoInspector {
        fn name(&self) -> &str {
            "none"
        }

        fn supports(&self, _install_type: &str) -> bool {
            false
        }

        async fn extract_version(&self, path: &Path) -> Result<String, InspectError> {
            Err(InspectError::MetadataUnavailable {
                path: path.to_path_buf(),
                reason: "unsupported".to_string(),
            })
        }
    }

    #[derive(Default)]
    struct MemoryStore(Mutex<HashMap<String, PackageRecord>>);

    #[async_trait]
    impl StateStore for MemoryStore {
        async fn get(&self, id: &str) -> Result<Option<PackageRecord>, StoreError> {
            Ok(self.0.lock().unwrap().get(id).cloned())
        }

        async fn save(&self, record: &PackageRecord) -> Result<(), StoreError> {
            self.0
                .lock()
                .unwrap()
                .insert(record.id.clone(), record.clone());
            Ok(())
        }

        async fn list_all(&self) -> Result<Vec<PackageRecord>, StoreError> {
            let mut records: Vec<_> = self.0.lock().unwrap().values().cloned().collect();
            records.sort_by(|a, b| a.id.cmp(&b.id));
            Ok(records)
        }
    }

    #[derive(Default)]
    struct RecordingPublisher(Mutex<Vec<String>>);

    #[async_trait]
    impl CatalogPublisher for RecordingPublisher {
        async fn export(&self, packages: &[PackageRecord]) -> Result<(), CatalogError> {
            *self.0.lock().unwrap() = packages.iter().map(|p| p.id.clone()).collect();
            Ok(())
        }
    }

    fn source(id: &str, version: Option<&str>) -> SourceConfig {
        let mut config = HashMap::new();
        if let Some(version) = version {
            config.insert("version".to_string(), version.to_string());
        }
        SourceConfig {
            id: id.to_string(),
            display: Default::default(),
            strategy: "config".to_string(),
            config,
        }
    }

    fn reconciler(store: Arc<MemoryStore>) -> Arc<Reconciler> {
        Arc::new(Reconciler::new(
            ProbeRegistry::new().register(Arc::new(ConfigProbe)),
            store,
            Arc::new(StubFetcher),
            Arc::new(NoInspector),
        ))
    }

    #[tokio::test]
    async fn test_failures_do_not_stop_other_packages() {
        let store = Arc::new(MemoryStore::default());
        let executor = RunExecutor::new(2);
        let sources = vec![
            source("alpha", Some("1.0")),
            source("broken", None),
            source("gamma", Some("3.0")),
        ];

        let report = executor
            .execute(reconciler(store.clone()), sources, CancellationToken::new())
            .await;

        assert_eq!(report.processed(), 3);
        assert!(!report.is_success());
        assert_eq!(
            report.updated,
            vec![
                ("alpha".to_string(), "1.0".to_string()),
                ("gamma".to_string(), "3.0".to_string()),
            ]
        );
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].id, "broken");
        assert!(report.failures[0].error.contains("version"));

        let publisher = RecordingPublisher::default();
        let published = RunExecutor::publish(store.as_ref(), &publisher).await.unwrap();
        assert_eq!(published, 2);
        assert_eq!(
            *publisher.0.lock().unwrap(),
            vec!["alpha".to_string(), "gamma".to_string()]
        );
    }

    #[tokio::test]
    async fn test_second_run_reports_unchanged() {
        let store = Arc::new(MemoryStore::default());
        let executor = RunExecutor::new(4);
        let sources = vec![source("alpha", Some("1.0"))];

        executor
            .execute(reconciler(store.clone()), sources.clone(), CancellationToken::new())
            .await;
        let report = executor
            .execute(reconciler(store), sources, CancellationToken::new())
            .await;

        assert!(report.is_success());
        assert_eq!(report.unchanged, vec!["alpha".to_string()]);
        assert!(report.updated.is_empty());
    }

    #[test]
    fn test_zero_concurrency_is_clamped() {
        let executor = RunExecutor::new(0);
        assert_eq!(executor.semaphore.available_permits(), 1);
    }
}
