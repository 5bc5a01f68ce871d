use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::{Credential, ExtractConfig, LoginConfig, RetryConfig, Settings};
use crate::diff::{ChangeDetector, ChangeSet, RemovalPolicy};
use crate::driver::DriverFactory;
use crate::error::{Result, ScrapeError};
use crate::extract::{self, RecordExtractor};
use crate::model::to_snapshot;
use crate::parser::dates::DateWindow;
use crate::session::{BrowserLogin, SessionAcquirer};
use crate::store::SnapshotStore;

/// Outcome of one successful fetch.
#[derive(Debug)]
pub struct FetchReport {
    pub changes: ChangeSet,
    /// Records in the committed snapshot.
    pub records: usize,
    /// `ExtractionTimeout` when the listing never settled and partial data
    /// was accepted.
    pub warning: Option<ScrapeError>,
}

/// Login → extract → diff → commit, as one retryable operation.
///
/// Fetches run one at a time; a second call waits for the first. Each fetch
/// runs on its own task, so dropping the returned future does not skip
/// closing the browser.
#[derive(Clone)]
pub struct ScrapeOrchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    factory: Arc<dyn DriverFactory>,
    extract: ExtractConfig,
    detector: ChangeDetector,
    retry: RetryConfig,
    diagnostics_dir: PathBuf,
    in_flight: tokio::sync::Mutex<()>,
}

impl ScrapeOrchestrator {
    pub fn new(
        factory: Arc<dyn DriverFactory>,
        extract: ExtractConfig,
        detector: ChangeDetector,
        retry: RetryConfig,
        diagnostics_dir: impl Into<PathBuf>,
    ) -> Self {
        ScrapeOrchestrator {
            inner: Arc::new(Inner {
                factory,
                extract,
                detector,
                retry,
                diagnostics_dir: diagnostics_dir.into(),
                in_flight: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn from_settings(factory: Arc<dyn DriverFactory>, settings: &Settings) -> Self {
        let store = SnapshotStore::new(&settings.snapshot_path);
        ScrapeOrchestrator::new(
            factory,
            settings.extract.clone(),
            ChangeDetector::new(store, RemovalPolicy::from_flag(settings.track_removals)),
            settings.retry.clone(),
            &settings.diagnostics_dir,
        )
    }

    pub fn detector(&self) -> &ChangeDetector {
        &self.inner.detector
    }

    /// Fetch the listing and return what changed since the last commit.
    pub async fn fetch_changes(
        &self,
        credential: Credential,
        login: LoginConfig,
        window: Option<DateWindow>,
    ) -> Result<FetchReport> {
        // Bad config fails here, before a browser is started.
        let acquirer = BrowserLogin::new(login, &self.inner.diagnostics_dir)?;
        let extractor = extract::from_config(&self.inner.extract, window, &self.inner.diagnostics_dir)?;

        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            let _guard = inner.in_flight.lock().await;
            inner.run_with_retry(&acquirer, extractor.as_ref(), &credential).await
        });
        task.await
            .map_err(|e| ScrapeError::Internal(e.to_string()))?
    }
}

impl Inner {
    async fn run_with_retry(
        &self,
        acquirer: &dyn SessionAcquirer,
        extractor: &dyn RecordExtractor,
        credential: &Credential,
    ) -> Result<FetchReport> {
        let attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match self.run_once(acquirer, extractor, credential).await {
                Ok(report) => return Ok(report),
                Err(e) if e.kind().is_transient() && attempt + 1 < attempts => {
                    let backoff = self.retry.backoff(attempt);
                    warn!(
                        "Fetch failed (attempt {}/{}): {}; retrying in {:.1}s",
                        attempt + 1,
                        attempts,
                        e,
                        backoff.as_secs_f64()
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn run_once(
        &self,
        acquirer: &dyn SessionAcquirer,
        extractor: &dyn RecordExtractor,
        credential: &Credential,
    ) -> Result<FetchReport> {
        let driver = self.factory.launch().await?;
        let session = acquirer.acquire(driver, credential).await?;
        let extraction = extractor.extract(&session).await;
        session.close().await;
        let extraction = extraction?;

        let records = extraction.records.len();
        let warning = match extraction.unsettled_after {
            Some(rounds) => {
                let timeout = ScrapeError::ExtractionTimeout { rounds, records };
                if self.extract.reject_partial {
                    return Err(timeout);
                }
                Some(timeout)
            }
            None => None,
        };

        let snapshot = to_snapshot(&extraction.records);
        let detector = self.detector.clone();
        let changes = tokio::task::spawn_blocking(move || detector.detect(&snapshot))
            .await
            .map_err(|e| ScrapeError::Internal(e.to_string()))??;

        info!("Fetch complete: {} records, {} changes", records, changes.len());
        Ok(FetchReport {
            changes,
            records,
            warning,
        })
    }
}
