//! The synchronizer: public API and the reconciliation loop.
//!
//! `init` starts a ticker-driven loop that, on every tick, refreshes the
//! manifest, asks the cache inspector for the missing set, pushes each
//! missing entry through the retry coordinator, and finally purges orphans.
//! Downloads themselves run as independent spawned tasks; the loop never
//! waits for them.
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};

use futures_util::future::join_all;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cache;
use crate::catalog::{self, epoch_millis};
use crate::config::{Logger, SyncOptions};
use crate::engine::{DownloadEngine, DownloadLog, StartOptions, SyncState};
use crate::error::DownloadError;
use crate::extract::{Extractor, ZipExtractor};
use crate::fetch::{Fetcher, HttpFetcher};
use crate::manifest::{ManifestEntry, RequestConfig};

/// Keeps a working directory in sync with a declarative manifest.
///
/// Cheap to clone; all clones share the same engine and state.
#[derive(Clone)]
pub struct Synchronizer {
    inner: Arc<SyncInner>,
}

struct SyncInner {
    options: SyncOptions,
    engine: DownloadEngine,
    extractor: Arc<dyn Extractor>,
    state: Arc<Mutex<SyncState>>,
    logger: Logger,
    shutdown: CancellationToken,
    ticker: StdMutex<Option<JoinHandle<()>>>,
    /// Handles of spawned per-entry attempts, so `close` can await them.
    attempts: StdMutex<Vec<JoinHandle<()>>>,
}

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Synchronizer {
    /// Build a synchronizer with the default HTTP fetcher and zip extractor.
    pub fn new(options: SyncOptions) -> anyhow::Result<Self> {
        let fetcher = Arc::new(HttpFetcher::new(
            &options.user_agent,
            options.request_timeout,
        )?);
        Ok(Self::with_parts(options, fetcher, Arc::new(ZipExtractor)))
    }

    /// Build a synchronizer around caller-supplied transport and extraction.
    pub fn with_parts(
        mut options: SyncOptions,
        fetcher: Arc<dyn Fetcher>,
        extractor: Arc<dyn Extractor>,
    ) -> Self {
        let logger = Logger::new(options.verbose);
        let state = Arc::new(Mutex::new(SyncState {
            manifest: std::mem::take(&mut options.download_manifest),
            ..Default::default()
        }));
        let shutdown = CancellationToken::new();
        let engine = DownloadEngine::new(
            fetcher,
            state.clone(),
            options.abandoned_timeout,
            options.default_delay_in_seconds,
            logger,
            shutdown.clone(),
        );
        Self {
            inner: Arc::new(SyncInner {
                options,
                engine,
                extractor,
                state,
                logger,
                shutdown,
                ticker: StdMutex::new(None),
                attempts: StdMutex::new(Vec::new()),
            }),
        }
    }

    /// Start the reconciliation loop. A second call while the loop is
    /// running is a no-op. Must be called from within a tokio runtime.
    pub fn init(&self) {
        let mut guard = lock(&self.inner.ticker);
        if guard.is_some() {
            self.inner.logger.warn("reconciliation loop already running");
            return;
        }
        self.inner.logger.info(format!(
            "reconciling {} every {:?}",
            self.inner.options.working_directory.display(),
            self.inner.options.interval
        ));

        let sync = self.clone();
        let handle = tokio::spawn(async move {
            let inner = &sync.inner;
            if let Err(err) = tokio::fs::create_dir_all(&inner.options.working_directory).await {
                inner.logger.warn(format!(
                    "cannot create {}: {err}",
                    inner.options.working_directory.display()
                ));
            }

            let period = inner.options.interval;
            let first_tick = if inner.options.disable_immediate_download {
                tokio::time::Instant::now() + period
            } else {
                tokio::time::Instant::now()
            };
            let mut ticker = tokio::time::interval_at(first_tick, period);

            loop {
                tokio::select! {
                    biased;
                    _ = inner.shutdown.cancelled() => break,
                    _ = ticker.tick() => sync.tick_now().await,
                }
            }
        });
        *guard = Some(handle);
    }

    /// One reconciliation pass: refresh the manifest, initiate downloads for
    /// every missing entry, purge orphans. Download attempts are spawned and
    /// not awaited; the purge observes the manifest, not their outcomes.
    pub async fn tick_now(&self) {
        let inner = &self.inner;
        let working_dir = &inner.options.working_directory;

        if let Err(err) = tokio::fs::create_dir_all(working_dir).await {
            inner
                .logger
                .warn(format!("cannot create {}: {err}", working_dir.display()));
        }

        if let Some(producer) = &inner.options.get_manifest {
            match producer().await {
                Ok(manifest) => inner.state.lock().await.manifest = manifest,
                Err(err) => {
                    inner.logger.warn(format!(
                        "manifest refresh failed, keeping previous manifest: {err}"
                    ));
                    return;
                }
            }
        }

        let manifest = inner.state.lock().await.manifest.clone();
        let missing = cache::missing_entries(
            working_dir,
            &manifest,
            inner.options.disable_unzip,
            &inner.logger,
        )
        .await;
        inner.logger.info(format!(
            "{} of {} manifest entries missing",
            missing.len(),
            manifest.len()
        ));

        {
            let mut attempts = lock(&inner.attempts);
            attempts.retain(|handle| !handle.is_finished());
            for entry in missing {
                let sync = self.clone();
                attempts.push(tokio::spawn(async move {
                    sync.attempt(entry).await;
                }));
            }
        }

        cache::purge(working_dir, &manifest, &inner.logger).await;
    }

    /// Ad-hoc download, outside any manifest.
    pub async fn start(
        &self,
        destination: impl Into<PathBuf>,
        request: RequestConfig,
        options: StartOptions,
    ) -> Result<PathBuf, DownloadError> {
        self.inner.engine.start(destination, request, options).await
    }

    /// Stop the ticker and cancel every pending and running download, then
    /// wait for the cancelled attempts to finish unwinding. Pending timers
    /// and aborted transfers resolve with `Cancelled`, and partial files are
    /// gone by the time this returns.
    pub async fn close(&self) {
        self.inner.logger.info("shutting down synchronizer");
        self.inner.shutdown.cancel();
        let ticker = lock(&self.inner.ticker).take();
        if let Some(handle) = ticker {
            let _ = handle.await;
        }
        let attempts = std::mem::take(&mut *lock(&self.inner.attempts));
        let _ = join_all(attempts).await;
    }

    /// Snapshot of the per-destination statistics, if any exist.
    pub async fn download_log(&self, destination: impl AsRef<Path>) -> Option<DownloadLog> {
        self.inner
            .state
            .lock()
            .await
            .log
            .get(destination.as_ref())
            .cloned()
    }

    /// Retry coordinator: one bounded, back-off-delayed attempt for a
    /// manifest entry. Duplicate suppressions do not count as failures.
    async fn attempt(&self, entry: ManifestEntry) {
        let inner = &self.inner;
        let destination = entry.destination(&inner.options.working_directory);
        let limit = entry.retry_limit.unwrap_or(inner.options.default_retry_limit);

        let retries = {
            let mut state = inner.state.lock().await;
            let log = state.log.entry(destination.clone()).or_default();
            if log.retries > limit {
                inner.logger.warn(format!(
                    "giving up on {} after {} failed attempts",
                    destination.display(),
                    log.retries
                ));
                return;
            }
            log.retries
        };

        let delay_in_seconds = match &inner.options.get_download_delay {
            Some(delay_fn) => delay_fn(retries),
            None => entry.delay_in_seconds,
        };
        let request = entry.request_config.clone().with_url(&entry.url);
        let options = StartOptions {
            delay_in_seconds: Some(delay_in_seconds),
            on_new_download: None,
        };

        match inner.engine.start(destination.clone(), request, options).await {
            Ok(path) => {
                self.post_process(&entry, &path).await;
                let mut state = inner.state.lock().await;
                let log = state.log.entry(destination).or_default();
                log.retries = 0;
                log.downloaded_at_ms = Some(epoch_millis());
            }
            Err(err) if err.is_duplicate() => {
                inner
                    .logger
                    .info(format!("skipping {}: {err}", destination.display()));
            }
            Err(err) => {
                inner.logger.warn(format!(
                    "download of {} failed: {err}",
                    destination.display()
                ));
                let mut state = inner.state.lock().await;
                state.log.entry(destination).or_default().retries += 1;
            }
        }
    }

    /// Turn a completed archive download into a catalogued directory.
    async fn post_process(&self, entry: &ManifestEntry, archive: &Path) {
        let inner = &self.inner;
        if inner.options.disable_unzip {
            return;
        }
        let Some(unzip_to) = &entry.unzip_to else {
            return;
        };
        let is_zip = archive
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.ends_with(".zip"));
        if !is_zip {
            return;
        }

        let target = inner.options.working_directory.join(unzip_to);
        if let Err(err) = inner.extractor.extract(archive, &target).await {
            // The archive stays on disk; the next pass retries, since without
            // a catalog the entry still counts as missing.
            inner.logger.warn(format!(
                "extraction of {} failed, keeping archive: {err}",
                archive.display()
            ));
            return;
        }

        match tokio::fs::metadata(&target).await {
            Ok(meta) if meta.is_dir() => match catalog::write_catalog(&target).await {
                Ok(written) => inner.logger.info(format!(
                    "catalogued {} files under {}",
                    written.required_files.len(),
                    target.display()
                )),
                Err(err) => inner.logger.warn(format!(
                    "failed to write catalog in {}: {err}",
                    target.display()
                )),
            },
            _ => {}
        }

        if let Err(err) = tokio::fs::remove_file(archive).await {
            inner.logger.warn(format!(
                "failed to remove archive {}: {err}",
                archive.display()
            ));
        }
    }
}
