//! Per-destination download state machine.
//!
//! The engine owns three maps: in-flight records, scheduled (timer-armed)
//! records, and the long-lived per-destination download log. All map
//! mutations go through one mutex; the streaming body copy itself runs
//! without any lock held.
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::StreamExt;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::catalog::epoch_millis;
use crate::config::{Logger, NewDownloadHook};
use crate::error::DownloadError;
use crate::fetch::Fetcher;
use crate::manifest::{ManifestEntry, RequestConfig};

/// An in-flight download; presence means a writer owns the destination.
#[derive(Debug)]
pub(crate) struct DownloadRecord {
    pub started: Instant,
    id: u64,
}

/// A download awaiting its timer.
#[derive(Debug)]
pub(crate) struct ScheduledRecord {
    pub fire_at: Instant,
    pub cancel: CancellationToken,
    id: u64,
}

/// Per-destination statistics kept for the lifetime of the process.
#[derive(Debug, Clone, Default)]
pub struct DownloadLog {
    /// Failed attempts since the last success; reset to zero on completion.
    pub retries: u32,
    /// Wall-clock millis of the most recent admitted attempt.
    pub last_attempt_ms: Option<u64>,
    /// Wall-clock millis of the most recent successful completion.
    pub downloaded_at_ms: Option<u64>,
}

/// Everything the engine and the reconciliation loop mutate, behind one lock.
#[derive(Default)]
pub(crate) struct SyncState {
    pub current: HashMap<PathBuf, DownloadRecord>,
    pub scheduled: HashMap<PathBuf, ScheduledRecord>,
    pub log: HashMap<PathBuf, DownloadLog>,
    pub manifest: Vec<ManifestEntry>,
}

/// Options accepted by [`DownloadEngine::start`].
#[derive(Default)]
pub struct StartOptions {
    /// Seconds to wait before the transfer is admitted; falls back to the
    /// engine-wide default when absent.
    pub delay_in_seconds: Option<u64>,
    /// Invoked once the download has been admitted past deduplication.
    pub on_new_download: Option<NewDownloadHook>,
}

pub struct DownloadEngine {
    fetcher: Arc<dyn Fetcher>,
    state: Arc<Mutex<SyncState>>,
    abandoned_timeout: Duration,
    default_delay_secs: u64,
    logger: Logger,
    shutdown: CancellationToken,
    next_id: AtomicU64,
}

impl DownloadEngine {
    pub(crate) fn new(
        fetcher: Arc<dyn Fetcher>,
        state: Arc<Mutex<SyncState>>,
        abandoned_timeout: Duration,
        default_delay_secs: u64,
        logger: Logger,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            fetcher,
            state,
            abandoned_timeout,
            default_delay_secs,
            logger,
            shutdown,
            next_id: AtomicU64::new(1),
        }
    }

    /// Download `request` to `destination`, honoring deduplication, expiry
    /// and the optional scheduling delay. Resolves with the destination once
    /// every byte has been flushed to disk.
    pub async fn start(
        &self,
        destination: impl Into<PathBuf>,
        request: RequestConfig,
        options: StartOptions,
    ) -> Result<PathBuf, DownloadError> {
        let destination = destination.into();
        let delay = options
            .delay_in_seconds
            .unwrap_or(self.default_delay_secs);
        if delay > 0 {
            return self
                .start_scheduled(
                    destination,
                    request,
                    Duration::from_secs(delay),
                    options.on_new_download,
                )
                .await;
        }
        self.start_now(destination, request, options.on_new_download).await
    }

    /// Non-delayed path: admission, streaming copy, cleanup.
    async fn start_now(
        &self,
        destination: PathBuf,
        request: RequestConfig,
        on_new_download: Option<NewDownloadHook>,
    ) -> Result<PathBuf, DownloadError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        {
            let mut state = self.state.lock().await;

            // An explicit start supersedes a pending timer for the same path.
            if let Some(pending) = state.scheduled.remove(&destination) {
                pending.cancel.cancel();
                self.logger.info(format!(
                    "superseding scheduled download for {}",
                    destination.display()
                ));
            }

            let expired = match state.current.get(&destination) {
                Some(record) if record.started.elapsed() > self.abandoned_timeout => true,
                Some(_) => {
                    return Err(DownloadError::Duplicate { path: destination });
                }
                None => false,
            };
            if expired {
                state.current.remove(&destination);
                self.logger.warn(format!(
                    "evicting stale transfer for {}",
                    destination.display()
                ));
                // Unlink while still holding the lock so no competitor can
                // admit a fresh transfer before the residue is gone.
                self.remove_partial(&destination).await;
                return Err(DownloadError::Abandoned { path: destination });
            }

            // Leftover from an earlier crashed or failed run.
            if tokio::fs::try_exists(&destination).await.unwrap_or(false) {
                let _ = tokio::fs::remove_file(&destination).await;
            }

            if let Some(hook) = on_new_download {
                hook();
            }

            state.current.insert(
                destination.clone(),
                DownloadRecord {
                    started: Instant::now(),
                    id,
                },
            );
            state
                .log
                .entry(destination.clone())
                .or_default()
                .last_attempt_ms = Some(epoch_millis());
        }

        self.logger
            .info(format!("downloading {}", destination.display()));

        match self.transfer(&destination, &request).await {
            Ok(()) => {
                self.release_record(&destination, id).await;
                self.logger
                    .info(format!("downloaded {}", destination.display()));
                Ok(destination)
            }
            Err(err) => {
                self.fail_cleanup(&destination, id).await;
                Err(err)
            }
        }
    }

    /// Delayed path: arm a cancellable timer, then re-enter the non-delayed
    /// path when it fires.
    async fn start_scheduled(
        &self,
        destination: PathBuf,
        request: RequestConfig,
        delay: Duration,
        on_new_download: Option<NewDownloadHook>,
    ) -> Result<PathBuf, DownloadError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let cancel = self.shutdown.child_token();
        {
            let mut state = self.state.lock().await;

            if let Some(pending) = state.scheduled.get(&destination) {
                let remaining_secs = pending
                    .fire_at
                    .saturating_duration_since(Instant::now())
                    .as_secs();
                return Err(DownloadError::DuplicateScheduled {
                    path: destination,
                    remaining_secs,
                });
            }

            let expired = match state.current.get(&destination) {
                Some(record) if record.started.elapsed() > self.abandoned_timeout => true,
                Some(_) => {
                    return Err(DownloadError::DuplicateInFlight { path: destination });
                }
                None => false,
            };
            if expired {
                state.current.remove(&destination);
                self.logger.warn(format!(
                    "evicting stale transfer for {}",
                    destination.display()
                ));
                // Unlink while still holding the lock so no competitor can
                // admit a fresh transfer before the residue is gone.
                self.remove_partial(&destination).await;
            }

            state.scheduled.insert(
                destination.clone(),
                ScheduledRecord {
                    fire_at: Instant::now() + delay,
                    cancel: cancel.clone(),
                    id,
                },
            );
        }

        self.logger.info(format!(
            "scheduled {} in {}s",
            destination.display(),
            delay.as_secs()
        ));

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.release_scheduled(&destination, id).await;
                Err(DownloadError::Cancelled)
            }
            _ = tokio::time::sleep(delay) => {
                self.release_scheduled(&destination, id).await;
                self.start_now(destination, request, on_new_download).await
            }
        }
    }

    async fn transfer(
        &self,
        destination: &Path,
        request: &RequestConfig,
    ) -> Result<(), DownloadError> {
        let file = tokio::fs::File::create(destination).await?;
        let mut writer = BufWriter::new(file);

        let response = self
            .fetcher
            .fetch(request)
            .await
            .map_err(DownloadError::Transport)?;
        if !response.is_success() {
            return Err(DownloadError::HttpStatus {
                status: response.status,
            });
        }

        let mut body = response.body;
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return Err(DownloadError::Cancelled),
                chunk = body.next() => match chunk {
                    Some(Ok(bytes)) => writer.write_all(&bytes).await?,
                    Some(Err(err)) => return Err(DownloadError::Transport(err)),
                    None => break,
                },
            }
        }

        // All bytes must reach the file before the record is released.
        writer.flush().await?;
        Ok(())
    }

    /// Remove our in-flight record, leaving a record that replaced ours
    /// (after an eviction) alone.
    async fn release_record(&self, destination: &Path, id: u64) {
        let mut state = self.state.lock().await;
        if state.current.get(destination).is_some_and(|record| record.id == id) {
            state.current.remove(destination);
        }
    }

    /// Failure-path cleanup: drop our record and unlink the partial file in
    /// one locked step. When our record was already evicted, another writer
    /// may own the path, so nothing is touched.
    async fn fail_cleanup(&self, destination: &Path, id: u64) {
        let mut state = self.state.lock().await;
        if state.current.get(destination).is_some_and(|record| record.id == id) {
            state.current.remove(destination);
            self.remove_partial(destination).await;
        }
    }

    /// Remove our scheduled record, leaving any replacement armed later alone.
    async fn release_scheduled(&self, destination: &Path, id: u64) {
        let mut state = self.state.lock().await;
        if state
            .scheduled
            .get(destination)
            .is_some_and(|record| record.id == id)
        {
            state.scheduled.remove(destination);
        }
    }

    async fn remove_partial(&self, destination: &Path) {
        match tokio::fs::remove_file(destination).await {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => self.logger.warn(format!(
                "failed to remove partial file {}: {err}",
                destination.display()
            )),
        }
    }
}
