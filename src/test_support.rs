//! Stub fetchers and extractors shared by the unit tests.
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use crate::extract::Extractor;
use crate::fetch::{FetchResponse, Fetcher};
use crate::manifest::RequestConfig;

/// Succeeds immediately, yielding the configured chunks.
pub struct BytesFetcher {
    chunks: Vec<Bytes>,
    calls: AtomicUsize,
}

impl BytesFetcher {
    pub fn new(chunks: &[&'static [u8]]) -> Self {
        Self {
            chunks: chunks.iter().map(|chunk| Bytes::from_static(chunk)).collect(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for BytesFetcher {
    async fn fetch(&self, _request: &RequestConfig) -> Result<FetchResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let chunks: Vec<Result<Bytes>> = self.chunks.iter().cloned().map(Ok).collect();
        Ok(FetchResponse {
            status: 200,
            body: stream::iter(chunks).boxed(),
        })
    }
}

/// Always answers with the given status code and an empty body.
pub struct StatusFetcher(pub u16);

#[async_trait]
impl Fetcher for StatusFetcher {
    async fn fetch(&self, _request: &RequestConfig) -> Result<FetchResponse> {
        Ok(FetchResponse {
            status: self.0,
            body: stream::empty().boxed(),
        })
    }
}

/// Signals admission via `started()`, then holds the body open until
/// `release()` is called.
pub struct GatedFetcher {
    payload: Bytes,
    started: Notify,
    release: Arc<Notify>,
}

impl GatedFetcher {
    pub fn new(payload: &'static [u8]) -> Self {
        Self {
            payload: Bytes::from_static(payload),
            started: Notify::new(),
            release: Arc::new(Notify::new()),
        }
    }

    /// Completes once a transfer has been admitted and is holding the body.
    pub async fn started(&self) {
        self.started.notified().await;
    }

    pub fn release(&self) {
        self.release.notify_one();
    }
}

#[async_trait]
impl Fetcher for GatedFetcher {
    async fn fetch(&self, _request: &RequestConfig) -> Result<FetchResponse> {
        self.started.notify_one();
        let release = self.release.clone();
        let payload = self.payload.clone();
        let body = stream::once(async move {
            release.notified().await;
            Ok(payload)
        })
        .boxed();
        Ok(FetchResponse { status: 200, body })
    }
}

/// Admits the transfer, then never yields a single byte.
#[derive(Default)]
pub struct PendingFetcher {
    started: Notify,
}

impl PendingFetcher {
    pub async fn started(&self) {
        self.started.notified().await;
    }
}

#[async_trait]
impl Fetcher for PendingFetcher {
    async fn fetch(&self, _request: &RequestConfig) -> Result<FetchResponse> {
        self.started.notify_one();
        Ok(FetchResponse {
            status: 200,
            body: stream::pending().boxed(),
        })
    }
}

/// Fails the first `failures` fetches with a transport error, then serves
/// the payload. Records the instant of every call.
pub struct FlakyFetcher {
    failures: usize,
    payload: Bytes,
    calls: Mutex<Vec<Instant>>,
    fail_mid_stream: bool,
}

impl FlakyFetcher {
    pub fn new(failures: usize, payload: &'static [u8]) -> Self {
        Self {
            failures,
            payload: Bytes::from_static(payload),
            calls: Mutex::new(Vec::new()),
            fail_mid_stream: false,
        }
    }

    /// Yields some bytes first, then errors mid-stream on every call.
    pub fn failing_after(payload: &'static [u8]) -> Self {
        Self {
            failures: usize::MAX,
            payload: Bytes::from_static(payload),
            calls: Mutex::new(Vec::new()),
            fail_mid_stream: true,
        }
    }

    pub async fn call_instants(&self) -> Vec<Instant> {
        self.calls.lock().await.clone()
    }

    pub async fn calls(&self) -> usize {
        self.calls.lock().await.len()
    }
}

#[async_trait]
impl Fetcher for FlakyFetcher {
    async fn fetch(&self, _request: &RequestConfig) -> Result<FetchResponse> {
        let attempt = {
            let mut calls = self.calls.lock().await;
            calls.push(Instant::now());
            calls.len()
        };
        if attempt <= self.failures {
            if self.fail_mid_stream {
                let payload = self.payload.clone();
                let body = stream::iter(vec![
                    Ok(payload),
                    Err(anyhow!("connection reset mid-stream")),
                ])
                .boxed();
                return Ok(FetchResponse { status: 200, body });
            }
            return Err(anyhow!("connection refused"));
        }
        Ok(FetchResponse {
            status: 200,
            body: stream::once({
                let payload = self.payload.clone();
                async move { Ok(payload) }
            })
            .boxed(),
        })
    }
}

/// Pretends to extract by writing fixed entries into the target directory.
pub struct StubExtractor {
    entries: Vec<(String, &'static [u8])>,
    calls: AtomicUsize,
}

impl StubExtractor {
    pub fn new(entries: &[(&str, &'static [u8])]) -> Self {
        Self {
            entries: entries
                .iter()
                .map(|(name, content)| (name.to_string(), *content))
                .collect(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Extractor for StubExtractor {
    async fn extract(&self, _archive: &Path, target: &Path) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::fs::create_dir_all(target).await?;
        for (name, content) in &self.entries {
            tokio::fs::write(target.join(name), content).await?;
        }
        Ok(())
    }
}

/// Always refuses to extract.
pub struct FailingExtractor;

#[async_trait]
impl Extractor for FailingExtractor {
    async fn extract(&self, archive: &Path, _target: &Path) -> Result<()> {
        Err(anyhow!("cannot extract {}", archive.display()))
    }
}
