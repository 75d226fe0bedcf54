//! Manifest model: the declarative list of assets a working directory
//! should contain.
//!
//! Entries are serialized with the wire names the manifest protocol uses
//! (`fileName`, `unzipTo`, ...) so a JSON manifest fetched from a server
//! deserializes directly.
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Scheduling delay applied to entries that do not set their own.
pub const DEFAULT_ENTRY_DELAY_SECS: u64 = 60;

/// One asset the working directory should contain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    pub url: String,
    /// Destination file name; derived from the URL when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    /// Directory (relative to the working directory) archive contents land in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unzip_to: Option<String>,
    /// Seconds to wait before the download attempt starts.
    #[serde(default = "default_entry_delay")]
    pub delay_in_seconds: u64,
    /// Opaque request options forwarded to the fetcher.
    #[serde(default, skip_serializing_if = "RequestConfig::is_empty")]
    pub request_config: RequestConfig,
    /// Per-entry retry ceiling; falls back to the synchronizer default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_limit: Option<u32>,
}

fn default_entry_delay() -> u64 {
    DEFAULT_ENTRY_DELAY_SECS
}

impl ManifestEntry {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            file_name: None,
            unzip_to: None,
            delay_in_seconds: DEFAULT_ENTRY_DELAY_SECS,
            request_config: RequestConfig::default(),
            retry_limit: None,
        }
    }

    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }

    pub fn with_unzip_to(mut self, unzip_to: impl Into<String>) -> Self {
        self.unzip_to = Some(unzip_to.into());
        self
    }

    pub fn with_delay(mut self, seconds: u64) -> Self {
        self.delay_in_seconds = seconds;
        self
    }

    pub fn with_retry_limit(mut self, limit: u32) -> Self {
        self.retry_limit = Some(limit);
        self
    }

    pub fn with_request_config(mut self, request_config: RequestConfig) -> Self {
        self.request_config = request_config;
        self
    }

    /// Explicit file name, or the last path segment of the URL.
    pub fn resolved_file_name(&self) -> String {
        if let Some(name) = &self.file_name
            && !name.is_empty()
        {
            return name.clone();
        }
        last_url_segment(&self.url)
    }

    /// Absolute destination of the downloaded file under `working_dir`.
    pub fn destination(&self, working_dir: &Path) -> PathBuf {
        working_dir.join(self.resolved_file_name())
    }
}

fn last_url_segment(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    match path.rsplit('/').next() {
        Some(segment) if !segment.is_empty() => segment.to_string(),
        _ => path.to_string(),
    }
}

/// Opaque request options interpreted by the fetcher.
///
/// The core never looks inside beyond forcing `url`; the built-in HTTP
/// fetcher additionally understands a `headers` string map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestConfig(Map<String, Value>);

impl RequestConfig {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Overrides the `url` key, which always wins over caller-supplied data.
    pub fn with_url(mut self, url: &str) -> Self {
        self.0.insert("url".to_string(), Value::String(url.to_string()));
        self
    }

    pub fn url(&self) -> Option<&str> {
        self.0.get("url").and_then(Value::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }
}
