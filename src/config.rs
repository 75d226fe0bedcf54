//! Synchronizer settings and callback types.
//!
//! All knobs are plain public fields so embedding applications can use
//! struct-update syntax over [`SyncOptions::default`]. Durations are
//! expressed as [`Duration`] even where the original configuration surface
//! spoke in raw milliseconds.
use std::fmt::Display;
use std::path::PathBuf;
use std::time::Duration;

use futures_util::future::BoxFuture;

use crate::manifest::ManifestEntry;

/// Computes the scheduling delay (in seconds) for a given retry count.
pub type DelayFn = Box<dyn Fn(u32) -> u64 + Send + Sync>;

/// Produces a fresh manifest at the start of each reconciliation tick.
pub type ManifestProducer =
    Box<dyn Fn() -> BoxFuture<'static, anyhow::Result<Vec<ManifestEntry>>> + Send + Sync>;

/// Invoked once when a download has been admitted past deduplication.
pub type NewDownloadHook = Box<dyn FnOnce() + Send>;

/// Configuration for a [`Synchronizer`](crate::Synchronizer).
pub struct SyncOptions {
    /// How long an in-flight record may occupy a destination before a later
    /// caller is allowed to evict it.
    pub abandoned_timeout: Duration,
    /// Delay applied to ad-hoc `start` calls that carry no delay of their own.
    pub default_delay_in_seconds: u64,
    /// Retry ceiling for manifest entries without an explicit `retry_limit`.
    pub default_retry_limit: u32,
    /// Optional back-off curve; receives the retry count, returns seconds.
    pub get_download_delay: Option<DelayFn>,
    /// When set, archives are never extracted and a `.zip` entry counts as
    /// cached as soon as the archive file itself exists.
    pub disable_unzip: bool,
    /// Initial manifest, used until `get_manifest` (if any) replaces it.
    pub download_manifest: Vec<ManifestEntry>,
    /// Reconciliation tick period.
    pub interval: Duration,
    /// Print every state transition to stdout; silent otherwise.
    pub verbose: bool,
    /// Root directory all managed files live under.
    pub working_directory: PathBuf,
    /// Async manifest producer invoked on every tick.
    pub get_manifest: Option<ManifestProducer>,
    /// Skip the synchronous tick normally fired when the loop starts.
    pub disable_immediate_download: bool,
    /// User agent presented by the built-in HTTP fetcher.
    pub user_agent: String,
    /// Optional whole-request timeout for the built-in HTTP fetcher.
    pub request_timeout: Option<Duration>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            abandoned_timeout: Duration::from_millis(1_800_000),
            default_delay_in_seconds: 0,
            default_retry_limit: 5,
            get_download_delay: None,
            disable_unzip: false,
            download_manifest: Vec::new(),
            interval: Duration::from_millis(60_000),
            verbose: false,
            working_directory: PathBuf::from("./downloads"),
            get_manifest: None,
            disable_immediate_download: false,
            user_agent: concat!("downsync/", env!("CARGO_PKG_VERSION")).to_string(),
            request_timeout: None,
        }
    }
}

/// Stdout sink gated by the `verbose` flag.
///
/// Silent mode emits nothing at all; verbose mode prints every transition,
/// failures included, to standard output so a caller capturing stdout sees
/// the full history.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct Logger {
    verbose: bool,
}

impl Logger {
    pub(crate) fn new(verbose: bool) -> Self {
        Self { verbose }
    }

    pub(crate) fn info(&self, msg: impl Display) {
        if self.verbose {
            println!("{msg}");
        }
    }

    pub(crate) fn warn(&self, msg: impl Display) {
        if self.verbose {
            println!("warning: {msg}");
        }
    }
}
