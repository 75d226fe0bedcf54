//! downsync: resilient manifest-driven asset synchronizer.
//!
//! `downsync` keeps a local working directory in sync with a dynamic list of
//! remote files: it downloads what is missing, retries failures with
//! back-off, extracts archives into catalogued directories, and purges
//! whatever the manifest no longer references. It is built for long-running
//! unattended devices reconciling with a server over unreliable networks.
//!
//! # Example
//!
//! ```no_run
//! use downsync::{ManifestEntry, SyncOptions, Synchronizer};
//!
//! # fn run() -> anyhow::Result<()> {
//! let sync = Synchronizer::new(SyncOptions {
//!     working_directory: "./downloads".into(),
//!     download_manifest: vec![
//!         ManifestEntry::new("http://host/show-reel.mp4"),
//!         ManifestEntry::new("http://host/trailers.zip")
//!             .with_file_name("trailers.zip")
//!             .with_unzip_to("trailers"),
//!     ],
//!     ..SyncOptions::default()
//! })?;
//! sync.init();
//! # Ok(())
//! # }
//! ```

mod cache;
pub mod catalog;
pub mod config;
pub mod daemon;
pub mod engine;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod manifest;
#[cfg(test)]
pub mod test_support;

pub use catalog::{CATALOG_FILE_NAME, CatalogFile};
pub use config::{DelayFn, ManifestProducer, NewDownloadHook, SyncOptions};
pub use daemon::Synchronizer;
pub use engine::{DownloadLog, StartOptions};
pub use error::DownloadError;
pub use extract::{Extractor, ZipExtractor};
pub use fetch::{BodyStream, FetchResponse, Fetcher, HttpFetcher};
pub use manifest::{ManifestEntry, RequestConfig};
