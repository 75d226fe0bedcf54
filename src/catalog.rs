//! The per-extraction catalog file (`info.json`).
//!
//! A catalog is written inside every extracted directory once unpacking
//! succeeds. Its presence is what marks an archive entry as cached; its
//! `requiredFiles` list exists for external audit tooling.
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const CATALOG_FILE_NAME: &str = "info.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogFile {
    /// Immediate entries of the extracted directory, dotfiles excluded.
    pub required_files: Vec<String>,
    /// Milliseconds since the Unix epoch.
    pub downloaded_at: u64,
}

/// Wall-clock milliseconds since the Unix epoch.
pub(crate) fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

/// Immediate entries of `dir` whose names do not start with a dot.
pub async fn visible_entries(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.starts_with('.') {
            names.push(name);
        }
    }
    Ok(names)
}

/// Write the catalog for a freshly extracted directory and return it.
pub async fn write_catalog(dir: &Path) -> Result<CatalogFile> {
    let mut required_files = visible_entries(dir).await?;
    // A re-extraction over a previously catalogued directory must not list
    // the old catalog as content.
    required_files.retain(|name| name != CATALOG_FILE_NAME);

    let catalog = CatalogFile {
        required_files,
        downloaded_at: epoch_millis(),
    };
    let json = serde_json::to_string_pretty(&catalog)?;
    tokio::fs::write(dir.join(CATALOG_FILE_NAME), json).await?;
    Ok(catalog)
}

/// Read and parse the catalog of an extracted directory.
pub async fn read_catalog(dir: &Path) -> Result<CatalogFile> {
    let json = tokio::fs::read_to_string(dir.join(CATALOG_FILE_NAME)).await?;
    serde_json::from_str(&json).context("malformed catalog file")
}
