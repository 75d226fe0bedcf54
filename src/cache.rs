//! Local cache inspection and purging.
//!
//! The inspector is read-only: it decides which manifest entries have no
//! usable copy under the working directory. The purger is its counterpart,
//! removing everything the manifest no longer references.
use std::path::Path;

use crate::catalog;
use crate::config::Logger;
use crate::manifest::ManifestEntry;

/// Entries of `manifest` considered missing, in manifest order.
pub(crate) async fn missing_entries(
    working_dir: &Path,
    manifest: &[ManifestEntry],
    disable_unzip: bool,
    logger: &Logger,
) -> Vec<ManifestEntry> {
    let mut missing = Vec::new();
    for entry in manifest {
        if !is_present(working_dir, entry, disable_unzip, logger).await {
            missing.push(entry.clone());
        }
    }
    missing
}

async fn is_present(
    working_dir: &Path,
    entry: &ManifestEntry,
    disable_unzip: bool,
    logger: &Logger,
) -> bool {
    let file_name = entry.resolved_file_name();

    // An archive entry is judged by its extraction directory. With unzip
    // disabled the archive file itself is the cached artifact.
    if file_name.ends_with(".zip")
        && !disable_unzip
        && let Some(unzip_to) = &entry.unzip_to
    {
        return extraction_present(&working_dir.join(unzip_to), logger).await;
    }

    match tokio::fs::metadata(working_dir.join(&file_name)).await {
        Ok(meta) => meta.is_file(),
        Err(_) => false,
    }
}

/// Present iff the directory exists, is non-empty and carries a readable
/// catalog. An unreadable catalog forces a re-download.
async fn extraction_present(dir: &Path, logger: &Logger) -> bool {
    match tokio::fs::metadata(dir).await {
        Ok(meta) if meta.is_dir() => {}
        _ => return false,
    }
    match tokio::fs::read_dir(dir).await {
        Ok(mut entries) => match entries.next_entry().await {
            Ok(Some(_)) => {}
            _ => return false,
        },
        Err(_) => return false,
    }
    match catalog::read_catalog(dir).await {
        Ok(catalog) => {
            logger.info(format!(
                "cache hit for {} ({} catalogued files)",
                dir.display(),
                catalog.required_files.len()
            ));
            true
        }
        Err(err) => {
            logger.warn(format!("unreadable catalog in {}: {err}", dir.display()));
            false
        }
    }
}

/// Remove every immediate child of `working_dir` the manifest does not
/// reference. Individual failures are logged and do not abort the sweep.
pub(crate) async fn purge(working_dir: &Path, manifest: &[ManifestEntry], logger: &Logger) {
    let mut entries = match tokio::fs::read_dir(working_dir).await {
        Ok(entries) => entries,
        Err(err) => {
            logger.warn(format!(
                "cannot enumerate {}: {err}",
                working_dir.display()
            ));
            return;
        }
    };

    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(err) => {
                logger.warn(format!(
                    "error while enumerating {}: {err}",
                    working_dir.display()
                ));
                break;
            }
        };

        let name = entry.file_name().to_string_lossy().into_owned();
        if referenced(manifest, &name) {
            continue;
        }

        let path = entry.path();
        let removal = match entry.file_type().await {
            Ok(kind) if kind.is_dir() => tokio::fs::remove_dir_all(&path).await,
            Ok(_) => tokio::fs::remove_file(&path).await,
            Err(err) => {
                logger.warn(format!("cannot stat {}: {err}", path.display()));
                continue;
            }
        };
        match removal {
            Ok(()) => logger.info(format!("purged {}", path.display())),
            Err(err) => logger.warn(format!("failed to purge {}: {err}", path.display())),
        }
    }
}

fn referenced(manifest: &[ManifestEntry], name: &str) -> bool {
    manifest.iter().any(|entry| {
        entry.resolved_file_name() == name || entry.unzip_to.as_deref() == Some(name)
    })
}
