//! Archive extraction seam.
use std::fs::File;
use std::io;
use std::path::Path;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;

/// Unpacks an archive file into a target directory.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, archive: &Path, target: &Path) -> Result<()>;
}

/// Extractor for zip archives.
///
/// The zip walk is synchronous, so it runs on the blocking pool.
pub struct ZipExtractor;

#[async_trait]
impl Extractor for ZipExtractor {
    async fn extract(&self, archive: &Path, target: &Path) -> Result<()> {
        let archive = archive.to_path_buf();
        let target = target.to_path_buf();
        tokio::task::spawn_blocking(move || unpack(&archive, &target))
            .await
            .context("extraction task failed")?
    }
}

fn unpack(archive_path: &Path, target: &Path) -> Result<()> {
    let file = File::open(archive_path)
        .with_context(|| format!("failed to open archive {}", archive_path.display()))?;
    let mut archive = zip::ZipArchive::new(file)
        .with_context(|| format!("{} is not a readable zip archive", archive_path.display()))?;

    std::fs::create_dir_all(target)?;

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        // Entries whose paths would escape the target directory are rejected.
        let Some(relative) = entry.enclosed_name() else {
            bail!("archive entry {index} has an unsafe path");
        };
        let path = target.join(relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&path)?;
            continue;
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&path)?;
        io::copy(&mut entry, &mut out)?;
    }
    Ok(())
}
