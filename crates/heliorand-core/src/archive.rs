//! Optional frame archival.
//!
//! The fetch loop can mirror frames to an archive for later inspection or
//! reprocessing. Disabled unless a target directory is configured; cloud
//! backends are out of scope, a directory on disk is the only bundled
//! implementation.

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

use crate::frame::Frame;

/// Error from frame archival.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archive I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Sink for fetched frames.
#[async_trait]
pub trait FrameArchive: Send + Sync {
    /// Persist one frame; returns a locator for logging.
    async fn store(&self, frame: &Frame) -> Result<String, ArchiveError>;
}

/// Filesystem archive with a retention cap.
pub struct DirArchive {
    root: PathBuf,
    max_files: usize,
}

impl DirArchive {
    pub fn new(root: impl Into<PathBuf>, max_files: usize) -> Self {
        Self {
            root: root.into(),
            max_files,
        }
    }

    /// Drop the oldest files once the cap is exceeded.
    async fn prune(&self) -> Result<(), ArchiveError> {
        let mut files: Vec<(std::time::SystemTime, PathBuf)> = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = dir.next_entry().await? {
            let meta = entry.metadata().await?;
            if meta.is_file() {
                let modified = meta.modified().unwrap_or(std::time::UNIX_EPOCH);
                files.push((modified, entry.path()));
            }
        }
        if files.len() <= self.max_files {
            return Ok(());
        }
        files.sort_by_key(|(modified, _)| *modified);
        let excess = files.len() - self.max_files;
        for (_, path) in files.into_iter().take(excess) {
            log::info!("pruning archived frame {}", path.display());
            tokio::fs::remove_file(path).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl FrameArchive for DirArchive {
    async fn store(&self, frame: &Frame) -> Result<String, ArchiveError> {
        tokio::fs::create_dir_all(&self.root).await?;

        let stamp = frame.fetched_at.format("%Y%m%d_%H%M%S%3f");
        let tag = sanitize(&frame.source_tag);
        let path = self.root.join(format!("{stamp}_{tag}"));
        tokio::fs::write(&path, &frame.bytes).await?;

        self.prune().await?;
        Ok(path.display().to_string())
    }
}

/// Make a source tag safe to embed in a filename.
fn sanitize(tag: &str) -> String {
    tag.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stores_frame_bytes_under_root() {
        let dir = tempfile::tempdir().unwrap();
        let archive = DirArchive::new(dir.path(), 10);
        let frame = Frame::new(vec![9, 8, 7], "nasa_sdo/latest_1024_0193.jpg");

        let location = archive.store(&frame).await.unwrap();
        let written = tokio::fs::read(&location).await.unwrap();
        assert_eq!(written, vec![9, 8, 7]);
        assert!(location.contains("nasa_sdo_latest_1024_0193.jpg"));
    }

    #[tokio::test]
    async fn retention_cap_prunes_oldest() {
        let dir = tempfile::tempdir().unwrap();
        let archive = DirArchive::new(dir.path(), 2);
        for i in 0..4u8 {
            let frame = Frame::new(vec![i], format!("t/{i}"));
            archive.store(&frame).await.unwrap();
            // Space out mtimes so pruning order is stable.
            tokio::time::sleep(std::time::Duration::from_millis(15)).await;
        }

        let mut count = 0;
        let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
        while entries.next_entry().await.unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, 2);
    }
}
