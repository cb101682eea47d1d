//! Directory walking for scan jobs.
//!
//! Iterative, optionally recursive, with cooperative cancellation checked
//! between entries.

use crate::error::{Result, ScanError};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// One directory visited by the walker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedDir {
    pub path: PathBuf,
    /// Directory mtime in epoch seconds, as observed at walk time.
    pub mtime: i64,
    /// Audio files directly inside this directory.
    pub files: Vec<PathBuf>,
}

/// Walk `root`, collecting audio files per directory.
///
/// Files are filtered by extension (case-insensitive). Unreadable
/// subdirectories are skipped with a warning rather than failing the walk.
pub async fn walk_directory(
    root: &Path,
    recursive: bool,
    extensions: &[String],
    token: &CancellationToken,
) -> Result<Vec<ScannedDir>> {
    let mut pending = vec![root.to_path_buf()];
    let mut scanned = Vec::new();

    while let Some(dir) = pending.pop() {
        if token.is_cancelled() {
            return Err(ScanError::Cancelled);
        }

        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "Skipping unreadable directory");
                continue;
            }
        };

        let mtime = dir_mtime(&dir).await;
        let mut files = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            if token.is_cancelled() {
                return Err(ScanError::Cancelled);
            }
            let path = entry.path();
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                if recursive {
                    pending.push(path);
                }
            } else if has_audio_extension(&path, extensions) {
                files.push(path);
            }
        }

        files.sort();
        scanned.push(ScannedDir {
            path: dir,
            mtime,
            files,
        });
    }

    Ok(scanned)
}

/// Directory mtime in epoch seconds; 0 when unavailable.
pub async fn dir_mtime(dir: &Path) -> i64 {
    match tokio::fs::metadata(dir).await.and_then(|m| m.modified()) {
        Ok(modified) => modified
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0),
        Err(_) => 0,
    }
}

fn has_audio_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_lowercase();
            extensions.iter().any(|wanted| *wanted == ext)
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exts() -> Vec<String> {
        vec!["mp3".to_string(), "flac".to_string()]
    }

    async fn touch(path: &Path) {
        tokio::fs::write(path, b"x").await.unwrap();
    }

    #[tokio::test]
    async fn collects_audio_files_per_directory() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        tokio::fs::create_dir(root.join("sub")).await.unwrap();
        touch(&root.join("a.mp3")).await;
        touch(&root.join("b.FLAC")).await;
        touch(&root.join("cover.jpg")).await;
        touch(&root.join("sub/c.mp3")).await;

        let token = CancellationToken::new();
        let scanned = walk_directory(root, true, &exts(), &token).await.unwrap();

        assert_eq!(scanned.len(), 2);
        let top = scanned.iter().find(|d| d.path == root).unwrap();
        assert_eq!(top.files.len(), 2, "non-audio files are filtered");
        let sub = scanned.iter().find(|d| d.path == root.join("sub")).unwrap();
        assert_eq!(sub.files, vec![root.join("sub/c.mp3")]);
    }

    #[tokio::test]
    async fn non_recursive_walk_stays_in_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        tokio::fs::create_dir(root.join("sub")).await.unwrap();
        touch(&root.join("a.mp3")).await;
        touch(&root.join("sub/b.mp3")).await;

        let token = CancellationToken::new();
        let scanned = walk_directory(root, false, &exts(), &token).await.unwrap();

        assert_eq!(scanned.len(), 1);
        assert_eq!(scanned[0].files, vec![root.join("a.mp3")]);
    }

    #[tokio::test]
    async fn cancelled_token_stops_the_walk() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("a.mp3")).await;

        let token = CancellationToken::new();
        token.cancel();
        let result = walk_directory(dir.path(), true, &exts(), &token).await;
        assert!(matches!(result, Err(ScanError::Cancelled)));
    }
}
