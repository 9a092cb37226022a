//! Source enumeration and change detection
//!
//! Walks the configured sessions directory for transcript files and derives
//! the (mtime, size) fingerprints that gate re-parsing. Enumeration is
//! best-effort: directories that cannot be listed are skipped with a warning
//! and never abort a refresh.

use crate::types::Fingerprint;
use std::path::{Path, PathBuf};

/// File name suffix of recognized transcript logs.
pub const LOG_SUFFIX: &str = ".jsonl";

/// Recursively list transcript files under `root`.
///
/// Uses an explicit directory stack rather than recursion so each directory's
/// read error can be captured and skipped independently. A missing or
/// unreadable root yields an empty list.
pub async fn list_transcript_files(root: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];

    while let Some(dir) = stack.pop() {
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(dir = %dir.display(), error = %e, "Skipping unreadable directory");
                continue;
            }
        };

        loop {
            match entries.next_entry().await {
                Ok(Some(entry)) => {
                    let path = entry.path();
                    match entry.file_type().await {
                        Ok(ft) if ft.is_dir() => stack.push(path),
                        Ok(ft) if ft.is_file() => {
                            let is_log = path
                                .file_name()
                                .and_then(|n| n.to_str())
                                .map(|n| n.ends_with(LOG_SUFFIX))
                                .unwrap_or(false);
                            if is_log {
                                out.push(path);
                            }
                        }
                        Ok(_) => {}
                        Err(e) => {
                            tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable entry");
                        }
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(dir = %dir.display(), error = %e, "Directory listing interrupted");
                    break;
                }
            }
        }
    }

    out
}

/// Stat a file and derive its change-detection fingerprint.
///
/// Returns `None` when the stat fails; the caller skips the file for this
/// refresh cycle without deleting its prior record.
pub async fn fingerprint(path: &Path) -> Option<Fingerprint> {
    match tokio::fs::metadata(path).await {
        Ok(metadata) => Some(Fingerprint::of(&metadata)),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Failed to stat file, skipping");
            None
        }
    }
}

/// Session identifier derived from the file name (the stem without `.jsonl`).
pub fn session_id_from_path(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("unknown")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_lists_nested_transcripts_only() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("2025/01/02");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("rollout-a.jsonl"), "{}\n").unwrap();
        std::fs::write(nested.join("notes.txt"), "skip me").unwrap();
        std::fs::write(dir.path().join("rollout-b.jsonl"), "{}\n").unwrap();

        let mut files = list_transcript_files(dir.path()).await;
        files.sort();

        assert_eq!(files.len(), 2);
        assert!(files.iter().all(|f| f.to_string_lossy().ends_with(".jsonl")));
    }

    #[tokio::test]
    async fn test_missing_root_is_empty() {
        let files = list_transcript_files(Path::new("/nonexistent/tracelens-test")).await;
        assert!(files.is_empty());
    }

    #[tokio::test]
    async fn test_fingerprint_tracks_size() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s.jsonl");
        std::fs::write(&path, "one\n").unwrap();

        let a = fingerprint(&path).await.unwrap();
        std::fs::write(&path, "one\ntwo\n").unwrap();
        let b = fingerprint(&path).await.unwrap();

        assert_ne!(a.size, b.size);
        assert!(fingerprint(&dir.path().join("missing.jsonl")).await.is_none());
    }

    #[test]
    fn test_session_id_from_path() {
        assert_eq!(
            session_id_from_path(Path::new("/a/b/rollout-2025-abc.jsonl")),
            "rollout-2025-abc"
        );
    }
}
