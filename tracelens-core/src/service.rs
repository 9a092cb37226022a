//! Refresh coordination and the public query surface
//!
//! [`TranscriptIndex`] owns the store and serializes refreshes: at most one
//! refresh runs at a time, and a completed refresh suppresses further scans
//! for [`REFRESH_INTERVAL`]. Queries call `ensure_fresh` first, so callers
//! always read an index no staler than that interval without ever stacking
//! concurrent scans.

use crate::config::Config;
use crate::db::{Database, RefreshBatch, INDEX_VERSION};
use crate::error::Result;
use crate::parse::{build_file_index, RawRecord, RecordKind};
use crate::types::{
    rfc3339_utc, IndexSnapshot, SessionFilter, SessionTimeline, SessionsPage, WordCloud,
    WordCloudQuery,
};
use crate::{scan, timeline};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::io::AsyncBufReadExt;

/// Minimum time between directory scans; also the in-memory snapshot TTL.
pub const REFRESH_INTERVAL: Duration = Duration::from_secs(10);

/// Mutable state guarded by the refresh lock. Holding the lock across an
/// entire refresh is what gives single-flight: concurrent callers queue on
/// the mutex and then observe the throttle stamp.
#[derive(Default)]
struct RefreshState {
    last_refresh: Option<Instant>,
    snapshot: Option<IndexSnapshot>,
}

pub struct TranscriptIndex {
    sessions_dir: PathBuf,
    cache_dir: PathBuf,
    db: Database,
    state: tokio::sync::Mutex<RefreshState>,
}

impl TranscriptIndex {
    /// Open the index using resolved configuration paths.
    pub fn new(config: &Config) -> Result<Self> {
        Self::with_paths(config.sessions_dir(), config.cache_dir())
    }

    /// Open the index over explicit directories.
    pub fn with_paths(sessions_dir: PathBuf, cache_dir: PathBuf) -> Result<Self> {
        let db = Database::open(&cache_dir.join("index.sqlite"))?;
        Ok(Self {
            sessions_dir,
            cache_dir,
            db,
            state: tokio::sync::Mutex::new(RefreshState::default()),
        })
    }

    /// The aggregate snapshot, refreshed if stale.
    pub async fn index_snapshot(&self) -> Result<IndexSnapshot> {
        self.ensure_fresh().await
    }

    /// Refresh immediately, ignoring the throttle window.
    pub async fn refresh_now(&self) -> Result<IndexSnapshot> {
        let mut state = self.state.lock().await;
        self.refresh().await?;
        let snapshot = self.db.snapshot(&self.sessions_dir, &self.cache_dir)?;
        state.last_refresh = Some(Instant::now());
        state.snapshot = Some(snapshot.clone());
        Ok(snapshot)
    }

    /// List sessions matching a filter, refreshing the index first.
    pub async fn list_sessions(&self, filter: &SessionFilter) -> Result<SessionsPage> {
        self.ensure_fresh().await?;
        self.db.list_sessions(filter)
    }

    /// Ranked user word-cloud tokens, refreshing the index first.
    pub async fn user_word_cloud(&self, query: &WordCloudQuery) -> Result<WordCloud> {
        self.ensure_fresh().await?;
        self.db.word_cloud(query)
    }

    /// The event timeline for one session.
    ///
    /// Resolution order: the indexed file for the id, then a scan of the
    /// source tree (file-name match, then a first-line metadata probe), and
    /// finally a synthetic placeholder so the caller always gets a timeline.
    pub async fn session_timeline(&self, session_id: &str) -> Result<SessionTimeline> {
        self.ensure_fresh().await?;

        let (path, summary) = match self.db.get_session(session_id)? {
            Some(summary) => (PathBuf::from(summary.file.clone()), Some(summary)),
            None => match self.find_file_for_session(session_id).await {
                Some(path) => (path, None),
                None => return Ok(timeline::missing_session_timeline(session_id)),
            },
        };

        let fp = match scan::fingerprint(&path).await {
            Some(fp) => fp,
            None => return Ok(timeline::missing_session_timeline(session_id)),
        };

        let summary = match summary {
            Some(summary) => summary,
            None => build_file_index(&path).await?.summary,
        };

        timeline::load_or_build(&self.cache_dir, &path, fp, summary).await
    }

    /// Refresh the store if the throttle window has passed, then return the
    /// aggregate snapshot. The lock is held for the whole call.
    async fn ensure_fresh(&self) -> Result<IndexSnapshot> {
        let mut state = self.state.lock().await;

        let fresh = state
            .last_refresh
            .map(|at| at.elapsed() < REFRESH_INTERVAL)
            .unwrap_or(false);
        if fresh {
            if let Some(snapshot) = &state.snapshot {
                return Ok(snapshot.clone());
            }
        }

        self.refresh().await?;
        let snapshot = self.db.snapshot(&self.sessions_dir, &self.cache_dir)?;
        state.last_refresh = Some(Instant::now());
        state.snapshot = Some(snapshot.clone());
        Ok(snapshot)
    }

    /// One incremental refresh: scan the source tree, diff fingerprints
    /// against the store, re-parse what changed, and apply the batch in a
    /// single transaction.
    async fn refresh(&self) -> Result<()> {
        let started = Instant::now();
        let files = scan::list_transcript_files(&self.sessions_dir).await;
        let stored = self.db.stored_fingerprints()?;
        let force_rebuild = self.db.index_version()? != Some(INDEX_VERSION);

        let on_disk: std::collections::HashSet<String> = files
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect();
        let remove: Vec<String> = stored
            .keys()
            .filter(|file| !on_disk.contains(*file))
            .cloned()
            .collect();

        let mut upserts = Vec::new();
        for path in &files {
            let fp = match scan::fingerprint(path).await {
                Some(fp) => fp,
                None => continue,
            };
            let key = path.to_string_lossy();
            if !force_rebuild && stored.get(key.as_ref()) == Some(&fp) {
                continue;
            }
            match build_file_index(path).await {
                Ok(index) => upserts.push((fp, index)),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to index file, skipping");
                }
            }
        }

        let parsed = upserts.len();
        let removed = remove.len();
        self.db.apply_refresh(&RefreshBatch {
            sessions_dir: self.sessions_dir.to_string_lossy().into_owned(),
            force_rebuild,
            remove,
            upserts,
            generated_at: rfc3339_utc(Utc::now()),
        })?;

        tracing::debug!(
            files = files.len(),
            parsed,
            removed,
            force_rebuild,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Index refresh complete"
        );
        Ok(())
    }

    /// Slow-path lookup for a session id that is not in the store: first by
    /// file name, then by probing each file's first line for matching
    /// session metadata.
    async fn find_file_for_session(&self, session_id: &str) -> Option<PathBuf> {
        let files = scan::list_transcript_files(&self.sessions_dir).await;

        for path in &files {
            if scan::session_id_from_path(path) == session_id {
                return Some(path.clone());
            }
        }

        for path in &files {
            if first_line_session_id(path).await.as_deref() == Some(session_id) {
                return Some(path.clone());
            }
        }

        None
    }
}

/// Read only the first line of a transcript and extract the session id from
/// its metadata record, if that is what it is.
async fn first_line_session_id(path: &Path) -> Option<String> {
    let file = tokio::fs::File::open(path).await.ok()?;
    let mut lines = tokio::io::BufReader::new(file).lines();
    let line = lines.next_line().await.ok()??;
    match RawRecord::decode(&line)?.kind() {
        RecordKind::SessionMeta(meta) => meta.id,
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_transcript(dir: &Path, name: &str, lines: &[&str]) -> PathBuf {
        if let Some(parent) = dir.join(name).parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        for line in lines {
            writeln!(f, "{}", line).unwrap();
        }
        path
    }

    fn service(dir: &TempDir) -> TranscriptIndex {
        TranscriptIndex::with_paths(dir.path().join("sessions"), dir.path().join("cache")).unwrap()
    }

    #[tokio::test]
    async fn test_snapshot_over_empty_tree() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        let snapshot = svc.index_snapshot().await.unwrap();
        assert_eq!(snapshot.totals.files, 0);
        assert_eq!(snapshot.version, INDEX_VERSION);
    }

    #[tokio::test]
    async fn test_snapshot_is_cached_within_interval() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);

        let first = svc.index_snapshot().await.unwrap();

        // A file added after the first refresh is invisible until the
        // throttle window passes.
        write_transcript(
            &dir.path().join("sessions"),
            "late.jsonl",
            &[r#"{"timestamp":"2025-01-01T00:00:00Z","type":"session_meta","payload":{"id":"late"}}"#],
        );
        let second = svc.index_snapshot().await.unwrap();
        assert_eq!(second.totals.files, first.totals.files);
    }

    #[tokio::test]
    async fn test_timeline_slow_path_by_filename() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        // Prime the throttle stamp before the file exists, so the store does
        // not know about it and the slow path must find it.
        svc.index_snapshot().await.unwrap();

        write_transcript(
            &dir.path().join("sessions"),
            "2025/01/sess-slow.jsonl",
            &[
                r#"{"timestamp":"2025-01-05T00:00:00Z","type":"session_meta","payload":{"id":"sess-slow"}}"#,
                r#"{"timestamp":"2025-01-05T00:00:01Z","type":"response_item","payload":{"type":"message","role":"user","content":[{"text":"hi"}]}}"#,
            ],
        );

        let timeline = svc.session_timeline("sess-slow").await.unwrap();
        assert_eq!(timeline.summary.id, "sess-slow");
        assert_eq!(timeline.events.len(), 1);
    }

    #[tokio::test]
    async fn test_timeline_slow_path_by_meta_probe() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        svc.index_snapshot().await.unwrap();

        // File name does not carry the session id; only the first line does.
        write_transcript(
            &dir.path().join("sessions"),
            "rollout-opaque.jsonl",
            &[r#"{"timestamp":"2025-01-05T00:00:00Z","type":"session_meta","payload":{"id":"inner-id"}}"#],
        );

        let timeline = svc.session_timeline("inner-id").await.unwrap();
        assert_eq!(timeline.summary.id, "inner-id");
    }

    #[tokio::test]
    async fn test_timeline_missing_session_placeholder() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        let timeline = svc.session_timeline("no-such-session").await.unwrap();
        assert_eq!(timeline.summary.id, "no-such-session");
        assert_eq!(timeline.summary.errors, 1);
    }
}
