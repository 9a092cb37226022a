//! Per-session timeline documents
//!
//! A timeline is the ordered event list of one transcript file, capped at
//! [`MAX_TIMELINE_EVENTS`]. Built timelines are cached as JSON documents
//! keyed by session id; a cached document is served only when its stamp
//! version, source fingerprint, and usage shape all still match, otherwise
//! it is rebuilt from the file.

use crate::error::Result;
use crate::parse::records::{RawRecord, RecordKind};
use crate::parse::UsageFold;
use crate::types::{
    EventKind, Fingerprint, SessionSummary, SessionTimeline, TimelineEvent, UsageEvent,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::io::AsyncBufReadExt;

/// Hard cap on events per timeline; parsing stops once it is reached.
pub const MAX_TIMELINE_EVENTS: usize = 5000;

/// Stamp written into every cached document. Bump when the event shape
/// changes so stale documents rebuild instead of deserializing wrong.
pub const TIMELINE_CACHE_VERSION: u32 = 2;

/// On-disk form of a cached timeline.
#[derive(Debug, Serialize, Deserialize)]
struct CachedTimeline {
    cache_version: u32,
    file_mtime_ms: i64,
    file_size: u64,
    summary: SessionSummary,
    truncated: bool,
    events: Vec<TimelineEvent>,
}

fn cache_path(cache_dir: &Path, session_id: &str) -> PathBuf {
    cache_dir
        .join("session")
        .join(format!("{}.json", urlencoding::encode(session_id)))
}

/// Read a cached document; any failure (missing, unreadable, undecodable)
/// means a rebuild.
async fn read_cache(path: &Path) -> Option<CachedTimeline> {
    let bytes = tokio::fs::read(path).await.ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Write a cached document via a temporary file and rename, so a concurrent
/// reader never observes a half-written document.
async fn write_cache(path: &Path, doc: &CachedTimeline) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("json.tmp");
    let bytes = serde_json::to_vec(doc)?;
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

/// A cached document is valid when its stamp version matches, the source
/// file's fingerprint is unchanged, and every token-usage event actually
/// carries usage data (documents written before usage capture lack it).
fn cache_is_valid(doc: &CachedTimeline, fp: &Fingerprint) -> bool {
    doc.cache_version == TIMELINE_CACHE_VERSION
        && doc.file_mtime_ms == fp.mtime_ms
        && doc.file_size == fp.size
        && doc
            .events
            .iter()
            .filter(|e| e.kind == EventKind::TokenUsage)
            .all(|e| e.usage.is_some())
}

/// Build a timeline by streaming the transcript file.
pub async fn build_timeline(path: &Path, summary: SessionSummary) -> Result<SessionTimeline> {
    let file = tokio::fs::File::open(path).await?;
    let mut lines = tokio::io::BufReader::new(file).lines();

    let mut events = Vec::new();
    let mut truncated = false;
    let mut usage = UsageFold::default();
    let mut call_names: HashMap<String, String> = HashMap::new();

    while let Some(line) = lines.next_line().await? {
        let record = match RawRecord::decode(&line) {
            Some(record) => record,
            None => continue,
        };
        let ts = record.ts().unwrap_or_default();

        let event = match record.kind() {
            RecordKind::Event(ev) if ev.is_turn_aborted() => Some(TimelineEvent {
                ts,
                kind: EventKind::Error,
                name: None,
                text: Some("turn_aborted".to_string()),
                usage: None,
            }),

            RecordKind::Event(ev) if ev.is_token_count() => ev.info.map(|info| {
                let delta = usage.observe(
                    info.total_token_usage.map(|u| u.totals()),
                    info.last_token_usage.map(|u| u.totals()),
                );
                TimelineEvent {
                    ts,
                    kind: EventKind::TokenUsage,
                    name: None,
                    text: None,
                    usage: Some(UsageEvent {
                        delta,
                        cumulative: usage.cumulative(),
                    }),
                }
            }),

            RecordKind::ResponseItem(item) if item.is_message() => {
                let kind = match item.role.as_deref() {
                    Some("user") => EventKind::User,
                    Some("assistant") => EventKind::Assistant,
                    _ => EventKind::Other,
                };
                Some(TimelineEvent {
                    ts,
                    kind,
                    name: None,
                    text: item.message_text(),
                    usage: None,
                })
            }

            RecordKind::ResponseItem(item) if item.is_tool_call() => {
                let name = item.name.clone().unwrap_or_else(|| "unknown".to_string());
                if let Some(call_id) = item.call_id {
                    call_names.insert(call_id, name.clone());
                }
                Some(TimelineEvent {
                    ts,
                    kind: EventKind::ToolCall,
                    name: Some(name),
                    text: item.arguments.or(item.input),
                    usage: None,
                })
            }

            RecordKind::ResponseItem(item) if item.is_tool_call_output() => {
                let name = item
                    .name
                    .or_else(|| item.call_id.as_ref().and_then(|id| call_names.get(id).cloned()));
                Some(TimelineEvent {
                    ts,
                    kind: EventKind::ToolOutput,
                    name,
                    text: item.output,
                    usage: None,
                })
            }

            _ => None,
        };

        if let Some(event) = event {
            events.push(event);
            if events.len() >= MAX_TIMELINE_EVENTS {
                truncated = true;
                break;
            }
        }
    }

    Ok(SessionTimeline {
        summary,
        truncated,
        events,
    })
}

/// Serve the cached timeline when still valid, otherwise rebuild it and
/// refresh the cache. A cache write failure is logged, not fatal.
pub async fn load_or_build(
    cache_dir: &Path,
    path: &Path,
    fp: Fingerprint,
    summary: SessionSummary,
) -> Result<SessionTimeline> {
    let cache_file = cache_path(cache_dir, &summary.id);

    if let Some(doc) = read_cache(&cache_file).await {
        if cache_is_valid(&doc, &fp) {
            return Ok(SessionTimeline {
                summary: doc.summary,
                truncated: doc.truncated,
                events: doc.events,
            });
        }
    }

    let timeline = build_timeline(path, summary).await?;

    let doc = CachedTimeline {
        cache_version: TIMELINE_CACHE_VERSION,
        file_mtime_ms: fp.mtime_ms,
        file_size: fp.size,
        summary: timeline.summary.clone(),
        truncated: timeline.truncated,
        events: timeline.events.clone(),
    };
    if let Err(e) = write_cache(&cache_file, &doc).await {
        tracing::warn!(path = %cache_file.display(), error = %e, "Failed to write timeline cache");
    }

    Ok(timeline)
}

/// Synthetic timeline for a session id with no transcript file: one error
/// event, so clients render something instead of failing.
pub fn missing_session_timeline(session_id: &str) -> SessionTimeline {
    let mut summary = SessionSummary::placeholder(session_id, "");
    summary.errors = 1;
    SessionTimeline {
        summary,
        truncated: false,
        events: vec![TimelineEvent {
            ts: String::new(),
            kind: EventKind::Error,
            name: Some("missing_session".to_string()),
            text: Some(format!("No transcript file found for session {session_id}")),
            usage: None,
        }],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_transcript(dir: &Path, name: &str, lines: &[&str]) -> PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        for line in lines {
            writeln!(f, "{}", line).unwrap();
        }
        path
    }

    const TRANSCRIPT: &[&str] = &[
        r#"{"timestamp":"2025-03-01T10:00:00Z","type":"session_meta","payload":{"id":"sess-1"}}"#,
        r#"{"timestamp":"2025-03-01T10:00:05Z","type":"response_item","payload":{"type":"message","role":"user","content":[{"type":"input_text","text":"hello"}]}}"#,
        r#"{"timestamp":"2025-03-01T10:00:10Z","type":"response_item","payload":{"type":"function_call","name":"shell","call_id":"c1","arguments":"{\"cmd\":\"ls\"}"}}"#,
        r#"{"timestamp":"2025-03-01T10:00:11Z","type":"response_item","payload":{"type":"function_call_output","call_id":"c1","output":"ok"}}"#,
        r#"{"timestamp":"2025-03-01T10:00:30Z","type":"event_msg","payload":{"type":"token_count","info":{"total_token_usage":{"total_tokens":120,"input_tokens":100,"output_tokens":20}}}}"#,
    ];

    #[tokio::test]
    async fn test_build_timeline_event_kinds() {
        let dir = TempDir::new().unwrap();
        let path = write_transcript(dir.path(), "s.jsonl", TRANSCRIPT);
        let summary = SessionSummary::placeholder("sess-1", &path.to_string_lossy());

        let timeline = build_timeline(&path, summary).await.unwrap();

        assert!(!timeline.truncated);
        let kinds: Vec<EventKind> = timeline.events.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::User,
                EventKind::ToolCall,
                EventKind::ToolOutput,
                EventKind::TokenUsage
            ]
        );
        // Output resolves the tool name through its call id
        assert_eq!(timeline.events[2].name.as_deref(), Some("shell"));
        let usage = timeline.events[3].usage.as_ref().unwrap();
        assert_eq!(usage.delta.total, 120);
        assert_eq!(usage.cumulative.unwrap().total, 120);
    }

    #[tokio::test]
    async fn test_turn_aborted_emits_error_text() {
        let dir = TempDir::new().unwrap();
        let path = write_transcript(
            dir.path(),
            "s.jsonl",
            &[r#"{"timestamp":"2025-03-01T10:00:12Z","type":"event_msg","payload":{"type":"turn_aborted"}}"#],
        );
        let summary = SessionSummary::placeholder("sess-1", &path.to_string_lossy());

        let timeline = build_timeline(&path, summary).await.unwrap();
        assert_eq!(timeline.events.len(), 1);
        assert_eq!(timeline.events[0].kind, EventKind::Error);
        assert_eq!(timeline.events[0].text.as_deref(), Some("turn_aborted"));
        assert_eq!(timeline.events[0].name, None);
    }

    #[tokio::test]
    async fn test_event_cap_truncates() {
        let dir = TempDir::new().unwrap();
        let line = r#"{"type":"response_item","payload":{"type":"message","role":"user","content":[{"text":"x"}]}}"#;
        let lines: Vec<&str> = std::iter::repeat(line).take(MAX_TIMELINE_EVENTS + 10).collect();
        let path = write_transcript(dir.path(), "big.jsonl", &lines);
        let summary = SessionSummary::placeholder("big", &path.to_string_lossy());

        let timeline = build_timeline(&path, summary).await.unwrap();
        assert!(timeline.truncated);
        assert_eq!(timeline.events.len(), MAX_TIMELINE_EVENTS);
    }

    #[tokio::test]
    async fn test_cache_roundtrip_and_invalidation() {
        let dir = TempDir::new().unwrap();
        let cache_dir = dir.path().join("cache");
        let path = write_transcript(dir.path(), "s.jsonl", TRANSCRIPT);
        let summary = SessionSummary::placeholder("sess-1", &path.to_string_lossy());
        let fp = crate::scan::fingerprint(&path).await.unwrap();

        let first = load_or_build(&cache_dir, &path, fp, summary.clone())
            .await
            .unwrap();
        assert!(cache_path(&cache_dir, "sess-1").exists());

        // Unchanged fingerprint serves the cached document
        let second = load_or_build(&cache_dir, &path, fp, summary.clone())
            .await
            .unwrap();
        assert_eq!(second.events.len(), first.events.len());

        // A different fingerprint forces a rebuild; the grown file adds events
        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(
            f,
            r#"{{"type":"response_item","payload":{{"type":"message","role":"assistant","content":[{{"text":"bye"}}]}}}}"#
        )
        .unwrap();
        let fp2 = crate::scan::fingerprint(&path).await.unwrap();
        assert_ne!(fp.size, fp2.size);

        let third = load_or_build(&cache_dir, &path, fp2, summary).await.unwrap();
        assert_eq!(third.events.len(), first.events.len() + 1);
    }

    #[tokio::test]
    async fn test_stale_cache_version_rebuilds() {
        let dir = TempDir::new().unwrap();
        let cache_dir = dir.path().join("cache");
        let path = write_transcript(dir.path(), "s.jsonl", TRANSCRIPT);
        let summary = SessionSummary::placeholder("sess-1", &path.to_string_lossy());
        let fp = crate::scan::fingerprint(&path).await.unwrap();

        // Seed a cache document with an outdated stamp and no events
        let stale = CachedTimeline {
            cache_version: TIMELINE_CACHE_VERSION - 1,
            file_mtime_ms: fp.mtime_ms,
            file_size: fp.size,
            summary: summary.clone(),
            truncated: false,
            events: Vec::new(),
        };
        write_cache(&cache_path(&cache_dir, "sess-1"), &stale)
            .await
            .unwrap();

        let timeline = load_or_build(&cache_dir, &path, fp, summary).await.unwrap();
        assert_eq!(timeline.events.len(), 4);
    }

    #[tokio::test]
    async fn test_usage_shape_invalidates_cache() {
        let dir = TempDir::new().unwrap();
        let cache_dir = dir.path().join("cache");
        let path = write_transcript(dir.path(), "s.jsonl", TRANSCRIPT);
        let summary = SessionSummary::placeholder("sess-1", &path.to_string_lossy());
        let fp = crate::scan::fingerprint(&path).await.unwrap();

        // Current stamp and fingerprint, but a token-usage event missing its
        // usage payload: must rebuild.
        let stale = CachedTimeline {
            cache_version: TIMELINE_CACHE_VERSION,
            file_mtime_ms: fp.mtime_ms,
            file_size: fp.size,
            summary: summary.clone(),
            truncated: false,
            events: vec![TimelineEvent {
                ts: String::new(),
                kind: EventKind::TokenUsage,
                name: None,
                text: None,
                usage: None,
            }],
        };
        write_cache(&cache_path(&cache_dir, "sess-1"), &stale)
            .await
            .unwrap();

        let timeline = load_or_build(&cache_dir, &path, fp, summary).await.unwrap();
        assert_eq!(timeline.events.len(), 4);
        assert!(timeline
            .events
            .iter()
            .filter(|e| e.kind == EventKind::TokenUsage)
            .all(|e| e.usage.is_some()));
    }

    #[test]
    fn test_cache_path_encodes_session_id() {
        let p = cache_path(Path::new("/cache"), "a/b c");
        assert_eq!(p, Path::new("/cache/session/a%2Fb%20c.json"));
    }

    #[test]
    fn test_missing_session_timeline() {
        let t = missing_session_timeline("ghost");
        assert_eq!(t.summary.id, "ghost");
        assert_eq!(t.summary.errors, 1);
        assert_eq!(t.events.len(), 1);
        assert_eq!(t.events[0].kind, EventKind::Error);
    }
}
