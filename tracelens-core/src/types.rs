//! Core domain types for tracelens
//!
//! These types describe the derived index: one [`SessionSummary`] per
//! transcript file, aggregate views over all files, and the per-session
//! timeline served from the cache.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Session** | One recorded interaction, corresponding to one transcript file |
//! | **Fingerprint** | (mtime, size) pair used to detect file changes without re-reading content |
//! | **Daily bucket** | Calendar-day grouping key derived from a session's resolved start time |
//! | **Token usage** | Model input/output accounting figures reported within the event stream |

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::UNIX_EPOCH;

/// Format a timestamp the way the index stores it: RFC 3339 UTC with fixed
/// millisecond precision, so stored strings compare lexicographically.
pub fn rfc3339_utc(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse an incoming record timestamp and normalize it to the stored format.
/// Returns `None` for anything that is not a valid RFC 3339 timestamp.
pub fn normalize_ts(raw: &str) -> Option<String> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| rfc3339_utc(dt.with_timezone(&Utc)))
}

/// Daily bucket key: the UTC calendar day (10-character form) of a stored
/// timestamp, or the literal `"unknown"` when no valid start time exists.
pub fn day_key(started_at: Option<&str>) -> String {
    match started_at {
        Some(iso) if iso.len() >= 10 => iso[..10].to_string(),
        _ => "unknown".to_string(),
    }
}

// ============================================
// Fingerprint
// ============================================

/// (modification time, byte size) pair that gates re-parsing: an unchanged
/// fingerprint means the file's derived rows are not rebuilt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    /// Modification time in milliseconds since the Unix epoch
    pub mtime_ms: i64,
    /// File size in bytes
    pub size: u64,
}

impl Fingerprint {
    /// Derive a fingerprint from file metadata.
    pub fn of(metadata: &std::fs::Metadata) -> Self {
        let mtime_ms = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        Self {
            mtime_ms,
            size: metadata.len(),
        }
    }
}

// ============================================
// Token usage
// ============================================

/// The five token-usage counters reported by the transcript event stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenTotals {
    pub total: i64,
    pub input: i64,
    pub output: i64,
    pub cached_input: i64,
    pub reasoning_output: i64,
}

impl TokenTotals {
    /// A usage snapshot is "non-empty" if any of its fields is greater than zero.
    pub fn is_empty(&self) -> bool {
        self.total <= 0
            && self.input <= 0
            && self.output <= 0
            && self.cached_input <= 0
            && self.reasoning_output <= 0
    }

    /// Add another snapshot into this one, field by field.
    pub fn add(&mut self, other: &TokenTotals) {
        self.total += other.total;
        self.input += other.input;
        self.output += other.output;
        self.cached_input += other.cached_input;
        self.reasoning_output += other.reasoning_output;
    }

    /// Per-field `max(0, self - prev)`. Each field is clamped independently,
    /// so a counter reset never produces a negative contribution.
    pub fn saturating_delta(&self, prev: &TokenTotals) -> TokenTotals {
        TokenTotals {
            total: (self.total - prev.total).max(0),
            input: (self.input - prev.input).max(0),
            output: (self.output - prev.output).max(0),
            cached_input: (self.cached_input - prev.cached_input).max(0),
            reasoning_output: (self.reasoning_output - prev.reasoning_output).max(0),
        }
    }
}

// ============================================
// Session summaries and list queries
// ============================================

/// Per-file summary, one row in the `files` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    /// Session identifier (from session_meta, falling back to the file stem)
    pub id: String,
    /// Absolute path of the transcript file
    pub file: String,
    /// Resolved start timestamp (RFC 3339 UTC)
    pub started_at: Option<String>,
    /// Last valid timestamp seen in the file
    pub ended_at: Option<String>,
    /// Whole seconds between start and end, when both are valid
    pub duration_sec: Option<i64>,
    /// Working directory reported by session_meta
    pub cwd: Option<String>,
    /// Originator string reported by session_meta
    pub originator: Option<String>,
    /// Client version reported by session_meta
    pub cli_version: Option<String>,
    /// Count of user + assistant messages
    pub messages: i64,
    /// Count of tool invocations
    pub tool_calls: i64,
    /// Count of detected errors
    pub errors: i64,
    /// Accumulated token usage for the file
    pub tokens: TokenTotals,
}

impl SessionSummary {
    /// Placeholder summary for a file before any session_meta record is seen.
    pub fn placeholder(id: &str, file: &str) -> Self {
        Self {
            id: id.to_string(),
            file: file.to_string(),
            started_at: None,
            ended_at: None,
            duration_sec: None,
            cwd: None,
            originator: None,
            cli_version: None,
            messages: 0,
            tool_calls: 0,
            errors: 0,
            tokens: TokenTotals::default(),
        }
    }
}

/// One page of a session listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsPage {
    /// When this page was produced
    pub generated_at: String,
    /// Total matching sessions, ignoring pagination
    pub total: i64,
    pub items: Vec<SessionSummary>,
}

/// Filters and pagination for session listing.
#[derive(Debug, Clone, Default)]
pub struct SessionFilter {
    /// Case-insensitive substring match over session id, cwd, and originator
    pub query: Option<String>,
    /// Only sessions with at least one tool invocation
    pub only_with_tools: bool,
    /// Only sessions with at least one detected error
    pub only_with_errors: bool,
    /// Page size; clamped to [1, 500], default 100
    pub limit: Option<i64>,
    /// Page offset; clamped to >= 0
    pub offset: Option<i64>,
}

impl SessionFilter {
    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(100).clamp(1, 500)
    }

    pub fn offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }
}

// ============================================
// Aggregate snapshot
// ============================================

/// Global totals across all indexed files.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct IndexTotals {
    pub files: i64,
    pub sessions: i64,
    pub messages: i64,
    pub tool_calls: i64,
    pub errors: i64,
    pub tokens: TokenTotals,
}

/// Per-day rollup of the global totals.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DailyAgg {
    pub sessions: i64,
    pub messages: i64,
    pub tool_calls: i64,
    pub errors: i64,
    pub tokens: TokenTotals,
}

/// The aggregated view served to callers: totals, daily rollup, tool ranking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexSnapshot {
    /// Derived-store schema version
    pub version: i64,
    /// Timestamp of the last successful refresh
    pub generated_at: String,
    /// Configured source root the index was built from
    pub sessions_dir: String,
    /// Cache directory holding the store and timeline documents
    pub cache_dir: String,
    pub totals: IndexTotals,
    /// Tool name -> total invocation count across all files
    pub tools: BTreeMap<String, i64>,
    /// Daily bucket -> aggregate
    pub daily: BTreeMap<String, DailyAgg>,
}

// ============================================
// Word cloud
// ============================================

/// Parameters for the user word-cloud query.
#[derive(Debug, Clone, Default)]
pub struct WordCloudQuery {
    /// Recency window in days; clamped to [1, 3650] when present
    pub days: Option<i64>,
    /// Result limit; clamped to [1, 1000], default 200
    pub limit: Option<i64>,
    /// Minimum occurrence threshold; clamped to [1, 1000], default 2
    pub min_count: Option<i64>,
    /// Same substring filter as session listing
    pub query: Option<String>,
    pub only_with_tools: bool,
    pub only_with_errors: bool,
}

impl WordCloudQuery {
    pub fn days(&self) -> Option<i64> {
        self.days.map(|d| d.clamp(1, 3650))
    }

    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(200).clamp(1, 1000)
    }

    pub fn min_count(&self) -> i64 {
        self.min_count.unwrap_or(2).clamp(1, 1000)
    }
}

/// One ranked token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WordCount {
    pub name: String,
    pub value: i64,
}

/// Word-cloud response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WordCloud {
    pub generated_at: String,
    pub days: Option<i64>,
    pub limit: i64,
    pub min_count: i64,
    /// Distinct tokens meeting the threshold, irrespective of `limit`
    pub total_unique: i64,
    pub items: Vec<WordCount>,
}

// ============================================
// Timeline
// ============================================

/// Kind of a timeline event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    User,
    Assistant,
    Other,
    ToolCall,
    ToolOutput,
    Error,
    TokenUsage,
}

/// Token usage carried by a timeline event: the delta contributed by the
/// record plus the cumulative snapshot at that point, when one is known.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageEvent {
    pub delta: TokenTotals,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cumulative: Option<TokenTotals>,
}

/// One event in a session timeline, in file order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEvent {
    /// Normalized record timestamp, empty when the record had none
    #[serde(default)]
    pub ts: String,
    pub kind: EventKind,
    /// Tool name for tool_call / tool_output events
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageEvent>,
}

/// A session's materialized event list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionTimeline {
    pub summary: SessionSummary,
    /// True when the event cap was hit and parsing stopped early
    pub truncated: bool,
    pub events: Vec<TimelineEvent>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_ts() {
        assert_eq!(
            normalize_ts("2025-01-02T03:04:05.678Z").as_deref(),
            Some("2025-01-02T03:04:05.678Z")
        );
        // Offset timestamps are normalized to UTC
        assert_eq!(
            normalize_ts("2025-01-02T03:04:05+02:00").as_deref(),
            Some("2025-01-02T01:04:05.000Z")
        );
        assert_eq!(normalize_ts("not a timestamp"), None);
    }

    #[test]
    fn test_day_key() {
        assert_eq!(day_key(Some("2025-01-02T03:04:05.000Z")), "2025-01-02");
        assert_eq!(day_key(None), "unknown");
        assert_eq!(day_key(Some("short")), "unknown");
    }

    #[test]
    fn test_token_totals_empty() {
        assert!(TokenTotals::default().is_empty());
        let t = TokenTotals {
            output: 1,
            ..Default::default()
        };
        assert!(!t.is_empty());
    }

    #[test]
    fn test_saturating_delta_clamps_per_field() {
        let prev = TokenTotals {
            total: 100,
            input: 80,
            output: 20,
            ..Default::default()
        };
        let next = TokenTotals {
            total: 40,
            input: 90,
            output: 5,
            ..Default::default()
        };
        let d = next.saturating_delta(&prev);
        assert_eq!(d.total, 0);
        assert_eq!(d.input, 10);
        assert_eq!(d.output, 0);
    }

    #[test]
    fn test_filter_clamps() {
        let f = SessionFilter {
            limit: Some(9999),
            offset: Some(-3),
            ..Default::default()
        };
        assert_eq!(f.limit(), 500);
        assert_eq!(f.offset(), 0);
        assert_eq!(SessionFilter::default().limit(), 100);

        let q = WordCloudQuery {
            days: Some(100_000),
            limit: Some(0),
            min_count: Some(-1),
            ..Default::default()
        };
        assert_eq!(q.days(), Some(3650));
        assert_eq!(q.limit(), 1);
        assert_eq!(q.min_count(), 1);
        assert_eq!(WordCloudQuery::default().min_count(), 2);
        assert_eq!(WordCloudQuery::default().limit(), 200);
    }
}
