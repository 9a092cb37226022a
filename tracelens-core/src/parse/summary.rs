//! Streaming event parser
//!
//! Reads one transcript file line-by-line (bounded memory regardless of file
//! size) and folds records into a per-file [`FileIndex`]: the session
//! summary, a tool-invocation histogram, the accumulated token usage, and a
//! bag of user-authored words for the word cloud.
//!
//! Malformed lines are skipped; they must never abort the file.

use crate::error::Result;
use crate::parse::records::{RawRecord, RecordKind};
use crate::tokenize;
use crate::types::{day_key, SessionSummary, TokenTotals};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::path::Path;
use tokio::io::AsyncBufReadExt;

/// Tool outputs matching this pattern count as errors. The heuristic is kept
/// exactly as-is for compatibility with existing dashboards.
static ERROR_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)error|exception|traceback").expect("error pattern"));

/// Everything derived from one transcript file.
#[derive(Debug, Clone)]
pub struct FileIndex {
    pub summary: SessionSummary,
    /// Daily bucket key of the resolved start time, or "unknown"
    pub daily_key: String,
    /// Tool name -> invocation count
    pub tools: HashMap<String, i64>,
    /// Word-cloud token -> occurrence count over user-authored text
    pub words: HashMap<String, i64>,
}

/// Reset-aware fold over token-usage records.
///
/// Tracks the last cumulative snapshot observed in the file and turns each
/// new record into a non-negative delta, correcting for counter resets
/// (e.g. context compaction) using the record's last-delta snapshot.
#[derive(Debug, Default)]
pub struct UsageFold {
    acc: TokenTotals,
    last_cumulative: Option<TokenTotals>,
}

impl UsageFold {
    /// Fold one token-usage record and return the delta it contributed.
    ///
    /// - With a non-empty cumulative snapshot: delta is the per-field clamped
    ///   difference against the previous cumulative. If the cumulative total
    ///   went backwards (a reset) and a non-empty last-delta is present, that
    ///   last-delta is added on top; it captures usage since the reset that
    ///   the subtraction cannot. With no previous cumulative, a present
    ///   last-delta is used directly, otherwise the cumulative itself is.
    /// - With only a last-delta snapshot: it is added directly.
    pub fn observe(
        &mut self,
        cumulative: Option<TokenTotals>,
        last_delta: Option<TokenTotals>,
    ) -> TokenTotals {
        let cumulative = cumulative.filter(|c| !c.is_empty());
        let last_delta = last_delta.filter(|d| !d.is_empty());

        let applied = if let Some(cum) = cumulative {
            let delta = match self.last_cumulative {
                Some(prev) => {
                    let mut delta = cum.saturating_delta(&prev);
                    if cum.total < prev.total {
                        if let Some(ld) = last_delta {
                            delta.add(&ld);
                        }
                    }
                    delta
                }
                None => last_delta.unwrap_or(cum),
            };
            self.last_cumulative = Some(cum);
            delta
        } else if let Some(ld) = last_delta {
            ld
        } else {
            TokenTotals::default()
        };

        self.acc.add(&applied);
        applied
    }

    /// Accumulated per-file totals so far.
    pub fn totals(&self) -> TokenTotals {
        self.acc
    }

    /// The most recent cumulative snapshot, if one has been observed.
    pub fn cumulative(&self) -> Option<TokenTotals> {
        self.last_cumulative
    }
}

/// Number of errors indicated by a tool output: one for the textual error
/// pattern, plus one more when the output is a JSON object carrying a
/// non-zero `metadata.exit_code`.
pub fn output_error_count(output: &str) -> i64 {
    let mut count = 0;
    if ERROR_PATTERN.is_match(output) {
        count += 1;
    }
    if output.starts_with('{') {
        if let Ok(parsed) = serde_json::from_str::<serde_json::Value>(output) {
            let exit_code = parsed
                .get("metadata")
                .and_then(|m| m.get("exit_code"))
                .and_then(|c| c.as_i64());
            if matches!(exit_code, Some(code) if code != 0) {
                count += 1;
            }
        }
    }
    count
}

/// Accumulator state threaded through one file's records.
struct SummaryState {
    summary: SessionSummary,
    first_ts: Option<String>,
    last_ts: Option<String>,
    tools: HashMap<String, i64>,
    call_names: HashMap<String, String>,
    usage: UsageFold,
    user_text: Vec<String>,
}

impl SummaryState {
    fn new(session_id: &str, file: &str) -> Self {
        Self {
            summary: SessionSummary::placeholder(session_id, file),
            first_ts: None,
            last_ts: None,
            tools: HashMap::new(),
            call_names: HashMap::new(),
            usage: UsageFold::default(),
            user_text: Vec::new(),
        }
    }

    fn observe(&mut self, record: &RawRecord) {
        let ts = record.ts();
        if let Some(ts) = &ts {
            if self.first_ts.is_none() {
                self.first_ts = Some(ts.clone());
            }
            self.last_ts = Some(ts.clone());
        }

        match record.kind() {
            RecordKind::SessionMeta(meta) => {
                // session_meta overwrites any earlier placeholder summary
                let file = std::mem::take(&mut self.summary.file);
                let fallback_id = std::mem::take(&mut self.summary.id);
                let mut summary = SessionSummary::placeholder("", &file);
                summary.id = meta.id.unwrap_or(fallback_id);
                summary.started_at = ts
                    .clone()
                    .or_else(|| meta.timestamp.as_deref().and_then(crate::types::normalize_ts));
                summary.cwd = meta.cwd;
                summary.originator = meta.originator;
                summary.cli_version = meta.cli_version;
                if self.first_ts.is_none() {
                    self.first_ts = summary.started_at.clone();
                }
                self.summary = summary;
            }

            RecordKind::Event(event) => {
                if event.is_turn_aborted() {
                    self.summary.errors += 1;
                } else if event.is_token_count() {
                    if let Some(info) = event.info {
                        self.usage.observe(
                            info.total_token_usage.map(|u| u.totals()),
                            info.last_token_usage.map(|u| u.totals()),
                        );
                    }
                }
            }

            RecordKind::ResponseItem(item) => {
                if item.is_message() {
                    match item.role.as_deref() {
                        Some("user") => {
                            self.summary.messages += 1;
                            if let Some(text) = item.message_text() {
                                self.user_text.push(text);
                            }
                        }
                        Some("assistant") => self.summary.messages += 1,
                        _ => {}
                    }
                } else if item.is_tool_call() {
                    self.summary.tool_calls += 1;
                    let name = item.name.clone().unwrap_or_else(|| "unknown".to_string());
                    *self.tools.entry(name.clone()).or_insert(0) += 1;
                    if let Some(call_id) = item.call_id {
                        self.call_names.insert(call_id, name);
                    }
                } else if item.is_tool_call_output() {
                    if let Some(output) = &item.output {
                        self.summary.errors += output_error_count(output);
                    }
                }
            }

            RecordKind::Other => {}
        }
    }

    fn finish(mut self) -> FileIndex {
        if self.summary.started_at.is_none() {
            self.summary.started_at = self.first_ts.clone();
        }
        self.summary.ended_at = self.last_ts;

        if let (Some(start), Some(end)) = (
            self.summary
                .started_at
                .as_deref()
                .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok()),
            self.summary
                .ended_at
                .as_deref()
                .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok()),
        ) {
            if end >= start {
                self.summary.duration_sec = Some((end - start).num_seconds());
            }
        }

        self.summary.tokens = self.usage.totals();

        let daily_key = day_key(
            self.summary
                .started_at
                .as_deref()
                .or(self.first_ts.as_deref()),
        );

        let words = if self.user_text.is_empty() {
            HashMap::new()
        } else {
            tokenize::count_user_tokens(&self.user_text.join("\n"))
        };

        FileIndex {
            summary: self.summary,
            daily_key,
            tools: self.tools,
            words,
        }
    }
}

/// Parse one transcript file into its derived index.
///
/// Open/read errors are returned to the caller, which skips the file for
/// this refresh cycle; per-line decode failures are skipped silently.
pub async fn build_file_index(path: &Path) -> Result<FileIndex> {
    let session_id = crate::scan::session_id_from_path(path);
    let mut state = SummaryState::new(&session_id, &path.to_string_lossy());

    let file = tokio::fs::File::open(path).await?;
    let mut lines = tokio::io::BufReader::new(file).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if let Some(record) = RawRecord::decode(&line) {
                    state.observe(&record);
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Read interrupted, keeping partial index");
                break;
            }
        }
    }

    Ok(state.finish())
}
