//! Raw JSONL record types (serde deserialization)
//!
//! Each transcript line is an independent record with a `type` discriminator
//! and an optional RFC 3339 `timestamp`. The finite set of recognized shapes
//! is modeled as [`RecordKind`]; anything else decodes to
//! [`RecordKind::Other`] and is ignored by consumers. Field access is always
//! through optional extraction, never assumed presence.

use crate::types::TokenTotals;
use serde::Deserialize;

/// Top-level container for one transcript line.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct RawRecord {
    pub timestamp: Option<String>,
    #[serde(rename = "type")]
    pub record_type: Option<String>,
    pub payload: serde_json::Value,
}

impl RawRecord {
    /// Decode one line. Returns `None` for malformed JSON; a bad line must
    /// never abort the file.
    pub fn decode(line: &str) -> Option<RawRecord> {
        if line.trim().is_empty() {
            return None;
        }
        serde_json::from_str(line).ok()
    }

    /// Normalized record timestamp, when present and valid.
    pub fn ts(&self) -> Option<String> {
        self.timestamp
            .as_deref()
            .and_then(crate::types::normalize_ts)
    }

    /// Typed view over the payload for the recognized record shapes.
    pub fn kind(&self) -> RecordKind {
        match self.record_type.as_deref() {
            Some("session_meta") => RecordKind::SessionMeta(
                serde_json::from_value(self.payload.clone()).unwrap_or_default(),
            ),
            Some("event_msg") => RecordKind::Event(
                serde_json::from_value(self.payload.clone()).unwrap_or_default(),
            ),
            Some("response_item") => RecordKind::ResponseItem(
                serde_json::from_value(self.payload.clone()).unwrap_or_default(),
            ),
            _ => RecordKind::Other,
        }
    }
}

/// The recognized record shapes, plus an explicit fallback.
#[derive(Debug)]
pub enum RecordKind {
    SessionMeta(SessionMetaPayload),
    Event(EventPayload),
    ResponseItem(ResponseItemPayload),
    Other,
}

/// Session metadata payload (normally the first record in a file).
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct SessionMetaPayload {
    pub id: Option<String>,
    pub timestamp: Option<String>,
    pub cwd: Option<String>,
    pub originator: Option<String>,
    pub cli_version: Option<String>,
}

/// `event_msg` payload; the subtype lives in `payload.type`.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct EventPayload {
    #[serde(rename = "type")]
    pub event_type: Option<String>,
    pub info: Option<TokenInfo>,
}

impl EventPayload {
    pub fn is_turn_aborted(&self) -> bool {
        self.event_type.as_deref() == Some("turn_aborted")
    }

    pub fn is_token_count(&self) -> bool {
        self.event_type.as_deref() == Some("token_count")
    }
}

/// Token accounting carried by a `token_count` event: a cumulative-total
/// snapshot and a last-delta snapshot.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct TokenInfo {
    pub total_token_usage: Option<RawUsage>,
    pub last_token_usage: Option<RawUsage>,
}

/// Wire form of a usage snapshot.
#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct RawUsage {
    pub total_tokens: Option<i64>,
    pub input_tokens: Option<i64>,
    pub output_tokens: Option<i64>,
    pub cached_input_tokens: Option<i64>,
    pub reasoning_output_tokens: Option<i64>,
}

impl RawUsage {
    pub fn totals(&self) -> TokenTotals {
        TokenTotals {
            total: self.total_tokens.unwrap_or(0),
            input: self.input_tokens.unwrap_or(0),
            output: self.output_tokens.unwrap_or(0),
            cached_input: self.cached_input_tokens.unwrap_or(0),
            reasoning_output: self.reasoning_output_tokens.unwrap_or(0),
        }
    }
}

/// `response_item` payload; the subtype lives in `payload.type`.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct ResponseItemPayload {
    #[serde(rename = "type")]
    pub item_type: Option<String>,
    pub role: Option<String>,
    pub content: Option<Vec<ContentPart>>,
    pub name: Option<String>,
    pub arguments: Option<String>,
    pub input: Option<String>,
    pub call_id: Option<String>,
    pub output: Option<String>,
}

impl ResponseItemPayload {
    pub fn is_message(&self) -> bool {
        self.item_type.as_deref() == Some("message")
    }

    pub fn is_tool_call(&self) -> bool {
        matches!(
            self.item_type.as_deref(),
            Some("function_call") | Some("custom_tool_call")
        )
    }

    pub fn is_tool_call_output(&self) -> bool {
        matches!(
            self.item_type.as_deref(),
            Some("function_call_output") | Some("custom_tool_call_output")
        )
    }

    /// Concatenate the textual content parts with newline separators,
    /// regardless of their sub-kind. Empty results are "no text".
    pub fn message_text(&self) -> Option<String> {
        let parts = self.content.as_ref()?;
        let text = parts
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect::<Vec<_>>()
            .join("\n");
        let text = text.trim();
        if text.is_empty() {
            None
        } else {
            Some(text.to_string())
        }
    }
}

/// One content part of a message; only the text matters here.
#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct ContentPart {
    #[serde(rename = "type")]
    pub part_type: Option<String>,
    pub text: Option<String>,
}
