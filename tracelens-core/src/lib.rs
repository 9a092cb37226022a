//! tracelens-core: incremental indexing and analytics over transcript logs
//!
//! This crate watches a directory tree of line-delimited transcript files,
//! maintains a derived SQLite index of per-session summaries, tool usage,
//! token accounting, and a user word-cloud corpus, and serves aggregate
//! queries from it. Refreshes are incremental (fingerprint-gated), applied
//! atomically, and throttled behind a single-flight coordinator.
//!
//! # Architecture
//!
//! ```text
//! transcripts (.jsonl)          derived store (SQLite)
//!        |                               |
//!   scan ──> parse ──> db.apply_refresh ─┤
//!        |                               ├──> snapshot / sessions / word cloud
//!   timeline (cached JSON per session) <─┘
//! ```
//!
//! [`TranscriptIndex`] is the entry point; everything else supports it.

pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod parse;
pub mod scan;
pub mod service;
pub mod timeline;
pub mod tokenize;
pub mod types;

pub use config::Config;
pub use db::Database;
pub use error::{Error, Result};
pub use service::TranscriptIndex;
pub use types::{
    IndexSnapshot, SessionFilter, SessionSummary, SessionTimeline, SessionsPage, WordCloud,
    WordCloudQuery,
};
