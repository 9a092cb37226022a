//! SQLite schema for the transcript index
//!
//! Four tables: `files` holds one row per indexed transcript with its
//! change-detection fingerprint and session summary, `tool_counts` and
//! `user_token_counts` hold the per-file histograms, and `meta` holds
//! key/value bookkeeping (index version, source directory, last refresh
//! time). A stored version different from [`INDEX_VERSION`] marks every
//! stored row stale; the next refresh wipes the data tables and rebuilds.

use crate::error::Result;
use rusqlite::Connection;

/// Bump whenever counting semantics or the row shape change, so existing
/// databases rebuild instead of serving rows computed under old rules.
pub const INDEX_VERSION: i64 = 1;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS files (
    file                    TEXT PRIMARY KEY,
    mtime_ms                INTEGER NOT NULL,
    size                    INTEGER NOT NULL,
    session_id              TEXT NOT NULL,
    daily_key               TEXT NOT NULL,
    started_at              TEXT,
    ended_at                TEXT,
    duration_sec            INTEGER,
    cwd                     TEXT,
    originator              TEXT,
    cli_version             TEXT,
    messages                INTEGER NOT NULL DEFAULT 0,
    tool_calls              INTEGER NOT NULL DEFAULT 0,
    errors                  INTEGER NOT NULL DEFAULT 0,
    total_tokens            INTEGER NOT NULL DEFAULT 0,
    input_tokens            INTEGER NOT NULL DEFAULT 0,
    output_tokens           INTEGER NOT NULL DEFAULT 0,
    cached_input_tokens     INTEGER NOT NULL DEFAULT 0,
    reasoning_output_tokens INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_files_session_id ON files(session_id);
CREATE INDEX IF NOT EXISTS idx_files_daily_key  ON files(daily_key);
CREATE INDEX IF NOT EXISTS idx_files_started_at ON files(started_at);

CREATE TABLE IF NOT EXISTS tool_counts (
    file      TEXT NOT NULL,
    tool_name TEXT NOT NULL,
    count     INTEGER NOT NULL,
    PRIMARY KEY (file, tool_name)
);

CREATE INDEX IF NOT EXISTS idx_tool_counts_name ON tool_counts(tool_name);

CREATE TABLE IF NOT EXISTS user_token_counts (
    file  TEXT NOT NULL,
    token TEXT NOT NULL,
    count INTEGER NOT NULL,
    PRIMARY KEY (file, token)
);

CREATE INDEX IF NOT EXISTS idx_user_token_counts_token ON user_token_counts(token);
"#;

/// Create all tables and indexes if they do not exist.
pub fn ensure_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}
