//! Index store operations
//!
//! All reads and writes go through [`Database`], which serializes access to
//! one SQLite connection. A refresh is applied as a single transaction so
//! readers only ever see the state before or after it, never a torn middle.

use crate::db::schema::{ensure_schema, INDEX_VERSION};
use crate::error::Result;
use crate::parse::FileIndex;
use crate::types::{
    rfc3339_utc, DailyAgg, Fingerprint, IndexSnapshot, IndexTotals, SessionFilter, SessionSummary,
    SessionsPage, TokenTotals, WordCloud, WordCloudQuery, WordCount,
};
use chrono::{Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Mutex;

/// One refresh's worth of pending writes, applied atomically.
#[derive(Debug, Default)]
pub struct RefreshBatch {
    /// Source root the batch was scanned from, recorded in `meta`
    pub sessions_dir: String,
    /// Wipe all data tables first (stored version mismatch)
    pub force_rebuild: bool,
    /// Files whose rows must be deleted (gone from disk)
    pub remove: Vec<String>,
    /// Files to (re)index, with the fingerprint observed before parsing
    pub upserts: Vec<(Fingerprint, FileIndex)>,
    /// Refresh timestamp, recorded in `meta`
    pub generated_at: String,
}

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) the index database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        ensure_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        ensure_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// The index version recorded by the last refresh, if any.
    pub fn index_version(&self) -> Result<Option<i64>> {
        let conn = self.conn.lock().expect("db lock");
        let value: Option<String> = conn
            .query_row("SELECT value FROM meta WHERE key = 'version'", [], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value.and_then(|v| v.parse().ok()))
    }

    /// Stored fingerprints keyed by file path, for change detection.
    pub fn stored_fingerprints(&self) -> Result<HashMap<String, Fingerprint>> {
        let conn = self.conn.lock().expect("db lock");
        let mut stmt = conn.prepare("SELECT file, mtime_ms, size FROM files")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                Fingerprint {
                    mtime_ms: row.get(1)?,
                    size: row.get::<_, i64>(2)? as u64,
                },
            ))
        })?;

        let mut out = HashMap::new();
        for row in rows {
            let (file, fp) = row?;
            out.insert(file, fp);
        }
        Ok(out)
    }

    /// Look up the indexed summary for a session id, if present.
    pub fn get_session(&self, session_id: &str) -> Result<Option<SessionSummary>> {
        let conn = self.conn.lock().expect("db lock");
        let mut stmt = conn.prepare(&format!(
            "SELECT {SUMMARY_COLUMNS} FROM files WHERE session_id = ?1 ORDER BY started_at DESC LIMIT 1"
        ))?;
        let summary = stmt
            .query_row(params![session_id], row_to_summary)
            .optional()?;
        Ok(summary)
    }

    /// Apply one refresh batch inside a single immediate transaction.
    ///
    /// Order matters: wipe (on rebuild), deletions, upserts, then the meta
    /// rows. Tool and token histograms are replaced wholesale per file, an
    /// upsert cannot express rows that disappeared.
    pub fn apply_refresh(&self, batch: &RefreshBatch) -> Result<()> {
        let mut conn = self.conn.lock().expect("db lock");
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if batch.force_rebuild {
            tx.execute("DELETE FROM user_token_counts", [])?;
            tx.execute("DELETE FROM tool_counts", [])?;
            tx.execute("DELETE FROM files", [])?;
        }

        for file in &batch.remove {
            tx.execute("DELETE FROM user_token_counts WHERE file = ?1", params![file])?;
            tx.execute("DELETE FROM tool_counts WHERE file = ?1", params![file])?;
            tx.execute("DELETE FROM files WHERE file = ?1", params![file])?;
        }

        for (fp, index) in &batch.upserts {
            let s = &index.summary;
            tx.execute(
                "INSERT INTO files (
                    file, mtime_ms, size, session_id, daily_key,
                    started_at, ended_at, duration_sec, cwd, originator, cli_version,
                    messages, tool_calls, errors,
                    total_tokens, input_tokens, output_tokens,
                    cached_input_tokens, reasoning_output_tokens
                 ) VALUES (
                    ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11,
                    ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19
                 )
                 ON CONFLICT(file) DO UPDATE SET
                    mtime_ms = excluded.mtime_ms,
                    size = excluded.size,
                    session_id = excluded.session_id,
                    daily_key = excluded.daily_key,
                    started_at = excluded.started_at,
                    ended_at = excluded.ended_at,
                    duration_sec = excluded.duration_sec,
                    cwd = excluded.cwd,
                    originator = excluded.originator,
                    cli_version = excluded.cli_version,
                    messages = excluded.messages,
                    tool_calls = excluded.tool_calls,
                    errors = excluded.errors,
                    total_tokens = excluded.total_tokens,
                    input_tokens = excluded.input_tokens,
                    output_tokens = excluded.output_tokens,
                    cached_input_tokens = excluded.cached_input_tokens,
                    reasoning_output_tokens = excluded.reasoning_output_tokens",
                params![
                    s.file,
                    fp.mtime_ms,
                    fp.size as i64,
                    s.id,
                    index.daily_key,
                    s.started_at,
                    s.ended_at,
                    s.duration_sec,
                    s.cwd,
                    s.originator,
                    s.cli_version,
                    s.messages,
                    s.tool_calls,
                    s.errors,
                    s.tokens.total,
                    s.tokens.input,
                    s.tokens.output,
                    s.tokens.cached_input,
                    s.tokens.reasoning_output,
                ],
            )?;

            tx.execute("DELETE FROM tool_counts WHERE file = ?1", params![s.file])?;
            for (tool, count) in &index.tools {
                tx.execute(
                    "INSERT INTO tool_counts (file, tool_name, count) VALUES (?1, ?2, ?3)",
                    params![s.file, tool, count],
                )?;
            }

            tx.execute(
                "DELETE FROM user_token_counts WHERE file = ?1",
                params![s.file],
            )?;
            for (token, count) in &index.words {
                tx.execute(
                    "INSERT INTO user_token_counts (file, token, count) VALUES (?1, ?2, ?3)",
                    params![s.file, token, count],
                )?;
            }
        }

        for (key, value) in [
            ("version", INDEX_VERSION.to_string()),
            ("sessions_dir", batch.sessions_dir.clone()),
            ("generated_at", batch.generated_at.clone()),
        ] {
            tx.execute(
                "INSERT INTO meta (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    /// List sessions matching a filter, newest first, with pagination.
    pub fn list_sessions(&self, filter: &SessionFilter) -> Result<SessionsPage> {
        let conn = self.conn.lock().expect("db lock");
        let (where_sql, params_vec) = session_where_clause(
            filter.query.as_deref(),
            filter.only_with_tools,
            filter.only_with_errors,
            None,
            "",
        );

        let total: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM files {where_sql}"),
            rusqlite::params_from_iter(params_vec.iter()),
            |row| row.get(0),
        )?;

        // limit/offset are clamped integers; formatting them avoids mixing
        // text and integer params in one statement.
        let sql = format!(
            "SELECT {SUMMARY_COLUMNS} FROM files {where_sql}
             ORDER BY (started_at IS NULL), started_at DESC, file ASC
             LIMIT {} OFFSET {}",
            filter.limit(),
            filter.offset()
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(params_vec.iter()), row_to_summary)?;

        let mut items = Vec::new();
        for row in rows {
            items.push(row?);
        }

        Ok(SessionsPage {
            generated_at: rfc3339_utc(Utc::now()),
            total,
            items,
        })
    }

    /// Rank word-cloud tokens over user text in matching sessions.
    pub fn word_cloud(&self, query: &WordCloudQuery) -> Result<WordCloud> {
        let conn = self.conn.lock().expect("db lock");

        let cutoff = query
            .days()
            .map(|days| rfc3339_utc(Utc::now() - Duration::days(days)));
        let (where_sql, params_vec) = session_where_clause(
            query.query.as_deref(),
            query.only_with_tools,
            query.only_with_errors,
            cutoff,
            "f.",
        );

        let min_count = query.min_count();
        let limit = query.limit();
        let sql = format!(
            "SELECT u.token, SUM(u.count) AS total
             FROM user_token_counts u
             JOIN files f ON f.file = u.file
             {where_sql}
             GROUP BY u.token
             HAVING SUM(u.count) >= {min_count}
             ORDER BY total DESC, u.token ASC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(params_vec.iter()), |row| {
            Ok(WordCount {
                name: row.get(0)?,
                value: row.get(1)?,
            })
        })?;

        // total_unique counts every token past the threshold, not just the
        // returned page.
        let mut total_unique = 0;
        let mut items = Vec::new();
        for row in rows {
            let item = row?;
            total_unique += 1;
            if (items.len() as i64) < limit {
                items.push(item);
            }
        }

        Ok(WordCloud {
            generated_at: rfc3339_utc(Utc::now()),
            days: query.days(),
            limit,
            min_count,
            total_unique,
            items,
        })
    }

    /// Build the aggregate snapshot: global totals, per-day rollup, and the
    /// tool invocation ranking.
    pub fn snapshot(&self, sessions_dir: &Path, cache_dir: &Path) -> Result<IndexSnapshot> {
        let conn = self.conn.lock().expect("db lock");

        // Sessions are counted per file, same as the daily rollup, so the
        // per-day session counts always sum back to the global figure.
        let totals = conn.query_row(
            "SELECT COUNT(*),
                    COUNT(*),
                    COALESCE(SUM(messages), 0),
                    COALESCE(SUM(tool_calls), 0),
                    COALESCE(SUM(errors), 0),
                    COALESCE(SUM(total_tokens), 0),
                    COALESCE(SUM(input_tokens), 0),
                    COALESCE(SUM(output_tokens), 0),
                    COALESCE(SUM(cached_input_tokens), 0),
                    COALESCE(SUM(reasoning_output_tokens), 0)
             FROM files",
            [],
            |row| {
                Ok(IndexTotals {
                    files: row.get(0)?,
                    sessions: row.get(1)?,
                    messages: row.get(2)?,
                    tool_calls: row.get(3)?,
                    errors: row.get(4)?,
                    tokens: TokenTotals {
                        total: row.get(5)?,
                        input: row.get(6)?,
                        output: row.get(7)?,
                        cached_input: row.get(8)?,
                        reasoning_output: row.get(9)?,
                    },
                })
            },
        )?;

        let mut daily = BTreeMap::new();
        let mut stmt = conn.prepare(
            "SELECT daily_key,
                    COUNT(*),
                    COALESCE(SUM(messages), 0),
                    COALESCE(SUM(tool_calls), 0),
                    COALESCE(SUM(errors), 0),
                    COALESCE(SUM(total_tokens), 0),
                    COALESCE(SUM(input_tokens), 0),
                    COALESCE(SUM(output_tokens), 0),
                    COALESCE(SUM(cached_input_tokens), 0),
                    COALESCE(SUM(reasoning_output_tokens), 0)
             FROM files GROUP BY daily_key",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                DailyAgg {
                    sessions: row.get(1)?,
                    messages: row.get(2)?,
                    tool_calls: row.get(3)?,
                    errors: row.get(4)?,
                    tokens: TokenTotals {
                        total: row.get(5)?,
                        input: row.get(6)?,
                        output: row.get(7)?,
                        cached_input: row.get(8)?,
                        reasoning_output: row.get(9)?,
                    },
                },
            ))
        })?;
        for row in rows {
            let (key, agg) = row?;
            daily.insert(key, agg);
        }

        let mut tools = BTreeMap::new();
        let mut stmt = conn.prepare(
            "SELECT tool_name, SUM(count) FROM tool_counts GROUP BY tool_name",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (name, count) = row?;
            tools.insert(name, count);
        }

        let meta_get = |key: &str| -> Result<Option<String>> {
            Ok(conn
                .query_row("SELECT value FROM meta WHERE key = ?1", params![key], |row| {
                    row.get(0)
                })
                .optional()?)
        };
        let version = meta_get("version")?
            .and_then(|v| v.parse().ok())
            .unwrap_or(INDEX_VERSION);
        let generated_at = meta_get("generated_at")?.unwrap_or_else(|| rfc3339_utc(Utc::now()));
        let sessions_dir = meta_get("sessions_dir")?
            .unwrap_or_else(|| sessions_dir.to_string_lossy().into_owned());

        Ok(IndexSnapshot {
            version,
            generated_at,
            sessions_dir,
            cache_dir: cache_dir.to_string_lossy().into_owned(),
            totals,
            tools,
            daily,
        })
    }
}

const SUMMARY_COLUMNS: &str = "session_id, file, started_at, ended_at, duration_sec, \
     cwd, originator, cli_version, messages, tool_calls, errors, \
     total_tokens, input_tokens, output_tokens, cached_input_tokens, reasoning_output_tokens";

fn row_to_summary(row: &Row<'_>) -> rusqlite::Result<SessionSummary> {
    Ok(SessionSummary {
        id: row.get(0)?,
        file: row.get(1)?,
        started_at: row.get(2)?,
        ended_at: row.get(3)?,
        duration_sec: row.get(4)?,
        cwd: row.get(5)?,
        originator: row.get(6)?,
        cli_version: row.get(7)?,
        messages: row.get(8)?,
        tool_calls: row.get(9)?,
        errors: row.get(10)?,
        tokens: TokenTotals {
            total: row.get(11)?,
            input: row.get(12)?,
            output: row.get(13)?,
            cached_input: row.get(14)?,
            reasoning_output: row.get(15)?,
        },
    })
}

/// Shared WHERE clause for session listing and the word cloud. `prefix`
/// qualifies column names when the files table is joined under an alias.
fn session_where_clause(
    query: Option<&str>,
    only_with_tools: bool,
    only_with_errors: bool,
    started_cutoff: Option<String>,
    prefix: &str,
) -> (String, Vec<String>) {
    let mut clauses = Vec::new();
    let mut params_vec = Vec::new();

    if let Some(q) = query.map(str::trim).filter(|q| !q.is_empty()) {
        params_vec.push(format!("%{}%", q.to_lowercase()));
        let n = params_vec.len();
        clauses.push(format!(
            "(LOWER({p}session_id) LIKE ?{n} OR LOWER(IFNULL({p}cwd, '')) LIKE ?{n} \
             OR LOWER(IFNULL({p}originator, '')) LIKE ?{n})",
            p = prefix,
            n = n
        ));
    }
    if only_with_tools {
        clauses.push(format!("{prefix}tool_calls > 0"));
    }
    if only_with_errors {
        clauses.push(format!("{prefix}errors > 0"));
    }
    if let Some(cutoff) = started_cutoff {
        params_vec.push(cutoff);
        clauses.push(format!("{}started_at >= ?{}", prefix, params_vec.len()));
    }

    if clauses.is_empty() {
        (String::new(), params_vec)
    } else {
        (format!("WHERE {}", clauses.join(" AND ")), params_vec)
    }
}
