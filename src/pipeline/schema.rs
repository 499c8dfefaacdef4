use rusqlite::{Connection, OptionalExtension};
use tracing::debug;

use super::distance::DistanceMetric;
use super::error::{PipelineError, PipelineResult};

/// Current schema version.  Increment when adding new migrations.
const SCHEMA_VERSION: u32 = 1;

/// Apply connection pragmas and all pending migrations to `conn`.
///
/// Migrations are idempotent; tables are created with `IF NOT EXISTS` and the
/// `meta` table tracks which version has been applied so we only run new ones.
pub fn run_migrations(conn: &Connection) -> PipelineResult<()> {
    // WAL is a no-op for in-memory databases.
    conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON;")?;

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS meta (
            key   TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );",
    )?;

    let current_version = get_schema_version(conn)?;

    if current_version >= SCHEMA_VERSION {
        debug!(version = current_version, "index schema up to date");
        return Ok(());
    }

    if current_version < 1 {
        migrate_v1(conn)?;
    }

    set_meta(conn, "schema_version", &SCHEMA_VERSION.to_string())?;
    debug!(version = SCHEMA_VERSION, "index schema migrated");
    Ok(())
}

// ---------------------------------------------------------------------------
// v1: initial tables
// ---------------------------------------------------------------------------

fn migrate_v1(conn: &Connection) -> PipelineResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS conversations (
            id              TEXT PRIMARY KEY,
            scenario_title  TEXT NOT NULL,
            original_title  TEXT,
            source_url      TEXT,
            created_at      TEXT NOT NULL
        );",
    )?;

    // Chunk rows are immutable; `id` order is creation order.
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS chunks (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            conversation_id TEXT    NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
            ordinal         INTEGER NOT NULL,
            first_message   INTEGER NOT NULL,
            last_message    INTEGER NOT NULL,
            text            TEXT    NOT NULL,
            embedding       BLOB    NOT NULL,
            created_at      TEXT    NOT NULL,
            UNIQUE(conversation_id, ordinal)
        );",
    )?;

    conn.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_chunks_conversation_id ON chunks(conversation_id);",
    )?;

    // Native provider vectors keyed by sha256(model, text).
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS embedding_cache (
            hash       TEXT PRIMARY KEY,
            model      TEXT NOT NULL,
            dimensions INTEGER NOT NULL,
            embedding  BLOB NOT NULL,
            created_at TEXT NOT NULL
        );",
    )?;

    Ok(())
}

// ---------------------------------------------------------------------------
// Index pairing
// ---------------------------------------------------------------------------

/// Record the embedding model, width and metric on first use, or verify
/// that an existing database was built with the same ones.
pub fn ensure_index_params(
    conn: &Connection,
    model: &str,
    target_width: usize,
    metric: DistanceMetric,
) -> PipelineResult<()> {
    check_or_set(conn, "embedding_model", model)?;
    check_or_set(conn, "embedding_width", &target_width.to_string())?;
    check_or_set(conn, "distance_metric", metric.as_str())?;
    Ok(())
}

fn check_or_set(conn: &Connection, key: &str, configured: &str) -> PipelineResult<()> {
    match get_meta(conn, key)? {
        Some(stored) if stored != configured => Err(PipelineError::IndexMismatch {
            key: key.to_string(),
            stored,
            configured: configured.to_string(),
        }),
        Some(_) => Ok(()),
        None => set_meta(conn, key, configured),
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn get_schema_version(conn: &Connection) -> PipelineResult<u32> {
    Ok(get_meta(conn, "schema_version")?
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(0))
}

pub fn get_meta(conn: &Connection, key: &str) -> PipelineResult<Option<String>> {
    let value = conn
        .query_row("SELECT value FROM meta WHERE key = ?1", [key], |row| {
            row.get::<_, String>(0)
        })
        .optional()?;
    Ok(value)
}

fn set_meta(conn: &Connection, key: &str, value: &str) -> PipelineResult<()> {
    conn.execute(
        "INSERT OR REPLACE INTO meta (key, value) VALUES (?1, ?2)",
        [key, value],
    )?;
    Ok(())
}
