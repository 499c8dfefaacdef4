use std::collections::HashMap;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::chunking::MessageChunk;
use super::distance::{blob_to_vector, vector_to_blob};
use super::error::PipelineResult;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// A stored conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRecord {
    pub id: Uuid,
    pub scenario_title: String,
    pub original_title: Option<String>,
    pub source_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub chunk_count: usize,
}

/// A stored chunk, without its embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkRecord {
    pub id: i64,
    pub conversation_id: Uuid,
    pub ordinal: usize,
    pub first_message: usize,
    pub last_message: usize,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// An embedding computed for a chunk, waiting to be persisted.
pub struct EmbeddedChunk {
    pub chunk: MessageChunk,
    pub embedding: Vec<f32>,
}

/// A native provider vector to be stored in the embedding cache.
pub struct CacheEntry {
    pub hash: String,
    pub model: String,
    pub embedding: Vec<f32>,
}

// ---------------------------------------------------------------------------
// Conversations
// ---------------------------------------------------------------------------

pub fn insert_conversation(conn: &Connection, record: &ConversationRecord) -> PipelineResult<()> {
    conn.execute(
        "INSERT INTO conversations (id, scenario_title, original_title, source_url, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            record.id.to_string(),
            record.scenario_title,
            record.original_title,
            record.source_url,
            format_timestamp(&record.created_at),
        ],
    )?;
    Ok(())
}

const CONVERSATION_COLUMNS: &str = "v.id, v.scenario_title, v.original_title, v.source_url, v.created_at,
     (SELECT COUNT(*) FROM chunks x WHERE x.conversation_id = v.id)";

pub fn get_conversation(conn: &Connection, id: &Uuid) -> PipelineResult<Option<ConversationRecord>> {
    let sql = format!("SELECT {CONVERSATION_COLUMNS} FROM conversations v WHERE v.id = ?1");
    let record = conn
        .query_row(&sql, [id.to_string()], |row| conversation_from_row(row, 0))
        .optional()?;
    Ok(record)
}

/// Newest first; ties broken by id for a stable page order.
pub fn list_conversations(
    conn: &Connection,
    limit: usize,
    offset: usize,
) -> PipelineResult<Vec<ConversationRecord>> {
    let sql = format!(
        "SELECT {CONVERSATION_COLUMNS} FROM conversations v
         ORDER BY v.created_at DESC, v.id ASC
         LIMIT ?1 OFFSET ?2"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![to_i64(limit), to_i64(offset)], |row| {
            conversation_from_row(row, 0)
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Delete a conversation; its chunks go with it through the foreign key.
pub fn delete_conversation(conn: &Connection, id: &Uuid) -> PipelineResult<bool> {
    let affected = conn.execute("DELETE FROM conversations WHERE id = ?1", [id.to_string()])?;
    Ok(affected > 0)
}

// ---------------------------------------------------------------------------
// Chunks
// ---------------------------------------------------------------------------

pub fn insert_chunks(
    conn: &Connection,
    conversation_id: &Uuid,
    created_at: &DateTime<Utc>,
    chunks: &[EmbeddedChunk],
) -> PipelineResult<()> {
    let mut stmt = conn.prepare(
        "INSERT INTO chunks
            (conversation_id, ordinal, first_message, last_message, text, embedding, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )?;
    let conversation_id = conversation_id.to_string();
    let created_at = format_timestamp(created_at);
    for item in chunks {
        stmt.execute(params![
            conversation_id,
            to_i64(item.chunk.ordinal),
            to_i64(item.chunk.first_message),
            to_i64(item.chunk.last_message),
            item.chunk.text,
            vector_to_blob(&item.embedding),
            created_at,
        ])?;
    }
    Ok(())
}

/// Chunks of one conversation, by ordinal.
pub fn list_chunks(conn: &Connection, conversation_id: &Uuid) -> PipelineResult<Vec<ChunkRecord>> {
    let mut stmt = conn.prepare(
        "SELECT c.id, c.conversation_id, c.ordinal, c.first_message, c.last_message, c.text, c.created_at
         FROM chunks c WHERE c.conversation_id = ?1 ORDER BY c.ordinal ASC",
    )?;
    let rows = stmt
        .query_map([conversation_id.to_string()], |row| chunk_from_row(row, 0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Stored vectors of one conversation, by ordinal.
pub fn chunk_embeddings(conn: &Connection, conversation_id: &Uuid) -> PipelineResult<Vec<Vec<f32>>> {
    let mut stmt = conn.prepare(
        "SELECT embedding FROM chunks WHERE conversation_id = ?1 ORDER BY ordinal ASC",
    )?;
    let rows = stmt
        .query_map([conversation_id.to_string()], |row| {
            let blob: Vec<u8> = row.get(0)?;
            Ok(blob_to_vector(&blob))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

// ---------------------------------------------------------------------------
// Embedding cache
// ---------------------------------------------------------------------------

/// Look up cached vectors for `hashes`. Missing keys are absent from the map.
pub fn cached_embeddings(
    conn: &Connection,
    hashes: &[String],
) -> PipelineResult<HashMap<String, Vec<f32>>> {
    let mut found = HashMap::new();
    let mut stmt = conn.prepare("SELECT embedding FROM embedding_cache WHERE hash = ?1")?;
    for hash in hashes {
        if found.contains_key(hash) {
            continue;
        }
        let blob: Option<Vec<u8>> = stmt.query_row([hash], |row| row.get(0)).optional()?;
        if let Some(blob) = blob {
            found.insert(hash.clone(), blob_to_vector(&blob));
        }
    }
    Ok(found)
}

pub fn insert_cache_entries(conn: &Connection, entries: &[CacheEntry]) -> PipelineResult<()> {
    let mut stmt = conn.prepare(
        "INSERT OR IGNORE INTO embedding_cache (hash, model, dimensions, embedding, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;
    let now = format_timestamp(&Utc::now());
    for entry in entries {
        stmt.execute(params![
            entry.hash,
            entry.model,
            to_i64(entry.embedding.len()),
            vector_to_blob(&entry.embedding),
            now,
        ])?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Counts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RowCounts {
    pub conversations: usize,
    pub chunks: usize,
    pub cached_embeddings: usize,
}

pub fn row_counts(conn: &Connection) -> PipelineResult<RowCounts> {
    let counts = conn.query_row(
        "SELECT (SELECT COUNT(*) FROM conversations),
                (SELECT COUNT(*) FROM chunks),
                (SELECT COUNT(*) FROM embedding_cache)",
        [],
        |row| {
            Ok(RowCounts {
                conversations: from_i64(row.get(0)?),
                chunks: from_i64(row.get(1)?),
                cached_embeddings: from_i64(row.get(2)?),
            })
        },
    )?;
    Ok(counts)
}

// ---------------------------------------------------------------------------
// Row helpers
// ---------------------------------------------------------------------------

/// Map six conversation columns starting at `offset`.
pub(crate) fn conversation_from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<ConversationRecord> {
    Ok(ConversationRecord {
        id: parse_uuid(row, offset)?,
        scenario_title: row.get(offset + 1)?,
        original_title: row.get(offset + 2)?,
        source_url: row.get(offset + 3)?,
        created_at: parse_timestamp(row, offset + 4)?,
        chunk_count: from_i64(row.get(offset + 5)?),
    })
}

/// Map seven chunk columns starting at `offset`.
pub(crate) fn chunk_from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<ChunkRecord> {
    Ok(ChunkRecord {
        id: row.get(offset)?,
        conversation_id: parse_uuid(row, offset + 1)?,
        ordinal: from_i64(row.get(offset + 2)?),
        first_message: from_i64(row.get(offset + 3)?),
        last_message: from_i64(row.get(offset + 4)?),
        text: row.get(offset + 5)?,
        created_at: parse_timestamp(row, offset + 6)?,
    })
}

fn parse_uuid(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Fixed-width UTC timestamps sort lexicographically in time order.
pub(crate) fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn to_i64(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn from_i64(value: i64) -> usize {
    usize::try_from(value).unwrap_or(0)
}
