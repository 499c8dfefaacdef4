use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::dimension::adapt;
use super::distance::{vector_to_blob, DistanceMetric};
use super::embeddings::normalize_input;
use super::error::{PipelineError, PipelineResult};
use super::manager::ConversationIndex;
use super::store::{self, ChunkRecord, ConversationRecord};

// ---------------------------------------------------------------------------
// Result type
// ---------------------------------------------------------------------------

/// A stored chunk matched by a query, with its parent conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub chunk: ChunkRecord,
    /// Distance under the index metric; lower is more similar.
    pub distance: f64,
    pub conversation: ConversationRecord,
}

// ---------------------------------------------------------------------------
// Search
// ---------------------------------------------------------------------------

impl ConversationIndex {
    /// Return up to `top_k` stored chunks nearest to `query`, ascending by
    /// distance. Ties keep chunk insertion order.
    pub async fn search(&self, query: &str, top_k: i64) -> PipelineResult<Vec<QueryResult>> {
        if top_k <= 0 {
            return Err(PipelineError::InvalidArgument(format!(
                "top_k must be a positive integer, got {top_k}"
            )));
        }
        let query = normalize_input(query)?;

        // Same provider, cache and adapter as ingestion.
        let (mut vectors, _) = self.embed_texts(&[query.to_string()]).await?;
        let native = vectors.pop().ok_or_else(|| {
            PipelineError::ProviderUnavailable("empty embedding response".to_string())
        })?;
        let vector = adapt(native, self.settings.target_width)?;

        let results = vector_search(&self.db.lock(), &vector, self.settings.metric, top_k)?;
        debug!(top_k, returned = results.len(), metric = %self.settings.metric, "search complete");
        Ok(results)
    }
}

/// Rank every stored chunk against `query_vector` inside SQLite.
///
/// Relies on the distance functions registered by
/// [`super::distance::register_functions`].
pub fn vector_search(
    conn: &Connection,
    query_vector: &[f32],
    metric: DistanceMetric,
    top_k: i64,
) -> PipelineResult<Vec<QueryResult>> {
    let sql = format!(
        "SELECT c.id, c.conversation_id, c.ordinal, c.first_message, c.last_message, c.text, c.created_at,
                v.id, v.scenario_title, v.original_title, v.source_url, v.created_at,
                (SELECT COUNT(*) FROM chunks x WHERE x.conversation_id = v.id),
                {func}(c.embedding, ?1) AS distance
         FROM chunks c
         JOIN conversations v ON v.id = c.conversation_id
         ORDER BY distance ASC, c.id ASC
         LIMIT ?2",
        func = metric.sql_function()
    );

    let mut stmt = conn.prepare(&sql)?;
    let results = stmt
        .query_map(params![vector_to_blob(query_vector), top_k], |row| {
            Ok(QueryResult {
                chunk: store::chunk_from_row(row, 0)?,
                conversation: store::conversation_from_row(row, 7)?,
                distance: row.get(13)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::chunking::MessageChunk;
    use crate::pipeline::distance::register_functions;
    use crate::pipeline::schema;
    use crate::pipeline::store::{insert_chunks, insert_conversation, EmbeddedChunk};
    use chrono::Utc;
    use uuid::Uuid;

    fn seeded(vectors: &[[f32; 2]]) -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        register_functions(&conn).unwrap();
        schema::run_migrations(&conn).unwrap();

        let rec = ConversationRecord {
            id: Uuid::new_v4(),
            scenario_title: "seed".to_string(),
            original_title: Some("seed".to_string()),
            source_url: None,
            created_at: Utc::now(),
            chunk_count: 0,
        };
        insert_conversation(&conn, &rec).unwrap();
        let chunks: Vec<EmbeddedChunk> = vectors
            .iter()
            .enumerate()
            .map(|(i, v)| EmbeddedChunk {
                chunk: MessageChunk {
                    ordinal: i,
                    first_message: i,
                    last_message: i,
                    text: format!("chunk {i}"),
                    oversized: false,
                },
                embedding: v.to_vec(),
            })
            .collect();
        insert_chunks(&conn, &rec.id, &rec.created_at, &chunks).unwrap();
        conn
    }

    #[test]
    fn test_orders_by_ascending_distance() {
        let conn = seeded(&[[0.0, 1.0], [1.0, 0.0], [0.7, 0.7]]);
        let results = vector_search(&conn, &[1.0, 0.0], DistanceMetric::Cosine, 10).unwrap();
        let texts: Vec<_> = results.iter().map(|r| r.chunk.text.as_str()).collect();
        assert_eq!(texts, vec!["chunk 1", "chunk 2", "chunk 0"]);
        assert!(results.windows(2).all(|w| w[0].distance <= w[1].distance));
        assert_eq!(results[0].conversation.chunk_count, 3);
    }

    #[test]
    fn test_ties_keep_creation_order() {
        let conn = seeded(&[[1.0, 0.0], [1.0, 0.0], [1.0, 0.0]]);
        let results = vector_search(&conn, &[1.0, 0.0], DistanceMetric::L2, 10).unwrap();
        let ordinals: Vec<_> = results.iter().map(|r| r.chunk.ordinal).collect();
        assert_eq!(ordinals, vec![0, 1, 2]);
    }

    #[test]
    fn test_ties_follow_insertion_even_with_skewed_timestamps() {
        let conn = seeded(&[[1.0, 0.0]]);

        // A later insert whose timestamp was taken earlier.
        let late = ConversationRecord {
            id: Uuid::new_v4(),
            scenario_title: "late".to_string(),
            original_title: Some("late".to_string()),
            source_url: None,
            created_at: Utc::now() - chrono::Duration::hours(1),
            chunk_count: 0,
        };
        insert_conversation(&conn, &late).unwrap();
        let chunk = EmbeddedChunk {
            chunk: MessageChunk {
                ordinal: 0,
                first_message: 0,
                last_message: 0,
                text: "late chunk".to_string(),
                oversized: false,
            },
            embedding: vec![1.0, 0.0],
        };
        insert_chunks(&conn, &late.id, &late.created_at, &[chunk]).unwrap();

        let results = vector_search(&conn, &[1.0, 0.0], DistanceMetric::L2, 10).unwrap();
        let texts: Vec<_> = results.iter().map(|r| r.chunk.text.as_str()).collect();
        assert_eq!(texts, vec!["chunk 0", "late chunk"]);
    }

    #[test]
    fn test_limit_applies() {
        let conn = seeded(&[[0.0, 1.0], [1.0, 0.0], [0.7, 0.7]]);
        let results = vector_search(&conn, &[1.0, 0.0], DistanceMetric::L2, 1).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.ordinal, 1);
    }

    #[test]
    fn test_empty_store_returns_nothing() {
        let conn = Connection::open_in_memory().unwrap();
        register_functions(&conn).unwrap();
        schema::run_migrations(&conn).unwrap();
        let results = vector_search(&conn, &[1.0, 0.0], DistanceMetric::Cosine, 5).unwrap();
        assert!(results.is_empty());
    }
}
