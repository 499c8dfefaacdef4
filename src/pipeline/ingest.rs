use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};
use uuid::Uuid;

use super::chunking::{chunk_messages, Message, MessageChunk};
use super::dimension::adapt;
use super::error::{PipelineError, PipelineResult};
use super::manager::ConversationIndex;
use super::store::{self, CacheEntry, ConversationRecord, EmbeddedChunk};

/// Descriptive metadata supplied with a conversation at ingestion time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationMeta {
    pub scenario_title: String,
    #[serde(default)]
    pub original_title: Option<String>,
    #[serde(default)]
    pub source_url: Option<String>,
    /// Defaults to the ingestion time.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl ConversationMeta {
    /// Require a title plus at least one identifying field.
    pub fn validate(&self) -> PipelineResult<()> {
        if self.scenario_title.trim().is_empty() {
            return Err(PipelineError::InvalidInput(
                "scenario title is required".to_string(),
            ));
        }

        let original_title = non_blank(self.original_title.as_deref());
        let source_url = non_blank(self.source_url.as_deref());
        if original_title.is_none() && source_url.is_none() {
            return Err(PipelineError::InvalidInput(
                "an original title or source url is required".to_string(),
            ));
        }

        if let Some(url) = source_url {
            url::Url::parse(url).map_err(|e| {
                PipelineError::InvalidInput(format!("source url {url:?} is not a url: {e}"))
            })?;
        }
        Ok(())
    }
}

/// Metadata plus messages, as accepted by the REST and CLI front ends.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationInput {
    #[serde(flatten)]
    pub meta: ConversationMeta,
    #[serde(default)]
    pub messages: Vec<Message>,
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Cache key for a native vector: SHA-256 of model name and text.
pub fn embedding_cache_key(model: &str, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(model.as_bytes());
    hasher.update([0u8]);
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

impl ConversationIndex {
    /// Chunk, embed and persist a conversation, returning its new id.
    ///
    /// Nothing is written unless every chunk embeds successfully: the
    /// conversation row, its chunk rows and any new cache entries are
    /// committed in one transaction after all embeddings are in hand.
    pub async fn ingest(
        &self,
        meta: ConversationMeta,
        messages: &[Message],
    ) -> PipelineResult<Uuid> {
        meta.validate()?;

        let chunks: Vec<MessageChunk> =
            chunk_messages(messages, self.settings.chunk_max_chars).collect();
        if chunks.is_empty() {
            return Err(PipelineError::EmptyConversation);
        }
        if let Some(blank) = chunks.iter().find(|c| c.text.trim().is_empty()) {
            return Err(PipelineError::InvalidInput(format!(
                "chunk {} (messages {}..={}) has no text to embed",
                blank.ordinal, blank.first_message, blank.last_message
            )));
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let (vectors, new_cache_entries) = self.embed_texts(&texts).await?;

        let embedded = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| {
                adapt(vector, self.settings.target_width)
                    .map(|embedding| EmbeddedChunk { chunk, embedding })
            })
            .collect::<PipelineResult<Vec<_>>>()?;

        let record = {
            let mut conn = self.db.lock();
            // Stamped under the lock so chunk timestamps follow row ids.
            let now = Utc::now();
            let record = ConversationRecord {
                id: Uuid::new_v4(),
                scenario_title: meta.scenario_title.trim().to_string(),
                original_title: non_blank(meta.original_title.as_deref()).map(str::to_string),
                source_url: non_blank(meta.source_url.as_deref()).map(str::to_string),
                created_at: meta.created_at.unwrap_or(now),
                chunk_count: embedded.len(),
            };

            let tx = conn.transaction()?;
            store::insert_conversation(&tx, &record)?;
            store::insert_chunks(&tx, &record.id, &now, &embedded)?;
            if self.settings.cache_embeddings {
                store::insert_cache_entries(&tx, &new_cache_entries)?;
            }
            tx.commit()?;
            record
        };

        info!(
            conversation_id = %record.id,
            messages = messages.len(),
            chunks = embedded.len(),
            oversized = embedded.iter().filter(|e| e.chunk.oversized).count(),
            "conversation ingested"
        );
        Ok(record.id)
    }

    /// Embed `texts` in order, serving what we can from the cache.
    ///
    /// Returns native-width vectors plus the cache entries for vectors that
    /// were freshly computed; the caller persists those with the rest of the
    /// conversation.
    pub(super) async fn embed_texts(
        &self,
        texts: &[String],
    ) -> PipelineResult<(Vec<Vec<f32>>, Vec<CacheEntry>)> {
        let model = self.provider.model_name().to_string();

        let keys: Vec<String> = texts
            .iter()
            .map(|t| embedding_cache_key(&model, t.trim()))
            .collect();
        let mut cached: HashMap<String, Vec<f32>> = if self.settings.cache_embeddings {
            let conn = self.db.lock();
            store::cached_embeddings(&conn, &keys)?
        } else {
            HashMap::new()
        };

        // First occurrence of each uncached key, in input order.
        let mut seen: HashSet<&str> = HashSet::new();
        let misses: Vec<usize> = keys
            .iter()
            .enumerate()
            .filter(|(_, key)| !cached.contains_key(*key) && seen.insert(key.as_str()))
            .map(|(i, _)| i)
            .collect();

        debug!(
            texts = texts.len(),
            cache_hits = texts.len() - misses.len(),
            model = %model,
            "embedding texts"
        );

        let mut new_entries = Vec::with_capacity(misses.len());
        if !misses.is_empty() {
            let batch: Vec<String> = misses.iter().map(|&i| texts[i].clone()).collect();
            let vectors = self.provider.embed_batch(&batch).await?;
            if vectors.len() != batch.len() {
                return Err(PipelineError::ProviderUnavailable(format!(
                    "provider returned {} vectors for {} texts",
                    vectors.len(),
                    batch.len()
                )));
            }
            for (&i, vector) in misses.iter().zip(vectors) {
                new_entries.push(CacheEntry {
                    hash: keys[i].clone(),
                    model: model.clone(),
                    embedding: vector.clone(),
                });
                cached.insert(keys[i].clone(), vector);
            }
        }

        let vectors = keys
            .iter()
            .map(|key| {
                cached.get(key).cloned().ok_or_else(|| {
                    PipelineError::ProviderUnavailable("missing embedding for text".to_string())
                })
            })
            .collect::<PipelineResult<Vec<_>>>()?;
        Ok((vectors, new_entries))
    }
}
