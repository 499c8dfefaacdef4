use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use rusqlite::Connection;
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::Config;

use super::distance::{self, DistanceMetric};
use super::embeddings::{EmbeddingBackend, EmbeddingProvider};
use super::error::PipelineResult;
use super::schema;
use super::store::{self, ChunkRecord, ConversationRecord};

/// File name of the index database inside the state directory.
pub const DEFAULT_DB_FILE: &str = "convoindex.db";

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Pipeline parameters that must stay fixed for the lifetime of an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexSettings {
    /// Width every stored vector is padded to.
    pub target_width: usize,
    pub metric: DistanceMetric,
    /// Chunk size budget in characters.
    pub chunk_max_chars: usize,
    pub cache_embeddings: bool,
}

impl IndexSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            target_width: config.embedding.target_width,
            metric: config.search.metric,
            chunk_max_chars: config.chunking.max_chars,
            cache_embeddings: config.embedding.cache,
        }
    }
}

/// Row counts and pairing parameters of an open index.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexStats {
    pub conversations: usize,
    pub chunks: usize,
    pub cached_embeddings: usize,
    pub target_width: usize,
    pub metric: DistanceMetric,
    pub model: String,
}

// ---------------------------------------------------------------------------
// ConversationIndex
// ---------------------------------------------------------------------------

/// Owns the SQLite database, the embedding provider and the pipeline
/// settings for one conversation store.
///
/// The instance is cheaply cloneable (the connection lives behind
/// `Arc<Mutex<_>>`). The mutex is only taken inside synchronous store calls
/// and is never held across an `.await`.
#[derive(Clone)]
pub struct ConversationIndex {
    pub(super) db: Arc<Mutex<Connection>>,
    pub(super) provider: Arc<dyn EmbeddingProvider>,
    pub(super) settings: IndexSettings,
}

impl ConversationIndex {
    /// Open or create the index described by `config`.
    ///
    /// The database lives at `store.path` when set, otherwise at
    /// `<state_dir>/convoindex.db`. The embedding backend is built once here
    /// and shared by every ingest and search call.
    pub fn open(config: &Config) -> Result<Self> {
        let db_path = resolve_db_path(config);
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("cannot create {}", parent.display()))?;
        }

        let conn = Connection::open(&db_path)
            .with_context(|| format!("failed to open index db at {}", db_path.display()))?;

        let backend = EmbeddingBackend::from_config(&config.embedding)?;
        let index = Self::with_connection(conn, Arc::new(backend), IndexSettings::from_config(config))?;

        info!(
            db = %db_path.display(),
            model = index.provider.model_name(),
            native_width = index.provider.dimensions(),
            target_width = index.settings.target_width,
            metric = %index.settings.metric,
            "conversation index ready"
        );
        Ok(index)
    }

    /// Build an index over a private in-memory database.
    pub fn open_in_memory(
        settings: IndexSettings,
        provider: Arc<dyn EmbeddingProvider>,
    ) -> PipelineResult<Self> {
        Self::with_connection(Connection::open_in_memory()?, provider, settings)
    }

    /// Wrap an already-open connection: register distance functions, run
    /// migrations and check the model/width/metric pairing.
    pub fn with_connection(
        conn: Connection,
        provider: Arc<dyn EmbeddingProvider>,
        settings: IndexSettings,
    ) -> PipelineResult<Self> {
        distance::register_functions(&conn)?;
        schema::run_migrations(&conn)?;
        schema::ensure_index_params(
            &conn,
            provider.model_name(),
            settings.target_width,
            settings.metric,
        )?;

        debug!(
            model = provider.model_name(),
            target_width = settings.target_width,
            "conversation index opened"
        );

        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
            provider,
            settings,
        })
    }

    pub fn settings(&self) -> IndexSettings {
        self.settings
    }

    pub fn provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.provider
    }

    /// A conversation and its chunks (by ordinal), if it exists.
    pub fn get_conversation(
        &self,
        id: &Uuid,
    ) -> PipelineResult<Option<(ConversationRecord, Vec<ChunkRecord>)>> {
        let conn = self.db.lock();
        let Some(record) = store::get_conversation(&conn, id)? else {
            return Ok(None);
        };
        let chunks = store::list_chunks(&conn, id)?;
        Ok(Some((record, chunks)))
    }

    /// Conversations, newest first.
    pub fn list_conversations(
        &self,
        limit: usize,
        offset: usize,
    ) -> PipelineResult<Vec<ConversationRecord>> {
        store::list_conversations(&self.db.lock(), limit, offset)
    }

    /// Delete a conversation and all of its chunks. Returns `false` when no
    /// such conversation exists.
    pub fn delete_conversation(&self, id: &Uuid) -> PipelineResult<bool> {
        let deleted = store::delete_conversation(&self.db.lock(), id)?;
        if deleted {
            info!(conversation_id = %id, "conversation deleted");
        }
        Ok(deleted)
    }

    /// Stored (padded) vectors of a conversation, by chunk ordinal.
    pub fn chunk_embeddings(&self, id: &Uuid) -> PipelineResult<Vec<Vec<f32>>> {
        store::chunk_embeddings(&self.db.lock(), id)
    }

    pub fn stats(&self) -> PipelineResult<IndexStats> {
        let counts = store::row_counts(&self.db.lock())?;
        Ok(IndexStats {
            conversations: counts.conversations,
            chunks: counts.chunks,
            cached_embeddings: counts.cached_embeddings,
            target_width: self.settings.target_width,
            metric: self.settings.metric,
            model: self.provider.model_name().to_string(),
        })
    }
}

/// Resolve where the index database lives for `config`.
pub fn resolve_db_path(config: &Config) -> PathBuf {
    match config.store.path.as_deref() {
        Some(path) if !path.trim().is_empty() => PathBuf::from(path),
        _ => config.state_dir.join(DEFAULT_DB_FILE),
    }
}
