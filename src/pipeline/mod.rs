//! Conversation chunking, embedding and similarity retrieval.
//!
//! Data flows `messages → chunking → embeddings → dimension → store` on
//! ingest and `query → embeddings → dimension → search` on retrieval. Both
//! directions share one provider and one adapter so stored and query
//! vectors live in the same space.

mod chunking;
mod dimension;
mod distance;
mod embeddings;
mod error;
mod ingest;
mod manager;
mod schema;
mod search;
mod store;

pub use chunking::{chunk_messages, Chunks, Message, MessageChunk};
pub use dimension::{adapt, padding_is_zero};
pub use distance::{cosine_distance, l2_distance, DistanceMetric};
pub use embeddings::{
    embeddings_endpoint, normalize_input, EmbeddingBackend, EmbeddingProvider,
    LocalEmbeddingProvider, LocalModel, RemoteEmbeddingProvider,
};
pub use error::{ErrorKind, PipelineError, PipelineResult};
pub use ingest::{embedding_cache_key, ConversationInput, ConversationMeta};
pub use manager::{resolve_db_path, ConversationIndex, IndexSettings, IndexStats, DEFAULT_DB_FILE};
pub use search::QueryResult;
pub use store::{ChunkRecord, ConversationRecord};
