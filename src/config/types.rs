use serde::{Deserialize, Serialize};

use super::defaults::*;
use crate::pipeline::DistanceMetric;

// ============================================================================
// Server Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

// ============================================================================
// Store Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct StoreConfig {
    /// Database file. Defaults to `<stateDir>/convoindex.db`.
    pub path: Option<String>,
}

// ============================================================================
// Embedding Configuration
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackendKind {
    #[default]
    Local,
    Remote,
}

impl std::str::FromStr for EmbeddingBackendKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(Self::Local),
            "remote" => Ok(Self::Remote),
            _ => Err(format!("invalid embedding backend: {s}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub backend: EmbeddingBackendKind,
    /// Fixed width of every stored vector.
    #[serde(default = "default_target_width")]
    pub target_width: usize,
    /// Reuse vectors for text that was embedded before.
    #[serde(default = "default_true")]
    pub cache: bool,
    #[serde(default)]
    pub local: LocalEmbeddingConfig,
    #[serde(default)]
    pub remote: RemoteEmbeddingConfig,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackendKind::default(),
            target_width: default_target_width(),
            cache: true,
            local: LocalEmbeddingConfig::default(),
            remote: RemoteEmbeddingConfig::default(),
        }
    }
}

impl EmbeddingConfig {
    /// Native width of the selected backend.
    pub fn native_width(&self) -> usize {
        match self.backend {
            EmbeddingBackendKind::Local => self.local.dimensions,
            EmbeddingBackendKind::Remote => self.remote.dimensions,
        }
    }
}

fn default_target_width() -> usize {
    DEFAULT_TARGET_WIDTH
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalEmbeddingConfig {
    #[serde(default = "default_local_dimensions")]
    pub dimensions: usize,
}

impl Default for LocalEmbeddingConfig {
    fn default() -> Self {
        Self {
            dimensions: default_local_dimensions(),
        }
    }
}

fn default_local_dimensions() -> usize {
    DEFAULT_LOCAL_DIMENSIONS
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteEmbeddingConfig {
    #[serde(default = "default_remote_base_url")]
    pub base_url: String,
    #[serde(default = "default_remote_model")]
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default = "default_remote_dimensions")]
    pub dimensions: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for RemoteEmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: default_remote_base_url(),
            model: default_remote_model(),
            api_key: None,
            dimensions: default_remote_dimensions(),
            batch_size: default_batch_size(),
            concurrency: default_concurrency(),
            timeout_ms: default_timeout_ms(),
            retry: RetryConfig::default(),
        }
    }
}

fn default_remote_base_url() -> String {
    DEFAULT_REMOTE_BASE_URL.to_string()
}

fn default_remote_model() -> String {
    DEFAULT_EMBEDDING_MODEL.to_string()
}

fn default_remote_dimensions() -> usize {
    DEFAULT_REMOTE_DIMENSIONS
}

fn default_batch_size() -> usize {
    EMBEDDING_BATCH_SIZE
}

fn default_concurrency() -> usize {
    EMBEDDING_CONCURRENCY
}

fn default_timeout_ms() -> u64 {
    EMBEDDING_TIMEOUT_REMOTE_MS
}

// ============================================================================
// Retry Configuration
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    /// Total attempts per batch, including the first.
    #[serde(default = "default_retry_attempts")]
    pub attempts: u32,
    #[serde(default = "default_retry_min_delay")]
    pub min_delay_ms: u64,
    #[serde(default = "default_retry_max_delay")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: default_retry_attempts(),
            min_delay_ms: default_retry_min_delay(),
            max_delay_ms: default_retry_max_delay(),
        }
    }
}

fn default_retry_attempts() -> u32 {
    EMBEDDING_RETRY_MAX_ATTEMPTS
}

fn default_retry_min_delay() -> u64 {
    EMBEDDING_RETRY_MIN_DELAY_MS
}

fn default_retry_max_delay() -> u64 {
    EMBEDDING_RETRY_MAX_DELAY_MS
}

// ============================================================================
// Chunking Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_chars")]
    pub max_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: default_chunk_chars(),
        }
    }
}

fn default_chunk_chars() -> usize {
    DEFAULT_CHUNK_CHARS
}

// ============================================================================
// Search Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchConfig {
    #[serde(default)]
    pub metric: DistanceMetric,
    #[serde(default = "default_top_k")]
    pub default_top_k: i64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            metric: DistanceMetric::default(),
            default_top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> i64 {
    DEFAULT_TOP_K
}
