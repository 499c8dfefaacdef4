//! Default configuration constants used across the system.

/// Default REST server port.
pub const DEFAULT_PORT: u16 = 18790;

/// Default REST bind address.
pub const DEFAULT_BIND: &str = "127.0.0.1";

/// Default width of stored vectors.
pub const DEFAULT_TARGET_WIDTH: usize = 1536;

/// Default native width of the local hashing model.
pub const DEFAULT_LOCAL_DIMENSIONS: usize = 384;

/// Default remote embedding endpoint base.
pub const DEFAULT_REMOTE_BASE_URL: &str = "https://api.openai.com";

/// Default remote embedding model.
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// Default native width of the remote model.
pub const DEFAULT_REMOTE_DIMENSIONS: usize = 1536;

/// Default chunk size budget in characters.
pub const DEFAULT_CHUNK_CHARS: usize = 2000;

/// Default number of texts per remote embedding request.
pub const EMBEDDING_BATCH_SIZE: usize = 64;

/// Default number of remote embedding requests in flight.
pub const EMBEDDING_CONCURRENCY: usize = 4;

/// Default remote embedding request timeout (2 minutes).
pub const EMBEDDING_TIMEOUT_REMOTE_MS: u64 = 2 * 60_000;

/// Default embedding retry max attempts.
pub const EMBEDDING_RETRY_MAX_ATTEMPTS: u32 = 3;

/// Default initial retry backoff.
pub const EMBEDDING_RETRY_MIN_DELAY_MS: u64 = 500;

/// Default maximum retry backoff.
pub const EMBEDDING_RETRY_MAX_DELAY_MS: u64 = 8_000;

/// Default number of search results.
pub const DEFAULT_TOP_K: i64 = 5;

/// Default page size for conversation listings.
pub const DEFAULT_LIST_LIMIT: usize = 50;
