use thiserror::Error;

/// Errors surfaced by the chunk → embed → store → search pipeline.
///
/// Every variant is returned to the caller as-is; the only recovery the
/// pipeline performs internally is retrying transient remote embedding
/// failures before they become [`PipelineError::ProviderUnavailable`].
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Empty or malformed text or conversation metadata.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The embedding backend could not be reached or loaded.
    #[error("embedding provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// The provider produced a vector wider than the store's fixed width.
    #[error("embedding width {native} exceeds target width {target}")]
    DimensionMismatch { native: usize, target: usize },

    /// The conversation produced no chunks to embed.
    #[error("conversation produced no chunks")]
    EmptyConversation,

    /// A caller-supplied argument is out of range (e.g. `top_k <= 0`).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Opaque passthrough of a persistence-layer failure.
    #[error("storage failure: {0}")]
    StorageFailure(#[from] rusqlite::Error),

    /// The database was built for a different width or distance metric.
    #[error("index was built with {key} = {stored}, configured {key} = {configured}")]
    IndexMismatch {
        key: String,
        stored: String,
        configured: String,
    },
}

/// Payload-free discriminant of [`PipelineError`], for transport mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidInput,
    ProviderUnavailable,
    DimensionMismatch,
    EmptyConversation,
    InvalidArgument,
    StorageFailure,
    IndexMismatch,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidInput => "invalid_input",
            Self::ProviderUnavailable => "provider_unavailable",
            Self::DimensionMismatch => "dimension_mismatch",
            Self::EmptyConversation => "empty_conversation",
            Self::InvalidArgument => "invalid_argument",
            Self::StorageFailure => "storage_failure",
            Self::IndexMismatch => "index_mismatch",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::ProviderUnavailable(_) => ErrorKind::ProviderUnavailable,
            Self::DimensionMismatch { .. } => ErrorKind::DimensionMismatch,
            Self::EmptyConversation => ErrorKind::EmptyConversation,
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::StorageFailure(_) => ErrorKind::StorageFailure,
            Self::IndexMismatch { .. } => ErrorKind::IndexMismatch,
        }
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
