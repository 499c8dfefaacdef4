use super::{Config, EmbeddingBackendKind};
use anyhow::Result;

/// Validation errors for configuration.
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

fn error(path: &str, message: impl Into<String>) -> ConfigValidationError {
    ConfigValidationError {
        path: path.to_string(),
        message: message.into(),
    }
}

/// Validate a configuration object.
pub fn validate_config(config: &Config) -> Vec<ConfigValidationError> {
    let mut errors = Vec::new();

    if config.server.port == 0 {
        errors.push(error("server.port", "Port must be greater than 0"));
    }

    let embedding = &config.embedding;
    if embedding.target_width == 0 {
        errors.push(error("embedding.targetWidth", "Target width must be greater than 0"));
    }

    // Over-wide providers are rejected at ingest time; catch the pairing early.
    let native = embedding.native_width();
    if native > embedding.target_width {
        let path = match embedding.backend {
            EmbeddingBackendKind::Local => "embedding.local.dimensions",
            EmbeddingBackendKind::Remote => "embedding.remote.dimensions",
        };
        errors.push(error(
            path,
            format!(
                "Native width {native} exceeds target width {}",
                embedding.target_width
            ),
        ));
    }

    if embedding.backend == EmbeddingBackendKind::Local && embedding.local.dimensions == 0 {
        errors.push(error("embedding.local.dimensions", "Dimensions must be greater than 0"));
    }

    if embedding.backend == EmbeddingBackendKind::Remote {
        let remote = &embedding.remote;
        if let Err(e) = url::Url::parse(remote.base_url.trim()) {
            errors.push(error("embedding.remote.baseUrl", format!("Invalid URL: {e}")));
        }
        if remote.model.trim().is_empty() {
            errors.push(error("embedding.remote.model", "Model is required"));
        }
        if remote.batch_size == 0 {
            errors.push(error("embedding.remote.batchSize", "Batch size must be greater than 0"));
        }
        if remote.concurrency == 0 {
            errors.push(error(
                "embedding.remote.concurrency",
                "Concurrency must be greater than 0",
            ));
        }
        if remote.retry.attempts == 0 {
            errors.push(error(
                "embedding.remote.retry.attempts",
                "At least one attempt is required",
            ));
        }
    }

    if config.chunking.max_chars == 0 {
        errors.push(error("chunking.maxChars", "Chunk budget must be greater than 0"));
    }

    if config.search.default_top_k <= 0 {
        errors.push(error("search.defaultTopK", "Default top-k must be positive"));
    }

    errors
}

/// Validate configuration and return Result.
pub fn validate_config_object(config: &Config) -> Result<()> {
    let errors = validate_config(config);
    if errors.is_empty() {
        Ok(())
    } else {
        let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        anyhow::bail!("Configuration validation failed:\n{}", messages.join("\n"));
    }
}
