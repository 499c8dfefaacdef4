use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::config::{
    EmbeddingBackendKind, EmbeddingConfig, LocalEmbeddingConfig, RemoteEmbeddingConfig,
    RetryConfig,
};

use super::error::{PipelineError, PipelineResult};

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// A provider that turns text into dense vector embeddings.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text.
    ///
    /// Fails with [`PipelineError::InvalidInput`] if the text is blank.
    async fn embed(&self, text: &str) -> PipelineResult<Vec<f32>> {
        let text = normalize_input(text)?;
        self.embed_batch(&[text.to_string()])
            .await?
            .pop()
            .ok_or_else(|| PipelineError::ProviderUnavailable("empty embedding response".into()))
    }

    /// Embed a batch of texts.
    ///
    /// Returns one vector per input, in input order.
    async fn embed_batch(&self, texts: &[String]) -> PipelineResult<Vec<Vec<f32>>>;

    /// The model identifier used by this provider.
    fn model_name(&self) -> &str;

    /// Native width of the vectors produced by this provider.
    fn dimensions(&self) -> usize;
}

/// Trim `text` and reject it if nothing is left.
pub fn normalize_input(text: &str) -> PipelineResult<&str> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(PipelineError::InvalidInput(
            "cannot embed empty text".to_string(),
        ));
    }
    Ok(trimmed)
}

// ---------------------------------------------------------------------------
// Backend selection
// ---------------------------------------------------------------------------

/// The configured embedding backend.
///
/// Chosen once from [`EmbeddingConfig`] and then used through the
/// [`EmbeddingProvider`] trait.
pub enum EmbeddingBackend {
    Local(LocalEmbeddingProvider),
    Remote(RemoteEmbeddingProvider),
}

impl EmbeddingBackend {
    pub fn from_config(config: &EmbeddingConfig) -> PipelineResult<Self> {
        match config.backend {
            EmbeddingBackendKind::Local => {
                let model = Arc::new(LocalModel::load(&config.local)?);
                Ok(Self::Local(LocalEmbeddingProvider::new(model)))
            }
            EmbeddingBackendKind::Remote => {
                Ok(Self::Remote(RemoteEmbeddingProvider::new(&config.remote)?))
            }
        }
    }
}

#[async_trait]
impl EmbeddingProvider for EmbeddingBackend {
    async fn embed_batch(&self, texts: &[String]) -> PipelineResult<Vec<Vec<f32>>> {
        match self {
            Self::Local(p) => p.embed_batch(texts).await,
            Self::Remote(p) => p.embed_batch(texts).await,
        }
    }

    fn model_name(&self) -> &str {
        match self {
            Self::Local(p) => p.model_name(),
            Self::Remote(p) => p.model_name(),
        }
    }

    fn dimensions(&self) -> usize {
        match self {
            Self::Local(p) => p.dimensions(),
            Self::Remote(p) => p.dimensions(),
        }
    }
}

// ---------------------------------------------------------------------------
// Local
// ---------------------------------------------------------------------------

/// Weight given to adjacent-token bigram features relative to unigrams.
const BIGRAM_WEIGHT: f32 = 0.5;

/// In-process feature-hashing embedding model.
///
/// Tokens and adjacent-token bigrams are hashed with SHA-256 into signed
/// buckets and the result is L2-normalised. Loaded once and shared through
/// an `Arc` by every provider that uses it.
#[derive(Debug)]
pub struct LocalModel {
    dimensions: usize,
    name: String,
}

impl LocalModel {
    pub const VERSION: &'static str = "hashing-v1";

    pub fn load(config: &LocalEmbeddingConfig) -> PipelineResult<Self> {
        if config.dimensions == 0 {
            return Err(PipelineError::ProviderUnavailable(
                "local model cannot be loaded with zero dimensions".to_string(),
            ));
        }
        let name = format!("local-{}-{}", Self::VERSION, config.dimensions);
        debug!(model = %name, "local embedding model loaded");
        Ok(Self {
            dimensions: config.dimensions,
            name,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Encode already-normalised text into a unit vector.
    pub fn encode(&self, text: &str) -> Vec<f32> {
        let lowered = text.to_lowercase();
        let mut tokens: Vec<&str> = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .collect();
        if tokens.is_empty() {
            tokens.push(lowered.trim());
        }

        let mut vector = vec![0.0f32; self.dimensions];
        for token in &tokens {
            self.accumulate(&mut vector, token.as_bytes(), 1.0);
        }
        for pair in tokens.windows(2) {
            let bigram = format!("{} {}", pair[0], pair[1]);
            self.accumulate(&mut vector, bigram.as_bytes(), BIGRAM_WEIGHT);
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in vector.iter_mut() {
                *v /= norm;
            }
        }
        vector
    }

    fn accumulate(&self, vector: &mut [f32], feature: &[u8], weight: f32) {
        let digest = Sha256::digest(feature);
        let mut bucket = [0u8; 8];
        bucket.copy_from_slice(&digest[..8]);
        let index = (u64::from_le_bytes(bucket) % self.dimensions as u64) as usize;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        vector[index] += sign * weight;
    }
}

/// Embeds text with a shared [`LocalModel`].
pub struct LocalEmbeddingProvider {
    model: Arc<LocalModel>,
}

impl LocalEmbeddingProvider {
    pub fn new(model: Arc<LocalModel>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl EmbeddingProvider for LocalEmbeddingProvider {
    async fn embed_batch(&self, texts: &[String]) -> PipelineResult<Vec<Vec<f32>>> {
        texts
            .iter()
            .map(|t| normalize_input(t).map(|t| self.model.encode(t)))
            .collect()
    }

    fn model_name(&self) -> &str {
        self.model.name()
    }

    fn dimensions(&self) -> usize {
        self.model.dimensions()
    }
}

// ---------------------------------------------------------------------------
// Remote (OpenAI-compatible)
// ---------------------------------------------------------------------------

fn normalize_base_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

fn has_version_suffix(base_url: &str) -> bool {
    let Some(last_segment) = base_url.rsplit('/').next() else {
        return false;
    };
    let Some(rest) = last_segment.strip_prefix('v') else {
        return false;
    };
    !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit())
}

/// Derive the `/embeddings` endpoint from a configured base URL.
pub fn embeddings_endpoint(base_url: &str) -> String {
    let normalized = normalize_base_url(base_url);
    if normalized.ends_with("/embeddings") {
        return normalized;
    }
    if has_version_suffix(&normalized) {
        return format!("{normalized}/embeddings");
    }
    format!("{normalized}/v1/embeddings")
}

/// Calls an OpenAI-compatible `/v1/embeddings` endpoint.
pub struct RemoteEmbeddingProvider {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    dimensions: usize,
    batch_size: usize,
    concurrency: usize,
    retry: RetryConfig,
}

impl RemoteEmbeddingProvider {
    pub fn new(config: &RemoteEmbeddingConfig) -> PipelineResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| PipelineError::ProviderUnavailable(format!("http client: {e}")))?;

        Ok(Self {
            client,
            endpoint: embeddings_endpoint(&config.base_url),
            api_key: config.api_key.clone().filter(|k| !k.trim().is_empty()),
            model: config.model.clone(),
            dimensions: config.dimensions,
            batch_size: config.batch_size.max(1),
            concurrency: config.concurrency.max(1),
            retry: config.retry.clone(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Send one batch, retrying transient failures with exponential backoff.
    async fn request_batch(&self, batch: &[String]) -> PipelineResult<Vec<Vec<f32>>> {
        let attempts = self.retry.attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.send_once(batch).await {
                Ok(vectors) => return Ok(vectors),
                Err(AttemptError::Fatal(msg)) => {
                    return Err(PipelineError::ProviderUnavailable(msg));
                }
                Err(AttemptError::Transient(msg)) if attempt >= attempts => {
                    return Err(PipelineError::ProviderUnavailable(format!(
                        "{msg} (after {attempt} attempts)"
                    )));
                }
                Err(AttemptError::Transient(msg)) => {
                    let delay = backoff_delay(&self.retry, attempt);
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %msg,
                        "transient embedding failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn send_once(&self, batch: &[String]) -> Result<Vec<Vec<f32>>, AttemptError> {
        let body = RemoteEmbeddingRequest {
            model: &self.model,
            input: batch,
        };

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let resp = request.send().await.map_err(|e| {
            if e.is_timeout() || e.is_connect() || e.is_request() {
                AttemptError::Transient(format!("embedding request failed: {e}"))
            } else {
                AttemptError::Fatal(format!("embedding request failed: {e}"))
            }
        })?;

        let status = resp.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(AttemptError::Transient(format!(
                "embedding endpoint returned HTTP {status}"
            )));
        }
        if !status.is_success() {
            return Err(AttemptError::Fatal(format!(
                "embedding endpoint returned HTTP {status}"
            )));
        }

        let parsed = resp
            .json::<RemoteEmbeddingResponse>()
            .await
            .map_err(|e| AttemptError::Fatal(format!("invalid embedding response: {e}")))?;

        if parsed.data.len() != batch.len() {
            return Err(AttemptError::Fatal(format!(
                "embedding response has {} vectors for {} inputs",
                parsed.data.len(),
                batch.len()
            )));
        }

        let mut slots: Vec<Option<Vec<f32>>> = vec![None; batch.len()];
        for (position, item) in parsed.data.into_iter().enumerate() {
            let index = item.index.unwrap_or(position);
            if item.embedding.len() != self.dimensions {
                return Err(AttemptError::Fatal(format!(
                    "embedding {index} has {} dimensions, expected {}",
                    item.embedding.len(),
                    self.dimensions
                )));
            }
            match slots.get_mut(index) {
                None => {
                    return Err(AttemptError::Fatal(format!(
                        "embedding response index {index} is out of range for {} inputs",
                        batch.len()
                    )));
                }
                Some(slot) if slot.is_some() => {
                    return Err(AttemptError::Fatal(format!(
                        "embedding response repeats index {index}"
                    )));
                }
                Some(slot) => *slot = Some(item.embedding),
            }
        }

        // Count matched and every index was placed once, so all slots are filled.
        Ok(slots.into_iter().flatten().collect())
    }
}

enum AttemptError {
    Transient(String),
    Fatal(String),
}

fn backoff_delay(retry: &RetryConfig, attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    let base = retry
        .min_delay_ms
        .saturating_mul(1u64 << exp)
        .min(retry.max_delay_ms.max(retry.min_delay_ms));
    let jitter = rand::thread_rng().gen_range(0..=base / 10);
    Duration::from_millis(base + jitter)
}

#[derive(Serialize)]
struct RemoteEmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct RemoteEmbeddingResponse {
    data: Vec<RemoteEmbeddingData>,
}

#[derive(Deserialize)]
struct RemoteEmbeddingData {
    embedding: Vec<f32>,
    /// Position in the request; some compatible servers omit it.
    #[serde(default)]
    index: Option<usize>,
}

#[async_trait]
impl EmbeddingProvider for RemoteEmbeddingProvider {
    async fn embed_batch(&self, texts: &[String]) -> PipelineResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let inputs = texts
            .iter()
            .map(|t| normalize_input(t).map(str::to_string))
            .collect::<PipelineResult<Vec<String>>>()?;

        debug!(
            inputs = inputs.len(),
            batch_size = self.batch_size,
            model = %self.model,
            "requesting remote embeddings"
        );

        // `buffered` yields in submission order regardless of completion order.
        let batches: Vec<Vec<Vec<f32>>> =
            stream::iter(inputs.chunks(self.batch_size).map(<[String]>::to_vec))
                .map(|batch| async move { self.request_batch(&batch).await })
                .buffered(self.concurrency)
                .try_collect()
                .await?;

        Ok(batches.into_iter().flatten().collect())
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
