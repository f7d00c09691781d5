//! Embedding client: batching, token truncation and response validation on top of a
//! provider backend (OpenAI or Ollama).

use tracing::{debug, info};

use crate::config::{EmbeddingConfig, Provider};
use crate::ollama::OllamaBackend;
use crate::openai::OpenAiBackend;
use crate::tokens::{Tokenizer, TokenizerError};

/// One request to an embedding service.
///
/// Implementations send `texts` as a single request and return one vector per
/// input, in input order. They do no batching or truncation of their own.
#[allow(async_fn_in_trait)]
pub trait EmbeddingBackend {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

/// Backend chosen from config at startup.
#[derive(Debug, Clone)]
pub enum ProviderBackend {
    OpenAi(OpenAiBackend),
    Ollama(OllamaBackend),
}

impl ProviderBackend {
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
        Ok(match config.provider {
            Provider::OpenAi => Self::OpenAi(OpenAiBackend::from_config(config)?),
            Provider::Ollama => Self::Ollama(OllamaBackend::from_config(config)?),
        })
    }

    /// Model name sent to the service.
    pub fn model(&self) -> &str {
        match self {
            Self::OpenAi(b) => b.model(),
            Self::Ollama(b) => b.model(),
        }
    }
}

impl EmbeddingBackend for ProviderBackend {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        match self {
            Self::OpenAi(b) => b.embed_batch(texts).await,
            Self::Ollama(b) => b.embed_batch(texts).await,
        }
    }
}

/// Turns texts into vectors: splits input into request-sized batches, truncates each
/// text to the token budget, and checks that every batch comes back whole.
#[derive(Debug, Clone)]
pub struct EmbeddingClient<B> {
    backend: B,
    tokenizer: Tokenizer,
    batch_size: usize,
    max_tokens: usize,
}

impl EmbeddingClient<ProviderBackend> {
    /// Build the configured provider with the configured batch size and token budget.
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
        if config.batch_size == 0 {
            return Err(EmbeddingError::InvalidConfig("batch_size must be at least 1".into()));
        }
        if config.max_tokens == 0 {
            return Err(EmbeddingError::InvalidConfig("max_tokens must be at least 1".into()));
        }
        Ok(Self::new(ProviderBackend::from_config(config)?)?
            .with_batch_size(config.batch_size)
            .with_max_tokens(config.max_tokens))
    }
}

impl<B: EmbeddingBackend> EmbeddingClient<B> {
    pub fn new(backend: B) -> Result<Self, EmbeddingError> {
        Ok(Self {
            backend,
            tokenizer: Tokenizer::cl100k()?,
            batch_size: crate::config::DEFAULT_BATCH_SIZE,
            max_tokens: crate::config::DEFAULT_MAX_TOKENS,
        })
    }

    /// Texts per request. Clamped to at least 1.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Token budget per text.
    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn tokenizer(&self) -> &Tokenizer {
        &self.tokenizer
    }

    /// Embed `texts` in order, one request per batch, strictly sequentially.
    /// Any failed batch fails the whole call; no partial result is returned.
    pub async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let batches = texts.len().div_ceil(self.batch_size);
        let mut vectors = Vec::with_capacity(texts.len());
        let mut dim = None;
        for (i, batch) in texts.chunks(self.batch_size).enumerate() {
            info!(batch = i + 1, of = batches, size = batch.len(), "generating embeddings");
            let prepared = self.prepare(batch);
            let out = self.backend.embed_batch(&prepared).await?;
            check_batch(&out, batch.len(), &mut dim)?;
            vectors.extend(out);
        }
        info!(texts = texts.len(), embeddings = vectors.len(), "embeddings complete");
        Ok(vectors)
    }

    /// Embed a single text (a search query). Same truncation, one request.
    pub async fn embed_one(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let prepared = vec![self.tokenizer.truncate(text, self.max_tokens).into_owned()];
        let mut out = self.backend.embed_batch(&prepared).await?;
        check_batch(&out, 1, &mut None)?;
        out.pop()
            .ok_or(EmbeddingError::CountMismatch { expected: 1, got: 0 })
    }

    fn prepare(&self, batch: &[String]) -> Vec<String> {
        batch
            .iter()
            .map(|text| {
                let cut = self.tokenizer.truncate(text, self.max_tokens);
                if cut.len() < text.len() {
                    debug!(max_tokens = self.max_tokens, "truncating overlong text");
                }
                cut.into_owned()
            })
            .collect()
    }
}

/// One vector per input, none empty or non-finite, all of one dimensionality (also
/// across batches).
fn check_batch(
    vectors: &[Vec<f32>],
    expected: usize,
    dim: &mut Option<usize>,
) -> Result<(), EmbeddingError> {
    if vectors.len() != expected {
        return Err(EmbeddingError::CountMismatch {
            expected,
            got: vectors.len(),
        });
    }
    for (index, v) in vectors.iter().enumerate() {
        if v.is_empty() {
            return Err(EmbeddingError::EmptyVector { index });
        }
        if v.iter().any(|x| !x.is_finite()) {
            return Err(EmbeddingError::NonFinite { index });
        }
        match *dim {
            None => *dim = Some(v.len()),
            Some(d) if d != v.len() => {
                return Err(EmbeddingError::DimensionMismatch {
                    expected: d,
                    got: v.len(),
                })
            }
            Some(_) => {}
        }
    }
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("no API key configured (set OPENAI_API_KEY)")]
    MissingApiKey,
    #[error("embedding service rejected the API key: {0}")]
    Unauthorized(String),
    #[error("embedding request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("embedding service returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("unexpected embedding response: {0}")]
    Response(String),
    #[error("embedding service returned {got} vectors for {expected} inputs")]
    CountMismatch { expected: usize, got: usize },
    #[error("embedding service returned an empty vector at position {index}")]
    EmptyVector { index: usize },
    #[error("embedding service returned NaN or infinity at position {index}")]
    NonFinite { index: usize },
    #[error("embedding dimension changed from {expected} to {got}")]
    DimensionMismatch { expected: usize, got: usize },
    #[error(transparent)]
    Tokenizer(#[from] TokenizerError),
    #[error("Ollama request failed: {0}")]
    Ollama(#[from] ollama_rs::error::OllamaError),
    #[error("invalid embedding service URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("invalid embedding config: {0}")]
    InvalidConfig(String),
}

/// Deterministic in-process backend for tests.
#[cfg(test)]
pub(crate) mod fake {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::{EmbeddingBackend, EmbeddingError};

    #[derive(Default)]
    pub(crate) struct FakeBackend {
        calls: Mutex<Vec<Vec<String>>>,
        fixed: HashMap<String, Vec<f32>>,
        fail_on_call: Option<usize>,
        drop_last: bool,
    }

    impl FakeBackend {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        /// Return `vector` whenever `text` is embedded.
        pub(crate) fn with_vector(mut self, text: &str, vector: Vec<f32>) -> Self {
            self.fixed.insert(text.to_string(), vector);
            self
        }

        /// Fail the n-th request (0-based).
        pub(crate) fn failing_on(mut self, call: usize) -> Self {
            self.fail_on_call = Some(call);
            self
        }

        /// Answer every request with one vector too few.
        pub(crate) fn dropping_last(mut self) -> Self {
            self.drop_last = true;
            self
        }

        pub(crate) fn vector_for(&self, text: &str) -> Vec<f32> {
            if let Some(v) = self.fixed.get(text) {
                return v.clone();
            }
            let hash = text
                .bytes()
                .fold(0x811c_9dc5u32, |h, b| (h ^ b as u32).wrapping_mul(0x0100_0193));
            vec![(hash & 0xffff) as f32, (hash >> 16) as f32, text.len() as f32]
        }

        pub(crate) fn calls(&self) -> Vec<Vec<String>> {
            self.calls.lock().unwrap().clone()
        }

        pub(crate) fn batch_sizes(&self) -> Vec<usize> {
            self.calls().iter().map(Vec::len).collect()
        }
    }

    impl EmbeddingBackend for FakeBackend {
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            let call = {
                let mut calls = self.calls.lock().unwrap();
                calls.push(texts.to_vec());
                calls.len() - 1
            };
            if self.fail_on_call == Some(call) {
                return Err(EmbeddingError::Status {
                    status: 500,
                    body: "boom".into(),
                });
            }
            let mut out: Vec<Vec<f32>> = texts.iter().map(|t| self.vector_for(t)).collect();
            if self.drop_last {
                out.pop();
            }
            Ok(out)
        }
    }
}
