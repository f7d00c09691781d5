//! Ollama embeddings backend. Wraps ollama-rs for a local server; no API key needed.

use ollama_rs::generation::embeddings::request::{EmbeddingsInput, GenerateEmbeddingsRequest};
use ollama_rs::Ollama;

use crate::config::EmbeddingConfig;
use crate::embedding::{EmbeddingBackend, EmbeddingError};

pub const DEFAULT_EMBED_MODEL: &str = "nomic-embed-text";
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

#[derive(Debug, Clone)]
pub struct OllamaBackend {
    inner: Ollama,
    embed_model: String,
}

impl OllamaBackend {
    /// Create from URL string, e.g. `http://localhost:11434`.
    pub fn from_url(url: &str) -> Result<Self, EmbeddingError> {
        let inner = Ollama::try_new(url)?;
        Ok(Self {
            inner,
            embed_model: DEFAULT_EMBED_MODEL.to_string(),
        })
    }

    pub fn from_config(config: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
        let backend = Self::from_url(config.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL))?;
        Ok(match config.model.as_deref() {
            Some(model) => backend.with_embed_model(model),
            None => backend,
        })
    }

    /// Set the embedding model (e.g. `nomic-embed-text`, `all-minilm`).
    pub fn with_embed_model(mut self, model: impl Into<String>) -> Self {
        self.embed_model = model.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.embed_model
    }
}

impl EmbeddingBackend for OllamaBackend {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let req = GenerateEmbeddingsRequest::new(
            self.embed_model.clone(),
            EmbeddingsInput::Multiple(texts.to_vec()),
        );
        let res = self.inner.generate_embeddings(req).await?;
        Ok(res.embeddings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_overrides_model_and_url() {
        let config = EmbeddingConfig {
            model: Some("all-minilm".into()),
            base_url: Some("http://10.0.0.2:11434".into()),
            ..EmbeddingConfig::default()
        };
        let backend = OllamaBackend::from_config(&config).unwrap();
        assert_eq!(backend.model(), "all-minilm");
    }

    #[test]
    fn bad_url_is_rejected() {
        assert!(matches!(
            OllamaBackend::from_url("::nope"),
            Err(EmbeddingError::InvalidUrl(_))
        ));
    }
}
