//! OpenAI-compatible embeddings backend over `reqwest`.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::config::{EmbeddingConfig, DEFAULT_OPENAI_BASE_URL, DEFAULT_OPENAI_MODEL};
use crate::embedding::{EmbeddingBackend, EmbeddingError};

const ORGANIZATION_HEADER: &str = "openai-organization";
const PROJECT_HEADER: &str = "openai-project";

/// Talks to `<base_url>/embeddings`. The key is checked on first use, so a missing
/// key surfaces as [EmbeddingError::MissingApiKey] rather than at startup.
#[derive(Debug, Clone)]
pub struct OpenAiBackend {
    client: Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

impl OpenAiBackend {
    pub fn new(
        api_key: Option<String>,
        base_url: &str,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, EmbeddingError> {
        Self::with_headers(api_key, base_url, model, timeout, HeaderMap::new())
    }

    /// Build from config, adding organization/project routing headers when set.
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
        let mut headers = HeaderMap::new();
        if let Some(org) = config.organization.as_deref() {
            insert_header(&mut headers, ORGANIZATION_HEADER, org)?;
        }
        if let Some(project) = config.project.as_deref() {
            insert_header(&mut headers, PROJECT_HEADER, project)?;
        }
        Self::with_headers(
            config.api_key.clone(),
            config.base_url.as_deref().unwrap_or(DEFAULT_OPENAI_BASE_URL),
            config.model.as_deref().unwrap_or(DEFAULT_OPENAI_MODEL),
            Duration::from_secs(config.timeout_secs),
            headers,
        )
    }

    fn with_headers(
        api_key: Option<String>,
        base_url: &str,
        model: impl Into<String>,
        timeout: Duration,
        headers: HeaderMap,
    ) -> Result<Self, EmbeddingError> {
        let base = url::Url::parse(base_url)?;
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| EmbeddingError::InvalidConfig(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", base.as_str().trim_end_matches('/')),
            model: model.into(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl EmbeddingBackend for OpenAiBackend {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let key = self.api_key.as_deref().ok_or(EmbeddingError::MissingApiKey)?;
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };
        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(key.trim())
            .json(&request)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => EmbeddingError::Unauthorized(body),
                _ => EmbeddingError::Status {
                    status: status.as_u16(),
                    body,
                },
            });
        }
        let parsed: EmbeddingResponse = resp
            .json()
            .await
            .map_err(|e| EmbeddingError::Response(e.to_string()))?;
        into_vectors(parsed, texts.len())
    }
}

fn insert_header(headers: &mut HeaderMap, name: &'static str, value: &str) -> Result<(), EmbeddingError> {
    let value = HeaderValue::from_str(value.trim())
        .map_err(|_| EmbeddingError::InvalidConfig(format!("invalid {name} header value")))?;
    headers.insert(HeaderName::from_static(name), value);
    Ok(())
}

/// Order vectors by the `index` the service reports; every input position must
/// appear exactly once.
fn into_vectors(mut parsed: EmbeddingResponse, expected: usize) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    if parsed.data.len() != expected {
        return Err(EmbeddingError::CountMismatch {
            expected,
            got: parsed.data.len(),
        });
    }
    parsed.data.sort_by_key(|entry| entry.index);
    if parsed.data.iter().enumerate().any(|(i, entry)| entry.index != i) {
        return Err(EmbeddingError::Response(
            "response indices do not cover every input".into(),
        ));
    }
    Ok(parsed.data.into_iter().map(|entry| entry.embedding).collect())
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}
