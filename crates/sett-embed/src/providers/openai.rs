//! OpenAI-compatible embedding endpoint

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sett_core::{EmbedError, Embedder};
use tracing::debug;

pub struct OpenAiEmbedder {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    dimensions: usize,
    api_key: Option<String>,
}

impl OpenAiEmbedder {
    pub fn new(endpoint: &str, model: &str, dimensions: usize, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: model.to_string(),
            dimensions,
            api_key,
        }
    }

    pub fn url(&self) -> String {
        format!("{}/embeddings", self.endpoint)
    }

    fn request<'a>(&'a self, text: &'a str) -> EmbeddingRequest<'a> {
        EmbeddingRequest {
            model: &self.model,
            input: text,
            dimensions: self.dimensions,
        }
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
    dimensions: usize,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// First vector of a response body, checked against the expected length.
fn parse_response(body: &str, expected: usize) -> Result<Vec<f32>, EmbedError> {
    let response: EmbeddingResponse =
        serde_json::from_str(body).map_err(|e| EmbedError::Response(e.to_string()))?;
    let vector = response
        .data
        .into_iter()
        .next()
        .map(|d| d.embedding)
        .ok_or_else(|| EmbedError::Response("no embedding in response".into()))?;
    if vector.len() != expected {
        return Err(EmbedError::Dimension {
            expected,
            actual: vector.len(),
        });
    }
    Ok(vector)
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let mut request = self.client.post(self.url()).json(&self.request(text));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request
            .send()
            .await
            .map_err(|e| EmbedError::Request(e.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| EmbedError::Request(e.to_string()))?;
        if !status.is_success() {
            return Err(EmbedError::Request(format!("{}: {}", status, body)));
        }
        debug!("Embedding response: {} bytes", body.len());
        parse_response(&body, self.dimensions)
    }
}
