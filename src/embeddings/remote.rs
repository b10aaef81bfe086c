//! Blocking client for the embedding server (`vecfeed serve`).
//!
//! Wire format: `POST {"text": "..."}` or `{"text": ["...", ...]}`, answered
//! by `{"<model>": [...]}` or `{"<model>": [[...], ...]}`.

use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};

use super::{Embedder, EmbeddingError};

/// Text payload of an embedding request: one string or a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TextInput {
    One(String),
    Many(Vec<String>),
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    text: &'a TextInput,
}

pub struct RemoteEmbedder {
    client: Client,
    endpoint: String,
    model: String,
    /// Known once the server has answered
    dimensions: OnceLock<usize>,
}

impl RemoteEmbedder {
    /// Client for `endpoint` that sends nothing until the first embedding request.
    pub fn connect(endpoint: &str, model: &str, timeout: Duration) -> Result<Self, EmbeddingError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            model: model.to_string(),
            dimensions: OnceLock::new(),
        })
    }

    /// Connect and learn the dimensionality of `model` up front.
    pub fn new(endpoint: &str, model: &str, timeout: Duration) -> Result<Self, EmbeddingError> {
        let embedder = Self::connect(endpoint, model, timeout)?;
        embedder
            .embed_batch(&["test".to_string()])
            .map_err(|e| EmbeddingError::InitFailed(format!("Failed to probe {}: {}", endpoint, e)))?;

        log::info!(
            "Using embedding server {} with '{}' ({} dimensions)",
            endpoint,
            model,
            embedder.dimensions()
        );

        Ok(embedder)
    }

    fn request(&self, input: &TextInput) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&EmbedRequest { text: input })
            .send()?
            .error_for_status()?;

        let mut body: HashMap<String, serde_json::Value> = resp.json()?;
        let value = body.remove(&self.model).ok_or_else(|| {
            EmbeddingError::EmbeddingFailed(format!("response has no '{}' key", self.model))
        })?;

        let vectors = match input {
            TextInput::One(_) => serde_json::from_value::<Vec<f32>>(value).map(|v| vec![v]),
            TextInput::Many(_) => serde_json::from_value::<Vec<Vec<f32>>>(value),
        }
        .map_err(|e| EmbeddingError::EmbeddingFailed(format!("malformed response: {}", e)))?;

        for vector in &vectors {
            let expected = *self.dimensions.get_or_init(|| vector.len());
            if vector.len() != expected {
                return Err(EmbeddingError::DimensionMismatch {
                    expected,
                    actual: vector.len(),
                });
            }
        }
        Ok(vectors)
    }
}

impl Embedder for RemoteEmbedder {
    fn name(&self) -> &str {
        &self.model
    }

    /// Zero until a response has been seen; `new` guarantees one.
    fn dimensions(&self) -> usize {
        self.dimensions.get().copied().unwrap_or_default()
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let vectors = self.request(&TextInput::Many(texts.to_vec()))?;
        if vectors.len() != texts.len() {
            return Err(EmbeddingError::CountMismatch {
                expected: texts.len(),
                actual: vectors.len(),
            });
        }
        Ok(vectors)
    }

    /// Sent as `{"text": "..."}`, answered with a single vector.
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.request(&TextInput::One(text.to_string()))?
            .pop()
            .ok_or_else(|| EmbeddingError::EmbeddingFailed("No embedding returned".to_string()))
    }
}
