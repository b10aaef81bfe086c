//! Embedding backends and batched vectorization.
//!
//! - `local`: fastembed model running in-process
//! - `remote`: client for the HTTP embedding server
//! - `batch`: order-preserving chunked vectorization over any backend

mod batch;
#[cfg(feature = "local-embeddings")]
mod local;
mod remote;

pub use batch::BatchVectorizer;
#[cfg(feature = "local-embeddings")]
pub use local::EmbeddingModel;
pub use remote::{RemoteEmbedder, TextInput};

use std::sync::Arc;
use std::time::Duration;

use crate::config::{EmbeddingBackend, EmbeddingConfig};

/// Error type for embedding operations
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("Model initialization failed: {0}")]
    InitFailed(String),

    #[error("Embedding generation failed: {0}")]
    EmbeddingFailed(String),

    #[error("Model download timed out after {0} seconds")]
    DownloadTimeout(u64),

    #[error("Invalid model name: {0}")]
    InvalidModel(String),

    #[error("Embedding service request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Expected {expected} embeddings, got {actual}")]
    CountMismatch { expected: usize, actual: usize },

    #[error("Expected {expected}-dimensional embedding, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Backend '{0}' is not available in this build")]
    Unavailable(String),
}

/// Anything that turns an ordered batch of strings into equally ordered vectors.
pub trait Embedder: Send + Sync {
    /// Model name reported in logs and server responses.
    fn name(&self) -> &str;

    /// Fixed length of every returned vector.
    fn dimensions(&self) -> usize;

    /// Embed `texts`; vector `i` must belong to `texts[i]`.
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embed_batch(&[text.to_string()])?
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::EmbeddingFailed("No embedding returned".to_string()))
    }
}

/// Build the backend selected by `config`.
pub fn from_config(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>, EmbeddingError> {
    match config.backend {
        EmbeddingBackend::Local => local_from_config(config),
        EmbeddingBackend::Remote => {
            let embedder = RemoteEmbedder::new(
                &config.endpoint,
                &config.model,
                Duration::from_secs(config.timeout_secs),
            )?;
            Ok(Arc::new(embedder))
        }
    }
}

#[cfg(feature = "local-embeddings")]
fn local_from_config(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>, EmbeddingError> {
    let model = EmbeddingModel::new(
        &config.model,
        config.cache_dir.clone(),
        Duration::from_secs(config.download_timeout_secs),
    )?;
    Ok(Arc::new(model))
}

#[cfg(not(feature = "local-embeddings"))]
fn local_from_config(_config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>, EmbeddingError> {
    Err(EmbeddingError::Unavailable("local".to_string()))
}
