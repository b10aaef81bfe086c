use std::sync::Arc;

use indicatif::ProgressBar;

use super::{Embedder, EmbeddingError};
use crate::config::ChunkFailurePolicy;

/// Result of vectorizing a list of texts: one slot per input, in input order.
///
/// A slot is `None` only when its item could not be embedded even on its own
/// (`ChunkFailurePolicy::RetryEach`).
#[derive(Debug, Default)]
pub struct Vectorized {
    pub vectors: Vec<Option<Vec<f32>>>,
    pub failed: usize,
}

/// Sends texts to an [`Embedder`] in fixed-size chunks.
pub struct BatchVectorizer {
    embedder: Arc<dyn Embedder>,
    batch_size: usize,
    on_failure: ChunkFailurePolicy,
}

impl BatchVectorizer {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        batch_size: usize,
        on_failure: ChunkFailurePolicy,
    ) -> Self {
        Self {
            embedder,
            batch_size: batch_size.max(1),
            on_failure,
        }
    }

    /// Embed every text; any chunk failure is returned as an error.
    pub fn vectorize(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut out = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.batch_size) {
            out.extend(self.embed_chunk(chunk)?);
        }
        Ok(out)
    }

    /// Embed every text under the configured failure policy, ticking `progress` per chunk.
    pub fn vectorize_with_policy(
        &self,
        texts: &[String],
        progress: &ProgressBar,
    ) -> Result<Vectorized, EmbeddingError> {
        let mut result = Vectorized {
            vectors: Vec::with_capacity(texts.len()),
            failed: 0,
        };

        for chunk in texts.chunks(self.batch_size) {
            match self.embed_chunk(chunk) {
                Ok(vectors) => result.vectors.extend(vectors.into_iter().map(Some)),
                Err(err) => match self.on_failure {
                    ChunkFailurePolicy::Fail => return Err(err),
                    ChunkFailurePolicy::RetryEach => {
                        log::warn!(
                            "Embedding chunk of {} failed ({}), retrying items one by one",
                            chunk.len(),
                            err
                        );
                        for text in chunk {
                            match self.embed_chunk(std::slice::from_ref(text)) {
                                Ok(mut vectors) => result.vectors.push(vectors.pop()),
                                Err(err) => {
                                    log::error!("Failed to embed '{}': {}", preview(text), err);
                                    result.vectors.push(None);
                                    result.failed += 1;
                                }
                            }
                        }
                    }
                },
            }
            progress.inc(chunk.len() as u64);
        }

        Ok(result)
    }

    fn embed_chunk(&self, chunk: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let vectors = self.embedder.embed_batch(chunk)?;

        if vectors.len() != chunk.len() {
            return Err(EmbeddingError::CountMismatch {
                expected: chunk.len(),
                actual: vectors.len(),
            });
        }

        let expected = self.embedder.dimensions();
        if let Some(bad) = vectors.iter().find(|v| v.len() != expected) {
            return Err(EmbeddingError::DimensionMismatch {
                expected,
                actual: bad.len(),
            });
        }

        Ok(vectors)
    }
}

fn preview(text: &str) -> String {
    const PREVIEW_CHARS: usize = 40;
    if text.chars().count() <= PREVIEW_CHARS {
        return text.to_string();
    }
    let head: String = text.chars().take(PREVIEW_CHARS).collect();
    format!("{head}...")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::FakeEmbedder;

    fn texts(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("text {i}")).collect()
    }

    #[test]
    fn chunking_preserves_order() {
        let fake = Arc::new(FakeEmbedder::new(4));
        let vectorizer = BatchVectorizer::new(fake.clone(), 3, ChunkFailurePolicy::Fail);

        let input = texts(10);
        let vectors = vectorizer.vectorize(&input).unwrap();

        assert_eq!(vectors.len(), 10);
        for (text, vector) in input.iter().zip(&vectors) {
            assert_eq!(vector, &FakeEmbedder::vector_for(text, 4));
        }
        assert_eq!(fake.batch_sizes(), vec![3, 3, 3, 1]);
    }

    #[test]
    fn empty_input_makes_no_calls() {
        let fake = Arc::new(FakeEmbedder::new(4));
        let vectorizer = BatchVectorizer::new(fake.clone(), 3, ChunkFailurePolicy::Fail);

        assert!(vectorizer.vectorize(&[]).unwrap().is_empty());
        assert!(fake.batch_sizes().is_empty());
    }

    #[test]
    fn failing_chunk_is_fatal_under_fail_policy() {
        let fake = Arc::new(FakeEmbedder::new(4).failing_on("text 4"));
        let vectorizer = BatchVectorizer::new(fake, 3, ChunkFailurePolicy::Fail);

        let result = vectorizer.vectorize_with_policy(&texts(6), &ProgressBar::hidden());
        assert!(matches!(result, Err(EmbeddingError::EmbeddingFailed(_))));
    }

    #[test]
    fn retry_each_drops_only_the_bad_item() {
        let fake = Arc::new(FakeEmbedder::new(4).failing_on("text 4"));
        let vectorizer = BatchVectorizer::new(fake.clone(), 3, ChunkFailurePolicy::RetryEach);

        let input = texts(6);
        let result = vectorizer
            .vectorize_with_policy(&input, &ProgressBar::hidden())
            .unwrap();

        assert_eq!(result.failed, 1);
        assert_eq!(result.vectors.len(), 6);
        assert!(result.vectors[4].is_none());
        assert_eq!(
            result.vectors[5].as_ref().unwrap(),
            &FakeEmbedder::vector_for("text 5", 4)
        );
        // chunk [0..3], failed chunk [3..6], then three single retries
        assert_eq!(fake.batch_sizes(), vec![3, 3, 1, 1, 1]);
    }

    #[test]
    fn wrong_dimension_is_rejected() {
        let fake = Arc::new(FakeEmbedder::new(4).reporting_dimensions(8));
        let vectorizer = BatchVectorizer::new(fake, 3, ChunkFailurePolicy::Fail);

        let result = vectorizer.vectorize(&texts(2));
        assert!(matches!(
            result,
            Err(EmbeddingError::DimensionMismatch {
                expected: 8,
                actual: 4
            })
        ));
    }
}
