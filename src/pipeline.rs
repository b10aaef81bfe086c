//! Deduplicating vectorization of one input source.
//!
//! 1. Stream records, dropping those whose dedup key was already seen this run
//! 2. Embed the surviving descriptions in chunks, keeping input order
//! 3. Coerce numeric fields and wrap each record in its output envelope

use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use indicatif::ProgressBar;
use serde_json::{json, Map, Value};

use crate::coerce::Coercion;
use crate::config::PipelineConfig;
use crate::dedup::SeenKeys;
use crate::embeddings::{BatchVectorizer, Embedder, EmbeddingError};
use crate::fingerprint::DedupKey;
use crate::normalize::truncate_tokens;
use crate::record::{CsvSource, OutputRecord, Record};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("failed to read input: {0}")]
    Read(#[from] csv::Error),

    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),
}

/// Counters for one converted source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConversionStats {
    /// Data rows read
    pub rows: usize,
    /// Output records produced
    pub produced: usize,
    /// Rows dropped because their key was already seen
    pub duplicates: usize,
    /// Rows dropped because their description could not be embedded
    pub embed_failed: usize,
    /// Numeric cells replaced by zero because they did not parse
    pub invalid_numbers: usize,
}

#[derive(Debug, Default)]
pub struct Conversion {
    pub records: Vec<OutputRecord>,
    pub stats: ConversionStats,
    /// Keys this source added to the run's set
    pub claimed: Vec<DedupKey>,
}

/// A record that passed the dedup filter, waiting for its vector.
struct Pending {
    record: Record,
    key: DedupKey,
}

pub struct Pipeline {
    config: PipelineConfig,
    vectorizer: BatchVectorizer,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, embedder: Arc<dyn Embedder>) -> Self {
        let vectorizer =
            BatchVectorizer::new(embedder, config.batch_size, config.on_chunk_failure);
        Self { config, vectorizer }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn convert_file(
        &self,
        path: &Path,
        seen: &SeenKeys,
        progress: &ProgressBar,
    ) -> Result<Conversion, PipelineError> {
        let source = CsvSource::open(path)?;
        self.convert(source, seen, progress)
    }

    /// Convert every record of `source`, sharing `seen` with the rest of the run.
    ///
    /// On error the keys this source claimed are released again.
    pub fn convert<R: Read>(
        &self,
        source: CsvSource<R>,
        seen: &SeenKeys,
        progress: &ProgressBar,
    ) -> Result<Conversion, PipelineError> {
        let mut claimed = Vec::new();
        match self.convert_claiming(source, seen, progress, &mut claimed) {
            Ok(conversion) => Ok(Conversion {
                claimed,
                ..conversion
            }),
            Err(err) => {
                log::debug!("Releasing {} keys of a failed source.", claimed.len());
                seen.release(&claimed);
                Err(err)
            }
        }
    }

    fn convert_claiming<R: Read>(
        &self,
        mut source: CsvSource<R>,
        seen: &SeenKeys,
        progress: &ProgressBar,
        claimed: &mut Vec<DedupKey>,
    ) -> Result<Conversion, PipelineError> {
        let mut stats = ConversionStats::default();
        let mut pending = Vec::new();
        let mut texts = Vec::new();

        for record in source.records() {
            let record = record?;
            stats.rows += 1;

            let description = record.get(&self.config.description_field).unwrap_or_default();
            let key = DedupKey::for_description(description, self.config.max_tokens);

            if !seen.insert_if_new(&key) {
                log::debug!(
                    "Skipping duplicate description (row id={}).",
                    self.record_id(&record)
                );
                stats.duplicates += 1;
                continue;
            }
            claimed.push(key.clone());

            texts.push(truncate_tokens(description, self.config.max_tokens));
            pending.push(Pending { record, key });
        }

        if pending.is_empty() {
            return Ok(Conversion {
                stats,
                ..Default::default()
            });
        }

        progress.set_length(texts.len() as u64);
        let vectorized = self.vectorizer.vectorize_with_policy(&texts, progress)?;
        stats.embed_failed = vectorized.failed;

        let mut records = Vec::with_capacity(pending.len());
        for (Pending { record, key }, vector) in pending.into_iter().zip(vectorized.vectors) {
            let Some(vector) = vector else {
                continue;
            };
            let (out, invalid) = self.assemble(record, &key, vector);
            stats.invalid_numbers += invalid;
            records.push(out);
        }
        stats.produced = records.len();

        Ok(Conversion {
            records,
            stats,
            ..Default::default()
        })
    }

    /// Coerce numeric fields, attach the vector and wrap the record under its key.
    ///
    /// Returns the envelope and the number of numeric cells that failed to parse.
    fn assemble(&self, record: Record, key: &DedupKey, vector: Vec<f32>) -> (OutputRecord, usize) {
        let record_id = self.record_id(&record).to_string();
        let mut fields: Map<String, Value> = record
            .iter()
            .map(|(name, value)| (name.to_string(), Value::from(value)))
            .collect();

        let mut invalid = 0;
        for numeric in &self.config.numeric_fields {
            let coerced = numeric.coerce(record.get(&numeric.name), &record_id);
            if matches!(coerced, Coercion::Invalid { .. }) {
                invalid += 1;
            }
            fields.insert(numeric.name.clone(), coerced.into_value());
        }

        fields.insert(self.config.vector_field.clone(), json!({ "values": vector }));

        let out = OutputRecord {
            put: format!("{}{}", self.config.namespace, key),
            fields,
        };
        (out, invalid)
    }

    fn record_id<'r>(&self, record: &'r Record) -> &'r str {
        record.get(&self.config.id_field).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::FakeEmbedder;

    fn pipeline() -> Pipeline {
        Pipeline::new(PipelineConfig::default(), Arc::new(FakeEmbedder::new(3)))
    }

    #[test]
    fn assemble_builds_envelope() {
        let pipeline = pipeline();
        let record = Record::new()
            .with("id", "9")
            .with("description", "Bright cherry")
            .with("price", "12.5")
            .with("points", "oops");
        let key = DedupKey::for_description("Bright cherry", 128);

        let (out, invalid) = pipeline.assemble(record, &key, vec![0.5, 0.25, 1.0]);

        assert_eq!(out.put, format!("id:wine:wine::{key}"));
        assert_eq!(invalid, 1);
        assert_eq!(out.fields["id"], json!("9"));
        assert_eq!(out.fields["price"], json!(12.5));
        assert_eq!(out.fields["points"], json!(0));
        assert_eq!(out.fields["description_vector"], json!({"values": [0.5, 0.25, 1.0]}));
    }

    #[test]
    fn assemble_keeps_field_order_and_appends_missing_numerics() {
        let pipeline = pipeline();
        let record = Record::new()
            .with("points", "90")
            .with("id", "1")
            .with("description", "x");
        let key = DedupKey::for_description("x", 128);

        let (out, _) = pipeline.assemble(record, &key, vec![0.0; 3]);

        let names: Vec<&str> = out.fields.keys().map(String::as_str).collect();
        assert_eq!(
            names,
            vec!["points", "id", "description", "price", "description_vector"]
        );
        assert_eq!(out.fields["price"], json!(0.0));
    }

    #[test]
    fn duplicates_never_reach_the_embedder() {
        let fake = Arc::new(FakeEmbedder::new(3));
        let pipeline = Pipeline::new(PipelineConfig::default(), fake.clone());
        let data = "id,description\n1,Oak and vanilla\n2,oak AND  vanilla\n3,Citrus\n";
        let source = CsvSource::from_reader(data.as_bytes()).unwrap();

        let conversion = pipeline
            .convert(source, &SeenKeys::new(), &ProgressBar::hidden())
            .unwrap();

        assert_eq!(fake.embedded_texts(), vec!["Oak and vanilla", "Citrus"]);
        assert_eq!(conversion.stats.duplicates, 1);
        assert_eq!(conversion.stats.produced, 2);
    }

    #[test]
    fn missing_description_column_is_a_degenerate_key() {
        let pipeline = pipeline();
        let source = CsvSource::from_reader("id,price\n1,3\n2,4\n".as_bytes()).unwrap();

        let conversion = pipeline
            .convert(source, &SeenKeys::new(), &ProgressBar::hidden())
            .unwrap();

        assert_eq!(conversion.records.len(), 1);
        assert_eq!(conversion.records[0].fields["id"], json!("1"));
        assert_eq!(
            conversion.records[0].put,
            format!("id:wine:wine::{}", DedupKey::from_normalized(""))
        );
    }
}
