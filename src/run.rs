use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use rayon::prelude::*;

use crate::dedup::SeenKeys;
use crate::pipeline::{ConversionStats, Pipeline, PipelineError};
use crate::record::OutputRecord;

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("{0} is not a readable file")]
    NotAFile(PathBuf),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug)]
pub enum SourceOutcome {
    Converted {
        output: PathBuf,
        stats: ConversionStats,
    },
    Failed(SourceError),
}

#[derive(Debug)]
pub struct SourceReport {
    pub input: PathBuf,
    pub outcome: SourceOutcome,
}

/// Per-source results of one `convert` invocation, in argument order.
#[derive(Debug, Default)]
pub struct RunReport {
    pub sources: Vec<SourceReport>,
}

impl RunReport {
    pub fn failed(&self) -> usize {
        self.sources
            .iter()
            .filter(|s| matches!(s.outcome, SourceOutcome::Failed(_)))
            .count()
    }

    pub fn totals(&self) -> ConversionStats {
        let mut totals = ConversionStats::default();
        for source in &self.sources {
            if let SourceOutcome::Converted { stats, .. } = &source.outcome {
                totals.rows += stats.rows;
                totals.produced += stats.produced;
                totals.duplicates += stats.duplicates;
                totals.embed_failed += stats.embed_failed;
                totals.invalid_numbers += stats.invalid_numbers;
            }
        }
        totals
    }
}

/// Where the converted records of `input` are written.
pub fn output_path(input: &Path, extension: &str) -> PathBuf {
    input.with_extension(extension)
}

/// Serialize `records` as a pretty-printed JSON array, replacing `path` atomically.
pub fn write_json(records: &[OutputRecord], path: &Path) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let tmp = tempfile::NamedTempFile::new_in(dir)?;
    {
        let mut writer = BufWriter::new(tmp.as_file());
        serde_json::to_writer_pretty(&mut writer, records)?;
        writer.flush()?;
    }
    tmp.persist(path).map_err(|e| e.error)?;

    log::info!(
        "Saved {} ({} records).",
        path.file_name().unwrap_or(path.as_os_str()).to_string_lossy(),
        records.len()
    );
    Ok(())
}

/// Drives a multi-source run with one Seen-Key Set.
pub struct Runner<'a> {
    pipeline: &'a Pipeline,
    seen: SeenKeys,
    progress: MultiProgress,
}

impl<'a> Runner<'a> {
    pub fn new(pipeline: &'a Pipeline) -> Self {
        Self {
            pipeline,
            seen: SeenKeys::new(),
            progress: MultiProgress::new(),
        }
    }

    pub fn seen(&self) -> &SeenKeys {
        &self.seen
    }

    /// Convert every input; a failing input is reported without stopping the others.
    pub fn run(&self, inputs: &[PathBuf]) -> RunReport {
        let sources = if self.pipeline.config().parallel_sources {
            inputs
                .par_iter()
                .map(|input| self.run_source(input))
                .collect()
        } else {
            inputs.iter().map(|input| self.run_source(input)).collect()
        };

        RunReport { sources }
    }

    fn run_source(&self, input: &Path) -> SourceReport {
        let outcome = match self.convert_one(input) {
            Ok((output, stats)) => {
                log::info!(
                    "{}: {} records written, {} duplicates skipped, {} failed to embed",
                    input.display(),
                    stats.produced,
                    stats.duplicates,
                    stats.embed_failed
                );
                SourceOutcome::Converted { output, stats }
            }
            Err(err) => {
                log::error!("{}: {}", input.display(), err);
                SourceOutcome::Failed(err)
            }
        };

        SourceReport {
            input: input.to_path_buf(),
            outcome,
        }
    }

    fn convert_one(&self, input: &Path) -> Result<(PathBuf, ConversionStats), SourceError> {
        if !input.is_file() {
            return Err(SourceError::NotAFile(input.to_path_buf()));
        }

        let bar = self.progress.add(ProgressBar::new(0));
        bar.set_style(progress_style());
        bar.set_prefix(
            input
                .file_name()
                .unwrap_or(input.as_os_str())
                .to_string_lossy()
                .to_string(),
        );

        let result = self.pipeline.convert_file(input, &self.seen, &bar);
        bar.finish_and_clear();
        let conversion = result?;

        if conversion.records.is_empty() {
            log::info!("{}: 0 unique records (no data or all duplicates).", input.display());
        }

        let output = output_path(input, &self.pipeline.config().output_extension);
        if let Err(source) = write_json(&conversion.records, &output) {
            self.seen.release(&conversion.claimed);
            return Err(SourceError::Write {
                path: output,
                source,
            });
        }

        Ok((output, conversion.stats))
    }
}

fn progress_style() -> ProgressStyle {
    ProgressStyle::with_template("{prefix} [{bar:30}] {pos}/{len} {percent:>3}%")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_path_swaps_extension() {
        assert_eq!(
            output_path(Path::new("data/wines.csv"), "json"),
            PathBuf::from("data/wines.json")
        );
        assert_eq!(output_path(Path::new("wines"), "json"), PathBuf::from("wines.json"));
    }

    #[test]
    fn write_json_emits_an_array() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("out.json");

        write_json(&[], &path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "[]");

        let record = OutputRecord {
            put: "id:wine:wine::abc".to_string(),
            fields: serde_json::Map::new(),
        };
        write_json(&[record], &path).unwrap();
        let parsed: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed, serde_json::json!([{"put": "id:wine:wine::abc", "fields": {}}]));
    }
}
