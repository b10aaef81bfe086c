//! In-process fastembed model. Loading (and the download on a cold cache)
//! runs on a worker thread bounded by `embedding.download_timeout_secs`.

use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Mutex;
use std::time::Duration;

use fastembed::{InitOptions, TextEmbedding};

use super::{Embedder, EmbeddingError};

/// Accepted names (lowercased, with and without dashes) for each model.
const KNOWN_MODELS: &[(&str, &str, fastembed::EmbeddingModel)] = &[
    (
        "paraphrase-multilingual-minilm-l12-v2",
        "paraphrasemlminilml12v2",
        fastembed::EmbeddingModel::ParaphraseMLMiniLML12V2,
    ),
    (
        "paraphrase-multilingual-minilm-l12-v2-q",
        "paraphrasemlminilml12v2q",
        fastembed::EmbeddingModel::ParaphraseMLMiniLML12V2Q,
    ),
    ("all-minilm-l6-v2", "allminiml6v2", fastembed::EmbeddingModel::AllMiniLML6V2),
    ("all-minilm-l6-v2-q", "allminiml6v2q", fastembed::EmbeddingModel::AllMiniLML6V2Q),
    ("bge-small-en-v1.5", "bgesmallenv15", fastembed::EmbeddingModel::BGESmallENV15),
    ("bge-base-en-v1.5", "bgebaseenv15", fastembed::EmbeddingModel::BGEBaseENV15),
];

fn lookup_model(name: &str) -> Result<fastembed::EmbeddingModel, EmbeddingError> {
    let wanted = name.to_lowercase();
    KNOWN_MODELS
        .iter()
        .find(|(long, short, _)| *long == wanted || *short == wanted)
        .map(|(_, _, model)| model.clone())
        .ok_or_else(|| {
            let names: Vec<&str> = KNOWN_MODELS.iter().map(|(long, _, _)| *long).collect();
            EmbeddingError::InvalidModel(format!("{name} (known: {})", names.join(", ")))
        })
}

/// Run `load` on its own thread, giving up once `limit` has passed.
///
/// A load that overruns keeps going in the background; its result is discarded.
fn within_deadline<T, F>(limit: Duration, load: F) -> Result<T, EmbeddingError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, EmbeddingError> + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    std::thread::Builder::new()
        .name("model-load".to_string())
        .spawn(move || {
            let _ = tx.send(load());
        })
        .map_err(|e| EmbeddingError::InitFailed(format!("cannot start loader thread: {e}")))?;

    match rx.recv_timeout(limit) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => Err(EmbeddingError::DownloadTimeout(limit.as_secs())),
        Err(RecvTimeoutError::Disconnected) => Err(EmbeddingError::InitFailed(
            "model loader stopped without a result".to_string(),
        )),
    }
}

fn load_model(
    model: fastembed::EmbeddingModel,
    models_dir: &Path,
) -> Result<(TextEmbedding, usize), EmbeddingError> {
    std::fs::create_dir_all(models_dir).map_err(|e| {
        EmbeddingError::InitFailed(format!("cannot create {}: {e}", models_dir.display()))
    })?;

    let options = InitOptions::new(model)
        .with_cache_dir(models_dir.to_path_buf())
        .with_show_download_progress(true);
    let mut embedding =
        TextEmbedding::try_new(options).map_err(|e| EmbeddingError::InitFailed(e.to_string()))?;

    // one throwaway call tells us the output width
    let width = embedding
        .embed(vec!["dimension check"], None)
        .map_err(|e| EmbeddingError::InitFailed(e.to_string()))?
        .first()
        .map(Vec::len)
        .ok_or_else(|| EmbeddingError::InitFailed("model produced no output".to_string()))?;

    Ok((embedding, width))
}

pub struct EmbeddingModel {
    inner: Mutex<TextEmbedding>,
    name: String,
    width: usize,
}

impl EmbeddingModel {
    /// Load `name` from `cache_dir/models`, fetching it first if the cache is cold.
    pub fn new(
        name: &str,
        cache_dir: PathBuf,
        download_timeout: Duration,
    ) -> Result<Self, EmbeddingError> {
        let model = lookup_model(name)?;
        let models_dir = cache_dir.join("models");
        log::debug!(
            "Loading '{}' from {} (limit {}s)",
            name,
            models_dir.display(),
            download_timeout.as_secs()
        );

        let (inner, width) = within_deadline(download_timeout, move || load_model(model, &models_dir))?;
        log::info!("Loaded '{}' ({} dimensions)", name, width);

        Ok(Self {
            inner: Mutex::new(inner),
            name: name.to_string(),
            width,
        })
    }
}

impl Embedder for EmbeddingModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn dimensions(&self) -> usize {
        self.width
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let mut inner = self
            .inner
            .lock()
            .map_err(|_| EmbeddingError::EmbeddingFailed("model lock poisoned".to_string()))?;
        inner
            .embed(texts.to_vec(), Some(texts.len()))
            .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))
    }
}
