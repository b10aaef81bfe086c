use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

use crate::coerce::{NumericField, NumericKind};

/// Document id prefix understood by the search engine
const DEFAULT_NAMESPACE: &str = "id:wine:wine::";
/// Tokens kept from a description before hashing and embedding
const DEFAULT_MAX_TOKENS: usize = 128;
/// Strings sent to the embedder per request
const DEFAULT_BATCH_SIZE: usize = 32;

/// Default embedding model (multilingual, 384 dimensions)
const DEFAULT_EMBEDDING_MODEL: &str = "paraphrase-multilingual-MiniLM-L12-v2";
const DEFAULT_EMBED_ENDPOINT: &str = "http://localhost:8088";
const DEFAULT_EMBED_TIMEOUT_SECS: u64 = 10;
/// Default model download timeout in seconds
const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 300;

const DEFAULT_SERVER_HOST: &str = "0.0.0.0";
const DEFAULT_SERVER_PORT: u16 = 8088;

const DEFAULT_SEARCH_ENDPOINT: &str = "http://localhost:8080";
const DEFAULT_DOCUMENT_TYPE: &str = "wine";
const DEFAULT_TOP_K: usize = 5;

/// What to do when a whole embedding chunk fails.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkFailurePolicy {
    /// Abort the source; nothing is written for it.
    Fail,
    /// Re-embed each item of the failed chunk on its own, dropping the ones that still fail.
    RetryEach,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingBackend {
    /// In-process fastembed model
    Local,
    /// Embedding server reached over HTTP
    Remote,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Prefix prepended to the dedup key to form the document id
    #[serde(default = "default_namespace")]
    pub namespace: String,

    #[serde(default = "default_id_field")]
    pub id_field: String,

    /// Column holding the text that is fingerprinted and embedded
    #[serde(default = "default_description_field")]
    pub description_field: String,

    /// Output field receiving `{"values": [...]}`
    #[serde(default = "default_vector_field")]
    pub vector_field: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_chunk_failure_policy")]
    pub on_chunk_failure: ChunkFailurePolicy,

    #[serde(default = "default_numeric_fields")]
    pub numeric_fields: Vec<NumericField>,

    /// Extension swapped onto the input path to name the output file
    #[serde(default = "default_output_extension")]
    pub output_extension: String,

    /// Process input files concurrently. Dedup still spans all files.
    #[serde(default)]
    pub parallel_sources: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            id_field: default_id_field(),
            description_field: default_description_field(),
            vector_field: default_vector_field(),
            max_tokens: DEFAULT_MAX_TOKENS,
            batch_size: DEFAULT_BATCH_SIZE,
            on_chunk_failure: default_chunk_failure_policy(),
            numeric_fields: default_numeric_fields(),
            output_extension: default_output_extension(),
            parallel_sources: false,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_backend")]
    pub backend: EmbeddingBackend,

    /// Model name, also the key of the embedding server's response
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Where the local backend caches downloaded models
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Embedding server url for the remote backend
    #[serde(default = "default_embed_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_embed_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: default_embedding_backend(),
            model: default_embedding_model(),
            cache_dir: default_cache_dir(),
            endpoint: default_embed_endpoint(),
            timeout_secs: DEFAULT_EMBED_TIMEOUT_SECS,
            download_timeout_secs: DEFAULT_DOWNLOAD_TIMEOUT_SECS,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_server_host")]
    pub host: String,
    #[serde(default = "default_server_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            port: DEFAULT_SERVER_PORT,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_search_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_document_type")]
    pub document_type: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Embedding server used to vectorize queries in vector mode
    #[serde(default = "default_embed_endpoint")]
    pub embed_endpoint: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            endpoint: default_search_endpoint(),
            document_type: default_document_type(),
            top_k: DEFAULT_TOP_K,
            embed_endpoint: default_embed_endpoint(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub search: SearchConfig,
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

fn default_id_field() -> String {
    "id".to_string()
}

fn default_description_field() -> String {
    "description".to_string()
}

fn default_vector_field() -> String {
    "description_vector".to_string()
}

fn default_max_tokens() -> usize {
    DEFAULT_MAX_TOKENS
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_chunk_failure_policy() -> ChunkFailurePolicy {
    ChunkFailurePolicy::RetryEach
}

fn default_numeric_fields() -> Vec<NumericField> {
    vec![
        NumericField::new("price", NumericKind::Float),
        NumericField::new("points", NumericKind::Integer),
    ]
}

fn default_output_extension() -> String {
    "json".to_string()
}

fn default_embedding_backend() -> EmbeddingBackend {
    if cfg!(feature = "local-embeddings") {
        EmbeddingBackend::Local
    } else {
        EmbeddingBackend::Remote
    }
}

fn default_embedding_model() -> String {
    DEFAULT_EMBEDDING_MODEL.to_string()
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(".vecfeed")
}

fn default_embed_endpoint() -> String {
    DEFAULT_EMBED_ENDPOINT.to_string()
}

fn default_embed_timeout_secs() -> u64 {
    DEFAULT_EMBED_TIMEOUT_SECS
}

fn default_download_timeout_secs() -> u64 {
    DEFAULT_DOWNLOAD_TIMEOUT_SECS
}

fn default_server_host() -> String {
    DEFAULT_SERVER_HOST.to_string()
}

fn default_server_port() -> u16 {
    DEFAULT_SERVER_PORT
}

fn default_search_endpoint() -> String {
    DEFAULT_SEARCH_ENDPOINT.to_string()
}

fn default_document_type() -> String {
    DEFAULT_DOCUMENT_TYPE.to_string()
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        let p = &self.pipeline;
        if p.batch_size == 0 {
            bail!("pipeline.batch_size must be greater than 0");
        }
        if p.max_tokens == 0 {
            bail!("pipeline.max_tokens must be greater than 0");
        }
        if p.namespace.trim().is_empty() {
            bail!("pipeline.namespace must not be empty");
        }
        for (name, value) in [
            ("pipeline.id_field", &p.id_field),
            ("pipeline.description_field", &p.description_field),
            ("pipeline.vector_field", &p.vector_field),
            ("pipeline.output_extension", &p.output_extension),
        ] {
            if value.trim().is_empty() {
                bail!("{name} must not be empty");
            }
        }
        for (idx, field) in p.numeric_fields.iter().enumerate() {
            if field.name.trim().is_empty() {
                bail!("pipeline.numeric_fields #{} has an empty name", idx + 1);
            }
            if field.name == p.vector_field {
                bail!(
                    "pipeline.numeric_fields #{} collides with vector field '{}'",
                    idx + 1,
                    p.vector_field
                );
            }
        }

        let emb = &self.embedding;
        if emb.model.trim().is_empty() {
            bail!("embedding.model must not be empty");
        }
        if emb.timeout_secs == 0 {
            bail!("embedding.timeout_secs must be greater than 0");
        }
        if emb.download_timeout_secs == 0 {
            bail!("embedding.download_timeout_secs must be greater than 0");
        }
        if emb.backend == EmbeddingBackend::Remote {
            url::Url::parse(&emb.endpoint)
                .with_context(|| format!("embedding.endpoint '{}' is not a url", emb.endpoint))?;
        }

        url::Url::parse(&self.search.endpoint)
            .with_context(|| format!("search.endpoint '{}' is not a url", self.search.endpoint))?;
        url::Url::parse(&self.search.embed_endpoint).with_context(|| {
            format!("search.embed_endpoint '{}' is not a url", self.search.embed_endpoint)
        })?;
        if self.search.top_k == 0 {
            bail!("search.top_k must be greater than 0");
        }
        if self.search.document_type.trim().is_empty() {
            bail!("search.document_type must not be empty");
        }

        Ok(())
    }

    /// Load the config at `path`, writing the defaults there first if it does not exist.
    pub fn load_with(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            log::info!("Creating default config at {}", path.display());
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, serde_yml::to_string(&Self::default())?)
                .with_context(|| format!("failed to write {}", path.display()))?;
        }

        let config_str = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: Self = serde_yml::from_str(&config_str)
            .with_context(|| format!("config {} is malformed", path.display()))?;

        config.validate()?;

        Ok(config)
    }

    /// Load from `path` when given, otherwise use the built-in defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::load_with(path),
            None => {
                let config = Self::default();
                config.validate()?;
                Ok(config)
            }
        }
    }
}
