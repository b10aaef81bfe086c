//! Search-engine queries in keyword and nearest-neighbor modes.

use std::time::Duration;

use clap::ValueEnum;
use reqwest::blocking::Client;
use serde_json::{json, Value};

use crate::config::SearchConfig;
use crate::embeddings::{Embedder, EmbeddingError};

const SEARCH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SearchMode {
    /// Nearest neighbors of the embedded query
    Vector,
    /// Any-word match, ranked by the `default` profile
    Keyword,
    /// Any-word match, ranked by the `default_2` profile
    Keyword2,
}

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("query is empty")]
    EmptyQuery,

    #[error("embedding the query failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("search request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("invalid search endpoint: {0}")]
    Endpoint(#[from] url::ParseError),
}

/// Quote a token for use inside a YQL string literal.
fn yql_string(token: &str) -> String {
    let escaped = token.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

pub fn keyword_payload(
    query: &str,
    document_type: &str,
    ranking: &str,
    top_k: usize,
) -> Result<Value, SearchError> {
    let tokens: Vec<&str> = query.split_whitespace().collect();
    if tokens.is_empty() {
        return Err(SearchError::EmptyQuery);
    }

    let cond = tokens
        .iter()
        .map(|token| format!("description contains {}", yql_string(token)))
        .collect::<Vec<_>>()
        .join(" or ");
    let yql = format!(
        "select id,winery,variety,description from {document_type} where {cond} limit {top_k} offset 0;"
    );

    Ok(json!({ "yql": yql, "ranking": ranking }))
}

pub fn vector_payload(query_vector: &[f32], document_type: &str, top_k: usize) -> Value {
    let yql = format!(
        "select id,winery,variety,description from {document_type} where \
         ([{{\"targetHits\":{top_k}}}]nearestNeighbor(description_vector, query_vector)) \
         limit {top_k} offset 0;"
    );

    json!({
        "yql": yql,
        "input.query(query_vector)": query_vector,
        "ranking": "vector",
    })
}

/// At most `top_k` hits out of a search response.
pub fn extract_hits(response: &Value, top_k: usize) -> Vec<Value> {
    response
        .pointer("/root/children")
        .and_then(Value::as_array)
        .map(|hits| hits.iter().take(top_k).cloned().collect())
        .unwrap_or_default()
}

pub struct SearchClient {
    client: Client,
    search_url: url::Url,
    config: SearchConfig,
}

impl SearchClient {
    pub fn new(config: SearchConfig) -> Result<Self, SearchError> {
        let base = url::Url::parse(&format!("{}/", config.endpoint.trim_end_matches('/')))?;
        let search_url = base.join("search/")?;
        let client = Client::builder().timeout(SEARCH_TIMEOUT).build()?;
        Ok(Self {
            client,
            search_url,
            config,
        })
    }

    pub fn search_url(&self) -> &url::Url {
        &self.search_url
    }

    /// Build the request body for `query` in `mode`.
    ///
    /// `embedder` is only consulted in vector mode.
    pub fn payload(
        &self,
        query: &str,
        mode: SearchMode,
        embedder: Option<&dyn Embedder>,
    ) -> Result<Value, SearchError> {
        let doc = &self.config.document_type;
        let top_k = self.config.top_k;
        match mode {
            SearchMode::Keyword => keyword_payload(query, doc, "default", top_k),
            SearchMode::Keyword2 => keyword_payload(query, doc, "default_2", top_k),
            SearchMode::Vector => {
                if query.trim().is_empty() {
                    return Err(SearchError::EmptyQuery);
                }
                let embedder = embedder.ok_or_else(|| {
                    EmbeddingError::InitFailed("vector search needs an embedder".to_string())
                })?;
                let vector = embedder.embed(query)?;
                Ok(vector_payload(&vector, doc, top_k))
            }
        }
    }

    pub fn search(
        &self,
        query: &str,
        mode: SearchMode,
        embedder: Option<&dyn Embedder>,
    ) -> Result<Vec<Value>, SearchError> {
        let payload = self.payload(query, mode, embedder)?;
        log::debug!("search payload: {payload}");

        let response: Value = self
            .client
            .post(self.search_url.clone())
            .json(&payload)
            .send()?
            .error_for_status()?
            .json()?;

        Ok(extract_hits(&response, self.config.top_k))
    }
}
