use crate::embeddings::{BatchVectorizer, Embedder, EmbeddingError, TextInput};
use crate::config::{ChunkFailurePolicy, ServerConfig};
use axum::{
    extract::{rejection::JsonRejection, State},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tokio::signal;

/// Texts per model call when a client sends a large list
const SERVER_BATCH_SIZE: usize = 64;

struct SharedState {
    embedder: Arc<dyn Embedder>,
    vectorizer: BatchVectorizer,
}

#[derive(Debug, Deserialize)]
pub struct EmbedRequest {
    pub text: Option<TextInput>,
}

#[derive(Debug, thiserror::Error)]
enum ServerError {
    #[error("can't get json: {0}")]
    BadJson(String),

    #[error("can't get text")]
    MissingText,

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
}

#[derive(Debug)]
struct HttpError(ServerError);

impl IntoResponse for HttpError {
    fn into_response(self) -> axum::response::Response {
        match self.0 {
            ServerError::BadJson(_) | ServerError::MissingText => (
                axum::http::StatusCode::BAD_REQUEST,
                Json(json!({"error": self.0.to_string()})),
            ),
            ServerError::Embedding(_) => {
                log::error!("{self:?}");
                (
                    axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({"error": self.0.to_string()})),
                )
            }
        }
        .into_response()
    }
}

impl<E> From<E> for HttpError
where
    E: Into<ServerError>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

pub fn router(embedder: Arc<dyn Embedder>) -> Router {
    let vectorizer =
        BatchVectorizer::new(embedder.clone(), SERVER_BATCH_SIZE, ChunkFailurePolicy::Fail);
    let shared_state = Arc::new(SharedState {
        embedder,
        vectorizer,
    });

    Router::new()
        .route("/", get(embed).post(embed))
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .make_span_with(
                    tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO),
                )
                .on_response(
                    tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO),
                ),
        )
        .with_state(shared_state)
}

async fn embed(
    State(state): State<Arc<SharedState>>,
    payload: Result<Json<EmbedRequest>, JsonRejection>,
) -> Result<Json<Value>, HttpError> {
    let Json(payload) = payload.map_err(|e| ServerError::BadJson(e.body_text()))?;
    let text = payload.text.ok_or(ServerError::MissingText)?;

    log::debug!("embed request: {text:?}");

    tokio::task::block_in_place(move || {
        let value = match text {
            TextInput::One(text) => json!(state.embedder.embed(&text)?),
            TextInput::Many(texts) => json!(state.vectorizer.vectorize(&texts)?),
        };

        let mut body = Map::new();
        body.insert(state.embedder.name().to_string(), value);
        Ok(Json(Value::Object(body)))
    })
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        log::error!("failed to install Ctrl+C handler: {err}");
        std::future::pending::<()>().await;
    }
    log::warn!("shutting down");
}

async fn serve(config: ServerConfig, embedder: Arc<dyn Embedder>) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    log::info!("listening on {addr}");

    axum::serve(listener, router(embedder))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

pub fn start_server(config: ServerConfig, embedder: Arc<dyn Embedder>) -> anyhow::Result<()> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(serve(config, embedder))
}
