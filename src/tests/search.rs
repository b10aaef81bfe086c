use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{routing::post, Json, Router};
use serde_json::{json, Value};

use crate::config::SearchConfig;
use crate::embeddings::{Embedder, RemoteEmbedder};
use crate::search::{extract_hits, keyword_payload, vector_payload, SearchClient, SearchError, SearchMode};
use crate::server::router;
use crate::tests::{spawn_server, FakeEmbedder};

fn config(endpoint: &str, top_k: usize) -> SearchConfig {
    SearchConfig {
        endpoint: endpoint.to_string(),
        document_type: "wine".to_string(),
        top_k,
        embed_endpoint: "http://localhost:8088".to_string(),
    }
}

/// Search engine stub that records the request body and answers with `hits`.
fn search_engine(hits: Value) -> (String, Arc<Mutex<Option<Value>>>) {
    let received = Arc::new(Mutex::new(None::<Value>));
    let sink = received.clone();
    let app = Router::new().route(
        "/search/",
        post(move |Json(body): Json<Value>| {
            let sink = sink.clone();
            let hits = hits.clone();
            async move {
                *sink.lock().unwrap() = Some(body);
                Json(json!({"root": {"children": hits}}))
            }
        }),
    );
    (format!("http://{}", spawn_server(app)), received)
}

#[test]
fn keyword_payload_ors_every_token() {
    let payload = keyword_payload("grilled  salmon", "wine", "default", 5).unwrap();

    assert_eq!(
        payload["yql"],
        json!("select id,winery,variety,description from wine where description contains \"grilled\" or description contains \"salmon\" limit 5 offset 0;")
    );
    assert_eq!(payload["ranking"], json!("default"));
}

#[test]
fn keyword_payload_escapes_quotes() {
    let payload = keyword_payload(r#"say"hi\"#, "wine", "default_2", 1).unwrap();
    let yql = payload["yql"].as_str().unwrap();
    assert!(yql.contains(r#"description contains "say\"hi\\""#));
}

#[test]
fn blank_query_is_rejected() {
    assert!(matches!(
        keyword_payload("   ", "wine", "default", 5),
        Err(SearchError::EmptyQuery)
    ));
}

#[test]
fn vector_payload_targets_top_k() {
    let payload = vector_payload(&[0.5, -1.0], "wine", 3);

    let yql = payload["yql"].as_str().unwrap();
    assert!(yql.contains(r#"[{"targetHits":3}]nearestNeighbor(description_vector, query_vector)"#));
    assert!(yql.ends_with("limit 3 offset 0;"));
    assert_eq!(payload["input.query(query_vector)"], json!([0.5, -1.0]));
    assert_eq!(payload["ranking"], json!("vector"));
}

#[test]
fn extract_hits_truncates_and_tolerates_missing_root() {
    let response = json!({"root": {"children": [{"id": 1}, {"id": 2}, {"id": 3}]}});
    assert_eq!(extract_hits(&response, 2), vec![json!({"id": 1}), json!({"id": 2})]);
    assert!(extract_hits(&json!({"root": {}}), 5).is_empty());
}

#[test]
fn search_url_is_joined_under_the_endpoint() {
    let client = SearchClient::new(config("http://vespa:8080", 5)).unwrap();
    assert_eq!(client.search_url().as_str(), "http://vespa:8080/search/");

    let client = SearchClient::new(config("http://vespa:8080/", 5)).unwrap();
    assert_eq!(client.search_url().as_str(), "http://vespa:8080/search/");
}

#[test]
fn vector_mode_embeds_the_query() {
    let client = SearchClient::new(config("http://vespa:8080", 4)).unwrap();
    let fake = FakeEmbedder::new(3);

    let payload = client.payload("spicy curry", SearchMode::Vector, Some(&fake)).unwrap();

    assert_eq!(
        payload["input.query(query_vector)"],
        json!(FakeEmbedder::vector_for("spicy curry", 3))
    );
    assert!(client.payload("spicy curry", SearchMode::Vector, None).is_err());
}

#[test]
fn search_posts_payload_and_returns_hits() {
    let (endpoint, received) = search_engine(json!([
        {"fields": {"variety": "Riesling"}},
        {"fields": {"variety": "Syrah"}},
        {"fields": {"variety": "Gamay"}}
    ]));
    let client = SearchClient::new(config(&endpoint, 2)).unwrap();

    let hits = client.search("pork belly", SearchMode::Keyword2, None).unwrap();

    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0]["fields"]["variety"], json!("Riesling"));
    let body = received.lock().unwrap().clone().unwrap();
    assert_eq!(body["ranking"], json!("default_2"));
}

#[test]
fn vector_search_embeds_through_the_embedding_server() {
    let embed_addr = spawn_server(router(Arc::new(FakeEmbedder::new(4))));
    let embedder = RemoteEmbedder::connect(
        &format!("http://{embed_addr}/"),
        "fake-model",
        Duration::from_secs(5),
    )
    .unwrap();
    let (endpoint, received) = search_engine(json!([{"fields": {"variety": "Albarino"}}]));
    let client = SearchClient::new(config(&endpoint, 3)).unwrap();

    let hits = client
        .search("grilled salmon", SearchMode::Vector, Some(&embedder))
        .unwrap();

    assert_eq!(hits.len(), 1);
    let body = received.lock().unwrap().clone().unwrap();
    assert_eq!(
        body["input.query(query_vector)"],
        json!(FakeEmbedder::vector_for("grilled salmon", 4))
    );
    assert_eq!(body["ranking"], json!("vector"));
}

#[test]
fn query_is_sent_as_a_single_text() {
    let bodies = Arc::new(Mutex::new(Vec::<Value>::new()));
    let sink = bodies.clone();
    let app = Router::new().route(
        "/",
        post(move |Json(body): Json<Value>| {
            let sink = sink.clone();
            async move {
                sink.lock().unwrap().push(body);
                Json(json!({"fake-model": [0.25, 0.5]}))
            }
        }),
    );
    let embed_addr = spawn_server(app);
    let embedder = RemoteEmbedder::connect(
        &format!("http://{embed_addr}/"),
        "fake-model",
        Duration::from_secs(5),
    )
    .unwrap();
    let client = SearchClient::new(config("http://vespa:8080", 2)).unwrap();

    let payload = client
        .payload("grilled salmon", SearchMode::Vector, Some(&embedder))
        .unwrap();

    assert_eq!(payload["input.query(query_vector)"], json!([0.25, 0.5]));
    assert_eq!(*bodies.lock().unwrap(), vec![json!({"text": "grilled salmon"})]);
    assert_eq!(embedder.dimensions(), 2);
}
