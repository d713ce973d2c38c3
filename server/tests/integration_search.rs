use axum::body::{Body, Bytes};
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use searchcore::pipeline::build_index;
use searchcore::source::JsonDocumentSource;
use searchcore::tokenizer::{StopWords, Tokenizer};
use searchcore::{IndexerConfig, TokenizerConfig};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tempfile::tempdir;
use tower::ServiceExt;

async fn build_tiny_index(dir: &Path) -> std::path::PathBuf {
    let docs = dir.join("docs");
    std::fs::create_dir_all(&docs).unwrap();
    let texts = [
        (1, "Rust is great. Rust rust systems programming."),
        (2, "Learning rust."),
        (3, "Gardening in spring."),
    ];
    for (id, body) in texts {
        let doc = serde_json::json!({ "id": id, "title": "", "body": body });
        std::fs::write(docs.join(format!("{id}.json")), doc.to_string()).unwrap();
    }
    let out = dir.join("index");
    let tokenizer = Arc::new(Tokenizer::new(StopWords::english(), TokenizerConfig::default()));
    let config = IndexerConfig { batch_size: 2, parse_threads: 1, ..IndexerConfig::default() };
    build_index(&docs, &out, tokenizer, Arc::new(JsonDocumentSource), &config).await.unwrap();
    out
}

async fn call(app: Router, uri: &str) -> (StatusCode, Bytes) {
    let req = Request::get(uri).body(Body::empty()).unwrap();
    let resp = app.oneshot(req).await.unwrap();
    let status = resp.status();
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    (status, body)
}

#[tokio::test]
async fn search_returns_ranked_results() {
    let dir = tempdir().unwrap();
    let index = build_tiny_index(dir.path()).await;
    let app = server::build_app(&index, None).unwrap();

    for model in ["vsm", "bm25"] {
        let (status, body) = call(app.clone(), &format!("/search?q=rust&k=2&model={model}")).await;
        assert_eq!(status, StatusCode::OK);
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["model"], model);
        assert_eq!(json["total_hits"], 2);
        let arr = json["results"].as_array().unwrap();
        assert_eq!(arr.len(), 2);
        assert_eq!(arr[0]["doc_id"].as_u64().unwrap(), 1);
        assert_eq!(arr[1]["doc_id"].as_u64().unwrap(), 2);
        assert_eq!(arr[0]["rank"].as_u64().unwrap(), 1);
        assert!(arr[0]["path"].as_str().unwrap().ends_with("1.json"));
    }
}

#[tokio::test]
async fn unknown_model_and_document_are_client_errors() {
    let dir = tempdir().unwrap();
    let index = build_tiny_index(dir.path()).await;
    let app = server::build_app(&index, None).unwrap();

    let (status, _) = call(app.clone(), "/search?q=rust&model=lsi").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(app.clone(), "/doc/99").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = call(app.clone(), "/doc/2").await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["doc_id"], 2);
    assert!(json["norm"].as_f64().unwrap() > 0.0);

    let (status, body) = call(app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], b"ok");
}

#[tokio::test]
async fn expanded_search_still_answers() {
    let dir = tempdir().unwrap();
    let index = build_tiny_index(dir.path()).await;
    let app = server::build_app(&index, None).unwrap();
    let (status, body) = call(app, "/search?q=learning&expand=true").await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    // "learning" pulls in "rust", which reaches document 1 too
    assert_eq!(json["total_hits"], 2);
}
