use std::sync::Arc;

use axum::{
    Router,
    body::{Body, Bytes},
    http::{Request, StatusCode, header},
};
use devbook::{
    DataDir,
    Stores,
    api::{self, AppState, Timeouts},
    server::{self, ServerConfig},
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt;

const BOUNDARY: &str = "devbook-test-boundary";

fn test_state() -> (TempDir, AppState) {
    let tmp = TempDir::new().unwrap();
    let data_dir = DataDir::resolve(Some(tmp.path())).unwrap();
    let stores = Arc::new(Stores::open(&data_dir).unwrap());
    let state = AppState::new(stores, &data_dir, Timeouts::default()).unwrap();
    (tmp, state)
}

fn test_app() -> (TempDir, Router) {
    let (tmp, state) = test_state();
    (tmp, api::router(state))
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Bytes) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    (status, body)
}

fn json_body(bytes: &Bytes) -> Value {
    serde_json::from_slice(bytes).unwrap()
}

fn multipart(field: &str, files: &[(&str, &str)]) -> Body {
    let mut body = Vec::new();
    for (name, data) in files {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\n\
                 Content-Disposition: form-data; name=\"{field}\"; filename=\"{name}\"\r\n\
                 Content-Type: application/pdf\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(data.as_bytes());
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    Body::from(body)
}

fn upload(prefix: &str, field: &str, files: &[(&str, &str)]) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(format!("{prefix}/upload"))
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(multipart(field, files))
        .unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn put_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("PUT")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn delete(uri: &str) -> Request<Body> {
    Request::builder()
        .method("DELETE")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn search_all(app: &Router, prefix: &str) -> Value {
    let (status, body) =
        send(app, post_json(&format!("{prefix}/search"), json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    json_body(&body)
}

#[tokio::test]
async fn health() {
    let (_tmp, app) = test_app();
    let (status, body) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], b"ok");
}

#[tokio::test]
async fn book_lifecycle() {
    let (_tmp, app) = test_app();

    // -- Upload --
    let (status, body) = send(
        &app,
        upload("/books", "books", &[("Rust In Action.pdf", "%PDF-rust")]),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], b"uploaded 1 books");

    // -- Search --
    let (status, body) = send(
        &app,
        post_json(
            "/books/search",
            json!({"query": {"match": {"title": "rust"}}}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let page = json_body(&body);
    assert_eq!(page["total"], 1);
    let book = &page["list"][0];
    assert_eq!(book["title"], "Rust In Action.pdf");
    assert!(book["path"].as_str().unwrap().ends_with("rust_in_action.pdf"));
    let id = book["id"].as_str().unwrap().to_string();

    // -- Find --
    let (status, body) = send(&app, get(&format!("/books/{id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body)["id"], id.as_str());

    // -- Download --
    let resp = app
        .clone()
        .oneshot(get(&format!("/books/{id}/download")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()[header::CONTENT_TYPE], "application/pdf");
    assert_eq!(resp.headers()[header::CONTENT_LENGTH], "9");
    assert_eq!(
        resp.headers()[header::CONTENT_DISPOSITION],
        "attachment; filename*=UTF-8''rust_in_action.pdf"
    );
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"%PDF-rust");

    // -- Update --
    let (status, _) = send(
        &app,
        put_json(
            &format!("/books/{id}"),
            json!({"title": "Rust in Action", "tags": ["rust", "systems"]}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = send(&app, get(&format!("/books/{id}"))).await;
    let book = json_body(&body);
    assert_eq!(book["title"], "Rust in Action");
    assert_eq!(book["tags"], json!(["rust", "systems"]));

    let (status, body) = send(&app, get("/tags/suggestions")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        json_body(&body),
        json!({"list": [{"name": "rust"}, {"name": "systems"}]})
    );

    // -- Delete --
    let (status, _) = send(&app, delete(&format!("/books/{id}"))).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app, get(&format!("/books/{id}"))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        String::from_utf8_lossy(&body),
        format!("book {id} not found")
    );

    let (_, body) = send(&app, get("/tags/suggestions")).await;
    assert_eq!(json_body(&body), json!({"list": []}));
    let (_, body) = send(&app, get("/tags")).await;
    assert_eq!(
        json_body(&body),
        json!({"list": [{"name": "rust"}, {"name": "systems"}]})
    );
}

#[tokio::test]
async fn files_use_name_key() {
    let (_tmp, app) = test_app();

    let (status, body) = send(
        &app,
        upload("/files", "files", &[("a.txt", "a"), ("b.txt", "b")]),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], b"uploaded 2 files");

    let page = search_all(&app, "/files").await;
    assert_eq!(page["total"], 2);
    let file = &page["list"][0];
    assert!(file.get("name").is_some());
    assert!(file.get("title").is_none());
    let id = file["id"].as_str().unwrap().to_string();

    let (status, _) = send(
        &app,
        put_json(&format!("/files/{id}"), json!({"name": "renamed", "tags": []})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (_, body) = send(&app, get(&format!("/files/{id}"))).await;
    assert_eq!(json_body(&body)["name"], "renamed");

    // Books and files are separate collections.
    assert_eq!(search_all(&app, "/books").await["total"], 0);
}

#[tokio::test]
async fn partial_upload_failure_is_bad_request() {
    let (_tmp, app) = test_app();

    let (status, body) = send(
        &app,
        upload("/books", "books", &[("good.pdf", "1"), ("..", "2")]),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(&body[..], b"error saving books");

    // The good file was kept.
    assert_eq!(search_all(&app, "/books").await["total"], 1);
}

#[tokio::test]
async fn upload_without_matching_field_saves_nothing() {
    let (_tmp, app) = test_app();
    let (status, body) =
        send(&app, upload("/books", "files", &[("a.pdf", "1")])).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], b"uploaded 0 books");
    assert_eq!(search_all(&app, "/books").await["total"], 0);
}

#[tokio::test]
async fn download_name_escapes_only_non_attr_chars() {
    let (_tmp, app) = test_app();
    send(&app, upload("/files", "files", &[("Notes (v2)+x.pdf", "x")])).await;
    let page = search_all(&app, "/files").await;
    let id = page["list"][0]["id"].as_str().unwrap().to_string();

    let resp = app
        .clone()
        .oneshot(get(&format!("/files/{id}/download")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers()[header::CONTENT_DISPOSITION],
        "attachment; filename*=UTF-8''notes_%28v2%29+x.pdf"
    );
}

#[tokio::test]
async fn malformed_requests() {
    let (_tmp, app) = test_app();

    let (status, _) = send(
        &app,
        Request::builder()
            .method("PUT")
            .uri("/books/abc")
            .body(Body::from("{not json"))
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        put_json("/books/abc", json!({"title": "", "tags": []})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        Request::builder()
            .method("POST")
            .uri("/books/search")
            .body(Body::from("{not json"))
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn index_errors_carry_category() {
    let (_tmp, app) = test_app();

    let (status, body) = send(
        &app,
        post_json("/books/search", json!({"query": {"fuzzy_wuzzy": {}}})),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(String::from_utf8_lossy(&body).starts_with("[parsing_exception]"));

    let (status, body) = send(
        &app,
        post_json("/books/search", json!({"from": 10000, "size": 1})),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(
        String::from_utf8_lossy(&body)
            .starts_with("[illegal_argument_exception]")
    );
}

#[tokio::test]
async fn update_and_delete_of_missing_record_are_server_errors() {
    let (_tmp, app) = test_app();

    let (status, body) = send(
        &app,
        put_json("/books/ghost", json!({"title": "x", "tags": ["go"]})),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(&body[..], b"book ghost not found");

    let (status, body) = send(&app, delete("/books/ghost")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(&body[..], b"book ghost not found");

    let (_, body) = send(&app, get("/tags")).await;
    assert_eq!(json_body(&body), json!({"list": []}));
}

#[tokio::test]
async fn cors_allows_configured_origin() {
    let (_tmp, state) = test_state();
    let config = ServerConfig::default();
    let app = server::app(state, &config).unwrap();

    let req = Request::builder()
        .uri("/health")
        .header(header::ORIGIN, "http://localhost:3000")
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        "http://localhost:3000"
    );
}
