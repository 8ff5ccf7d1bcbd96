//! HTTP surface tests against a server backed by a throwaway SQLite database

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use axum_test::TestServer;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use vidvault_server::config::Config;
use vidvault_server::manifest::FileStatus;
use vidvault_server::routes;
use vidvault_server::state::AppState;

const BOUNDARY: &str = "vidvault-test-boundary";
const CHUNK: usize = 16;

enum Part<'a> {
    Text(&'a str, &'a str),
    File(&'a str, &'a str, &'a [u8]),
}

fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        match part {
            Part::Text(name, value) => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name).as_bytes(),
                );
                body.extend_from_slice(value.as_bytes());
            }
            Part::File(name, filename, data) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n\
                         Content-Type: application/octet-stream\r\n\r\n",
                        name, filename
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(data);
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

fn upload_request(parts: &[Part<'_>]) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(multipart_body(parts)))
        .unwrap()
}

fn sample(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

struct TestApp {
    _dir: TempDir,
    state: AppState,
    app: Router,
}

async fn test_app() -> TestApp {
    let dir = TempDir::new().unwrap();
    let public = dir.path().join("public");
    std::fs::create_dir_all(&public).unwrap();
    std::fs::write(public.join("index.html"), "<h1>VidVault</h1>").unwrap();

    let mut config = Config::default();
    config.database.url = format!("sqlite:{}", dir.path().join("videos.db").display());
    config.server.public_dir = public;
    config.upload.chunk_size = CHUNK;

    let state = AppState::new(config).await.unwrap();
    let app = routes::router(state.clone());
    TestApp {
        _dir: dir,
        state,
        app,
    }
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, headers, body.to_vec())
}

async fn upload(app: &Router, parts: &[Part<'_>]) -> String {
    let (status, _, body) = send(app, upload_request(parts)).await;
    assert_eq!(status, StatusCode::CREATED);

    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["message"], "File uploaded successfully");
    json["fileId"].as_str().unwrap().to_string()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_health() {
    let t = test_app().await;
    let server = TestServer::new(t.app.clone()).unwrap();

    let response = server.get("/health").await;
    response.assert_status_ok();
    let json: Value = response.json();
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["service"], "vidvault-server");
}

#[tokio::test]
async fn test_upload_then_stream() {
    let t = test_app().await;
    let data = sample(5 * CHUNK + 3);

    let id = upload(
        &t.app,
        &[
            Part::Text("title", "Holiday"),
            Part::File("video", "holiday.mp4", &data),
        ],
    )
    .await;

    let (status, headers, body) = send(&t.app, get(&format!("/videos/{}", id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, data);
    assert_eq!(headers[header::CONTENT_LENGTH], data.len().to_string().as_str());
    assert_eq!(headers[header::CONTENT_TYPE], "video/mp4");
    assert!(headers[header::CONTENT_DISPOSITION]
        .to_str()
        .unwrap()
        .contains("holiday.mp4"));
    assert!(headers.contains_key(header::ETAG));
    assert_eq!(headers[header::X_CONTENT_TYPE_OPTIONS], "nosniff");
}

#[tokio::test]
async fn test_upload_without_file() {
    let t = test_app().await;

    let (status, _, body) = send(&t.app, upload_request(&[Part::Text("title", "Nothing")])).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, b"No file uploaded.");

    // A `video` part without a filename is not a file either
    let (status, _, _) = send(&t.app, upload_request(&[Part::Text("video", "not a file")])).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert!(t.state.registry().list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_empty_file_upload() {
    let t = test_app().await;

    let id = upload(&t.app, &[Part::File("video", "empty.mp4", &[])]).await;

    let (status, headers, body) = send(&t.app, get(&format!("/videos/{}", id))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.is_empty());
    assert_eq!(headers[header::CONTENT_LENGTH], "0");
}

#[tokio::test]
async fn test_list_newest_first() {
    let t = test_app().await;
    let server = TestServer::new(t.app.clone()).unwrap();

    let first = upload(&t.app, &[Part::File("video", "first.mp4", &sample(CHUNK))]).await;
    let second = upload(&t.app, &[Part::File("video", "second.webm", &sample(3))]).await;
    let pending = t
        .state
        .registry()
        .create_manifest("pending.mp4", CHUNK, Default::default())
        .await
        .unwrap();

    let response = server.get("/videos").await;
    response.assert_status_ok();
    let list: Vec<Value> = response.json();

    let ids: Vec<&str> = list.iter().map(|m| m["_id"].as_str().unwrap()).collect();
    assert_eq!(ids, vec![pending.to_string().as_str(), second.as_str(), first.as_str()]);

    assert_eq!(list[0]["status"], "pending");
    assert_eq!(list[1]["filename"], "second.webm");
    assert_eq!(list[1]["length"], 3);
    assert_eq!(list[1]["chunkSize"], CHUNK);
    assert_eq!(list[1]["status"], "complete");
    assert!(list[1]["uploadDate"].is_string());
}

#[tokio::test]
async fn test_list_empty() {
    let t = test_app().await;
    let server = TestServer::new(t.app.clone()).unwrap();

    let list: Vec<Value> = server.get("/videos").await.json();
    assert!(list.is_empty());
}

#[tokio::test]
async fn test_unknown_and_malformed_ids() {
    let t = test_app().await;

    for uri in [
        "/videos/7f1c1a2e-0000-4000-8000-000000000000".to_string(),
        "/videos/not-an-id".to_string(),
    ] {
        let (status, _, body) = send(&t.app, get(&uri)).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{}", uri);
        assert_eq!(body, b"Video not found.");
    }
}

#[tokio::test]
async fn test_pending_video_is_not_streamed() {
    let t = test_app().await;
    let id = t
        .state
        .registry()
        .create_manifest("partial.mp4", CHUNK, Default::default())
        .await
        .unwrap();

    let (status, _, body) = send(&t.app, get(&format!("/videos/{}", id))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, b"Video not found.");
}

#[tokio::test]
async fn test_metadata_before_and_after_file() {
    let t = test_app().await;
    let server = TestServer::new(t.app.clone()).unwrap();

    upload(
        &t.app,
        &[
            Part::Text("title", "Sunset"),
            Part::File("video", "sunset.mp4", &sample(2 * CHUNK)),
            Part::Text("description", "From the pier"),
            Part::Text("ignored", "x"),
        ],
    )
    .await;

    let list: Vec<Value> = server.get("/videos").await.json();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["metadata"]["title"], "Sunset");
    assert_eq!(list[0]["metadata"]["description"], "From the pier");
    assert!(list[0]["metadata"].get("ignored").is_none());
}

#[tokio::test]
async fn test_only_first_file_is_stored() {
    let t = test_app().await;
    let first = sample(CHUNK + 1);

    let id = upload(
        &t.app,
        &[
            Part::File("video", "one.mp4", &first),
            Part::File("video", "two.mp4", &sample(4)),
        ],
    )
    .await;

    let (_, _, body) = send(&t.app, get(&format!("/videos/{}", id))).await;
    assert_eq!(body, first);
    assert_eq!(t.state.registry().list().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_form_cut_off_after_file_part() {
    let t = test_app().await;

    // Complete `video` part, then a `description` part with no closing boundary
    let mut body = multipart_body(&[Part::File("video", "cut.mp4", &sample(CHUNK + 3))]);
    let closing = format!("--{}--\r\n", BOUNDARY);
    body.truncate(body.len() - closing.len());
    body.extend_from_slice(
        format!(
            "--{}\r\nContent-Disposition: form-data; name=\"description\"\r\n\r\nhalf a sen",
            BOUNDARY
        )
        .as_bytes(),
    );

    let request = Request::builder()
        .method("POST")
        .uri("/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap();

    let (status, _, body) = send(&t.app, request).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, b"An error occurred during file upload.");

    let manifests = t.state.registry().list().await.unwrap();
    assert_eq!(manifests.len(), 1);
    assert_eq!(manifests[0].status, FileStatus::Failed);
    assert_eq!(t.state.store().count_chunks(manifests[0].id).await.unwrap(), 0);
}

#[tokio::test]
async fn test_static_fallback() {
    let t = test_app().await;

    let (status, _, body) = send(&t.app, get("/index.html")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"<h1>VidVault</h1>");
}
