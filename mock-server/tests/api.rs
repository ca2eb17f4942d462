use std::collections::HashMap;

use axum::http::{self, Request, StatusCode};
use http_body_util::BodyExt;
use mock_server::{app, UploadEcho, DOWNLOAD_BYTES, FLAKY_FAILURES};
use tower::ServiceExt;

async fn body_json<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_bytes(response: axum::response::Response) -> bytes::Bytes {
    response.into_body().collect().await.unwrap().to_bytes()
}

fn get(uri: &str) -> Request<String> {
    Request::builder().uri(uri).body(String::new()).unwrap()
}

fn post(uri: &str, content_type: &str, body: &str) -> Request<String> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(http::header::CONTENT_TYPE, content_type)
        .body(body.to_string())
        .unwrap()
}

// --- find ---

#[tokio::test]
async fn find_echoes_query() {
    let resp = app().oneshot(get("/find?q=hello%20world")).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let json: serde_json::Value = body_json(resp).await;
    assert_eq!(json["ok"], true);
    assert_eq!(json["q"], "hello world");
}

#[tokio::test]
async fn find_without_query_returns_400() {
    let resp = app().oneshot(get("/find")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn find_error_term_returns_error_document() {
    let resp = app().oneshot(get("/find?q=error")).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let json: serde_json::Value = body_json(resp).await;
    assert_eq!(json["error"], "NO_RESULTS");
}

// --- flaky ---

#[tokio::test]
async fn flaky_fails_then_succeeds() {
    let app = app();
    for _ in 0..FLAKY_FAILURES {
        let resp = app.clone().oneshot(get("/flaky/a")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
    let resp = app.clone().oneshot(get("/flaky/a")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json: serde_json::Value = body_json(resp).await;
    assert_eq!(json["attempt"], FLAKY_FAILURES + 1);
}

#[tokio::test]
async fn flaky_counts_each_key_separately() {
    let app = app();
    for _ in 0..FLAKY_FAILURES {
        app.clone().oneshot(get("/flaky/a")).await.unwrap();
    }
    let resp = app.clone().oneshot(get("/flaky/b")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

// --- status ---

#[tokio::test]
async fn status_returns_requested_code() {
    let resp = app().oneshot(get("/status/404")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn status_rejects_out_of_range_code() {
    let resp = app().oneshot(get("/status/42")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

// --- form ---

#[tokio::test]
async fn form_echoes_fields() {
    let resp = app()
        .oneshot(post(
            "/form",
            "application/x-www-form-urlencoded",
            "a=1&name=J%C3%BCrgen%20K",
        ))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let fields: HashMap<String, String> = body_json(resp).await;
    assert_eq!(fields["a"], "1");
    assert_eq!(fields["name"], "Jürgen K");
}

// --- upload ---

#[tokio::test]
async fn upload_echoes_content_type_and_body() {
    let resp = app()
        .oneshot(post("/upload", "multipart/form-data; boundary=xyz", "--xyz--\r\n"))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let echo: UploadEcho = body_json(resp).await;
    assert_eq!(echo.content_type.as_deref(), Some("multipart/form-data; boundary=xyz"));
    assert_eq!(echo.length, 9);
    assert_eq!(echo.body, "--xyz--\r\n");
}

// --- headers ---

#[tokio::test]
async fn headers_echo_request_and_repeat_response_header() {
    let request = Request::builder()
        .uri("/headers")
        .header(http::header::AUTHORIZATION, "Basic dTpw")
        .header(http::header::CONNECTION, "close")
        .body(String::new())
        .unwrap();
    let resp = app().oneshot(request).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let tags: Vec<_> = resp
        .headers()
        .get_all("x-fetch-tag")
        .iter()
        .map(|v| v.to_str().unwrap().to_string())
        .collect();
    assert_eq!(tags, vec!["alpha", "beta"]);
    let json: serde_json::Value = body_json(resp).await;
    assert_eq!(json["authorization"], "Basic dTpw");
    assert_eq!(json["connection"], "close");
}

// --- files ---

#[tokio::test]
async fn file_returns_raw_bytes() {
    let resp = app().oneshot(get("/files/payload.bin")).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(&body_bytes(resp).await[..], DOWNLOAD_BYTES);
}

#[tokio::test]
async fn unknown_file_returns_404() {
    let resp = app().oneshot(get("/files/missing.bin")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

// --- bytes ---

#[tokio::test]
async fn filler_returns_requested_length() {
    let resp = app().oneshot(get("/bytes/5")).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(&body_bytes(resp).await[..], b"aaaaa");
}

#[tokio::test]
async fn filler_rejects_oversized_request() {
    let uri = format!("/bytes/{}", mock_server::MAX_FILLER_BYTES + 1);
    let resp = app().oneshot(get(&uri)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn headers_accepts_post() {
    let resp = app()
        .oneshot(post("/headers", "application/x-www-form-urlencoded", "a=1"))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let json: serde_json::Value = body_json(resp).await;
    assert!(json["authorization"].is_null());
}
