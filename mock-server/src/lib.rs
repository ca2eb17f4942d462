use std::{collections::HashMap, sync::Arc};

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::{net::TcpListener, sync::RwLock};

/// Echo of a multipart upload, as seen by the server.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct UploadEcho {
    pub content_type: Option<String>,
    pub length: usize,
    pub body: String,
}

/// Calls seen so far per `/flaky/{key}`.
pub type Attempts = Arc<RwLock<HashMap<String, u32>>>;

/// Number of 500s `/flaky/{key}` returns before it succeeds.
pub const FLAKY_FAILURES: u32 = 2;

pub const MAX_FILLER_BYTES: usize = 64 * 1024 * 1024;

pub const DOWNLOAD_BYTES: &[u8] = b"\x00\x01binary payload\xff";

pub fn app() -> Router {
    let attempts: Attempts = Arc::new(RwLock::new(HashMap::new()));
    Router::new()
        .route("/find", get(find))
        .route("/flaky/{key}", get(flaky))
        .route("/status/{code}", get(status))
        .route("/form", post(form))
        .route("/upload", post(upload))
        .route("/headers", get(headers).post(headers))
        .route("/files/{name}", get(file))
        .route("/bytes/{len}", get(filler))
        .with_state(attempts)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

async fn find(Query(params): Query<HashMap<String, String>>) -> Result<Json<Value>, StatusCode> {
    let q = params.get("q").ok_or(StatusCode::BAD_REQUEST)?;
    if q == "error" {
        return Ok(Json(json!({ "error": "NO_RESULTS" })));
    }
    Ok(Json(json!({ "ok": true, "q": q })))
}

async fn flaky(State(attempts): State<Attempts>, Path(key): Path<String>) -> Response {
    let attempt = {
        let mut attempts = attempts.write().await;
        let count = attempts.entry(key).or_insert(0);
        *count += 1;
        *count
    };
    if attempt <= FLAKY_FAILURES {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    Json(json!({ "attempt": attempt })).into_response()
}

async fn status(Path(code): Path<u16>) -> StatusCode {
    StatusCode::from_u16(code).unwrap_or(StatusCode::BAD_REQUEST)
}

async fn form(Form(fields): Form<HashMap<String, String>>) -> Json<HashMap<String, String>> {
    Json(fields)
}

async fn upload(headers: HeaderMap, body: Bytes) -> Json<UploadEcho> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    Json(UploadEcho {
        content_type,
        length: body.len(),
        body: String::from_utf8_lossy(&body).into_owned(),
    })
}

/// Echoes selected request headers and sets a repeated response header.
async fn headers(request_headers: HeaderMap) -> Response {
    let echo = |name: header::HeaderName| {
        request_headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    let body = json!({
        "authorization": echo(header::AUTHORIZATION),
        "connection": echo(header::CONNECTION),
    });
    let mut response = Json(body).into_response();
    let out = response.headers_mut();
    out.append("x-fetch-tag", HeaderValue::from_static("alpha"));
    out.append("x-fetch-tag", HeaderValue::from_static("beta"));
    response
}

/// `len` bytes of `a`, for bodies of arbitrary size.
async fn filler(Path(len): Path<usize>) -> Result<String, StatusCode> {
    if len > MAX_FILLER_BYTES {
        return Err(StatusCode::PAYLOAD_TOO_LARGE);
    }
    Ok("a".repeat(len))
}

async fn file(Path(name): Path<String>) -> Result<Vec<u8>, StatusCode> {
    if name == "payload.bin" {
        Ok(DOWNLOAD_BYTES.to_vec())
    } else {
        Err(StatusCode::NOT_FOUND)
    }
}
