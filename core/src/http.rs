//! HTTP request and response values.
//!
//! # Design
//! `HttpRequest` is plain, validated data: it can only be produced by
//! `RequestBuilder::build`, which enforces the URL, timeout, retry and
//! attachment rules once, up front. The transport never re-validates.
//! Like the builders in `reqwest`, setters never fail on their own; the first
//! invalid input is remembered and reported by `build`.
//!
//! `HttpResponse` is what one transport attempt observed. Captured errors
//! live on the response instead of being returned, because the pipeline
//! treats every transport outcome as data.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use url::Url;

use crate::error::{RequestError, TransportError};

pub const DEFAULT_SOCKET_TIMEOUT: Duration = Duration::from_millis(5000);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(5000);
pub const DEFAULT_TRY_COUNT: u32 = 1;

/// Timeouts shorter than this are rejected.
pub const MIN_TIMEOUT: Duration = Duration::from_millis(3000);

pub const HTTP_OK: u16 = 200;

/// Boundary token used for every multipart body.
pub const MULTIPART_BOUNDARY: &str = "fetchcore0boundary0token";

const CRLF: &str = "\r\n";

/// Response headers, keyed by lowercase name.
pub type HeaderMultimap = BTreeMap<String, Vec<String>>;

/// HTTP method for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decides whether a TLS peer may be used under a name its certificate does
/// not cover.
///
/// Only consulted for `https` when the certificate chains to a trusted root
/// but is not valid for the requested host. Returning `true` accepts the
/// connection; `false` keeps the strict name-mismatch failure.
pub trait HostnameVerifier: Send + Sync {
    fn verify(&self, hostname: &str) -> bool;
}

impl<F> HostnameVerifier for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn verify(&self, hostname: &str) -> bool {
        self(hostname)
    }
}

#[derive(Clone)]
pub(crate) struct SharedVerifier(pub(crate) Arc<dyn HostnameVerifier>);

impl fmt::Debug for SharedVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("HostnameVerifier")
    }
}

/// A binary attachment sent as the last part of a multipart body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePart {
    pub param_name: String,
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl FilePart {
    pub fn new(
        param_name: impl Into<String>,
        file_name: impl Into<String>,
        content_type: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Self {
        Self {
            param_name: param_name.into(),
            file_name: file_name.into(),
            content_type: content_type.into(),
            bytes,
        }
    }

    /// Read `path` into a part named after the file.
    pub fn from_path(
        param_name: impl Into<String>,
        content_type: impl Into<String>,
        path: impl AsRef<Path>,
    ) -> Result<Self, RequestError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)
            .map_err(|e| RequestError::UnreadableFile(format!("{}: {e}", path.display())))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| RequestError::UnreadableFile(path.display().to_string()))?;
        Ok(Self::new(param_name, file_name, content_type, bytes))
    }
}

/// Encoded request body plus the content type that describes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    pub content_type: String,
    pub body: Vec<u8>,
}

/// A validated HTTP request. Build one with [`HttpRequest::get`] or
/// [`HttpRequest::post`].
#[derive(Debug, Clone)]
pub struct HttpRequest {
    method: HttpMethod,
    url: String,
    headers: BTreeMap<String, String>,
    query: BTreeMap<String, String>,
    socket_timeout: Duration,
    connect_timeout: Duration,
    try_count: u32,
    certificate: Option<String>,
    verifier: Option<SharedVerifier>,
    collect_headers: bool,
    file: Option<FilePart>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(HttpMethod::Get, url)
    }

    pub fn post(url: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(HttpMethod::Post, url)
    }

    pub fn method(&self) -> HttpMethod {
        self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn query(&self) -> &BTreeMap<String, String> {
        &self.query
    }

    pub fn socket_timeout(&self) -> Duration {
        self.socket_timeout
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    pub fn try_count(&self) -> u32 {
        self.try_count
    }

    pub fn certificate(&self) -> Option<&str> {
        self.certificate.as_deref()
    }

    pub fn hostname_verifier(&self) -> Option<&dyn HostnameVerifier> {
        self.verifier.as_ref().map(|v| v.0.as_ref())
    }

    pub(crate) fn shared_verifier(&self) -> Option<SharedVerifier> {
        self.verifier.clone()
    }

    pub fn collect_headers(&self) -> bool {
        self.collect_headers
    }

    pub fn file(&self) -> Option<&FilePart> {
        self.file.as_ref()
    }

    /// `key=value` pairs joined by `&`, every key and value percent-encoded.
    pub fn encoded_query(&self) -> String {
        self.query
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&")
    }

    /// The URL actually requested. GET carries the parameters in the query
    /// string; POST carries them in the body.
    pub fn target_url(&self) -> String {
        let query = self.encoded_query();
        if self.method == HttpMethod::Post || query.is_empty() {
            return self.url.clone();
        }
        let separator = if self.url.contains('?') { '&' } else { '?' };
        format!("{}{separator}{query}", self.url)
    }

    /// The POST body: urlencoded parameters, or a multipart body when a file
    /// is attached. `None` for GET.
    pub fn payload(&self) -> Option<Payload> {
        match self.method {
            HttpMethod::Get => None,
            HttpMethod::Post if self.file.is_some() => Some(Payload {
                content_type: format!("multipart/form-data; boundary={MULTIPART_BOUNDARY}"),
                body: self.multipart_body(),
            }),
            HttpMethod::Post => Some(Payload {
                content_type: "application/x-www-form-urlencoded".to_string(),
                body: self.encoded_query().into_bytes(),
            }),
        }
    }

    fn multipart_body(&self) -> Vec<u8> {
        let mut body = Vec::new();
        for (key, value) in &self.query {
            body.extend_from_slice(format!("--{MULTIPART_BOUNDARY}{CRLF}").as_bytes());
            body.extend_from_slice(
                format!("Content-Disposition: form-data; name=\"{key}\"{CRLF}{CRLF}{value}{CRLF}")
                    .as_bytes(),
            );
        }
        if let Some(file) = &self.file {
            body.extend_from_slice(format!("--{MULTIPART_BOUNDARY}{CRLF}").as_bytes());
            body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"{CRLF}",
                    file.param_name, file.file_name
                )
                .as_bytes(),
            );
            body.extend_from_slice(format!("Content-Type: {}{CRLF}", file.content_type).as_bytes());
            body.extend_from_slice(
                format!("Content-Transfer-Encoding: binary{CRLF}{CRLF}").as_bytes(),
            );
            body.extend_from_slice(&file.bytes);
            body.extend_from_slice(CRLF.as_bytes());
            body.extend_from_slice(format!("--{MULTIPART_BOUNDARY}--").as_bytes());
        }
        body
    }
}

/// Collects request settings; `build` validates them all at once.
#[derive(Debug)]
pub struct RequestBuilder {
    request: HttpRequest,
    error: Option<RequestError>,
}

impl RequestBuilder {
    fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            request: HttpRequest {
                method,
                url: url.into(),
                headers: BTreeMap::new(),
                query: BTreeMap::new(),
                socket_timeout: DEFAULT_SOCKET_TIMEOUT,
                connect_timeout: DEFAULT_CONNECT_TIMEOUT,
                try_count: DEFAULT_TRY_COUNT,
                certificate: None,
                verifier: None,
                collect_headers: false,
                file: None,
            },
            error: None,
        }
    }

    fn fail(&mut self, error: RequestError) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }

    /// Add a query (GET) or form (POST) parameter. A repeated key replaces
    /// the earlier value.
    pub fn query(mut self, key: impl Into<String>, value: impl fmt::Display) -> Self {
        let (key, value) = (key.into(), value.to_string());
        if key.is_empty() || value.is_empty() {
            self.fail(RequestError::EmptyEntry {
                kind: "query",
                key,
                value,
            });
        } else {
            self.request.query.insert(key, value);
        }
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let (key, value) = (key.into(), value.into());
        if key.is_empty() || value.is_empty() {
            self.fail(RequestError::EmptyEntry {
                kind: "header",
                key,
                value,
            });
        } else {
            self.request.headers.insert(key, value);
        }
        self
    }

    /// `Authorization: Basic <base64(secret)>`.
    pub fn basic_auth(mut self, secret: &str) -> Self {
        if secret.is_empty() {
            self.fail(RequestError::EmptyAuthSecret);
            return self;
        }
        let encoded = BASE64.encode(secret.as_bytes());
        self.header("Authorization", format!("Basic {encoded}"))
    }

    pub fn socket_timeout(mut self, timeout: Duration) -> Self {
        self.request.socket_timeout = timeout;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.request.connect_timeout = timeout;
        self
    }

    pub fn try_count(mut self, try_count: u32) -> Self {
        self.request.try_count = try_count;
        self
    }

    /// Trust only this PEM certificate for the connection.
    pub fn pinned_certificate(mut self, pem: impl Into<String>) -> Self {
        let pem = pem.into();
        if pem.trim().is_empty() {
            self.fail(RequestError::EmptyCertificate);
        } else {
            self.request.certificate = Some(pem);
        }
        self
    }

    pub fn hostname_verifier(mut self, verifier: impl HostnameVerifier + 'static) -> Self {
        self.request.verifier = Some(SharedVerifier(Arc::new(verifier)));
        self
    }

    /// Keep the response headers of a successful attempt. Off by default.
    pub fn collect_headers(mut self, collect: bool) -> Self {
        self.request.collect_headers = collect;
        self
    }

    pub fn file(mut self, file: FilePart) -> Self {
        if file.param_name.is_empty() {
            self.fail(RequestError::InvalidFilePart("empty param name".to_string()));
        } else if file.content_type.is_empty() {
            self.fail(RequestError::InvalidFilePart("empty content type".to_string()));
        } else {
            self.request.file = Some(file);
        }
        self
    }

    pub fn build(self) -> Result<HttpRequest, RequestError> {
        if let Some(error) = self.error {
            return Err(error);
        }
        let request = self.request;

        Url::parse(&request.url)
            .map_err(|e| RequestError::InvalidUrl(format!("{}: {e}", request.url)))?;
        if request.method == HttpMethod::Get && request.file.is_some() {
            return Err(RequestError::FileOnGet);
        }
        check_timeout("socket", request.socket_timeout)?;
        check_timeout("connect", request.connect_timeout)?;
        if request.try_count < 1 {
            return Err(RequestError::InvalidTryCount(request.try_count));
        }
        Ok(request)
    }
}

fn check_timeout(which: &'static str, timeout: Duration) -> Result<(), RequestError> {
    if timeout < MIN_TIMEOUT {
        return Err(RequestError::TimeoutTooSmall {
            which,
            millis: timeout.as_millis() as u64,
            minimum: MIN_TIMEOUT.as_millis() as u64,
        });
    }
    Ok(())
}

/// What a transport attempt observed.
#[derive(Debug, Default)]
pub struct HttpResponse {
    /// `0` when no status line was received.
    pub status: u16,
    pub body: Option<String>,
    pub headers: Option<HeaderMultimap>,
    pub error: Option<TransportError>,
}

impl HttpResponse {
    /// A 200 response carrying `body`.
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: HTTP_OK,
            body: Some(body.into()),
            ..Self::default()
        }
    }

    /// A response with `status` and no body.
    pub fn from_status(status: u16) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    /// An attempt that failed before a status was received.
    pub fn failed(error: TransportError) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == HTTP_OK
    }

    /// Why this response counts as a network failure, if it does.
    ///
    /// A captured error, a non-200 status and a missing body all collapse
    /// into the same network failure; the reason is informational.
    pub fn network_failure(&self) -> Option<String> {
        if let Some(error) = &self.error {
            return Some(error.to_string());
        }
        if !self.is_ok() {
            return Some(format!("unexpected HTTP status {}", self.status));
        }
        if self.body.is_none() {
            return Some("response body is missing".to_string());
        }
        None
    }

    /// Values of a collected header, matched case-insensitively.
    pub fn header(&self, key: &str) -> Option<&[String]> {
        self.headers
            .as_ref()?
            .get(&key.to_ascii_lowercase())
            .map(Vec::as_slice)
    }

    /// Collected headers as `name:v1,v2` lines.
    pub fn headers_text(&self) -> Option<String> {
        let headers = self.headers.as_ref()?;
        Some(
            headers
                .iter()
                .map(|(name, values)| format!("{name}:{}", values.join(",")))
                .collect::<Vec<_>>()
                .join("\n"),
        )
    }
}
