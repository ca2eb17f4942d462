//! Blocking HTTP transport with retry and certificate pinning.
//!
//! # Design
//! The retry policy (`HttpTransport`) is separate from the single exchange
//! (`Connector`). The policy encodes the payload once, runs up to
//! `try_count` attempts with no delay between them and keeps only the last
//! attempt's response. `UreqConnector` performs one exchange with a fresh
//! ureq agent, so every attempt opens its own connection and drops it when
//! the attempt ends. Requests with a hostname verifier get their agent from
//! the `tls` module instead of ureq's default connector.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};
use ureq::tls::{Certificate, RootCerts, TlsConfig};
use ureq::Agent;

use crate::error::TransportError;
use crate::http::{HeaderMultimap, HttpRequest, HttpResponse, Payload, HTTP_OK};
use crate::tls;

/// Executes a request, blocking the calling thread until done.
pub trait Transport: Send + Sync {
    fn execute(&self, request: &HttpRequest) -> HttpResponse;
}

/// Performs exactly one HTTP exchange.
pub trait Connector: Send + Sync {
    /// `payload` is the encoded body for POST and `None` for GET.
    fn attempt(&self, request: &HttpRequest, payload: Option<&Payload>) -> HttpResponse;
}

/// Retry loop over a [`Connector`].
#[derive(Debug, Clone, Default)]
pub struct HttpTransport<C = UreqConnector> {
    connector: C,
}

impl<C: Connector> HttpTransport<C> {
    pub fn new(connector: C) -> Self {
        Self { connector }
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }
}

impl<C: Connector> Transport for HttpTransport<C> {
    fn execute(&self, request: &HttpRequest) -> HttpResponse {
        let payload = request.payload();
        let tries = request.try_count();
        let mut response = HttpResponse::default();

        for attempt in 1..=tries {
            debug!(
                method = %request.method(),
                url = request.url(),
                attempt,
                tries,
                "sending request"
            );
            response = self.connector.attempt(request, payload.as_ref());
            if response.is_ok() {
                break;
            }
            debug!(
                status = response.status,
                error = ?response.error,
                attempt,
                "attempt did not return 200"
            );
        }
        response
    }
}

/// Production connector backed by ureq.
#[derive(Debug, Clone, Default)]
pub struct UreqConnector;

impl UreqConnector {
    fn exchange(
        &self,
        request: &HttpRequest,
        payload: Option<&Payload>,
    ) -> Result<HttpResponse, TransportError> {
        let agent = agent_for(request)?;
        let url = request.target_url();

        let mut response = match payload {
            None => {
                let mut builder = agent.get(&url).header("Connection", "close");
                for (key, value) in request.headers() {
                    builder = builder.header(key.as_str(), value.as_str());
                }
                builder.call()?
            }
            Some(payload) => {
                let mut builder = agent
                    .post(&url)
                    .header("Connection", "close")
                    .header("Charset", "UTF-8")
                    .header("Content-Type", payload.content_type.as_str());
                for (key, value) in request.headers() {
                    builder = builder.header(key.as_str(), value.as_str());
                }
                debug!(bytes = payload.body.len(), "writing request body");
                builder.send(&payload.body[..])?
            }
        };

        let status = response.status().as_u16();
        let mut out = HttpResponse::from_status(status);
        if status != HTTP_OK {
            return Ok(out);
        }
        if request.collect_headers() {
            out.headers = Some(collect_headers(response.headers()));
        }
        match response.body_mut().with_config().limit(u64::MAX).read_to_string() {
            Ok(body) => out.body = Some(body),
            Err(e) => out.error = Some(e.into()),
        }
        Ok(out)
    }
}

impl Connector for UreqConnector {
    fn attempt(&self, request: &HttpRequest, payload: Option<&Payload>) -> HttpResponse {
        self.exchange(request, payload)
            .unwrap_or_else(HttpResponse::failed)
    }
}

/// One agent per attempt: the connection it opens is closed when the agent
/// is dropped at the end of the attempt.
fn agent_for(request: &HttpRequest) -> Result<Agent, TransportError> {
    let mut config = Agent::config_builder()
        .http_status_as_error(false)
        .timeout_connect(Some(request.connect_timeout()))
        .timeout_recv_response(Some(request.socket_timeout()))
        .timeout_recv_body(Some(request.socket_timeout()));

    let pinned = request
        .certificate()
        .map(|pem| {
            Certificate::from_pem(pem.as_bytes())
                .map_err(|e| TransportError::InvalidCertificate(e.to_string()))
        })
        .transpose()?;

    if let Some(verifier) = request.shared_verifier() {
        let roots = tls::trust_roots(pinned.as_ref());
        return tls::agent_with_verifier(config.build(), roots, verifier);
    }
    if let Some(cert) = pinned {
        let pinned_roots = TlsConfig::builder()
            .root_certs(RootCerts::Specific(Arc::new(vec![cert])))
            .build();
        config = config.tls_config(pinned_roots);
    }
    Ok(config.build().new_agent())
}

fn collect_headers(headers: &ureq::http::HeaderMap) -> HeaderMultimap {
    let mut collected = HeaderMultimap::new();
    for (name, value) in headers {
        collected
            .entry(name.as_str().to_ascii_lowercase())
            .or_default()
            .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
    }
    collected
}

/// Download `url` into `path` with a single GET.
///
/// Returns `false` for invalid arguments, a non-200 status or any I/O
/// failure; never errors.
pub fn download_to_file(
    url: &str,
    path: impl AsRef<Path>,
    socket_timeout: Duration,
    connect_timeout: Duration,
) -> bool {
    let request = match HttpRequest::get(url)
        .socket_timeout(socket_timeout)
        .connect_timeout(connect_timeout)
        .build()
    {
        Ok(request) => request,
        Err(e) => {
            debug!(error = %e, "download rejected");
            return false;
        }
    };
    match fetch_into(&request, path.as_ref()) {
        Ok(written) => written.is_some(),
        Err(e) => {
            warn!(url, error = %e, "download failed");
            false
        }
    }
}

fn fetch_into(request: &HttpRequest, path: &Path) -> Result<Option<u64>, TransportError> {
    let agent = agent_for(request)?;
    let mut response = agent
        .get(request.url())
        .header("Connection", "close")
        .call()?;
    if response.status().as_u16() != HTTP_OK {
        return Ok(None);
    }
    let mut file = File::create(path)?;
    let written = std::io::copy(&mut response.body_mut().as_reader(), &mut file)?;
    debug!(bytes = written, path = %path.display(), "download complete");
    Ok(Some(written))
}
