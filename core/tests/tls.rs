//! HTTPS exchanges against a local rustls server with self-signed fixtures.
//!
//! # Design
//! `loopback` certifies `127.0.0.1` and `localhost`; `elsewhere` certifies
//! only `fetch.test`. Both are self-signed, so a request trusts them only
//! when they are pinned.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use fetch_core::{
    HttpRequest, HttpResponse, HttpTransport, RequestBuilder, Transport, UreqConnector,
};
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ServerConfig, ServerConnection, StreamOwned};

const LOOPBACK_CERT: &str = include_str!("fixtures/loopback.cert.pem");
const LOOPBACK_KEY: &str = include_str!("fixtures/loopback.key.pem");
const ELSEWHERE_CERT: &str = include_str!("fixtures/elsewhere.cert.pem");
const ELSEWHERE_KEY: &str = include_str!("fixtures/elsewhere.key.pem");

const RESPONSE: &[u8] = b"HTTP/1.1 200 OK\r\n\
Content-Type: text/plain\r\n\
Content-Length: 6\r\n\
Connection: close\r\n\
\r\n\
secure";

/// Serve `RESPONSE` over TLS on a random loopback port and return the port.
fn start_tls_server(cert_pem: &str, key_pem: &str) -> u16 {
    let certs = CertificateDer::pem_slice_iter(cert_pem.as_bytes())
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    let key = PrivateKeyDer::from_pem_slice(key_pem.as_bytes()).unwrap();
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .unwrap();
    let config = Arc::new(config);

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(stream) = stream else { continue };
            let config = Arc::clone(&config);
            thread::spawn(move || serve(config, stream));
        }
    });
    port
}

fn serve(config: Arc<ServerConfig>, sock: TcpStream) {
    sock.set_read_timeout(Some(Duration::from_secs(5))).ok();
    let Ok(conn) = ServerConnection::new(config) else {
        return;
    };
    let mut tls = StreamOwned::new(conn, sock);
    let mut request = Vec::new();
    let mut buf = [0u8; 1024];
    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
        match tls.read(&mut buf) {
            Ok(0) | Err(_) => return,
            Ok(n) => request.extend_from_slice(&buf[..n]),
        }
    }
    if tls.write_all(RESPONSE).is_err() {
        return;
    }
    tls.conn.send_close_notify();
    let _ = tls.conn.complete_io(&mut tls.sock);
}

fn https(port: u16) -> RequestBuilder {
    HttpRequest::get(format!("https://127.0.0.1:{port}/"))
        .try_count(1)
        .connect_timeout(Duration::from_secs(5))
        .socket_timeout(Duration::from_secs(5))
}

fn execute(builder: RequestBuilder) -> HttpResponse {
    HttpTransport::new(UreqConnector).execute(&builder.build().unwrap())
}

fn assert_secure(response: &HttpResponse) {
    assert!(response.is_ok(), "{:?}", response.error);
    assert_eq!(response.body.as_deref(), Some("secure"));
}

fn assert_refused(response: &HttpResponse) {
    assert!(!response.is_ok());
    assert!(response.error.is_some());
    assert!(response.network_failure().is_some());
}

// --- pinning ---

#[test]
fn pinned_certificate_trusts_its_server() {
    let port = start_tls_server(LOOPBACK_CERT, LOOPBACK_KEY);

    let response = execute(https(port).pinned_certificate(LOOPBACK_CERT));

    assert_secure(&response);
}

#[test]
fn self_signed_server_is_rejected_without_a_pin() {
    let port = start_tls_server(LOOPBACK_CERT, LOOPBACK_KEY);

    assert_refused(&execute(https(port)));
}

#[test]
fn different_pinned_certificate_is_rejected() {
    let port = start_tls_server(LOOPBACK_CERT, LOOPBACK_KEY);

    assert_refused(&execute(https(port).pinned_certificate(ELSEWHERE_CERT)));
}

#[test]
fn pinned_certificate_for_another_name_is_rejected() {
    let port = start_tls_server(ELSEWHERE_CERT, ELSEWHERE_KEY);

    assert_refused(&execute(https(port).pinned_certificate(ELSEWHERE_CERT)));
}

// --- hostname verifier ---

#[test]
fn verifier_accepts_name_mismatch() {
    let port = start_tls_server(ELSEWHERE_CERT, ELSEWHERE_KEY);

    let response = execute(
        https(port)
            .pinned_certificate(ELSEWHERE_CERT)
            .hostname_verifier(|host: &str| host == "127.0.0.1"),
    );

    assert_secure(&response);
}

#[test]
fn declining_verifier_keeps_name_mismatch_rejected() {
    let port = start_tls_server(ELSEWHERE_CERT, ELSEWHERE_KEY);

    let response = execute(
        https(port)
            .pinned_certificate(ELSEWHERE_CERT)
            .hostname_verifier(|host: &str| host == "fetch.test"),
    );

    assert_refused(&response);
}

#[test]
fn verifier_is_not_consulted_when_name_matches() {
    let port = start_tls_server(LOOPBACK_CERT, LOOPBACK_KEY);

    let response = execute(
        https(port)
            .pinned_certificate(LOOPBACK_CERT)
            .hostname_verifier(|_: &str| false),
    );

    assert_secure(&response);
}

#[test]
fn verifier_does_not_bypass_chain_validation() {
    let port = start_tls_server(LOOPBACK_CERT, LOOPBACK_KEY);

    assert_refused(&execute(https(port).hostname_verifier(|_: &str| true)));

    let port = start_tls_server(ELSEWHERE_CERT, ELSEWHERE_KEY);
    let response = execute(
        https(port)
            .pinned_certificate(LOOPBACK_CERT)
            .hostname_verifier(|_: &str| true),
    );
    assert_refused(&response);
}
