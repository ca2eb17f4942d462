//! TLS for requests that carry a caller-supplied hostname verifier.
//!
//! # Design
//! ureq's own TLS settings cannot relax the certificate name check, so these
//! requests get an agent whose connector chain is ureq's `TcpConnector`
//! followed by a rustls connector with its own `ServerCertVerifier`. That
//! verifier always validates the chain against the request's trust roots
//! (the pinned certificate, or the bundled web PKI roots). Only a
//! certificate that chains correctly but is not valid for the requested name
//! reaches the caller's `HostnameVerifier`.

use std::fmt;
use std::io::{Read, Write};
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{
    CertificateError, ClientConfig, ClientConnection, DigitallySignedStruct, RootCertStore,
    SignatureScheme, StreamOwned,
};
use tracing::debug;
use ureq::config::Config;
use ureq::tls::Certificate;
use ureq::unversioned::resolver::DefaultResolver;
use ureq::unversioned::transport::{
    Buffers, ConnectionDetails, Connector, Either, LazyBuffers, NextTimeout, TcpConnector,
    Transport, TransportAdapter,
};
use ureq::Agent;

use crate::error::TransportError;
use crate::http::SharedVerifier;

/// Trust roots for one request: only the pinned certificate if there is
/// one, otherwise the bundled web PKI roots.
pub(crate) fn trust_roots(pinned: Option<&Certificate<'_>>) -> RootCertStore {
    match pinned {
        Some(cert) => {
            let mut roots = RootCertStore::empty();
            let (added, ignored) =
                roots.add_parsable_certificates([CertificateDer::from(cert.der().to_vec())]);
            debug!(added, ignored, "pinned trust root");
            roots
        }
        None => RootCertStore {
            roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
        },
    }
}

/// An agent whose TLS name check defers to `hostname` on a mismatch.
pub(crate) fn agent_with_verifier(
    config: Config,
    roots: RootCertStore,
    hostname: SharedVerifier,
) -> Result<Agent, TransportError> {
    let client = Arc::new(client_config(roots, hostname)?);
    let connector = ()
        .chain(TcpConnector::default())
        .chain(VerifyingTlsConnector { client });
    Ok(Agent::with_parts(config, connector, DefaultResolver::default()))
}

fn client_config(
    roots: RootCertStore,
    hostname: SharedVerifier,
) -> Result<ClientConfig, TransportError> {
    let provider = crypto_provider();
    let chain = WebPkiServerVerifier::builder_with_provider(Arc::new(roots), Arc::clone(&provider))
        .build()
        .map_err(|e| TransportError::Tls(e.to_string()))?;
    let config = ClientConfig::builder_with_provider(provider)
        .with_protocol_versions(rustls::ALL_VERSIONS)
        .map_err(|e| TransportError::Tls(e.to_string()))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(NameOverride { chain, hostname }))
        .with_no_client_auth();
    Ok(config)
}

fn crypto_provider() -> Arc<CryptoProvider> {
    CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::ring::default_provider()))
}

/// Web PKI verification where a name mismatch can be overridden.
#[derive(Debug)]
struct NameOverride {
    chain: Arc<WebPkiServerVerifier>,
    hostname: SharedVerifier,
}

impl ServerCertVerifier for NameOverride {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let verdict = self.chain.verify_server_cert(
            end_entity,
            intermediates,
            server_name,
            ocsp_response,
            now,
        );
        let mismatch = matches!(
            &verdict,
            Err(rustls::Error::InvalidCertificate(e)) if is_name_mismatch(e)
        );
        if !mismatch {
            return verdict;
        }

        let host = server_name.to_str();
        if self.hostname.0.verify(&host) {
            debug!(host = %host, "certificate name mismatch accepted by verifier");
            return Ok(ServerCertVerified::assertion());
        }
        verdict
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.chain.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.chain.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.chain.supported_verify_schemes()
    }
}

fn is_name_mismatch(error: &CertificateError) -> bool {
    matches!(
        error,
        CertificateError::NotValidForName | CertificateError::NotValidForNameContext { .. }
    )
}

/// Wraps the chained TCP transport in TLS for `https` URLs.
#[derive(Debug)]
struct VerifyingTlsConnector {
    client: Arc<ClientConfig>,
}

impl<In: Transport> Connector<In> for VerifyingTlsConnector {
    type Out = Either<In, TlsTransport>;

    fn connect(
        &self,
        details: &ConnectionDetails,
        chained: Option<In>,
    ) -> Result<Option<Self::Out>, ureq::Error> {
        let Some(transport) = chained else {
            return Ok(None);
        };
        if !details.needs_tls() || transport.is_tls() {
            return Ok(Some(Either::A(transport)));
        }

        let host = details.uri.host().unwrap_or_default();
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        let name = ServerName::try_from(host.to_string())
            .map_err(|_| ureq::Error::Tls("invalid TLS server name"))?;

        let mut conn = ClientConnection::new(Arc::clone(&self.client), name)?;
        let mut sock = TransportAdapter::new(transport.boxed());
        sock.set_timeout(details.timeout);
        conn.complete_io(&mut sock)?;

        let buffers = LazyBuffers::new(
            details.config.input_buffer_size(),
            details.config.output_buffer_size(),
        );
        Ok(Some(Either::B(TlsTransport {
            buffers,
            stream: StreamOwned::new(conn, sock),
        })))
    }
}

struct TlsTransport {
    buffers: LazyBuffers,
    stream: StreamOwned<ClientConnection, TransportAdapter>,
}

impl Transport for TlsTransport {
    fn buffers(&mut self) -> &mut dyn Buffers {
        &mut self.buffers
    }

    fn transmit_output(&mut self, amount: usize, timeout: NextTimeout) -> Result<(), ureq::Error> {
        self.stream.get_mut().set_timeout(timeout);
        let output = &self.buffers.output()[..amount];
        self.stream.write_all(output)?;
        Ok(())
    }

    fn await_input(&mut self, timeout: NextTimeout) -> Result<bool, ureq::Error> {
        self.stream.get_mut().set_timeout(timeout);
        let input = self.buffers.input_append_buf();
        let amount = self.stream.read(input)?;
        self.buffers.input_appended(amount);
        Ok(amount > 0)
    }

    fn is_open(&mut self) -> bool {
        self.stream.get_mut().get_mut().is_open()
    }

    fn is_tls(&self) -> bool {
        true
    }
}

impl fmt::Debug for TlsTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsTransport").finish_non_exhaustive()
    }
}
