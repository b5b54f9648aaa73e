//! TLS client setup.
//!
//! Without a pinning validator the handshake uses rustls' standard webpki
//! verification against the configured roots. With a validator, rustls still
//! checks handshake signatures but accepts any chain; trust is then decided
//! by the validator before the connection is reported ready.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, ring, verify_tls12_signature, verify_tls13_signature};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tracing::debug;

use crate::error::{Error, Result};
use crate::pinning::TrustChain;

// ============================================================================
// TlsSettings
// ============================================================================

/// Prebuilt client configurations for one transport.
#[derive(Debug, Clone)]
pub(crate) struct TlsSettings {
    /// Standard webpki verification.
    verified: Arc<ClientConfig>,
    /// Chain trust deferred to a pinning validator.
    deferred: Arc<ClientConfig>,
}

impl TlsSettings {
    /// Builds both configurations.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Tls`] if the crypto provider rejects the protocol
    /// versions.
    pub(crate) fn new(roots: RootCertStore) -> Result<Self> {
        let provider = Arc::new(ring::default_provider());

        let verified = ClientConfig::builder_with_provider(Arc::clone(&provider))
            .with_safe_default_protocol_versions()
            .map_err(|e| Error::tls(e.to_string()))?
            .with_root_certificates(roots)
            .with_no_client_auth();

        let deferred = ClientConfig::builder_with_provider(Arc::clone(&provider))
            .with_safe_default_protocol_versions()
            .map_err(|e| Error::tls(e.to_string()))?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(DeferredVerifier { provider }))
            .with_no_client_auth();

        Ok(Self {
            verified: Arc::new(verified),
            deferred: Arc::new(deferred),
        })
    }

    /// Returns the configuration to use.
    #[inline]
    pub(crate) fn config(&self, pinned: bool) -> Arc<ClientConfig> {
        if pinned {
            Arc::clone(&self.deferred)
        } else {
            Arc::clone(&self.verified)
        }
    }
}

// ============================================================================
// Root Store
// ============================================================================

/// Builds a root store from the bundled webpki roots and extra certificates.
///
/// # Errors
///
/// Returns [`Error::Config`] if an extra certificate cannot be parsed.
pub(crate) fn root_store(
    include_webpki_roots: bool,
    extra: &[CertificateDer<'static>],
) -> Result<RootCertStore> {
    let mut store = RootCertStore::empty();

    if include_webpki_roots {
        store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    }

    for certificate in extra {
        store
            .add(certificate.clone())
            .map_err(|e| Error::config(format!("invalid root certificate: {e}")))?;
    }

    Ok(store)
}

// ============================================================================
// Handshake
// ============================================================================

/// Runs the TLS handshake over an established TCP stream.
///
/// # Errors
///
/// Returns [`Error::Tls`] if `host` is not a valid server name or the
/// handshake fails.
pub(crate) async fn handshake(
    tcp: TcpStream,
    host: &str,
    config: Arc<ClientConfig>,
) -> Result<TlsStream<TcpStream>> {
    let domain = ServerName::try_from(host.to_string())
        .map_err(|e| Error::tls(format!("invalid server name {host}: {e}")))?;

    debug!(host, "Starting TLS handshake");

    TlsConnector::from(config)
        .connect(domain, tcp)
        .await
        .map_err(|e| Error::tls(format!("handshake failed: {e}")))
}

/// Extracts the peer's certificate chain after a handshake.
pub(crate) fn peer_chain(stream: &TlsStream<TcpStream>) -> TrustChain {
    let (_, connection) = stream.get_ref();
    let certificates = connection
        .peer_certificates()
        .map(<[CertificateDer<'static>]>::to_vec)
        .unwrap_or_default();

    TrustChain::new(certificates)
}

// ============================================================================
// DeferredVerifier
// ============================================================================

/// Accepts any chain; signatures are still checked.
#[derive(Debug)]
struct DeferredVerifier {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for DeferredVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

// ============================================================================
// Tests
// ============================================================================
