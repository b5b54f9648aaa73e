//! Builder pattern for transport configuration.
//!
//! Provides a fluent API for configuring and creating [`TcpTransport`]
//! instances.
//!
//! # Example
//!
//! ```no_run
//! use stream_transport::TcpTransport;
//!
//! # fn example() -> stream_transport::Result<()> {
//! let transport = TcpTransport::builder()
//!     .nodelay(false)
//!     .max_read_size(1024)
//!     .build()?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use rustls::pki_types::CertificateDer;

use crate::error::{Error, Result};

use super::read_loop::{MAX_READ, MIN_READ};
use super::tcp::{TcpTransport, TransportSettings};
use super::tls::{TlsSettings, root_store};

// ============================================================================
// TransportBuilder
// ============================================================================

/// Builder for configuring a [`TcpTransport`].
///
/// Use [`TcpTransport::builder()`] to create a new builder.
#[derive(Debug, Clone)]
pub struct TransportBuilder {
    /// Trust the bundled webpki roots.
    webpki_roots: bool,
    /// Additional trusted roots.
    root_certificates: Vec<CertificateDer<'static>>,
    /// Disable Nagle's algorithm.
    nodelay: bool,
    /// Largest chunk delivered per `Receive`.
    max_read_size: usize,
}

impl Default for TransportBuilder {
    fn default() -> Self {
        Self {
            webpki_roots: true,
            root_certificates: Vec::new(),
            nodelay: true,
            max_read_size: MAX_READ,
        }
    }
}

// ============================================================================
// TransportBuilder Implementation
// ============================================================================

impl TransportBuilder {
    /// Creates a builder with default settings.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether the bundled webpki roots are trusted.
    #[inline]
    #[must_use]
    pub fn webpki_roots(mut self, enabled: bool) -> Self {
        self.webpki_roots = enabled;
        self
    }

    /// Trusts an additional DER-encoded root certificate.
    #[inline]
    #[must_use]
    pub fn add_root_certificate(mut self, certificate: CertificateDer<'static>) -> Self {
        self.root_certificates.push(certificate);
        self
    }

    /// Sets `TCP_NODELAY` on new connections.
    #[inline]
    #[must_use]
    pub fn nodelay(mut self, enabled: bool) -> Self {
        self.nodelay = enabled;
        self
    }

    /// Sets the largest chunk delivered per `Receive` event.
    #[inline]
    #[must_use]
    pub fn max_read_size(mut self, size: usize) -> Self {
        self.max_read_size = size;
        self
    }

    /// Builds the transport with validation.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if the read size is below the minimum chunk size
    /// - [`Error::Config`] if a root certificate cannot be parsed
    /// - [`Error::Tls`] if the TLS configuration cannot be built
    pub fn build(self) -> Result<TcpTransport> {
        self.validate_read_size()?;

        let roots = root_store(self.webpki_roots, &self.root_certificates)?;
        let tls = TlsSettings::new(roots)?;

        Ok(TcpTransport::with_settings(TransportSettings {
            tls,
            nodelay: self.nodelay,
            max_read_size: self.max_read_size,
        }))
    }
}

// ============================================================================
// Validation
// ============================================================================

impl TransportBuilder {
    /// Validates the read size configuration.
    fn validate_read_size(&self) -> Result<()> {
        if self.max_read_size < MIN_READ {
            return Err(Error::config(format!(
                "max_read_size must be at least {MIN_READ} bytes, got {}",
                self.max_read_size
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
