//! Connect target resolution.
//!
//! Turns a URL into the `(host, port, tls)` triple the transport dials.
//! Only the scheme, host and port are consulted; path and query belong to
//! whatever protocol runs on top of the stream.
//!
//! | Scheme | TLS | Default port |
//! |--------|-----|--------------|
//! | `wss`, `https`, `tls` | yes | 443 |
//! | `ws`, `http`, `tcp` | no | 80 |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use url::{Host, Url};

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Default port for TLS endpoints.
pub const DEFAULT_TLS_PORT: u16 = 443;

/// Default port for plain endpoints.
pub const DEFAULT_PLAIN_PORT: u16 = 80;

// ============================================================================
// Endpoint
// ============================================================================

/// Resolved connect target.
///
/// Derived once at connect time and immutable for the attempt.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    host: String,
    port: u16,
    tls: bool,
}

impl Endpoint {
    /// Creates an endpoint from its parts.
    #[inline]
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16, tls: bool) -> Self {
        Self {
            host: host.into(),
            port,
            tls,
        }
    }

    /// Resolves a URL into an endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] if the scheme is unsupported or the
    /// URL has no host.
    pub fn from_url(url: &Url) -> Result<Self> {
        let tls = match url.scheme() {
            "wss" | "https" | "tls" => true,
            "ws" | "http" | "tcp" => false,
            other => {
                return Err(Error::invalid_request(format!(
                    "unsupported scheme: {other}"
                )));
            }
        };

        // IPv6 literals come back bracketed from host_str(); the resolver
        // wants them bare.
        let host = match url.host() {
            Some(Host::Domain(domain)) if !domain.is_empty() => domain.to_string(),
            Some(Host::Ipv4(addr)) => addr.to_string(),
            Some(Host::Ipv6(addr)) => addr.to_string(),
            _ => return Err(Error::invalid_request(format!("missing host: {url}"))),
        };

        let port = url.port().unwrap_or(if tls {
            DEFAULT_TLS_PORT
        } else {
            DEFAULT_PLAIN_PORT
        });

        Ok(Self { host, port, tls })
    }

    /// Parses and resolves a URL string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] if the string is not a URL or cannot
    /// be resolved.
    pub fn parse(input: &str) -> Result<Self> {
        let url = Url::parse(input)
            .map_err(|e| Error::invalid_request(format!("{input}: {e}")))?;
        Self::from_url(&url)
    }

    /// Returns the host name or address literal.
    #[inline]
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the port.
    #[inline]
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Returns `true` if the endpoint requires TLS.
    #[inline]
    #[must_use]
    pub const fn is_tls(&self) -> bool {
        self.tls
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
