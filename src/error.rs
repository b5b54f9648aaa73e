//! Error types for the stream transport.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! Connection failures reach the registered delegate as
//! [`ConnectionState::Failed`](crate::ConnectionState::Failed); write failures
//! are returned from [`Transport::write`](crate::Transport::write):
//!
//! ```ignore
//! use stream_transport::{Error, Result, Transport};
//!
//! async fn example(transport: &impl Transport) -> Result<()> {
//!     transport.write(b"ping".to_vec()).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::InvalidRequest`], [`Error::Config`], [`Error::NoRuntime`] |
//! | Connection | [`Error::ConnectionTimeout`], [`Error::NotConnected`], [`Error::ConnectionClosed`], [`Error::Resolve`] |
//! | Trust | [`Error::PinningRejected`], [`Error::Tls`] |
//! | External | [`Error::Io`], [`Error::Url`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use url::ParseError as UrlError;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Connect target could not be resolved into host, port and TLS flag.
    ///
    /// No connection attempt is made.
    #[error("Invalid request: {message}")]
    InvalidRequest {
        /// Why the target was rejected.
        message: String,
    },

    /// Transport configuration error.
    ///
    /// Returned by [`TransportBuilder::build`](crate::TransportBuilder::build)
    /// and when parsing certificate pins.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    /// `connect` was called outside a tokio runtime.
    #[error("No tokio runtime available to drive the connection")]
    NoRuntime,

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// Readiness was not reached before the connect deadline.
    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectionTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// No active connection to write to.
    #[error("Not connected")]
    NotConnected,

    /// Connection ended while an operation was pending.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Host name resolved to no addresses.
    #[error("Could not resolve host: {host}")]
    Resolve {
        /// The host that failed to resolve.
        host: String,
    },

    // ========================================================================
    // Trust Errors
    // ========================================================================
    /// The certificate pinning validator rejected the peer.
    #[error("Certificate pinning rejected peer: {domain}")]
    PinningRejected {
        /// Domain the handshake was made for.
        domain: String,
    },

    /// TLS setup or handshake failure.
    #[error("TLS error: {message}")]
    Tls {
        /// Description of the TLS failure.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// URL parse error.
    #[error("URL error: {0}")]
    Url(#[from] UrlError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates an invalid request error.
    #[inline]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a connection timeout error.
    #[inline]
    pub fn connection_timeout(timeout_ms: u64) -> Self {
        Self::ConnectionTimeout { timeout_ms }
    }

    /// Creates a resolve error.
    #[inline]
    pub fn resolve(host: impl Into<String>) -> Self {
        Self::Resolve { host: host.into() }
    }

    /// Creates a pinning rejected error.
    #[inline]
    pub fn pinning_rejected(domain: impl Into<String>) -> Self {
        Self::PinningRejected {
            domain: domain.into(),
        }
    }

    /// Creates a TLS error.
    #[inline]
    pub fn tls(message: impl Into<String>) -> Self {
        Self::Tls {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is the synthesized connect timeout.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::ConnectionTimeout { .. })
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::ConnectionTimeout { .. }
                | Self::NotConnected
                | Self::ConnectionClosed
                | Self::Resolve { .. }
                | Self::Io(_)
        )
    }

    /// Returns `true` if the peer failed trust evaluation.
    #[inline]
    #[must_use]
    pub fn is_trust_error(&self) -> bool {
        matches!(self, Self::PinningRejected { .. } | Self::Tls { .. })
    }
}

// ============================================================================
// Tests
// ============================================================================
