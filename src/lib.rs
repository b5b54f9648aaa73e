//! Stream Transport - pluggable TCP/TLS byte stream with pinning.
//!
//! This library opens a TCP connection, optionally wrapped in TLS, and
//! reports everything that happens to it as [`ConnectionState`] events
//! delivered to a registered [`TransportEventClient`]. It is the conduit
//! layer underneath protocols such as WebSocket and knows nothing about
//! them.
//!
//! # Architecture
//!
//! - **Facade**: [`TcpTransport`] implements [`Transport`] and may be called
//!   from any thread
//! - **Connection task**: one tokio task per attempt owns the socket and is
//!   the only place lifecycle events originate
//! - **Timeout guard**: a one-shot deadline that fails the attempt unless
//!   readiness comes first
//! - **Pinning**: a [`CertificatePinning`] validator can replace default TLS
//!   trust and answers asynchronously through a [`PinningCompletion`]
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use stream_transport::{
//!     ConnectOptions, ConnectionState, Result, TcpTransport, Transport, TransportEventClient,
//! };
//! use url::Url;
//!
//! struct Logger;
//!
//! impl TransportEventClient for Logger {
//!     fn connection_changed(&self, state: ConnectionState) {
//!         println!("{}", state.name());
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let logger = Arc::new(Logger);
//!     let transport = TcpTransport::new()?;
//!     transport.register_delegate(&logger);
//!
//!     let url = Url::parse("wss://example.com")?;
//!     transport.connect(&url, ConnectOptions::new().with_timeout(Duration::from_secs(5)));
//!
//!     transport.write(b"hello".to_vec()).await?;
//!     transport.disconnect();
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`endpoint`] | URL to host/port/TLS resolution |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Connection attempt IDs |
//! | [`pinning`] | Certificate pinning validators |
//! | [`transport`] | Transport trait and TCP implementation |

// ============================================================================
// Modules
// ============================================================================

/// URL to endpoint resolution.
pub mod endpoint;

/// Error types and result aliases.
///
/// Connection failures surface as [`ConnectionState::Failed`]; write
/// failures as [`Result<T>`] values.
pub mod error;

/// Type-safe identifiers.
pub mod identifiers;

/// Certificate pinning.
pub mod pinning;

/// Stream transport layer.
///
/// The [`Transport`] seam plus its TCP/TLS implementation.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Endpoint types
pub use endpoint::Endpoint;

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::ConnectionId;

// Pinning types
pub use pinning::{
    CertificatePinning, FingerprintPinning, PinningCompletion, PinningDecision, TrustChain,
};

// Transport types
pub use transport::{
    ConnectOptions, ConnectionState, DEFAULT_CONNECT_TIMEOUT, TcpTransport, Transport,
    TransportBuilder, TransportEventClient,
};
