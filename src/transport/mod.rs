//! Stream transport layer.
//!
//! A [`Transport`] opens a byte stream to a remote endpoint, reports its
//! lifecycle to a registered [`TransportEventClient`], and carries writes.
//! It knows nothing about the protocol spoken over the stream.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐   control / writes   ┌────────────────────────────┐
//! │  TcpTransport    │─────────────────────►│  connection task           │
//! │  (any thread)    │                      │  dial → TLS → pinning      │
//! │                  │   TimedOut           │  → read loop               │
//! │  TimerSlot ──────┼─────────────────────►│                            │
//! └──────────────────┘                      └─────────────┬──────────────┘
//!                                                         │ ConnectionState
//!                                                         ▼
//!                                              TransportEventClient (weak)
//! ```
//!
//! # Connection Lifecycle
//!
//! 1. `connect` resolves the endpoint, tears down any previous attempt,
//!    arms the timeout guard and spawns the connection task
//! 2. The task dials, runs the TLS handshake and the pinning validator
//! 3. On readiness the guard is disarmed, then `Connected` is delivered
//! 4. The read loop delivers `Receive` chunks until the stream ends or fails
//! 5. `disconnect` (or drop) cancels the guard and the task
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `builder` | Transport configuration |
//! | `event` | Delegate events |
//! | `options` | Per-connect options |
//! | `read_loop` | Chunk buffering for the read loop |
//! | `state` | Socket state translation |
//! | `tcp` | TCP/TLS transport |
//! | `timeout` | Connect timeout guard |
//! | `tls` | rustls client configuration |

// ============================================================================
// Submodules
// ============================================================================

/// Transport configuration.
pub mod builder;

/// Delegate events.
pub mod event;

/// Per-connect options.
pub mod options;

/// Chunk buffering for the read loop.
pub mod read_loop;

/// TCP/TLS transport.
pub mod tcp;

mod state;
mod timeout;
mod tls;

// ============================================================================
// Imports
// ============================================================================

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use url::Url;

use crate::error::Result;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::TransportBuilder;
pub use event::{ConnectionState, TransportEventClient};
pub use options::{ConnectOptions, DEFAULT_CONNECT_TIMEOUT};
pub use tcp::TcpTransport;

// ============================================================================
// Transport
// ============================================================================

/// Pluggable byte-stream transport.
///
/// Implementations never block the caller: `connect` and `disconnect`
/// return immediately and report progress through the delegate.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Starts a connection attempt to `url`.
    ///
    /// Any previous attempt is torn down first. An unresolvable `url` is
    /// reported as `Failed(InvalidRequest)` and nothing else happens.
    fn connect(&self, url: &Url, options: ConnectOptions);

    /// Tears down the current attempt. Idempotent.
    fn disconnect(&self);

    /// Writes `data` to the active connection.
    ///
    /// Resolves once the bytes are handed to the socket. Write failures are
    /// reported here only, never through the delegate.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`](crate::Error::NotConnected) if there is no active connection
    /// - [`Error::ConnectionClosed`](crate::Error::ConnectionClosed) if the attempt ends first
    /// - [`Error::Io`](crate::Error::Io) if the socket write fails
    async fn write(&self, data: Vec<u8>) -> Result<()>;

    /// Replaces the delegate. Only a weak reference is kept.
    fn register(&self, delegate: Weak<dyn TransportEventClient>);

    /// Returns the TLS flag of the last accepted `connect`.
    fn uses_tls(&self) -> bool;

    /// Registers a delegate from a strong reference without taking ownership.
    fn register_delegate<D>(&self, delegate: &Arc<D>)
    where
        D: TransportEventClient + 'static,
        Self: Sized,
    {
        let weak: Weak<D> = Arc::downgrade(delegate);
        self.register(weak);
    }
}
