//! Normalized connection events and the delegate that receives them.

// ============================================================================
// Imports
// ============================================================================

use crate::error::Error;

// ============================================================================
// ConnectionState
// ============================================================================

/// Event delivered to the registered [`TransportEventClient`].
///
/// Within one connection attempt `Connected` is delivered at most once and
/// before any `Receive`. `Failed` and `Cancelled` are terminal: nothing
/// follows them for that attempt.
#[derive(Debug)]
pub enum ConnectionState {
    /// Attempt is in progress. Not produced by [`TcpTransport`](crate::TcpTransport),
    /// which suppresses setup and preparation.
    Connecting,
    /// Attempt cannot currently proceed.
    Waiting(Error),
    /// Stream is ready for data, including any TLS handshake and pinning.
    Connected,
    /// Bytes read from the stream.
    Receive(Vec<u8>),
    /// Network path usability changed.
    Viability(bool),
    /// A better network path became available.
    ShouldReconnect(bool),
    /// Attempt failed.
    Failed(Error),
    /// Attempt was cancelled by `disconnect`.
    Cancelled,
}

impl ConnectionState {
    /// Returns `true` for `Failed` and `Cancelled`.
    #[inline]
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed(_) | Self::Cancelled)
    }

    /// Short name for logging.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Waiting(_) => "waiting",
            Self::Connected => "connected",
            Self::Receive(_) => "receive",
            Self::Viability(_) => "viability",
            Self::ShouldReconnect(_) => "shouldReconnect",
            Self::Failed(_) => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

// ============================================================================
// TransportEventClient
// ============================================================================

/// Consumer of transport events.
///
/// The transport keeps only a weak reference; once the delegate is dropped
/// events are silently discarded. Events are not queued for a delegate that
/// registers late.
pub trait TransportEventClient: Send + Sync {
    /// Called for every event, normally from the connection's task.
    fn connection_changed(&self, state: ConnectionState);
}

// ============================================================================
// Tests
// ============================================================================
