//! Connection state machine.
//!
//! Translates lifecycle notifications from the underlying socket into
//! [`ConnectionState`] events:
//!
//! ```text
//! Setup / Preparing     -> (suppressed)
//! Ready                 -> cancel timeout guard, Connected
//! Waiting(reason)       -> Waiting(reason)
//! Failed(reason)        -> Failed(reason)            [terminal]
//! Cancelled             -> Cancelled                 [terminal]
//! ViabilityChanged(v)   -> Viability(v)
//! BetterPath(b)         -> ShouldReconnect(b)
//! ```
//!
//! Once terminal, every further notification is swallowed. A second
//! `Ready` is swallowed too, so `Connected` is emitted at most once.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use crate::error::Error;

use super::event::ConnectionState;

// ============================================================================
// SocketState
// ============================================================================

/// Lifecycle notification from the underlying socket.
#[derive(Debug)]
pub(crate) enum SocketState {
    /// Attempt created, nothing dialed yet.
    Setup,
    /// Resolving, dialing or handshaking.
    Preparing,
    /// Usable for data.
    Ready,
    /// Cannot currently proceed; the attempt continues.
    Waiting(Error),
    /// Attempt failed.
    Failed(Error),
    /// Attempt cancelled locally.
    Cancelled,
    /// Path usability changed. Not reported by tokio sockets.
    #[cfg_attr(not(test), allow(dead_code))]
    ViabilityChanged(bool),
    /// A preferable path appeared. Not reported by tokio sockets.
    #[cfg_attr(not(test), allow(dead_code))]
    BetterPath(bool),
}

// ============================================================================
// Transition
// ============================================================================

/// Result of feeding one notification to the [`StateMachine`].
#[derive(Debug)]
pub(crate) struct Transition {
    /// The timeout guard must be released before `event` is delivered.
    pub cancel_timeout: bool,
    /// Event to deliver, if any.
    pub event: Option<ConnectionState>,
}

impl Transition {
    const fn none() -> Self {
        Self {
            cancel_timeout: false,
            event: None,
        }
    }

    const fn emit(event: ConnectionState) -> Self {
        Self {
            cancel_timeout: false,
            event: Some(event),
        }
    }
}

// ============================================================================
// StateMachine
// ============================================================================

/// Per-attempt translation state.
#[derive(Debug, Default)]
pub(crate) struct StateMachine {
    ready: bool,
    terminated: bool,
}

impl StateMachine {
    /// Creates a machine for a fresh attempt.
    #[inline]
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Returns `true` once `Ready` has been seen.
    #[inline]
    pub(crate) const fn is_ready(&self) -> bool {
        self.ready
    }

    /// Returns `true` once a terminal event has been emitted.
    #[inline]
    pub(crate) const fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Feeds a socket notification.
    pub(crate) fn apply(&mut self, state: SocketState) -> Transition {
        if self.terminated {
            return Transition::none();
        }

        match state {
            SocketState::Setup | SocketState::Preparing => Transition::none(),
            SocketState::Ready => {
                if self.ready {
                    return Transition::none();
                }
                self.ready = true;
                Transition {
                    cancel_timeout: true,
                    event: Some(ConnectionState::Connected),
                }
            }
            SocketState::Waiting(reason) => Transition::emit(ConnectionState::Waiting(reason)),
            SocketState::Failed(reason) => {
                self.terminated = true;
                Transition {
                    cancel_timeout: true,
                    event: Some(ConnectionState::Failed(reason)),
                }
            }
            SocketState::Cancelled => {
                self.terminated = true;
                Transition {
                    cancel_timeout: true,
                    event: Some(ConnectionState::Cancelled),
                }
            }
            SocketState::ViabilityChanged(viable) => {
                Transition::emit(ConnectionState::Viability(viable))
            }
            SocketState::BetterPath(better) => {
                Transition::emit(ConnectionState::ShouldReconnect(better))
            }
        }
    }

    /// Handles the timeout guard firing.
    ///
    /// Synthesizes `Failed(ConnectionTimeout)` through the normal failure
    /// path unless readiness was already reached.
    pub(crate) fn on_timeout(&mut self, timeout: Duration) -> Transition {
        if self.ready {
            return Transition::none();
        }
        let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self.apply(SocketState::Failed(Error::connection_timeout(timeout_ms)))
    }

    /// Wraps inbound bytes, dropping them outside the ready, non-terminal window.
    pub(crate) fn on_data(&self, bytes: Vec<u8>) -> Option<ConnectionState> {
        (self.ready && !self.terminated && !bytes.is_empty()).then_some(ConnectionState::Receive(bytes))
    }
}

// ============================================================================
// Tests
// ============================================================================
