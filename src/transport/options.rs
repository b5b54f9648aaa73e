//! Per-connect options.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use stream_transport::{ConnectOptions, FingerprintPinning};
//!
//! let options = ConnectOptions::new()
//!     .with_timeout(Duration::from_secs(5))
//!     .with_pinning(Arc::new(FingerprintPinning::new()));
//!
//! assert_eq!(options.timeout, Duration::from_secs(5));
//! assert!(options.pinning.is_some());
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::pinning::CertificatePinning;

// ============================================================================
// Constants
// ============================================================================

/// Default connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// ConnectOptions
// ============================================================================

/// Options for a single `connect` call.
#[derive(Clone)]
pub struct ConnectOptions {
    /// Deadline for reaching readiness, TLS and pinning included.
    pub timeout: Duration,

    /// Validator replacing default TLS trust evaluation.
    ///
    /// Ignored for plain endpoints.
    pub pinning: Option<Arc<dyn CertificatePinning>>,
}

impl ConnectOptions {
    /// Creates options with the default timeout and no pinning.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            timeout: DEFAULT_CONNECT_TIMEOUT,
            pinning: None,
        }
    }

    /// Sets the connect timeout.
    #[inline]
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the pinning validator.
    #[inline]
    #[must_use]
    pub fn with_pinning(mut self, pinning: Arc<dyn CertificatePinning>) -> Self {
        self.pinning = Some(pinning);
        self
    }
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ConnectOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectOptions")
            .field("timeout", &self.timeout)
            .field("pinning", &self.pinning.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
