//! Certificate pinning.
//!
//! A [`CertificatePinning`] validator replaces the default trust evaluation
//! of a TLS handshake. The transport hands it the peer's [`TrustChain`] and
//! the domain being connected to, then holds readiness until the validator
//! answers through the [`PinningCompletion`] it was given.
//!
//! # Exactly-once completion
//!
//! [`PinningCompletion::complete`] takes `self` by value, so a handle can
//! answer at most once. A handle dropped without answering resolves as
//! [`PinningDecision::Rejected`], so it answers at least once as well. A
//! validator that holds on to the handle forever stalls the connect attempt
//! until its timeout fires.
//!
//! # Example
//!
//! ```
//! use stream_transport::{CertificatePinning, PinningCompletion, PinningDecision, TrustChain};
//!
//! struct AllowInternal;
//!
//! impl CertificatePinning for AllowInternal {
//!     fn evaluate(&self, _chain: TrustChain, domain: &str, completion: PinningCompletion) {
//!         let decision = if domain.ends_with(".internal") {
//!             PinningDecision::Accepted
//!         } else {
//!             PinningDecision::Rejected
//!         };
//!         completion.complete(decision);
//!     }
//! }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::collections::HashSet;
use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rustls::pki_types::CertificateDer;
use sha2::{Digest, Sha256};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Prefix of textual SHA-256 pins.
const SHA256_PIN_PREFIX: &str = "sha256/";

// ============================================================================
// PinningDecision
// ============================================================================

/// Outcome of a pinning evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinningDecision {
    /// Peer is trusted; the handshake may complete.
    Accepted,
    /// Peer is not trusted; the attempt fails.
    Rejected,
}

impl PinningDecision {
    /// Returns `true` if the peer was accepted.
    #[inline]
    #[must_use]
    pub const fn is_accepted(self) -> bool {
        matches!(self, Self::Accepted)
    }
}

// ============================================================================
// TrustChain
// ============================================================================

/// Certificates presented by the peer, leaf first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrustChain {
    certificates: Vec<CertificateDer<'static>>,
}

impl TrustChain {
    /// Creates a chain from DER certificates, leaf first.
    #[inline]
    #[must_use]
    pub fn new(certificates: Vec<CertificateDer<'static>>) -> Self {
        Self { certificates }
    }

    /// Returns the end-entity certificate.
    #[inline]
    #[must_use]
    pub fn leaf(&self) -> Option<&CertificateDer<'static>> {
        self.certificates.first()
    }

    /// Returns the number of certificates.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.certificates.len()
    }

    /// Returns `true` if the peer presented no certificates.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.certificates.is_empty()
    }

    /// Iterates the certificates, leaf first.
    pub fn iter(&self) -> impl Iterator<Item = &CertificateDer<'static>> {
        self.certificates.iter()
    }
}

// ============================================================================
// PinningCompletion
// ============================================================================

/// Single-use handle a validator answers through.
///
/// `Send`, so it can be completed from any thread or task.
pub struct PinningCompletion {
    tx: Option<oneshot::Sender<PinningDecision>>,
}

/// Receiving side of a [`PinningCompletion`].
pub(crate) type PendingDecision = oneshot::Receiver<PinningDecision>;

impl PinningCompletion {
    /// Creates a completion handle and the receiver the transport awaits.
    pub(crate) fn channel() -> (Self, PendingDecision) {
        let (tx, rx) = oneshot::channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// Delivers the decision to the waiting handshake.
    pub fn complete(mut self, decision: PinningDecision) {
        if let Some(tx) = self.tx.take() {
            // Receiver is gone if the attempt was cancelled meanwhile.
            let _ = tx.send(decision);
        }
    }
}

impl Drop for PinningCompletion {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            warn!("Pinning completion dropped without a decision, rejecting");
            let _ = tx.send(PinningDecision::Rejected);
        }
    }
}

impl fmt::Debug for PinningCompletion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PinningCompletion")
            .field("pending", &self.tx.is_some())
            .finish()
    }
}

// ============================================================================
// CertificatePinning
// ============================================================================

/// Application-supplied trust decision for TLS peers.
///
/// Called at most once per handshake, from the connection's task. The
/// validator may answer synchronously or hand `completion` to another task.
pub trait CertificatePinning: Send + Sync {
    /// Evaluates `chain` for `domain` and answers through `completion`.
    fn evaluate(&self, chain: TrustChain, domain: &str, completion: PinningCompletion);
}

// ============================================================================
// FingerprintPinning
// ============================================================================

/// Accepts peers whose chain contains a certificate with a pinned SHA-256
/// fingerprint.
#[derive(Debug, Clone, Default)]
pub struct FingerprintPinning {
    pins: HashSet<[u8; 32]>,
}

impl FingerprintPinning {
    /// Creates a validator with no pins. It rejects every peer.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a raw SHA-256 digest of a DER certificate.
    #[inline]
    #[must_use]
    pub fn with_digest(mut self, digest: [u8; 32]) -> Self {
        self.pins.insert(digest);
        self
    }

    /// Pins a certificate by computing its fingerprint.
    #[inline]
    #[must_use]
    pub fn with_certificate(self, certificate: &CertificateDer<'_>) -> Self {
        self.with_digest(fingerprint(certificate))
    }

    /// Adds a pin in `sha256/<base64>` form.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the prefix is missing, the base64 is
    /// invalid, or the digest is not 32 bytes.
    pub fn with_pin(mut self, pin: &str) -> Result<Self> {
        let encoded = pin
            .strip_prefix(SHA256_PIN_PREFIX)
            .ok_or_else(|| Error::config(format!("pin must start with {SHA256_PIN_PREFIX}: {pin}")))?;

        let bytes = STANDARD
            .decode(encoded)
            .map_err(|e| Error::config(format!("invalid base64 in pin {pin}: {e}")))?;

        let digest: [u8; 32] = bytes.try_into().map_err(|bytes: Vec<u8>| {
            Error::config(format!("pin digest must be 32 bytes, got {}", bytes.len()))
        })?;

        self.pins.insert(digest);
        Ok(self)
    }

    /// Returns the number of pins.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.pins.len()
    }

    /// Returns `true` if no pins are configured.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pins.is_empty()
    }

    /// Checks `chain` against the pin set.
    #[must_use]
    pub fn matches(&self, chain: &TrustChain) -> bool {
        chain.iter().any(|cert| self.pins.contains(&fingerprint(cert)))
    }
}

impl CertificatePinning for FingerprintPinning {
    fn evaluate(&self, chain: TrustChain, domain: &str, completion: PinningCompletion) {
        let decision = if self.matches(&chain) {
            PinningDecision::Accepted
        } else {
            PinningDecision::Rejected
        };

        debug!(domain, chain_len = chain.len(), ?decision, "Fingerprint pinning evaluated");
        completion.complete(decision);
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Returns the SHA-256 digest of a DER certificate.
#[must_use]
pub fn fingerprint(certificate: &CertificateDer<'_>) -> [u8; 32] {
    Sha256::digest(certificate.as_ref()).into()
}

/// Formats a certificate's fingerprint as a `sha256/<base64>` pin.
#[must_use]
pub fn pin_for(certificate: &CertificateDer<'_>) -> String {
    format!("{SHA256_PIN_PREFIX}{}", STANDARD.encode(fingerprint(certificate)))
}

// ============================================================================
// Tests
// ============================================================================
