//! Read loop buffering.
//!
//! The connection task reads in an explicit loop rather than resubmitting a
//! callback. Each iteration issues one cancel-safe `read` into a
//! [`ReadBuffer`]; a chunk is handed out once at least [`MIN_READ`] bytes
//! are buffered, or whatever is buffered when the stream ends. Chunks never
//! exceed the configured maximum.

// ============================================================================
// Imports
// ============================================================================

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt};

// ============================================================================
// Constants
// ============================================================================

/// Smallest chunk delivered while the stream is open.
pub const MIN_READ: usize = 2;

/// Default largest chunk delivered.
pub const MAX_READ: usize = 4096;

// ============================================================================
// ReadOutcome
// ============================================================================

/// Result of one read iteration.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ReadOutcome {
    /// A chunk is ready for delivery; keep reading.
    Chunk(Vec<u8>),
    /// Not enough buffered yet; keep reading.
    Pending,
    /// Stream is final and complete. `Some` carries a trailing partial chunk.
    Finished(Option<Vec<u8>>),
}

// ============================================================================
// ReadBuffer
// ============================================================================

/// Accumulates reads into chunks of `MIN_READ..=max` bytes.
#[derive(Debug)]
pub(crate) struct ReadBuffer {
    buf: Box<[u8]>,
    filled: usize,
}

impl ReadBuffer {
    /// Creates a buffer delivering chunks of at most `max` bytes.
    pub(crate) fn new(max: usize) -> Self {
        Self {
            buf: vec![0; max.max(MIN_READ)].into_boxed_slice(),
            filled: 0,
        }
    }

    /// Reads once from `reader`.
    ///
    /// Cancel-safe: bytes already buffered survive a dropped future.
    pub(crate) async fn read_from<R>(&mut self, reader: &mut R) -> io::Result<ReadOutcome>
    where
        R: AsyncRead + Unpin,
    {
        let n = reader.read(&mut self.buf[self.filled..]).await?;
        Ok(self.advance(n))
    }

    /// Accounts for `n` freshly read bytes.
    fn advance(&mut self, n: usize) -> ReadOutcome {
        if n == 0 {
            let rest = self.take();
            return ReadOutcome::Finished((!rest.is_empty()).then_some(rest));
        }

        self.filled += n;
        if self.filled >= MIN_READ {
            ReadOutcome::Chunk(self.take())
        } else {
            ReadOutcome::Pending
        }
    }

    fn take(&mut self) -> Vec<u8> {
        let chunk = self.buf[..self.filled].to_vec();
        self.filled = 0;
        chunk
    }
}

// ============================================================================
// Tests
// ============================================================================
