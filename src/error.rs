//! Error types for archive inspection.
//!
//! One [`Error`] enum covers every failure an inspection can produce.
//! Running out of bytes mid-walk ([`Error::Truncated`]) is the only
//! condition callers are expected to absorb: deliberately truncated
//! fragments are ordinary input, not corruption. Everything else surfaces
//! to the caller and leaves the operation's partial state discarded.

use std::io;
use thiserror::Error;

/// Error type for all archive inspection operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The archive path does not exist.
    #[error("file not found: {0}")]
    NotFound(String),

    /// No marker signature was found and the source is not a fragment.
    #[error("not a valid archive: {0}")]
    InvalidFormat(String),

    /// Ran out of bytes before a structurally required field was complete.
    ///
    /// Recoverable while walking blocks (the walk stops and keeps what it
    /// has); fatal if it happens before a single full block was read.
    #[error("unexpected end of data at offset {offset}")]
    Truncated {
        /// Window-relative offset where the read started.
        offset: u64,
    },

    /// A decoded block failed to advance the stream offset.
    ///
    /// This is the structural corruption guard: without it a malformed
    /// header with a zero size would loop the walk forever.
    #[error("parsing is stuck at offset {offset}")]
    Stuck {
        /// Window-relative offset of the non-advancing block.
        offset: u64,
    },

    /// A caller-supplied byte range is malformed or outside the medium.
    #[error("invalid byte range: {0}")]
    RangeInvalid(String),

    /// The operation needs capabilities this crate deliberately lacks,
    /// e.g. reading a compressed or passworded nested archive.
    #[error("{0}")]
    Unsupported(String),

    /// No external decompression client has been configured.
    #[error("no external client configured")]
    ExternalToolUnavailable,

    /// The external decompression client ran but did not succeed.
    #[error("external client failed: {0}")]
    ExternalToolFailed(String),

    /// An underlying I/O error.
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
