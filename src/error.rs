//! Error types for oakdb.

use thiserror::Error;

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by oakdb operations.
///
/// The engine recovers locally from none of these; every failure is
/// propagated to the caller. Structural corruption reported by an audit
/// leaves the file in the state it was found.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid magic, page-size/order mismatch, or a truncated file.
    #[error("format error: {0}")]
    Format(String),

    /// Rejected input: order < 4, negative id, empty path, bad fill factor.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation on a closed handle, or a page offset outside the file.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Cycle, ghost node, key-order violation, or underflow found in the tree.
    #[error("structural corruption: {0}")]
    Corruption(String),

    /// Propagated from the underlying file system.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn format(msg: impl Into<String>) -> Self {
        Error::Format(msg.into())
    }

    pub(crate) fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    pub(crate) fn invalid_state(msg: impl Into<String>) -> Self {
        Error::InvalidState(msg.into())
    }

    pub(crate) fn corruption(msg: impl Into<String>) -> Self {
        Error::Corruption(msg.into())
    }
}
