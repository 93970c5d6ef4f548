//! Error types for the overlay.
//!
//! Structural and validity errors (`NotFound`, `AlreadyExists`, `Unavailable`,
//! `NoPermissions`) are raised before any remote call is attempted. Remote
//! failures carry the service's message and detail payload through verbatim.

use thiserror::Error;

/// Overlay error kinds
#[derive(Debug, Error)]
pub enum OverlayError {
    /// The path does not classify to an existing node or the remote lookup came back empty.
    #[error("not found: {0}")]
    NotFound(String),

    /// A write/rename target collides with an existing part or item.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// The operation is not structurally supported at this node kind.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// Mutation attempted on a read-only overlay.
    #[error("no permissions: {0}")]
    NoPermissions(String),

    /// The remote service returned a non-success response.
    #[error("remote error: {message}")]
    Remote {
        message: String,
        detail: Option<String>,
    },

    /// Configuration problem (bad registry entry, invalid log directive, ...).
    #[error("configuration error: {0}")]
    Config(String),

    /// A part payload failed to decode.
    #[error("decode error: {0}")]
    Decode(String),

    /// Transport-level HTTP failure before a remote response was obtained.
    #[error("transport error: {0}")]
    Http(#[from] reqwest::Error),
}

impl OverlayError {
    /// Build a `Remote` error from a message and an optional raw detail payload.
    pub fn remote(message: impl Into<String>, detail: Option<String>) -> Self {
        OverlayError::Remote {
            message: message.into(),
            detail,
        }
    }
}
