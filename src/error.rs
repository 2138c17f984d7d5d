//! Error types for the refmind library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`AttachmentError`] — **Recovered locally**: a candidate attachment could
//!   not be read (malformed data URI, undecodable base64, no readable path, no
//!   PDF at all). The resolver logs it and moves on to the next candidate; in
//!   the worst case the question is sent as text only.
//!
//! * [`AskError`] — **Surfaced**: the question itself cannot be answered
//!   (missing API key, empty prompt, provider rejected the call, connection
//!   failed). Returned as `Err(AskError)` from [`crate::ask::Assistant::ask`]
//!   and rendered as `Error: <details>` by the composer and dialog.

use std::path::PathBuf;
use thiserror::Error;

/// Boxed error used for connection-level failures, kept unmodified.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// All surfaced errors returned by the refmind library.
///
/// Attachment-level failures use [`AttachmentError`] and never reach the
/// caller through this type.
#[derive(Debug, Error)]
pub enum AskError {
    // ── Pre-flight errors ─────────────────────────────────────────────────
    /// No API key was supplied.
    #[error("Missing API key.\nSet it in the preferences (llmKey) or pass --api-key.")]
    Auth,

    /// The prompt was empty after trimming.
    #[error("Prompt is empty: {0}")]
    Validation(String),

    // ── Transport errors ──────────────────────────────────────────────────
    /// The provider answered with a non-2xx status.
    ///
    /// Displays exactly the provider-supplied (or synthesised) message.
    #[error("{message}")]
    Transport { status: u16, message: String },

    /// The request never produced an HTTP response (refused, DNS, TLS, …).
    #[error("Network error: {source}")]
    Network {
        #[source]
        source: BoxError,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A stored preference could not be interpreted.
    #[error("Preference '{key}' has an invalid value '{value}'")]
    Preference { key: String, value: String },

    // ── Note errors ───────────────────────────────────────────────────────
    /// The host could not create, load or save a chat note.
    #[error("Chat note error: {0}")]
    Note(String),

    /// Could not create or write an output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A recoverable failure while locating or reading one attachment.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttachmentError {
    /// Malformed data URI or base64 alphabet violation.
    #[error("Malformed base64 payload: {0}")]
    Format(String),

    /// The base64 decoder rejected the payload.
    #[error("Base64 payload does not decode: {0}")]
    Decode(String),

    /// No readable path or binary-read API for the attachment.
    #[error("Attachment {key} could not be read: {detail}")]
    Io { key: String, detail: String },

    /// No PDF attachment could be located.
    #[error("No PDF attachment found for item {item}")]
    NotFound { item: String },
}
