//! Error types for the edgequake-pdfchat library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`ChatError`] (**returned**): the requested operation did not happen
//!   (bad document bytes, zero-area selection, edit of the system turn, a
//!   second send while one is in flight). Returned as `Err(ChatError)` and the
//!   session state is left exactly as it was.
//!
//! * [`ServiceError`] (**recovered**): the remote completion call failed or
//!   timed out. It never reaches the caller of `submit`; the controller turns
//!   it into a fallback assistant turn and the session returns to `Idle`.
//!
//! Nothing here is fatal to a whole session except a document that cannot be
//! decoded, and even that only aborts the load attempt.

use crate::transcript::Role;
use std::path::PathBuf;
use thiserror::Error;

/// All errors returned to callers of the edgequake-pdfchat library.
///
/// Remote-call failures use [`ServiceError`] and are folded into the
/// transcript rather than propagated here.
#[derive(Debug, Error)]
pub enum ChatError {
    // ── Document errors ───────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// The bytes were read, but they are not a PDF.
    #[error("Input is not a PDF document (first bytes: {magic:?})")]
    NotAPdf { magic: [u8; 4] },

    /// pdfium could not decode the document bytes.
    #[error("Could not decode PDF: {detail}")]
    Decode { detail: String },

    /// Navigation past the document bounds.
    #[error("Page {page} is out of range (document has {total} pages)")]
    PageOutOfRange { page: usize, total: usize },

    /// pdfium-render returned an error for a specific page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    // ── Capture errors ────────────────────────────────────────────────────
    /// The drawn rectangle has no area.
    #[error("Selection is empty ({width}x{height} px); drag a rectangle over the drawing")]
    EmptySelection { width: u32, height: u32 },

    /// No page raster is available to capture from.
    #[error("No rendered page is available to capture from")]
    NothingRendered,

    /// PNG encoding of the captured region failed.
    #[error("Image encoding failed: {0}")]
    ImageEncode(String),

    // ── Transcript errors ─────────────────────────────────────────────────
    /// Index does not address a turn.
    #[error("Turn {index} not found (transcript has {len} turns)")]
    TurnNotFound { index: usize, len: usize },

    /// The system turn at index 0 cannot be edited.
    #[error("Turn {index} is the system turn and cannot be edited")]
    ImmutableTurn { index: usize },

    /// Only assistant turns carry an edit affordance.
    #[error("Turn {index} is a {role} turn; only assistant turns can be edited")]
    NotEditable { index: usize, role: Role },

    /// A structured history could not be restored.
    #[error("Invalid transcript history: {0}")]
    InvalidHistory(String),

    // ── Session errors ────────────────────────────────────────────────────
    /// Nothing to send: no text and no captured region.
    #[error("Nothing to send: type a message or capture a region first")]
    EmptyInput,

    /// A request is already in flight.
    #[error("A request is already in flight; wait for the reply")]
    Busy,

    /// A completion arrived while no request was in flight.
    #[error("No request is in flight")]
    NotSending,

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write an export file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Export serialisation failed.
    #[error("Export failed: {0}")]
    Export(#[from] serde_json::Error),

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Pdfium binding errors ─────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Set PDFIUM_LIB_PATH=/path/to/dir/containing/libpdfium, or install pdfium\n\
system-wide so it is found on the default library search path.\n"
    )]
    PdfiumBindingFailed(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A recovered failure of the remote completion call.
///
/// The `Display` text is diagnostic and goes to the logs; the transcript
/// receives [`ServiceError::user_message`] instead.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
pub enum ServiceError {
    /// Provider call failed after retries.
    #[error("completion call failed after {retries} retries: {detail}")]
    Api { retries: u32, detail: String },

    /// Provider answered, but with nothing usable.
    #[error("completion returned an empty reply")]
    EmptyReply,

    /// No answer within the request timeout.
    #[error("completion timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The caller stopped waiting before the call settled.
    #[error("completion was abandoned before it finished")]
    Cancelled,
}

impl ServiceError {
    /// The fallback text appended to the transcript as an assistant turn.
    pub fn user_message(&self) -> &'static str {
        match self {
            ServiceError::Api { .. } | ServiceError::Cancelled => {
                crate::prompts::FALLBACK_SERVICE_ERROR
            }
            ServiceError::EmptyReply => crate::prompts::FALLBACK_EMPTY_REPLY,
            ServiceError::Timeout { .. } => crate::prompts::FALLBACK_TIMEOUT,
        }
    }
}
