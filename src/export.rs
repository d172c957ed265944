//! Transcript export and import.
//!
//! Two formats:
//!
//! * **Structured**: `{ "messages": [ { "role", "content" }, ... ] }`, the
//!   same turn shape that is sent to the completion service. Reads back into
//!   a [`Transcript`] via [`import_structured`].
//! * **Flat**: a human-readable dump of the last captured region followed by
//!   the displayed conversation as `Q:` / `A:` lines.
//!
//! Exports are pure reads of the transcript. [`write_export`] writes a temp
//! file and renames it over the target, so a crash never leaves a truncated
//! export behind.

use crate::capture::Artifact;
use crate::error::ChatError;
use crate::prompts::NO_IMAGE_PLACEHOLDER;
use crate::transcript::{Role, Transcript, Turn};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::Path;
use tracing::info;

#[derive(Serialize)]
struct ExportRef<'a> {
    messages: &'a [Turn],
}

#[derive(Deserialize)]
struct ExportOwned {
    messages: Vec<Turn>,
}

/// Serialise the full transcript as pretty-printed JSON.
pub fn export_structured(transcript: &Transcript) -> Result<Vec<u8>, ChatError> {
    let doc = ExportRef {
        messages: transcript.to_serializable(),
    };
    Ok(serde_json::to_vec_pretty(&doc)?)
}

/// Rebuild a transcript from [`export_structured`] output.
pub fn import_structured(bytes: &[u8]) -> Result<Transcript, ChatError> {
    let doc: ExportOwned = serde_json::from_slice(bytes)
        .map_err(|e| ChatError::InvalidHistory(format!("not a transcript export: {e}")))?;
    Transcript::from_turns(doc.messages)
}

impl Transcript {
    /// Rebuild a transcript from a structured export.
    pub fn from_export(bytes: &[u8]) -> Result<Self, ChatError> {
        import_structured(bytes)
    }
}

/// Render the last captured artifact and the displayed conversation as text.
///
/// Only turns with displayed text appear: the system turn and image-only
/// turns are left out. User turns are written as `Q:`, assistant turns as
/// `A:`, in transcript order.
pub fn export_flat(transcript: &Transcript, last_artifact: Option<&Artifact>) -> Vec<u8> {
    let payload = last_artifact
        .map(|a| a.data.as_str())
        .unwrap_or(NO_IMAGE_PLACEHOLDER);

    let mut out = format!("Image (base64):\n{payload}\n\nChat Conversation:\n");
    for turn in transcript.turns() {
        let prefix = match turn.role {
            Role::System => continue,
            Role::User => "Q",
            Role::Assistant => "A",
        };
        if let Some(text) = turn.content.display_text() {
            // writing to a String cannot fail
            let _ = writeln!(out, "{prefix}: {text}");
        }
    }
    out.into_bytes()
}

/// Write export bytes to `path` atomically (temp file + rename).
pub async fn write_export(path: impl AsRef<Path>, bytes: &[u8]) -> Result<(), ChatError> {
    let path = path.as_ref();
    let failed = |source| ChatError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await.map_err(failed)?;
        }
    }

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = std::path::PathBuf::from(tmp_name);

    tokio::fs::write(&tmp_path, bytes).await.map_err(failed)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(failed)?;

    info!("Wrote export: {} ({} bytes)", path.display(), bytes.len());
    Ok(())
}
