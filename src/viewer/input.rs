//! Input resolution: turn a user-supplied path or URL into document bytes.
//!
//! pdfium decodes from an in-memory buffer, so both local files and HTTP(S)
//! downloads end up as a `Vec<u8>`. The PDF magic bytes (`%PDF`) are checked
//! before anything reaches pdfium so a wrong file type produces a meaningful
//! error instead of an opaque decode failure.

use crate::error::ChatError;
use std::path::PathBuf;
use tracing::{debug, info};

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Read the document named by `input`, downloading it if it is a URL.
pub async fn load_document_bytes(input: &str, timeout_secs: u64) -> Result<Vec<u8>, ChatError> {
    if input.trim().is_empty() {
        return Err(ChatError::InvalidInput {
            input: input.to_string(),
        });
    }
    let bytes = if is_url(input) {
        download_url(input, timeout_secs).await?
    } else {
        read_local(input).await?
    };
    check_pdf_magic(&bytes)?;
    Ok(bytes)
}

/// Reject buffers that do not start with `%PDF`.
pub fn check_pdf_magic(bytes: &[u8]) -> Result<(), ChatError> {
    if bytes.len() < 4 || &bytes[..4] != b"%PDF" {
        let mut magic = [0u8; 4];
        let n = bytes.len().min(4);
        magic[..n].copy_from_slice(&bytes[..n]);
        return Err(ChatError::NotAPdf { magic });
    }
    Ok(())
}

async fn read_local(path_str: &str) -> Result<Vec<u8>, ChatError> {
    let path = PathBuf::from(path_str);
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|_| ChatError::FileNotFound { path: path.clone() })?;
    debug!("Read local PDF: {} ({} bytes)", path.display(), bytes.len());
    Ok(bytes)
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<Vec<u8>, ChatError> {
    info!("Downloading PDF from: {}", url);

    let failed = |reason: String| ChatError::DownloadFailed {
        url: url.to_string(),
        reason,
    };

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| failed(e.to_string()))?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            failed(format!("timed out after {timeout_secs}s"))
        } else {
            failed(e.to_string())
        }
    })?;

    if !response.status().is_success() {
        return Err(failed(format!("HTTP {}", response.status())));
    }

    let bytes = response.bytes().await.map_err(|e| failed(e.to_string()))?;
    info!("Downloaded {} bytes", bytes.len());
    Ok(bytes.to_vec())
}
