//! Prompts and canned transcript messages.
//!
//! The default system prompt becomes turn 0 of every transcript. Callers can
//! override it via [`crate::config::SessionConfig::system_prompt`]; the
//! constants here are used only when no override is provided.
//!
//! The fallback messages are what the user sees in place of an assistant reply
//! when the remote call fails. They never include provider diagnostics.

/// Default system prompt for discussing engineering drawings.
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are an experienced mechanical and structural engineer reviewing engineering drawings with a colleague.

The user may attach an image cropped from a drawing page. Treat it as a region of a larger sheet.

1. READING THE DRAWING
   - Read dimensions, tolerances, datums, section and detail callouts exactly as drawn
   - Identify the title block, revision, scale and units when they are visible
   - Say so when text is too small or ambiguous to read rather than guessing

2. CALCULATIONS
   - Show the formula, the substituted values and the result with units
   - Render mathematical expressions using LaTeX: $inline$ and $$display$$

3. ANSWERS
   - Answer the question that was asked; keep it concise
   - Refer back to earlier images in the conversation when the user does"#;

/// Shown when the completion call failed after retries.
pub const FALLBACK_SERVICE_ERROR: &str = "Error communicating with the server.";

/// Shown when the completion call returned no usable reply.
pub const FALLBACK_EMPTY_REPLY: &str = "Sorry, I could not process your request.";

/// Shown when the completion call did not answer within the request timeout.
pub const FALLBACK_TIMEOUT: &str =
    "The assistant took too long to respond. Please try again.";

/// Placeholder written by the flat export when nothing has been captured.
pub const NO_IMAGE_PLACEHOLDER: &str = "No image captured";
