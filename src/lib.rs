//! # edgequake-pdfchat
//!
//! Discuss engineering drawings with a vision language model (VLM).
//!
//! ## Why this crate?
//!
//! A drawing sheet is far too dense to send whole: a 1.5x raster of an A1
//! sheet buries the one detail the user cares about in millions of pixels.
//! Instead the user frames a region on the rendered page, the region is
//! cropped out of the raster losslessly, and the question goes to the model
//! together with that crop and the conversation so far.
//!
//! ## Session Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Viewer     open file/URL, render page at scale (pdfium, spawn_blocking)
//!  ├─ 2. Capture    drag rectangle → raster pixels → PNG → base64 artifact
//!  ├─ 3. Controller Submit → user turn → Dispatch(request) → reply / fallback turn
//!  ├─ 4. Service    full transcript → edgequake-llm provider (retry + timeout)
//!  ├─ 5. Project    transcript → bubbles (typeset cleanup on replies)
//!  └─ 6. Export     structured JSON (round-trips) or flat Q/A text
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_pdfchat::{ChatSession, DisplaySize, DragGesture, Point, SessionConfig, Viewer};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
//!     let config = SessionConfig::default();
//!     let mut viewer = Viewer::open("bracket.pdf", &config).await?;
//!     viewer.ensure_rendered().await?;
//!
//!     let mut drag = DragGesture::start(Point::new(120.0, 80.0));
//!     drag.update(Point::new(420.0, 300.0));
//!     let (w, h) = viewer.state().raster_size.unwrap_or((0, 0));
//!     let display = DisplaySize { width: w as f32, height: h as f32 };
//!
//!     let mut session = ChatSession::from_config(&config)?;
//!     session.attach(viewer.capture(drag, display)?)?;
//!     session.submit("What is the tolerance on this bore?").await?;
//!     for bubble in session.bubbles() {
//!         println!("{}: {}", bubble.speaker, bubble.text.unwrap_or_default());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature  | Default | Description |
//! |----------|---------|-------------|
//! | `cli`    | on      | Enables the `pdfchat` binary (clap + anyhow + tracing-subscriber) |
//! | `server` | on      | Enables the `/api/chat` HTTP surface (axum + tower-http) |
//!
//! Disable both when using only the library:
//! ```toml
//! edgequake-pdfchat = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod capture;
pub mod config;
pub mod error;
pub mod export;
pub mod projection;
pub mod prompts;
#[cfg(feature = "server")]
pub mod server;
pub mod session;
pub mod transcript;
pub mod viewer;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use capture::{Artifact, DisplaySize, DragGesture, PixelRect, Point};
pub use config::{PayloadPolicy, SessionConfig, SessionConfigBuilder};
pub use error::{ChatError, ServiceError};
pub use export::{export_flat, export_structured, import_structured, write_export};
pub use projection::{project, Bubble};
pub use session::{
    ChatSession, CompletionRequest, CompletionService, Effect, Intent, LlmCompletionService,
    SessionController, SessionState,
};
pub use transcript::{Content, Part, Role, Transcript, Turn};
pub use viewer::{RenderQueue, RenderRequest, ViewState, Viewer};
