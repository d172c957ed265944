//! Configuration types for a drawing chat session.
//!
//! All session behaviour is controlled through [`SessionConfig`], built via
//! its [`SessionConfigBuilder`]. Viewer bounds, completion options and the
//! request payload policy live in one struct so the CLI, the HTTP endpoint and
//! library callers share the same defaults.

use crate::error::ChatError;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Default vision model when none is configured.
pub const DEFAULT_MODEL: &str = "gpt-4o";

/// Configuration for a chat session over one PDF drawing.
///
/// Built via [`SessionConfig::builder()`] or using
/// [`SessionConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_pdfchat::{PayloadPolicy, SessionConfig};
///
/// let config = SessionConfig::builder()
///     .model("gpt-4o")
///     .request_timeout_secs(30)
///     .payload_policy(PayloadPolicy::FullTranscript)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct SessionConfig {
    /// LLM model identifier, e.g. "gpt-4o", "claude-sonnet-4-20250514".
    /// If None, uses [`DEFAULT_MODEL`].
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    /// If None along with `provider`, the provider is auto-detected.
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature for the completion. Default: 0.0.
    ///
    /// Readings of dimensions and tolerances should be reproducible; the same
    /// region and question ought to produce the same answer.
    pub temperature: f32,

    /// Maximum tokens the model may generate per reply. Default: 2048.
    pub max_tokens: usize,

    /// Retry attempts on a failed completion call. Default: 2.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds (exponential backoff). Default: 500.
    pub retry_backoff_ms: u64,

    /// Upper bound on one logical request, retries included. Default: 60.
    ///
    /// When it expires the session records a timeout reply and becomes usable
    /// again instead of staying in `Sending` forever.
    pub request_timeout_secs: u64,

    /// Custom system prompt. If None, uses the built-in default.
    pub system_prompt: Option<String>,

    /// Which turns are sent with each request. Default: [`PayloadPolicy::FullTranscript`].
    pub payload_policy: PayloadPolicy,

    /// Zoom scale used when a document is first opened. Default: 1.5.
    pub initial_scale: f32,

    /// Lower zoom bound. Default: 0.25.
    pub min_scale: f32,

    /// Upper zoom bound. Default: 5.0.
    pub max_scale: f32,

    /// Multiplicative step for zoom in / zoom out. Default: 1.25.
    pub zoom_step: f32,

    /// Label shown for assistant turns in the projection. Default: "Gaudi".
    pub assistant_name: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.0,
            max_tokens: 2048,
            max_retries: 2,
            retry_backoff_ms: 500,
            request_timeout_secs: 60,
            system_prompt: None,
            payload_policy: PayloadPolicy::default(),
            initial_scale: 1.5,
            min_scale: 0.25,
            max_scale: 5.0,
            zoom_step: 1.25,
            assistant_name: "Gaudi".to_string(),
        }
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("payload_policy", &self.payload_policy)
            .field("initial_scale", &self.initial_scale)
            .field("min_scale", &self.min_scale)
            .field("max_scale", &self.max_scale)
            .finish()
    }
}

impl SessionConfig {
    /// Create a new builder for `SessionConfig`.
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder {
            config: Self::default(),
        }
    }

    /// The model id to request, falling back to [`DEFAULT_MODEL`].
    pub fn model_or_default(&self) -> &str {
        self.model.as_deref().unwrap_or(DEFAULT_MODEL)
    }

    /// The system prompt that becomes turn 0.
    pub fn system_prompt_or_default(&self) -> &str {
        self.system_prompt
            .as_deref()
            .unwrap_or(crate::prompts::DEFAULT_SYSTEM_PROMPT)
    }

    /// Clamp a requested zoom scale into the configured bounds.
    pub fn clamp_scale(&self, scale: f32) -> f32 {
        if !scale.is_finite() {
            return self.initial_scale;
        }
        scale.clamp(self.min_scale, self.max_scale)
    }
}

/// Builder for [`SessionConfig`].
#[derive(Debug)]
pub struct SessionConfigBuilder {
    config: SessionConfig,
}

impl SessionConfigBuilder {
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = secs;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn payload_policy(mut self, policy: PayloadPolicy) -> Self {
        self.config.payload_policy = policy;
        self
    }

    pub fn initial_scale(mut self, scale: f32) -> Self {
        self.config.initial_scale = scale;
        self
    }

    pub fn scale_bounds(mut self, min: f32, max: f32) -> Self {
        self.config.min_scale = min;
        self.config.max_scale = max;
        self
    }

    pub fn zoom_step(mut self, step: f32) -> Self {
        self.config.zoom_step = step;
        self
    }

    pub fn assistant_name(mut self, name: impl Into<String>) -> Self {
        self.config.assistant_name = name.into();
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<SessionConfig, ChatError> {
        let c = &self.config;
        if !(c.min_scale > 0.0 && c.min_scale <= c.max_scale) {
            return Err(ChatError::InvalidConfig(format!(
                "scale bounds must satisfy 0 < min <= max, got {}..{}",
                c.min_scale, c.max_scale
            )));
        }
        if !(c.min_scale..=c.max_scale).contains(&c.initial_scale) {
            return Err(ChatError::InvalidConfig(format!(
                "initial scale {} is outside {}..{}",
                c.initial_scale, c.min_scale, c.max_scale
            )));
        }
        if c.zoom_step <= 1.0 {
            return Err(ChatError::InvalidConfig(format!(
                "zoom step must be > 1.0, got {}",
                c.zoom_step
            )));
        }
        if c.request_timeout_secs == 0 {
            return Err(ChatError::InvalidConfig(
                "request timeout must be ≥ 1s".into(),
            ));
        }
        if c.max_tokens == 0 {
            return Err(ChatError::InvalidConfig("max tokens must be ≥ 1".into()));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Which turns of the transcript are sent with each completion request.
///
/// The choice changes conversational memory: with `LatestTurn` the model
/// forgets earlier questions and earlier captured regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PayloadPolicy {
    /// Every turn, system turn first, in store order. (default)
    #[default]
    FullTranscript,
    /// The system turn plus the user turn just submitted.
    LatestTurn,
}
