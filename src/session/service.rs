//! Completion service: send the transcript to a vision model, get one reply.
//!
//! The session only depends on the [`CompletionService`] trait. The
//! production implementation, [`LlmCompletionService`], maps turns onto
//! edgequake-llm chat messages and retries transient failures; tests plug in
//! a scripted implementation instead.
//!
//! ## Retry Strategy
//!
//! Rate limits and gateway errors are transient. Each failed attempt is
//! retried after `retry_backoff_ms * 2^(attempt-1)`, so with 500 ms base and 2
//! retries the waits are 500 ms → 1 s. The whole sequence is bounded by the
//! session's request timeout, not by this module.

use crate::config::SessionConfig;
use crate::error::{ChatError, ServiceError};
use crate::transcript::{Content, Part, Role, Turn};
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use futures::future::BoxFuture;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

/// The payload of one completion call: an ordered list of turns starting with
/// the system turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionRequest {
    pub messages: Vec<Turn>,
}

impl CompletionRequest {
    pub fn image_count(&self) -> usize {
        self.messages.iter().map(|t| t.content.image_count()).sum()
    }
}

/// Anything that can turn a list of turns into one assistant reply.
pub trait CompletionService: Send + Sync {
    /// Produce the reply text for `request`.
    ///
    /// Implementations return the reply trimmed, and
    /// [`ServiceError::EmptyReply`] when nothing is left after trimming.
    fn complete<'a>(
        &'a self,
        request: &'a CompletionRequest,
    ) -> BoxFuture<'a, Result<String, ServiceError>>;
}

/// [`CompletionService`] backed by an edgequake-llm provider.
pub struct LlmCompletionService {
    provider: Arc<dyn LLMProvider>,
    options: CompletionOptions,
    max_retries: u32,
    retry_backoff_ms: u64,
}

impl LlmCompletionService {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &SessionConfig) -> Self {
        Self {
            provider,
            options: build_options(config),
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
        }
    }

    /// Resolve a provider from `config` and the environment.
    pub fn from_config(config: &SessionConfig) -> Result<Self, ChatError> {
        let provider = resolve_provider(config)?;
        Ok(Self::new(provider, config))
    }

    async fn complete_with_retries(&self, request: &CompletionRequest) -> Result<String, ServiceError> {
        let start = Instant::now();
        let messages: Vec<ChatMessage> = request.messages.iter().map(to_chat_message).collect();
        let mut last_err: Option<String> = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = self.retry_backoff_ms * 2u64.pow(attempt - 1);
                warn!(
                    "Completion: retry {}/{} after {}ms",
                    attempt, self.max_retries, backoff
                );
                sleep(Duration::from_millis(backoff)).await;
            }

            match self.provider.chat(&messages, Some(&self.options)).await {
                Ok(response) => {
                    debug!(
                        "Completion: {} input tokens, {} output tokens, {:?}",
                        response.prompt_tokens,
                        response.completion_tokens,
                        start.elapsed()
                    );
                    let reply = response.content.trim();
                    if reply.is_empty() {
                        return Err(ServiceError::EmptyReply);
                    }
                    return Ok(reply.to_string());
                }
                Err(e) => {
                    let err_msg = format!("{}", e);
                    warn!("Completion: attempt {} failed: {}", attempt + 1, err_msg);
                    last_err = Some(err_msg);
                }
            }
        }

        Err(ServiceError::Api {
            retries: self.max_retries,
            detail: last_err.unwrap_or_else(|| "Unknown error".to_string()),
        })
    }
}

impl CompletionService for LlmCompletionService {
    fn complete<'a>(
        &'a self,
        request: &'a CompletionRequest,
    ) -> BoxFuture<'a, Result<String, ServiceError>> {
        Box::pin(self.complete_with_retries(request))
    }
}

/// Map a transcript turn onto a provider chat message.
///
/// Image parts ride along as high-detail attachments; small dimension text
/// on drawings is unreadable at low detail.
fn to_chat_message(turn: &Turn) -> ChatMessage {
    let text = turn.content.display_text().unwrap_or_default();
    match turn.role {
        Role::System => ChatMessage::system(text),
        Role::Assistant => ChatMessage::assistant(text),
        Role::User => match &turn.content {
            Content::Text(_) => ChatMessage::user(text),
            Content::Parts(parts) => {
                let images: Vec<ImageData> = parts
                    .iter()
                    .filter_map(|p| match p {
                        Part::Image {
                            encoded_value,
                            mime_type,
                        } => Some(
                            ImageData::new(encoded_value.clone(), mime_type.clone())
                                .with_detail("high"),
                        ),
                        Part::Text { .. } => None,
                    })
                    .collect();
                if images.is_empty() {
                    ChatMessage::user(text)
                } else {
                    ChatMessage::user_with_images(text, images)
                }
            }
        },
    }
}

/// Build `CompletionOptions` from the session config.
fn build_options(config: &SessionConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}

/// Instantiate a named provider with the given model.
fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, ChatError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        ChatError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, from most-specific to least-specific.
///
/// 1. **Explicit provider** in the config.
/// 2. **Provider name** in the config, with the configured model.
/// 3. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`).
/// 4. **OpenAI key** (`OPENAI_API_KEY`) with the configured model.
/// 5. **Full auto-detection** via `ProviderFactory::from_env`.
pub fn resolve_provider(config: &SessionConfig) -> Result<Arc<dyn LLMProvider>, ChatError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        return create_vision_provider(name, config.model_or_default());
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_vision_provider(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            return create_vision_provider("openai", config.model_or_default());
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| ChatError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}
