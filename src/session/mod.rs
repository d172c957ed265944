//! Chat session: the controller plus the remote call that feeds it.
//!
//! [`ChatSession`] is the async driver around [`SessionController`]. A
//! [`ChatSession::submit`] runs one full cycle: append the user turn, await
//! the completion service under the request timeout, then fold the outcome
//! (reply or fallback) back into the transcript. Because `submit` takes
//! `&mut self`, a session can never have two requests in flight; callers
//! that split the cycle themselves still get [`ChatError::Busy`] from the
//! controller. Dropping a `submit` future mid-request settles the turn with
//! a fallback reply, so a cancelled caller never leaves the session busy.

pub mod controller;
pub mod service;

pub use controller::{Effect, Intent, SessionController, SessionState};
pub use service::{CompletionRequest, CompletionService, LlmCompletionService};

use crate::capture::Artifact;
use crate::config::SessionConfig;
use crate::error::{ChatError, ServiceError};
use crate::projection::{self, Bubble};
use crate::transcript::Transcript;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// A conversation about one drawing.
pub struct ChatSession {
    controller: SessionController,
    service: Arc<dyn CompletionService>,
    timeout: Duration,
    assistant_name: String,
}

impl ChatSession {
    /// Start a fresh session talking to `service`.
    pub fn new(config: &SessionConfig, service: Arc<dyn CompletionService>) -> Self {
        let controller =
            SessionController::new(config.system_prompt_or_default(), config.payload_policy);
        Self::with_controller(config, service, controller)
    }

    /// Start a fresh session with the provider resolved from `config`.
    pub fn from_config(config: &SessionConfig) -> Result<Self, ChatError> {
        let service = LlmCompletionService::from_config(config)?;
        Ok(Self::new(config, Arc::new(service)))
    }

    /// Resume a session from a transcript, e.g. one read back from an export.
    pub fn restore(
        config: &SessionConfig,
        service: Arc<dyn CompletionService>,
        transcript: Transcript,
    ) -> Self {
        let controller = SessionController::from_transcript(transcript, config.payload_policy);
        Self::with_controller(config, service, controller)
    }

    fn with_controller(
        config: &SessionConfig,
        service: Arc<dyn CompletionService>,
        controller: SessionController,
    ) -> Self {
        Self {
            controller,
            service,
            timeout: Duration::from_secs(config.request_timeout_secs),
            assistant_name: config.assistant_name.clone(),
        }
    }

    pub fn controller(&self) -> &SessionController {
        &self.controller
    }

    pub fn transcript(&self) -> &Transcript {
        self.controller.transcript()
    }

    /// Apply a non-network intent directly.
    pub fn apply(&mut self, intent: Intent) -> Result<Vec<Effect>, ChatError> {
        self.controller.apply(intent)
    }

    /// Send `text` (and the pending artifact, if any) and wait for the reply.
    ///
    /// Remote failures do not surface here: they become a fallback assistant
    /// turn and the returned effects include the transient `Error` state.
    pub async fn submit(&mut self, text: impl Into<String>) -> Result<Vec<Effect>, ChatError> {
        let mut effects = self.controller.apply(Intent::Submit { text: text.into() })?;
        let request = effects
            .iter()
            .find_map(|e| match e {
                Effect::Dispatch(r) => Some(r.clone()),
                _ => None,
            })
            .ok_or_else(|| ChatError::Internal("submit produced no request".into()))?;

        let in_flight = InFlight {
            controller: &mut self.controller,
        };
        let outcome = request_with_timeout(self.service.as_ref(), &request, self.timeout).await;
        let settle = match outcome {
            Ok(reply) => Intent::ReplyReceived(reply),
            Err(err) => Intent::RequestFailed(err),
        };
        effects.extend(in_flight.controller.apply(settle)?);
        Ok(effects)
    }

    /// Make `artifact` the one the next submit attaches.
    pub fn attach(&mut self, artifact: Artifact) -> Result<Vec<Effect>, ChatError> {
        self.controller.apply(Intent::Captured(artifact))
    }

    pub fn dismiss_capture(&mut self) -> Result<Vec<Effect>, ChatError> {
        self.controller.apply(Intent::DismissCapture)
    }

    pub fn edit(&mut self, index: usize, text: impl Into<String>) -> Result<Vec<Effect>, ChatError> {
        self.controller.apply(Intent::EditTurn {
            index,
            text: text.into(),
        })
    }

    pub fn clear(&mut self) -> Result<Vec<Effect>, ChatError> {
        self.controller.apply(Intent::ClearChat)
    }

    /// The display projection of the current transcript.
    pub fn bubbles(&self) -> Vec<Bubble> {
        projection::project(self.transcript(), &self.assistant_name)
    }

    pub fn export_structured(&self) -> Result<Vec<u8>, ChatError> {
        crate::export::export_structured(self.transcript())
    }

    pub fn export_flat(&self) -> Vec<u8> {
        crate::export::export_flat(self.transcript(), self.controller.last_artifact())
    }
}

/// Holds the controller while a request is outstanding.
///
/// If the owning future is dropped before the reply is folded back, the
/// drop settles the controller with [`Intent::RequestAbandoned`].
struct InFlight<'a> {
    controller: &'a mut SessionController,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.controller.is_sending() {
            warn!("Request dropped before it settled");
            if let Err(e) = self.controller.apply(Intent::RequestAbandoned) {
                warn!("Could not settle abandoned request: {}", e);
            }
        }
    }
}

/// Run one logical request, retries included, bounded by `timeout`.
pub async fn request_with_timeout(
    service: &dyn CompletionService,
    request: &CompletionRequest,
    timeout: Duration,
) -> Result<String, ServiceError> {
    let start = Instant::now();
    match tokio::time::timeout(timeout, service.complete(request)).await {
        Ok(Ok(reply)) => {
            info!(
                "Reply received: {} chars in {:?}",
                reply.len(),
                start.elapsed()
            );
            Ok(reply)
        }
        Ok(Err(e)) => Err(e),
        Err(_) => Err(ServiceError::Timeout {
            secs: timeout.as_secs(),
        }),
    }
}
