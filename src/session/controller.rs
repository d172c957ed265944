//! Session controller: the chat state machine.
//!
//! The controller owns the [`Transcript`] and the pending capture. Everything
//! that happens to a session arrives as an [`Intent`]; [`SessionController::apply`]
//! performs the transition synchronously and returns the [`Effect`]s the
//! caller must carry out (dispatch a request, re-project a bubble, typeset a
//! reply). Nothing here awaits, so every transition is testable without a
//! network or a UI.
//!
//! ```text
//!            Submit                       ReplyReceived
//!   Idle ──────────────▶ Sending ─────────────────────────▶ Idle
//!                           │
//!                           │ RequestFailed
//!                           ▼
//!                      Error(msg) ──(fallback turn appended)──▶ Idle
//! ```
//!
//! A request whose driver went away before it settled ([`Intent::RequestAbandoned`])
//! takes the `RequestFailed` path with [`ServiceError::Cancelled`].
//!
//! ## Payload policy
//!
//! [`PayloadPolicy::FullTranscript`] sends every turn, so earlier questions
//! and earlier captured regions stay available to the model.
//! [`PayloadPolicy::LatestTurn`] sends only the system turn and the new user
//! turn.

use super::service::CompletionRequest;
use crate::capture::Artifact;
use crate::config::PayloadPolicy;
use crate::error::{ChatError, ServiceError};
use crate::transcript::{Content, Part, Role, Transcript, Turn};
use serde::Serialize;
use tracing::{debug, info, warn};

/// Where the session is in its request cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "message", rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Sending,
    /// Transient; reported through [`Effect::StateChanged`] before the
    /// controller settles back to `Idle`.
    Error(String),
}

/// Something that happened to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    /// The user pressed send. The pending artifact, if any, is attached and
    /// consumed.
    Submit { text: String },
    /// A region was captured; replaces any unsent artifact.
    Captured(Artifact),
    /// "Back to document": drop the pending artifact.
    DismissCapture,
    /// Replace the text of an assistant turn.
    EditTurn { index: usize, text: String },
    /// Truncate the transcript to its system turn.
    ClearChat,
    /// The in-flight request produced a reply.
    ReplyReceived(String),
    /// The in-flight request failed or timed out.
    RequestFailed(ServiceError),
    /// Nobody is waiting for the in-flight request any more.
    RequestAbandoned,
}

/// Work the caller must perform after a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Send this request to the completion service.
    Dispatch(CompletionRequest),
    /// A turn was appended; project it.
    Appended { index: usize },
    /// Run the typesetter over the bubble at `index`.
    Typeset { index: usize },
    /// The content at `index` changed; re-project it.
    Updated { index: usize },
    /// The transcript was reset; drop every bubble.
    Reset,
    /// A new pending artifact is ready to preview.
    ArtifactReady,
    /// The pending artifact is gone.
    ArtifactCleared,
    StateChanged(SessionState),
}

/// The chat state machine over one transcript.
#[derive(Debug, Clone)]
pub struct SessionController {
    transcript: Transcript,
    state: SessionState,
    pending_artifact: Option<Artifact>,
    last_artifact: Option<Artifact>,
    last_error: Option<ServiceError>,
    payload_policy: PayloadPolicy,
}

impl SessionController {
    /// Start a session whose transcript holds only `system_prompt`.
    pub fn new(system_prompt: impl Into<String>, payload_policy: PayloadPolicy) -> Self {
        Self::from_transcript(Transcript::new(system_prompt), payload_policy)
    }

    /// Resume a session from an existing transcript (e.g. an import).
    pub fn from_transcript(transcript: Transcript, payload_policy: PayloadPolicy) -> Self {
        Self {
            transcript,
            state: SessionState::Idle,
            pending_artifact: None,
            last_artifact: None,
            last_error: None,
            payload_policy,
        }
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn is_sending(&self) -> bool {
        self.state == SessionState::Sending
    }

    /// The captured artifact that the next submit will attach.
    pub fn pending_artifact(&self) -> Option<&Artifact> {
        self.pending_artifact.as_ref()
    }

    /// The most recently captured artifact, sent or not.
    pub fn last_artifact(&self) -> Option<&Artifact> {
        self.last_artifact.as_ref()
    }

    /// The failure behind the most recent fallback turn.
    pub fn last_error(&self) -> Option<&ServiceError> {
        self.last_error.as_ref()
    }

    pub fn payload_policy(&self) -> PayloadPolicy {
        self.payload_policy
    }

    /// Perform one transition.
    ///
    /// On `Err` nothing about the session has changed.
    pub fn apply(&mut self, intent: Intent) -> Result<Vec<Effect>, ChatError> {
        match intent {
            Intent::Submit { text } => self.submit(text),

            Intent::Captured(artifact) => {
                if self.pending_artifact.is_some() {
                    debug!("Replacing unsent artifact");
                }
                self.pending_artifact = Some(artifact.clone());
                self.last_artifact = Some(artifact);
                Ok(vec![Effect::ArtifactReady])
            }

            Intent::DismissCapture => Ok(match self.pending_artifact.take() {
                Some(_) => vec![Effect::ArtifactCleared],
                None => vec![],
            }),

            Intent::EditTurn { index, text } => {
                let role = self.transcript.get(index)?.role;
                match role {
                    Role::System => Err(ChatError::ImmutableTurn { index }),
                    Role::User => Err(ChatError::NotEditable { index, role }),
                    Role::Assistant => {
                        self.transcript.set_content(index, Content::Text(text))?;
                        Ok(vec![Effect::Updated { index }, Effect::Typeset { index }])
                    }
                }
            }

            Intent::ClearChat => {
                // a reply landing after a reset would answer a question
                // that is no longer in the transcript
                if self.is_sending() {
                    return Err(ChatError::Busy);
                }
                self.transcript.reset();
                self.last_error = None;
                Ok(vec![Effect::Reset])
            }

            Intent::ReplyReceived(reply) => {
                self.expect_sending()?;
                let index = self.transcript.append(Turn::assistant(reply))?;
                self.state = SessionState::Idle;
                info!("Reply appended at turn {}", index);
                Ok(vec![
                    Effect::Appended { index },
                    Effect::Typeset { index },
                    Effect::StateChanged(SessionState::Idle),
                ])
            }

            Intent::RequestAbandoned => self.apply(Intent::RequestFailed(ServiceError::Cancelled)),

            Intent::RequestFailed(err) => {
                self.expect_sending()?;
                warn!("Completion failed: {}", err);
                let index = self
                    .transcript
                    .append(Turn::assistant(err.user_message()))?;
                let message = err.to_string();
                self.last_error = Some(err);
                self.state = SessionState::Idle;
                Ok(vec![
                    Effect::Appended { index },
                    Effect::StateChanged(SessionState::Error(message)),
                    Effect::StateChanged(SessionState::Idle),
                ])
            }
        }
    }

    fn submit(&mut self, text: String) -> Result<Vec<Effect>, ChatError> {
        if self.is_sending() {
            return Err(ChatError::Busy);
        }
        let text = text.trim();
        let content = match (self.pending_artifact.as_ref(), text.is_empty()) {
            (None, true) => return Err(ChatError::EmptyInput),
            (None, false) => Content::Text(text.to_string()),
            (Some(artifact), _) => {
                let mut parts = Vec::with_capacity(2);
                if !text.is_empty() {
                    parts.push(Part::Text {
                        value: text.to_string(),
                    });
                }
                parts.push(artifact.to_part());
                Content::Parts(parts)
            }
        };

        let index = self.transcript.append(Turn::user(content))?;
        let mut effects = vec![Effect::Appended { index }];
        // the turn owns the image now; a retry needs a fresh capture
        if self.pending_artifact.take().is_some() {
            effects.push(Effect::ArtifactCleared);
        }
        self.state = SessionState::Sending;
        let request = self.build_request();
        debug!(
            "Dispatching {} turns ({} images)",
            request.messages.len(),
            request.image_count()
        );

        effects.push(Effect::StateChanged(SessionState::Sending));
        effects.push(Effect::Dispatch(request));
        Ok(effects)
    }

    fn build_request(&self) -> CompletionRequest {
        let turns = self.transcript.to_serializable();
        let messages = match self.payload_policy {
            PayloadPolicy::FullTranscript => turns.to_vec(),
            PayloadPolicy::LatestTurn => {
                let mut latest = vec![turns[0].clone()];
                if turns.len() > 1 {
                    latest.push(self.transcript.last().clone());
                }
                latest
            }
        };
        CompletionRequest { messages }
    }

    fn expect_sending(&self) -> Result<(), ChatError> {
        if self.is_sending() {
            Ok(())
        } else {
            Err(ChatError::NotSending)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::PixelRect;

    fn artifact(data: &str) -> Artifact {
        Artifact {
            data: data.into(),
            mime_type: "image/png".into(),
            width: 4,
            height: 4,
            source: PixelRect::default(),
        }
    }

    fn controller() -> SessionController {
        SessionController::new("sys", PayloadPolicy::FullTranscript)
    }

    fn dispatched(effects: &[Effect]) -> &CompletionRequest {
        effects
            .iter()
            .find_map(|e| match e {
                Effect::Dispatch(r) => Some(r),
                _ => None,
            })
            .expect("a dispatch effect")
    }

    #[test]
    fn submit_text_only_appends_plain_turn() {
        let mut c = controller();
        let effects = c
            .apply(Intent::Submit {
                text: "  what scale?  ".into(),
            })
            .unwrap();
        assert_eq!(effects[0], Effect::Appended { index: 1 });
        assert_eq!(c.state(), &SessionState::Sending);
        assert_eq!(
            c.transcript().get(1).unwrap().content,
            Content::Text("what scale?".into())
        );
        assert_eq!(dispatched(&effects).messages.len(), 2);
    }

    #[test]
    fn submit_with_artifact_builds_part_list() {
        let mut c = controller();
        c.apply(Intent::Captured(artifact("AAAA"))).unwrap();
        c.apply(Intent::Submit {
            text: "dimension?".into(),
        })
        .unwrap();
        match &c.transcript().get(1).unwrap().content {
            Content::Parts(parts) => {
                assert_eq!(parts.len(), 2);
                assert!(matches!(&parts[0], Part::Text { value } if value == "dimension?"));
                assert!(matches!(&parts[1], Part::Image { encoded_value, .. } if encoded_value == "AAAA"));
            }
            other => panic!("expected parts, got {other:?}"),
        }
    }

    #[test]
    fn artifact_alone_is_enough_to_send() {
        let mut c = controller();
        c.apply(Intent::Captured(artifact("AAAA"))).unwrap();
        c.apply(Intent::Submit { text: "".into() }).unwrap();
        let turn = c.transcript().get(1).unwrap();
        assert_eq!(turn.content.image_count(), 1);
        assert_eq!(turn.content.display_text(), None);
    }

    #[test]
    fn empty_submit_is_rejected_without_change() {
        let mut c = controller();
        assert!(matches!(
            c.apply(Intent::Submit { text: "   ".into() }),
            Err(ChatError::EmptyInput)
        ));
        assert_eq!(c.transcript().turn_count(), 1);
        assert_eq!(c.state(), &SessionState::Idle);
    }

    #[test]
    fn second_submit_while_sending_is_busy() {
        let mut c = controller();
        c.apply(Intent::Submit { text: "one".into() }).unwrap();
        assert!(matches!(
            c.apply(Intent::Submit { text: "two".into() }),
            Err(ChatError::Busy)
        ));
        assert_eq!(c.transcript().turn_count(), 2);
    }

    #[test]
    fn submit_consumes_the_pending_artifact() {
        let mut c = controller();
        c.apply(Intent::Captured(artifact("AAAA"))).unwrap();
        let effects = c.apply(Intent::Submit { text: "q".into() }).unwrap();
        assert_eq!(effects[1], Effect::ArtifactCleared);
        assert!(c.pending_artifact().is_none());
    }

    #[test]
    fn failed_send_does_not_reattach_the_image() {
        let mut c = controller();
        c.apply(Intent::Captured(artifact("AAAA"))).unwrap();
        c.apply(Intent::Submit { text: "q".into() }).unwrap();
        c.apply(Intent::RequestFailed(ServiceError::EmptyReply))
            .unwrap();

        let effects = c
            .apply(Intent::Submit {
                text: "unrelated".into(),
            })
            .unwrap();
        assert!(!effects.contains(&Effect::ArtifactCleared));
        assert_eq!(
            c.transcript().last().content,
            Content::Text("unrelated".into())
        );
        // only the failed turn carries the image
        assert_eq!(dispatched(&effects).image_count(), 1);
    }

    #[test]
    fn abandoned_request_settles_with_fallback() {
        let mut c = controller();
        c.apply(Intent::Submit { text: "q".into() }).unwrap();
        let effects = c.apply(Intent::RequestAbandoned).unwrap();
        assert_eq!(effects.last(), Some(&Effect::StateChanged(SessionState::Idle)));
        assert_eq!(c.last_error(), Some(&ServiceError::Cancelled));
        assert_eq!(
            c.transcript().last().content,
            Content::Text(crate::prompts::FALLBACK_SERVICE_ERROR.into())
        );
        assert!(matches!(
            c.apply(Intent::RequestAbandoned),
            Err(ChatError::NotSending)
        ));
        c.apply(Intent::ClearChat).unwrap();
    }

    #[test]
    fn reply_appends_assistant_turn() {
        let mut c = controller();
        c.apply(Intent::Captured(artifact("AAAA"))).unwrap();
        c.apply(Intent::Submit { text: "q".into() }).unwrap();
        let effects = c.apply(Intent::ReplyReceived("r".into())).unwrap();
        assert!(effects.contains(&Effect::Typeset { index: 2 }));
        assert_eq!(c.state(), &SessionState::Idle);
        assert!(c.pending_artifact().is_none());
        // the export still knows what was captured last
        assert!(c.last_artifact().is_some());
        assert_eq!(c.transcript().last().role, Role::Assistant);
    }

    #[test]
    fn failure_appends_fallback_and_returns_to_idle() {
        let mut c = controller();
        c.apply(Intent::Submit { text: "q".into() }).unwrap();
        let effects = c
            .apply(Intent::RequestFailed(ServiceError::Api {
                retries: 2,
                detail: "503".into(),
            }))
            .unwrap();
        assert!(matches!(
            effects[1],
            Effect::StateChanged(SessionState::Error(_))
        ));
        assert_eq!(effects[2], Effect::StateChanged(SessionState::Idle));
        assert_eq!(c.state(), &SessionState::Idle);
        assert_eq!(
            c.transcript().last().content,
            Content::Text(crate::prompts::FALLBACK_SERVICE_ERROR.into())
        );
        // still usable
        c.apply(Intent::Submit { text: "again".into() }).unwrap();
    }

    #[test]
    fn reply_without_request_is_rejected() {
        let mut c = controller();
        assert!(matches!(
            c.apply(Intent::ReplyReceived("late".into())),
            Err(ChatError::NotSending)
        ));
        assert_eq!(c.transcript().turn_count(), 1);
    }

    #[test]
    fn edit_rules() {
        let mut c = controller();
        c.apply(Intent::Submit { text: "q".into() }).unwrap();
        c.apply(Intent::ReplyReceived("r".into())).unwrap();

        assert!(matches!(
            c.apply(Intent::EditTurn {
                index: 0,
                text: "x".into()
            }),
            Err(ChatError::ImmutableTurn { index: 0 })
        ));
        assert!(matches!(
            c.apply(Intent::EditTurn {
                index: 1,
                text: "x".into()
            }),
            Err(ChatError::NotEditable { index: 1, .. })
        ));
        assert!(matches!(
            c.apply(Intent::EditTurn {
                index: 9,
                text: "x".into()
            }),
            Err(ChatError::TurnNotFound { .. })
        ));

        let effects = c
            .apply(Intent::EditTurn {
                index: 2,
                text: "fixed".into(),
            })
            .unwrap();
        assert_eq!(effects[0], Effect::Updated { index: 2 });
        assert_eq!(
            c.transcript().get(2).unwrap().content,
            Content::Text("fixed".into())
        );
    }

    #[test]
    fn clear_chat_resets_and_is_refused_while_sending() {
        let mut c = controller();
        c.apply(Intent::Submit { text: "q".into() }).unwrap();
        assert!(matches!(c.apply(Intent::ClearChat), Err(ChatError::Busy)));
        c.apply(Intent::ReplyReceived("r".into())).unwrap();
        assert_eq!(c.apply(Intent::ClearChat).unwrap(), vec![Effect::Reset]);
        assert_eq!(c.transcript().turn_count(), 1);
    }

    #[test]
    fn new_capture_replaces_unsent_one() {
        let mut c = controller();
        c.apply(Intent::Captured(artifact("first"))).unwrap();
        c.apply(Intent::Captured(artifact("second"))).unwrap();
        assert_eq!(c.pending_artifact().unwrap().data, "second");
        assert_eq!(
            c.apply(Intent::DismissCapture).unwrap(),
            vec![Effect::ArtifactCleared]
        );
        assert!(c.apply(Intent::DismissCapture).unwrap().is_empty());
    }

    #[test]
    fn full_transcript_policy_carries_history() {
        let mut c = controller();
        c.apply(Intent::Submit { text: "q1".into() }).unwrap();
        c.apply(Intent::ReplyReceived("r1".into())).unwrap();
        let effects = c.apply(Intent::Submit { text: "q2".into() }).unwrap();
        let roles: Vec<Role> = dispatched(&effects)
            .messages
            .iter()
            .map(|t| t.role)
            .collect();
        assert_eq!(
            roles,
            vec![Role::System, Role::User, Role::Assistant, Role::User]
        );
    }

    #[test]
    fn latest_turn_policy_sends_system_and_newest_user_turn() {
        let mut c = SessionController::new("sys", PayloadPolicy::LatestTurn);
        c.apply(Intent::Submit { text: "q1".into() }).unwrap();
        c.apply(Intent::ReplyReceived("r1".into())).unwrap();
        let effects = c.apply(Intent::Submit { text: "q2".into() }).unwrap();
        let request = dispatched(&effects);
        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.messages[0].role, Role::System);
        assert_eq!(request.messages[1].content, Content::Text("q2".into()));
    }
}
