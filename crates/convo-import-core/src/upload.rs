//! Upload state machine.
//!
//! The reducer is pure: it takes the current [`UploadState`] and one
//! [`UploadEvent`] and returns the next state plus the [`Effect`]s the
//! driver must perform (invalidate the conversation cache, start or stop
//! the polling timer, notify the user). The async driver in the root crate
//! owns the transport and the timer and only feeds events in.
//!
//! ```text
//!             Start(SingleShot | Selective)
//!  Idle ────────────────────────────────────▶ Uploading ──Replied(Success)──▶ Complete
//!   │                                             │  └──Replied(Processing)─▶ Polling
//!   │ Start(Chunked{N})                           │
//!   ▼                                             │ Failed(transient)
//!  ChunkUploading(i/N) ──ChunkSucceeded(N)──▶ Complete
//!   │  │                    Polling ──PollConfirmed──▶ Complete
//!   │  │                       └──PollExhausted──▶ Idle (timeout warning)
//!   │  └──Failed(transient)──▶ ChunkPolling(i/N) ──PollConfirmed──▶ ChunkUploading(i/N), or Complete when i = N
//!   │                                  └──PollExhausted──▶ Error (chunk i failed)
//!   └──Failed(fatal)──▶ Error
//! ```
//!
//! A lost reply on chunk `i` is followed up before anything else is sent:
//! once the server shows the conversations through chunk `i`, sending
//! resumes at chunk `i + 1`.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::error::{FailureClass, ImportError, TransportError};
use crate::models::{ReplyStatus, UploadSession, UploadStatus};

/// Delay before the progress indicator is dismissed after success.
pub const DISMISS_AFTER_COMPLETE: Duration = Duration::from_millis(800);
/// Delay before the progress indicator is dismissed after a failure.
pub const DISMISS_AFTER_ERROR: Duration = Duration::from_millis(500);

/// How long to keep checking for a server-side import after the response
/// was lost or the server said it is still processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollingPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollingPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_attempts: 24,
        }
    }
}

/// How a payload will be sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadPlan {
    /// One multipart request carrying the original file.
    SingleShot,
    /// `total` sequential multipart requests, one per chunk.
    Chunked { total: usize },
    /// One JSON request carrying `count` raw conversations.
    Selective { count: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub enum UploadState {
    Idle,
    /// A single request is in flight.
    Uploading,
    /// Chunk `current` of `total` is in flight (0 before the first starts).
    ChunkUploading { current: usize, total: usize },
    Polling { attempt: u32, max_attempts: u32 },
    /// Waiting to confirm chunk `index` of `total` after its reply was lost.
    ChunkPolling {
        index: usize,
        total: usize,
        attempt: u32,
        max_attempts: u32,
    },
    Complete,
    Error(ImportError),
}

impl UploadState {
    pub fn status(&self) -> UploadStatus {
        match self {
            UploadState::Idle => UploadStatus::Idle,
            UploadState::Uploading | UploadState::ChunkUploading { .. } => UploadStatus::Uploading,
            UploadState::Polling { .. } | UploadState::ChunkPolling { .. } => {
                UploadStatus::Polling
            }
            UploadState::Complete => UploadStatus::Complete,
            UploadState::Error(_) => UploadStatus::Error,
        }
    }

    pub fn is_polling(&self) -> bool {
        self.poll_attempts().is_some()
    }

    /// `(attempt, max_attempts)` while polling.
    pub fn poll_attempts(&self) -> Option<(u32, u32)> {
        match *self {
            UploadState::Polling {
                attempt,
                max_attempts,
            }
            | UploadState::ChunkPolling {
                attempt,
                max_attempts,
                ..
            } => Some((attempt, max_attempts)),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, UploadState::Complete | UploadState::Error(_))
    }
}

impl fmt::Display for UploadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadState::Idle => write!(f, "idle"),
            UploadState::Uploading => write!(f, "uploading"),
            UploadState::ChunkUploading { current, total } => {
                write!(f, "chunk-uploading({}/{})", current, total)
            }
            UploadState::Polling {
                attempt,
                max_attempts,
            } => write!(f, "polling({}/{})", attempt, max_attempts),
            UploadState::ChunkPolling {
                index,
                total,
                attempt,
                max_attempts,
            } => write!(
                f,
                "chunk-polling({}/{}, {}/{})",
                index, total, attempt, max_attempts
            ),
            UploadState::Complete => write!(f, "complete"),
            UploadState::Error(_) => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum UploadEvent {
    Start(UploadPlan),
    /// Chunk `index` (1-based) is about to be sent.
    ChunkStarted(usize),
    ChunkSucceeded(usize),
    /// Reply to a single-shot upload.
    Replied(ReplyStatus),
    /// Reply to a selective upload, with the number of failed items.
    SelectiveReplied { failed: usize },
    Failed(TransportError),
    PollTick,
    /// A refreshed conversation list shows the import landed.
    PollConfirmed,
    /// The last poll attempt passed without confirmation.
    PollExhausted,
    /// The owner is going away or the indicator was dismissed.
    Teardown,
}

/// User-facing outcome messages.
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    Success,
    /// The server accepted the import and is still working on it.
    Processing,
    /// The reply was lost; checking whether the import landed anyway.
    ConnectionLost,
    PartialFailure { failed: usize },
    Failed(ImportError),
    /// Polling ran out. The import may still complete later.
    PollTimedOut,
}

/// Side effects requested by a transition. The driver performs them in
/// order.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    InvalidateConversations,
    StartPolling,
    StopPolling,
    Notify(Notice),
    ScheduleDismiss(Duration),
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("no transition from {state} on {event}")]
pub struct InvalidTransition {
    pub state: String,
    pub event: String,
}

/// Next state and effects.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub state: UploadState,
    pub effects: Vec<Effect>,
}

impl Transition {
    fn to(state: UploadState) -> Self {
        Self {
            state,
            effects: Vec::new(),
        }
    }

    fn with(state: UploadState, effects: Vec<Effect>) -> Self {
        Self { state, effects }
    }
}

fn completed() -> Transition {
    Transition::with(
        UploadState::Complete,
        vec![
            Effect::StopPolling,
            Effect::InvalidateConversations,
            Effect::Notify(Notice::Success),
            Effect::ScheduleDismiss(DISMISS_AFTER_COMPLETE),
        ],
    )
}

fn failed(error: ImportError) -> Transition {
    Transition::with(
        UploadState::Error(error.clone()),
        vec![
            Effect::StopPolling,
            Effect::Notify(Notice::Failed(error)),
            Effect::ScheduleDismiss(DISMISS_AFTER_ERROR),
        ],
    )
}

fn start_polling(policy: &PollingPolicy, notice: Notice) -> Transition {
    Transition::with(
        UploadState::Polling {
            attempt: 0,
            max_attempts: policy.max_attempts,
        },
        vec![Effect::StartPolling, Effect::Notify(notice)],
    )
}

/// Map a transport failure to the next state. Transient failures poll,
/// everything else is fatal.
fn on_failure(state: &UploadState, err: &TransportError, policy: &PollingPolicy) -> Transition {
    if err.classify() == FailureClass::Transient {
        if let UploadState::ChunkUploading { current, total } = *state {
            return Transition::with(
                UploadState::ChunkPolling {
                    index: current,
                    total,
                    attempt: 0,
                    max_attempts: policy.max_attempts,
                },
                vec![Effect::StartPolling, Effect::Notify(Notice::ConnectionLost)],
            );
        }
        return start_polling(policy, Notice::ConnectionLost);
    }
    let error = match (state, err) {
        (_, TransportError::UnsupportedImportType(msg)) => {
            ImportError::UnsupportedImportType(msg.clone())
        }
        (UploadState::ChunkUploading { current, total }, other) => {
            ImportError::ChunkUploadFailure {
                index: *current,
                total: *total,
                message: other.to_string(),
            }
        }
        (_, other) => ImportError::Upload(other.to_string()),
    };
    failed(error)
}

/// The transition table.
pub fn reduce(
    state: &UploadState,
    event: &UploadEvent,
    policy: &PollingPolicy,
) -> Result<Transition, InvalidTransition> {
    use UploadEvent as E;
    use UploadState as S;

    let transition = match (state, event) {
        (_, E::Teardown) => Transition::with(S::Idle, vec![Effect::StopPolling]),

        (S::Idle, E::Start(UploadPlan::SingleShot | UploadPlan::Selective { .. })) => {
            Transition::to(S::Uploading)
        }
        (S::Idle, E::Start(UploadPlan::Chunked { total })) if *total > 0 => {
            Transition::to(S::ChunkUploading {
                current: 0,
                total: *total,
            })
        }

        (S::ChunkUploading { current, total }, E::ChunkStarted(i))
            if *i == current + 1 && *i <= *total =>
        {
            Transition::to(S::ChunkUploading {
                current: *i,
                total: *total,
            })
        }
        (S::ChunkUploading { current, total }, E::ChunkSucceeded(i)) if i == current => {
            if i == total {
                completed()
            } else {
                Transition::with(state.clone(), vec![Effect::InvalidateConversations])
            }
        }

        (S::Uploading, E::Replied(ReplyStatus::Success)) => completed(),
        (S::Uploading, E::Replied(ReplyStatus::Processing)) => {
            start_polling(policy, Notice::Processing)
        }
        (S::Uploading, E::SelectiveReplied { failed }) => {
            let mut t = completed();
            if *failed > 0 {
                for effect in t.effects.iter_mut() {
                    if *effect == Effect::Notify(Notice::Success) {
                        *effect = Effect::Notify(Notice::PartialFailure { failed: *failed });
                    }
                }
            }
            t
        }

        (S::Uploading | S::ChunkUploading { .. }, E::Failed(err)) => {
            on_failure(state, err, policy)
        }

        (
            S::Polling {
                attempt,
                max_attempts,
            },
            E::PollTick,
        ) if attempt < max_attempts => Transition::with(
            S::Polling {
                attempt: attempt + 1,
                max_attempts: *max_attempts,
            },
            vec![Effect::InvalidateConversations],
        ),
        (S::Polling { .. }, E::PollConfirmed) => completed(),
        (S::Polling { .. }, E::PollExhausted) => Transition::with(
            S::Idle,
            vec![Effect::StopPolling, Effect::Notify(Notice::PollTimedOut)],
        ),

        (
            S::ChunkPolling {
                index,
                total,
                attempt,
                max_attempts,
            },
            E::PollTick,
        ) if attempt < max_attempts => Transition::with(
            S::ChunkPolling {
                index: *index,
                total: *total,
                attempt: attempt + 1,
                max_attempts: *max_attempts,
            },
            vec![Effect::InvalidateConversations],
        ),
        (S::ChunkPolling { index, total, .. }, E::PollConfirmed) => {
            if index == total {
                completed()
            } else {
                Transition::with(
                    S::ChunkUploading {
                        current: *index,
                        total: *total,
                    },
                    vec![Effect::StopPolling, Effect::InvalidateConversations],
                )
            }
        }
        (S::ChunkPolling { index, total, .. }, E::PollExhausted) => {
            failed(ImportError::ChunkUploadFailure {
                index: *index,
                total: *total,
                message: "the server never confirmed this chunk".to_string(),
            })
        }

        _ => {
            return Err(InvalidTransition {
                state: state.to_string(),
                event: format!("{:?}", event),
            })
        }
    };
    Ok(transition)
}

/// Reducer plus the observable [`UploadSession`] it keeps in sync.
#[derive(Debug, Clone)]
pub struct UploadMachine {
    state: UploadState,
    session: UploadSession,
    policy: PollingPolicy,
}

impl UploadMachine {
    pub fn new(file_name: impl Into<String>, policy: PollingPolicy) -> Self {
        Self {
            state: UploadState::Idle,
            session: UploadSession::new(file_name),
            policy,
        }
    }

    pub fn state(&self) -> &UploadState {
        &self.state
    }

    pub fn session(&self) -> &UploadSession {
        &self.session
    }

    pub fn policy(&self) -> &PollingPolicy {
        &self.policy
    }

    pub fn is_polling(&self) -> bool {
        self.state.is_polling()
    }

    /// Apply an event. On error nothing changes.
    pub fn apply(&mut self, event: UploadEvent) -> Result<Vec<Effect>, InvalidTransition> {
        let transition = reduce(&self.state, &event, &self.policy)?;

        match &event {
            UploadEvent::Start(UploadPlan::Chunked { total }) => {
                self.session.total_chunks = Some(*total);
                self.session.current_chunk = None;
            }
            UploadEvent::Start(_) => {
                self.session.total_chunks = None;
                self.session.current_chunk = None;
            }
            UploadEvent::ChunkStarted(i) => self.session.current_chunk = Some(*i),
            _ => {}
        }
        self.session.status = transition.state.status();
        self.state = transition.state;
        Ok(transition.effects)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> UploadMachine {
        UploadMachine::new("conversations.json", PollingPolicy::default())
    }

    #[test]
    fn single_shot_success() {
        let mut m = machine();
        assert!(m.apply(UploadEvent::Start(UploadPlan::SingleShot)).unwrap().is_empty());
        assert_eq!(m.session().status, UploadStatus::Uploading);

        let effects = m.apply(UploadEvent::Replied(ReplyStatus::Success)).unwrap();
        assert_eq!(m.state(), &UploadState::Complete);
        assert!(effects.contains(&Effect::InvalidateConversations));
        assert!(effects.contains(&Effect::Notify(Notice::Success)));
        assert!(effects.contains(&Effect::ScheduleDismiss(DISMISS_AFTER_COMPLETE)));
    }

    #[test]
    fn processing_reply_starts_polling() {
        let mut m = machine();
        m.apply(UploadEvent::Start(UploadPlan::SingleShot)).unwrap();
        let effects = m.apply(UploadEvent::Replied(ReplyStatus::Processing)).unwrap();
        assert_eq!(
            m.state(),
            &UploadState::Polling {
                attempt: 0,
                max_attempts: 24
            }
        );
        assert_eq!(effects[0], Effect::StartPolling);
        assert_eq!(m.session().status, UploadStatus::Polling);
    }

    #[test]
    fn chunk_sequence_tracks_current_chunk() {
        let mut m = machine();
        m.apply(UploadEvent::Start(UploadPlan::Chunked { total: 3 })).unwrap();
        assert_eq!(m.session().total_chunks, Some(3));
        for i in 1..=3 {
            m.apply(UploadEvent::ChunkStarted(i)).unwrap();
            assert_eq!(m.session().current_chunk, Some(i));
            m.apply(UploadEvent::ChunkSucceeded(i)).unwrap();
        }
        assert_eq!(m.state(), &UploadState::Complete);
    }

    #[test]
    fn chunks_must_advance_in_order() {
        let mut m = machine();
        m.apply(UploadEvent::Start(UploadPlan::Chunked { total: 3 })).unwrap();
        assert!(m.apply(UploadEvent::ChunkStarted(2)).is_err());
        m.apply(UploadEvent::ChunkStarted(1)).unwrap();
        assert!(m.apply(UploadEvent::ChunkStarted(2)).is_err());
        assert!(m.apply(UploadEvent::ChunkSucceeded(2)).is_err());
        assert_eq!(m.session().current_chunk, Some(1));
    }

    #[test]
    fn rejected_chunk_is_fatal() {
        let mut m = machine();
        m.apply(UploadEvent::Start(UploadPlan::Chunked { total: 4 })).unwrap();
        m.apply(UploadEvent::ChunkStarted(1)).unwrap();
        m.apply(UploadEvent::ChunkSucceeded(1)).unwrap();
        m.apply(UploadEvent::ChunkStarted(2)).unwrap();
        let effects = m
            .apply(UploadEvent::Failed(TransportError::Rejected {
                status: 500,
                message: "db down".into(),
            }))
            .unwrap();
        match m.state() {
            UploadState::Error(ImportError::ChunkUploadFailure { index, total, .. }) => {
                assert_eq!((*index, *total), (2, 4));
            }
            other => panic!("unexpected state {:?}", other),
        }
        assert!(effects.contains(&Effect::StopPolling));
        assert!(effects.contains(&Effect::ScheduleDismiss(DISMISS_AFTER_ERROR)));
        assert!(m.apply(UploadEvent::ChunkStarted(3)).is_err());
    }

    #[test]
    fn transient_failure_polls_instead_of_failing() {
        for err in [
            TransportError::Timeout,
            TransportError::ConnectionReset,
            TransportError::Network("unreachable".into()),
        ] {
            let mut m = machine();
            m.apply(UploadEvent::Start(UploadPlan::SingleShot)).unwrap();
            let effects = m.apply(UploadEvent::Failed(err)).unwrap();
            assert!(m.is_polling());
            assert_ne!(m.session().status, UploadStatus::Error);
            assert!(effects.contains(&Effect::Notify(Notice::ConnectionLost)));
        }
    }

    #[test]
    fn lost_chunk_reply_polls_then_resumes() {
        let mut m = machine();
        m.apply(UploadEvent::Start(UploadPlan::Chunked { total: 3 })).unwrap();
        m.apply(UploadEvent::ChunkStarted(1)).unwrap();
        m.apply(UploadEvent::ChunkSucceeded(1)).unwrap();
        m.apply(UploadEvent::ChunkStarted(2)).unwrap();

        let effects = m
            .apply(UploadEvent::Failed(TransportError::ConnectionReset))
            .unwrap();
        assert_eq!(
            m.state(),
            &UploadState::ChunkPolling {
                index: 2,
                total: 3,
                attempt: 0,
                max_attempts: 24
            }
        );
        assert_eq!(effects[0], Effect::StartPolling);
        assert!(m.is_polling());
        assert!(m.apply(UploadEvent::ChunkStarted(3)).is_err());

        m.apply(UploadEvent::PollTick).unwrap();
        assert_eq!(m.state().poll_attempts(), Some((1, 24)));
        let effects = m.apply(UploadEvent::PollConfirmed).unwrap();
        assert_eq!(
            effects,
            vec![Effect::StopPolling, Effect::InvalidateConversations]
        );
        assert_eq!(
            m.state(),
            &UploadState::ChunkUploading {
                current: 2,
                total: 3
            }
        );

        m.apply(UploadEvent::ChunkStarted(3)).unwrap();
        m.apply(UploadEvent::ChunkSucceeded(3)).unwrap();
        assert_eq!(m.state(), &UploadState::Complete);
    }

    #[test]
    fn lost_last_chunk_completes_on_confirmation() {
        let mut m = machine();
        m.apply(UploadEvent::Start(UploadPlan::Chunked { total: 1 })).unwrap();
        m.apply(UploadEvent::ChunkStarted(1)).unwrap();
        m.apply(UploadEvent::Failed(TransportError::Timeout)).unwrap();
        m.apply(UploadEvent::PollTick).unwrap();
        m.apply(UploadEvent::PollConfirmed).unwrap();
        assert_eq!(m.state(), &UploadState::Complete);
    }

    #[test]
    fn unconfirmed_chunk_is_an_error() {
        let mut m = machine();
        m.apply(UploadEvent::Start(UploadPlan::Chunked { total: 4 })).unwrap();
        m.apply(UploadEvent::ChunkStarted(1)).unwrap();
        m.apply(UploadEvent::Failed(TransportError::Timeout)).unwrap();
        let effects = m.apply(UploadEvent::PollExhausted).unwrap();
        match m.state() {
            UploadState::Error(ImportError::ChunkUploadFailure { index, total, .. }) => {
                assert_eq!((*index, *total), (1, 4));
            }
            other => panic!("unexpected state {:?}", other),
        }
        assert!(effects.contains(&Effect::StopPolling));
        assert_eq!(m.session().status, UploadStatus::Error);
    }

    #[test]
    fn unsupported_type_is_fatal() {
        let mut m = machine();
        m.apply(UploadEvent::Start(UploadPlan::SingleShot)).unwrap();
        m.apply(UploadEvent::Failed(TransportError::UnsupportedImportType(
            "Unsupported import type".into(),
        )))
        .unwrap();
        assert!(matches!(
            m.state(),
            UploadState::Error(ImportError::UnsupportedImportType(_))
        ));
    }

    #[test]
    fn polling_is_bounded() {
        let policy = PollingPolicy {
            interval: Duration::from_secs(5),
            max_attempts: 2,
        };
        let mut m = UploadMachine::new("f.json", policy);
        m.apply(UploadEvent::Start(UploadPlan::SingleShot)).unwrap();
        m.apply(UploadEvent::Failed(TransportError::Timeout)).unwrap();
        assert_eq!(
            m.apply(UploadEvent::PollTick).unwrap(),
            vec![Effect::InvalidateConversations]
        );
        m.apply(UploadEvent::PollTick).unwrap();
        assert!(m.apply(UploadEvent::PollTick).is_err());

        let effects = m.apply(UploadEvent::PollExhausted).unwrap();
        assert_eq!(m.state(), &UploadState::Idle);
        assert_eq!(
            effects,
            vec![Effect::StopPolling, Effect::Notify(Notice::PollTimedOut)]
        );
    }

    #[test]
    fn poll_confirmation_completes() {
        let mut m = machine();
        m.apply(UploadEvent::Start(UploadPlan::SingleShot)).unwrap();
        m.apply(UploadEvent::Replied(ReplyStatus::Processing)).unwrap();
        m.apply(UploadEvent::PollTick).unwrap();
        let effects = m.apply(UploadEvent::PollConfirmed).unwrap();
        assert_eq!(m.state(), &UploadState::Complete);
        assert_eq!(effects[0], Effect::StopPolling);
    }

    #[test]
    fn selective_partial_failure() {
        let mut m = machine();
        m.apply(UploadEvent::Start(UploadPlan::Selective { count: 10 })).unwrap();
        let effects = m.apply(UploadEvent::SelectiveReplied { failed: 3 }).unwrap();
        assert_eq!(m.state(), &UploadState::Complete);
        assert!(effects.contains(&Effect::Notify(Notice::PartialFailure { failed: 3 })));
        assert!(!effects.contains(&Effect::Notify(Notice::Success)));
    }

    #[test]
    fn teardown_always_stops_polling() {
        let mut m = machine();
        m.apply(UploadEvent::Start(UploadPlan::SingleShot)).unwrap();
        m.apply(UploadEvent::Failed(TransportError::Timeout)).unwrap();
        assert_eq!(
            m.apply(UploadEvent::Teardown).unwrap(),
            vec![Effect::StopPolling]
        );
        assert_eq!(m.state(), &UploadState::Idle);
    }

    #[test]
    fn replies_outside_upload_are_rejected() {
        let mut m = machine();
        let err = m
            .apply(UploadEvent::Replied(ReplyStatus::Success))
            .unwrap_err();
        assert_eq!(err.state, "idle");
        assert_eq!(m.state(), &UploadState::Idle);
    }
}
