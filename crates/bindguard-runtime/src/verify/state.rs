//! Supervisor handshake state machine.
//!
//! Pure: `advance` maps a state and an event to the next state. The
//! supervisor loop performs the I/O each state implies.

use std::fmt;

use serde::Serialize;

use bindguard_core::{VerificationResult, WorkerMessage};

/// Where a verification currently stands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum SupervisorState {
    Spawning,
    AwaitingReady,
    /// Ready received, `Start` must be sent.
    Loading,
    AwaitingLoaded,
    /// Loaded received, `RunTest` must be sent.
    Testing,
    AwaitingDone,
    Passed,
    Failed(String),
    TimedOut,
    Crashed(Option<i32>),
}

/// Something that happened to the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorEvent {
    Spawned,
    SpawnFailed,
    Message(WorkerMessage),
    /// The command implied by the current state was written.
    CommandSent,
    Exited(Option<i32>),
    DeadlineElapsed,
}

impl SupervisorState {
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Passed | Self::Failed(_) | Self::TimedOut | Self::Crashed(_)
        )
    }

    /// Classified outcome for terminal states.
    pub fn result(&self) -> Option<VerificationResult> {
        match self {
            Self::Passed => Some(VerificationResult::Passed),
            Self::Failed(reason) => Some(VerificationResult::Failed(reason.clone())),
            Self::TimedOut => Some(VerificationResult::TimedOut),
            Self::Crashed(code) => Some(VerificationResult::Crashed(*code)),
            _ => None,
        }
    }

    const fn name(&self) -> &'static str {
        match self {
            Self::Spawning => "spawning",
            Self::AwaitingReady => "awaiting ready",
            Self::Loading => "loading",
            Self::AwaitingLoaded => "awaiting loaded",
            Self::Testing => "testing",
            Self::AwaitingDone => "awaiting done",
            Self::Passed => "passed",
            Self::Failed(_) => "failed",
            Self::TimedOut => "timed out",
            Self::Crashed(_) => "crashed",
        }
    }
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Next state after `event`. Terminal states absorb every event.
pub fn advance(state: &SupervisorState, event: SupervisorEvent) -> SupervisorState {
    use SupervisorEvent as E;
    use SupervisorState as S;

    if state.is_terminal() {
        return state.clone();
    }

    match (state, event) {
        (_, E::DeadlineElapsed) => S::TimedOut,
        (_, E::Exited(code)) => S::Crashed(code),

        (S::Spawning, E::Spawned) => S::AwaitingReady,
        (S::Spawning, E::SpawnFailed) => S::Crashed(None),

        (S::AwaitingReady, E::Message(WorkerMessage::Ready)) => S::Loading,
        (S::Loading, E::CommandSent) => S::AwaitingLoaded,
        (S::AwaitingLoaded, E::Message(WorkerMessage::Loaded)) => S::Testing,
        (S::Testing, E::CommandSent) => S::AwaitingDone,
        (S::AwaitingDone, E::Message(WorkerMessage::Done)) => S::Passed,
        (S::AwaitingDone, E::Message(WorkerMessage::Failed { stage, reason })) => {
            S::Failed(format!("{stage}: {reason}"))
        }

        (current, E::Message(message)) => S::Failed(format!(
            "protocol violation: unexpected {} while {current}",
            message.tag()
        )),
        (current, other) => S::Failed(format!(
            "protocol violation: {other:?} while {current}"
        )),
    }
}
