//! Session state machine using rust-fsm.
//!
//! ```text
//!              ┌───────────┐
//!              │  Loading  │ (initial)
//!              └─────┬─────┘
//!   SessionRestored  │  NoSession / SignInFailed / SignOut
//!   SignInSucceeded  │
//!        ┌───────────┴─────────────┐
//!        ▼                         ▼
//! ┌───────────────┐  SignOut  ┌─────────────────┐
//! │ Authenticated │ ────────► │ Unauthenticated │
//! └───────┬───────┘           └────────┬────────┘
//!         │ SignInAttempt              │ SignInAttempt
//!         └──────────► Loading ◄───────┘
//! ```

use rust_fsm::*;
use serde::{Deserialize, Serialize};

state_machine! {
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub session_machine(Loading)

    Loading => {
        SessionRestored => Authenticated,
        NoSession => Unauthenticated,
        SignInSucceeded => Authenticated,
        SignInFailed => Unauthenticated,
        SignOut => Unauthenticated
    },
    Authenticated => {
        SignInAttempt => Loading,
        SignOut => Unauthenticated
    },
    Unauthenticated => {
        SignInAttempt => Loading,
        SignOut => Unauthenticated
    }
}

pub use session_machine::Input as SessionMachineInput;
pub use session_machine::State as SessionMachineState;
pub use session_machine::StateMachine as SessionMachine;

/// Externally visible session status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Loading,
    Authenticated,
    Unauthenticated,
}

impl SessionStatus {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionStatus::Authenticated)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Loading => "loading",
            SessionStatus::Authenticated => "authenticated",
            SessionStatus::Unauthenticated => "unauthenticated",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&SessionMachineState> for SessionStatus {
    fn from(state: &SessionMachineState) -> Self {
        match state {
            SessionMachineState::Loading => SessionStatus::Loading,
            SessionMachineState::Authenticated => SessionStatus::Authenticated,
            SessionMachineState::Unauthenticated => SessionStatus::Unauthenticated,
        }
    }
}
