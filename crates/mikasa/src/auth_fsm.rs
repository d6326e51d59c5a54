//! Session phase state machine using rust-fsm.
//!
//! Tracks where the engine is in the strategy lifecycle. The phase is
//! informational: `busy` and the phase never block a call, so an input that is
//! invalid for the current phase is logged and ignored by the engine.
//!
//! ## State Diagram
//!
//! ```text
//! ┌─────────────────┐
//! │    Unmounted    │ (initial)
//! └────────┬────────┘
//!          │ Mount
//!          ▼
//! ┌─────────────────┐  LoginStarted   ┌─────────────────┐
//! │                 │ ──────────────► │    LoggingIn    │
//! │     Mounted     │ ◄────────────── │                 │
//! │                 │  LoginFinished  └─────────────────┘
//! │  (Mount, Reset  │
//! │   loop back)    │  LogoutStarted  ┌─────────────────┐
//! │                 │ ──────────────► │   LoggingOut    │
//! │                 │ ◄────────────── │                 │
//! └─────────────────┘  LogoutFinished └─────────────────┘
//! ```
//!
//! There is no terminal phase: a reset lands back in `Mounted`.

use rust_fsm::*;
use serde::{Deserialize, Serialize};

state_machine! {
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub session_machine(Unmounted)

    Unmounted => {
        Mount => Mounted
    },
    Mounted => {
        // Strategy switch re-runs mount side effects
        Mount => Mounted,
        LoginStarted => LoggingIn,
        LogoutStarted => LoggingOut,
        Reset => Mounted
    },
    LoggingIn => {
        LoginFinished => Mounted,
        Reset => Mounted
    },
    LoggingOut => {
        // Logout without a strategy hook resets locally
        Reset => LoggingOut,
        LogoutFinished => Mounted
    }
}

pub use session_machine::Input as SessionMachineInput;
pub use session_machine::State as SessionMachineState;
pub use session_machine::StateMachine as SessionMachine;

/// Engine phase for external consumption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    /// No strategy mounted yet.
    Unmounted,
    /// Strategy mounted, no login or logout in flight.
    Mounted,
    /// Login call in flight.
    LoggingIn,
    /// Logout call in flight.
    LoggingOut,
}

impl SessionPhase {
    /// Returns true while a login or logout call is in flight.
    pub fn is_transient(&self) -> bool {
        matches!(self, SessionPhase::LoggingIn | SessionPhase::LoggingOut)
    }
}

impl From<&SessionMachineState> for SessionPhase {
    fn from(state: &SessionMachineState) -> Self {
        match state {
            SessionMachineState::Unmounted => SessionPhase::Unmounted,
            SessionMachineState::Mounted => SessionPhase::Mounted,
            SessionMachineState::LoggingIn => SessionPhase::LoggingIn,
            SessionMachineState::LoggingOut => SessionPhase::LoggingOut,
        }
    }
}
