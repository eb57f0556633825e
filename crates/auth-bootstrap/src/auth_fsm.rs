//! Coarse auth lifecycle as a rust-fsm machine.
//!
//! ```text
//! Uninitialized ──Start──► Initializing ──Verified──► Authenticated
//!                               │                        │   ▲
//!                               │ NoSession / Failed     │   │ Verified
//!                               ▼                        ▼   │
//!                          Unauthenticated ◄── SignedOut / SessionExpired
//!                               │
//!             LogoutRequested   ▼   (from either settled phase)
//!                          LoggingOut ──LogoutComplete──► Unauthenticated
//! ```

use rust_fsm::*;
use serde::{Deserialize, Serialize};

state_machine! {
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub phase_machine(Uninitialized)

    Uninitialized => {
        Start => Initializing
    },
    Initializing => {
        Verified => Authenticated,
        NoSession => Unauthenticated,
        Failed => Unauthenticated,
        SignedOut => Unauthenticated
    },
    Authenticated => {
        Verified => Authenticated,
        Failed => Unauthenticated,
        SignedOut => Unauthenticated,
        SessionExpired => Unauthenticated,
        LogoutRequested => LoggingOut
    },
    Unauthenticated => {
        Verified => Authenticated,
        NoSession => Unauthenticated,
        Failed => Unauthenticated,
        SignedOut => Unauthenticated,
        SessionExpired => Unauthenticated,
        LogoutRequested => LoggingOut
    },
    LoggingOut => {
        LogoutComplete => Unauthenticated
    }
}

pub use phase_machine::Input as PhaseInput;
pub use phase_machine::State as PhaseState;
pub use phase_machine::StateMachine as PhaseMachine;

/// Lifecycle phase exposed on the auth snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthPhase {
    #[default]
    Uninitialized,
    Initializing,
    Authenticated,
    Unauthenticated,
    LoggingOut,
}

impl AuthPhase {
    /// True once initialization has produced an answer.
    pub fn is_settled(&self) -> bool {
        matches!(self, AuthPhase::Authenticated | AuthPhase::Unauthenticated)
    }
}

impl From<&PhaseState> for AuthPhase {
    fn from(state: &PhaseState) -> Self {
        match state {
            PhaseState::Uninitialized => AuthPhase::Uninitialized,
            PhaseState::Initializing => AuthPhase::Initializing,
            PhaseState::Authenticated => AuthPhase::Authenticated,
            PhaseState::Unauthenticated => AuthPhase::Unauthenticated,
            PhaseState::LoggingOut => AuthPhase::LoggingOut,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state_is_uninitialized() {
        let machine = PhaseMachine::new();
        assert_eq!(*machine.state(), PhaseState::Uninitialized);
    }

    #[test]
    fn test_bootstrap_to_authenticated() {
        let mut machine = PhaseMachine::new();
        machine.consume(&PhaseInput::Start).unwrap();
        assert_eq!(*machine.state(), PhaseState::Initializing);

        machine.consume(&PhaseInput::Verified).unwrap();
        assert_eq!(*machine.state(), PhaseState::Authenticated);
    }

    #[test]
    fn test_bootstrap_without_session() {
        let mut machine = PhaseMachine::new();
        machine.consume(&PhaseInput::Start).unwrap();
        machine.consume(&PhaseInput::NoSession).unwrap();
        assert_eq!(*machine.state(), PhaseState::Unauthenticated);

        // Signing in later.
        machine.consume(&PhaseInput::Verified).unwrap();
        assert_eq!(*machine.state(), PhaseState::Authenticated);
    }

    #[test]
    fn test_logout_flow() {
        let mut machine = PhaseMachine::new();
        machine.consume(&PhaseInput::Start).unwrap();
        machine.consume(&PhaseInput::Verified).unwrap();

        machine.consume(&PhaseInput::LogoutRequested).unwrap();
        assert_eq!(*machine.state(), PhaseState::LoggingOut);

        machine.consume(&PhaseInput::LogoutComplete).unwrap();
        assert_eq!(*machine.state(), PhaseState::Unauthenticated);
    }

    #[test]
    fn test_session_expiry_leaves_authenticated() {
        let mut machine = PhaseMachine::new();
        machine.consume(&PhaseInput::Start).unwrap();
        machine.consume(&PhaseInput::Verified).unwrap();

        machine.consume(&PhaseInput::SessionExpired).unwrap();
        assert_eq!(*machine.state(), PhaseState::Unauthenticated);
    }

    #[test]
    fn test_invalid_transitions_are_rejected() {
        let mut machine = PhaseMachine::new();
        assert!(machine.consume(&PhaseInput::Verified).is_err());
        assert!(machine.consume(&PhaseInput::LogoutRequested).is_err());

        machine.consume(&PhaseInput::Start).unwrap();
        assert!(machine.consume(&PhaseInput::Start).is_err());
        assert!(machine.consume(&PhaseInput::LogoutComplete).is_err());
    }

    #[test]
    fn test_phase_conversion_and_settled() {
        assert_eq!(
            AuthPhase::from(&PhaseState::Initializing),
            AuthPhase::Initializing
        );
        assert_eq!(
            AuthPhase::from(&PhaseState::LoggingOut),
            AuthPhase::LoggingOut
        );
        assert!(AuthPhase::Authenticated.is_settled());
        assert!(AuthPhase::Unauthenticated.is_settled());
        assert!(!AuthPhase::Initializing.is_settled());
        assert!(!AuthPhase::default().is_settled());
    }
}
