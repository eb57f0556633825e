//! Auth startup and the reactive auth façade.
//!
//! [`AuthBootstrap`] runs the one-time startup sequence, reconciles the local
//! record with the identity provider, keeps [`AuthSnapshot`] current, and
//! exposes sign-in, callback completion, development login, profile refresh
//! and logout.

mod auth_fsm;
mod bootstrap;
mod error;
mod navigation;
mod state;

pub use auth_fsm::{AuthPhase, PhaseInput, PhaseMachine, PhaseState};
pub use bootstrap::AuthBootstrap;
pub use error::{BootstrapError, BootstrapResult};
pub use navigation::Navigation;
pub use state::{AuthSnapshot, UserProfile};
