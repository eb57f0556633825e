//! Navigation requests emitted by the façade.

/// Where the application should go next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Navigation {
    /// The login screen, with the reason the user ended up there.
    Login { reason: Option<String> },
    /// The signed-in landing screen.
    Home,
}

impl Navigation {
    pub fn login(reason: impl Into<String>) -> Self {
        Navigation::Login {
            reason: Some(reason.into()),
        }
    }

    pub fn path(&self) -> &'static str {
        match self {
            Navigation::Login { .. } => "/login",
            Navigation::Home => "/",
        }
    }
}
