//! Auth provider port (driven/secondary port)
//!
//! The sync engine only needs to know whether a user is signed in and when
//! that changes; token acquisition and refresh are the adapter's business.

use tokio::sync::watch;

use crate::domain::UserId;

/// Authentication state as seen by the sync engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    SignedOut,
    Authenticated(UserId),
}

impl AuthState {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, AuthState::Authenticated(_))
    }
}

/// Port trait for user authentication state
pub trait IAuthProvider: Send + Sync {
    /// Returns the signed-in user, if any
    fn current_user(&self) -> Option<UserId>;

    /// Returns true when a user is signed in
    fn is_authenticated(&self) -> bool {
        self.current_user().is_some()
    }

    /// Subscribes to auth state transitions. The receiver observes the
    /// current state immediately.
    fn subscribe(&self) -> watch::Receiver<AuthState>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_state_predicate() {
        assert!(!AuthState::SignedOut.is_authenticated());
        assert!(AuthState::Authenticated(UserId::new()).is_authenticated());
    }
}
