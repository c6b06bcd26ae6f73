//! OAuth session lifecycle for remote trackers.

use chrono::{DateTime, Utc};

use tsuzuki_core::storage::StoredToken;

/// Where a tracker's credentials stand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Unauthenticated,
    Authenticating,
    Authenticated,
    Expired,
    Refreshing,
}

impl AuthState {
    /// Allowed transitions:
    ///
    /// ```text
    /// Unauthenticated -> Authenticating -> Authenticated | Unauthenticated
    /// Authenticated   -> Expired -> Refreshing -> Authenticated | Unauthenticated
    /// ```
    ///
    /// Loading a stored token may land directly in `Authenticated` or `Expired`.
    pub fn can_transition(self, to: AuthState) -> bool {
        use AuthState::*;
        matches!(
            (self, to),
            (Unauthenticated, Authenticating)
                | (Unauthenticated, Authenticated)
                | (Unauthenticated, Expired)
                | (Authenticating, Authenticated)
                | (Authenticating, Unauthenticated)
                | (Authenticated, Expired)
                | (Authenticated, Unauthenticated)
                | (Expired, Refreshing)
                | (Expired, Authenticating)
                | (Expired, Unauthenticated)
                | (Refreshing, Authenticated)
                | (Refreshing, Unauthenticated)
        )
    }
}

/// Credentials plus their state. Transitions that the state machine does not
/// allow are ignored and logged.
#[derive(Debug, Clone)]
pub struct Session {
    state: AuthState,
    token: Option<StoredToken>,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            state: AuthState::Unauthenticated,
            token: None,
        }
    }
}

impl Session {
    /// Session restored from a persisted token.
    pub fn restore(token: Option<StoredToken>, now: DateTime<Utc>) -> Self {
        let mut session = Self::default();
        if let Some(token) = token {
            let next = if is_expired(&token, now) {
                AuthState::Expired
            } else {
                AuthState::Authenticated
            };
            session.token = Some(token);
            session.transition(next);
        }
        session
    }

    pub fn state(&self) -> AuthState {
        self.state
    }

    /// Access token, if the session is authenticated and not past its expiry.
    pub fn access_token(&self, now: DateTime<Utc>) -> Option<&str> {
        match (&self.token, self.state) {
            (Some(token), AuthState::Authenticated) if !is_expired(token, now) => {
                Some(token.access_token.as_str())
            }
            _ => None,
        }
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.token.as_ref()?.refresh_token.as_deref()
    }

    /// Usable now, or recoverable without user interaction.
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.access_token(now).is_some() || self.needs_refresh(now)
    }

    /// Past expiry but holding a refresh token.
    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        let expired = match self.state {
            AuthState::Expired => true,
            AuthState::Authenticated => self.token.as_ref().is_some_and(|t| is_expired(t, now)),
            _ => false,
        };
        expired && self.refresh_token().is_some()
    }

    /// Mark the token as rejected or past its lifetime.
    pub fn expire(&mut self) {
        self.transition(AuthState::Expired);
    }

    pub fn begin_login(&mut self) -> bool {
        self.transition(AuthState::Authenticating)
    }

    pub fn begin_refresh(&mut self) -> bool {
        if self.state == AuthState::Authenticated {
            self.expire();
        }
        self.transition(AuthState::Refreshing)
    }

    /// A login or refresh produced a token.
    pub fn complete(&mut self, token: StoredToken) {
        if self.transition(AuthState::Authenticated) {
            self.token = Some(token);
        }
    }

    /// A login or refresh failed, or the user logged out.
    pub fn reset(&mut self) {
        self.transition(AuthState::Unauthenticated);
        self.token = None;
    }

    fn transition(&mut self, to: AuthState) -> bool {
        if self.state == to {
            return true;
        }
        if !self.state.can_transition(to) {
            tracing::debug!(from = ?self.state, to = ?to, "ignored auth transition");
            return false;
        }
        self.state = to;
        true
    }
}

fn is_expired(token: &StoredToken, now: DateTime<Utc>) -> bool {
    token.expires_at.is_some_and(|at| at <= now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn token(expires_in_mins: Option<i64>, refresh: bool) -> StoredToken {
        StoredToken {
            access_token: "access".into(),
            refresh_token: refresh.then(|| "refresh".to_string()),
            expires_at: expires_in_mins.map(|m| Utc::now() + Duration::minutes(m)),
        }
    }

    #[test]
    fn test_restore() {
        let now = Utc::now();
        assert_eq!(Session::restore(None, now).state(), AuthState::Unauthenticated);

        let live = Session::restore(Some(token(Some(60), false)), now);
        assert_eq!(live.state(), AuthState::Authenticated);
        assert_eq!(live.access_token(now), Some("access"));

        let stale = Session::restore(Some(token(Some(-60), true)), now);
        assert_eq!(stale.state(), AuthState::Expired);
        assert!(stale.access_token(now).is_none());
        assert!(stale.is_usable(now));
    }

    #[test]
    fn test_expired_without_refresh_token_is_unusable() {
        let now = Utc::now();
        let session = Session::restore(Some(token(Some(-1), false)), now);
        assert!(!session.is_usable(now));
    }

    #[test]
    fn test_token_lapsing_while_authenticated() {
        let session = Session::restore(Some(token(Some(5), true)), Utc::now());
        let later = Utc::now() + Duration::minutes(10);
        assert!(session.access_token(later).is_none());
        assert!(session.needs_refresh(later));
    }

    #[test]
    fn test_refresh_cycle() {
        let now = Utc::now();
        let mut session = Session::restore(Some(token(None, true)), now);
        session.expire();
        assert!(session.begin_refresh());
        assert_eq!(session.state(), AuthState::Refreshing);

        session.complete(token(Some(60), true));
        assert_eq!(session.state(), AuthState::Authenticated);

        session.expire();
        session.begin_refresh();
        session.reset();
        assert_eq!(session.state(), AuthState::Unauthenticated);
        assert!(session.refresh_token().is_none());
    }

    #[test]
    fn test_invalid_transitions_are_ignored() {
        let mut session = Session::default();
        assert!(!session.begin_refresh());
        assert_eq!(session.state(), AuthState::Unauthenticated);

        session.complete(token(None, false));
        assert_eq!(session.state(), AuthState::Authenticated);
        assert!(!AuthState::Refreshing.can_transition(AuthState::Expired));
    }
}
