//! Route guarding based on auth state.

use std::fmt;
use std::str::FromStr;

use tokio::sync::watch;

use crate::identity::{AuthState, IdentityProvider};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Landing,
    Login,
    Dashboard,
    Premium,
    Other(String),
}

impl FromStr for Route {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let path = s.split(['?', '#']).next().unwrap_or_default();
        let path = path.trim_end_matches('/');
        Ok(match path {
            "" => Route::Landing,
            "/login" => Route::Login,
            "/dashboard" => Route::Dashboard,
            "/premium" => Route::Premium,
            _ => Route::Other(s.to_owned()),
        })
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Route::Landing => f.write_str("/"),
            Route::Login => f.write_str("/login"),
            Route::Dashboard => f.write_str("/dashboard"),
            Route::Premium => f.write_str("/premium"),
            Route::Other(path) => f.write_str(path),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    Loading,
    Landing,
    Login,
    Dashboard,
    Upgrade,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Render(View),
    Redirect(Route),
}

/// Decides what a route shows for a given auth state.
#[must_use]
pub fn resolve(route: &Route, state: &AuthState) -> Outcome {
    match state {
        AuthState::Unknown => Outcome::Render(View::Loading),
        AuthState::SignedOut => match route {
            Route::Landing => Outcome::Render(View::Landing),
            Route::Login => Outcome::Render(View::Login),
            Route::Dashboard | Route::Premium => Outcome::Redirect(Route::Login),
            Route::Other(_) => Outcome::Redirect(Route::Landing),
        },
        AuthState::SignedIn(_) => match route {
            Route::Landing | Route::Login | Route::Other(_) => Outcome::Redirect(Route::Dashboard),
            Route::Dashboard => Outcome::Render(View::Dashboard),
            Route::Premium => Outcome::Render(View::Upgrade),
        },
    }
}

/// Follows redirects until a view renders.
#[must_use]
pub fn land(route: &Route, state: &AuthState) -> (Route, View) {
    let mut current = route.clone();
    // unknown paths bounce through the landing page
    for _ in 0..3 {
        match resolve(&current, state) {
            Outcome::Render(view) => return (current, view),
            Outcome::Redirect(next) => current = next,
        }
    }
    (current, View::Loading)
}

/// Keeps a subscription to auth-state changes while it lives.
pub struct RouteGuard {
    state: watch::Receiver<AuthState>,
}

impl RouteGuard {
    pub fn new(identity: &dyn IdentityProvider) -> Self {
        Self {
            state: identity.subscribe(),
        }
    }

    #[must_use]
    pub fn resolve(&self, route: &Route) -> Outcome {
        resolve(route, &self.state.borrow())
    }

    #[must_use]
    pub fn land(&self, route: &Route) -> (Route, View) {
        land(route, &self.state.borrow())
    }

    /// Waits until the auth state is no longer `Unknown`.
    pub async fn settled(&mut self) -> AuthState {
        match self
            .state
            .wait_for(|s| !matches!(s, AuthState::Unknown))
            .await
        {
            Ok(state) => state.clone(),
            Err(_) => AuthState::SignedOut,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::StaticIdentity;
    use kernel::AuthSession;
    use rstest::rstest;

    fn signed_in() -> AuthState {
        AuthState::SignedIn(AuthSession {
            uid: "u1".to_owned(),
            email: "a@b.c".to_owned(),
            id_token: "t".to_owned(),
            refresh_token: "r".to_owned(),
            expires_in: 3600,
        })
    }

    #[rstest]
    #[case("/", AuthState::Unknown, Outcome::Render(View::Loading))]
    #[case("/dashboard", AuthState::Unknown, Outcome::Render(View::Loading))]
    #[case("/", AuthState::SignedOut, Outcome::Render(View::Landing))]
    #[case("/login", AuthState::SignedOut, Outcome::Render(View::Login))]
    #[case("/dashboard", AuthState::SignedOut, Outcome::Redirect(Route::Login))]
    #[case("/premium", AuthState::SignedOut, Outcome::Redirect(Route::Login))]
    #[case("/nowhere", AuthState::SignedOut, Outcome::Redirect(Route::Landing))]
    #[case("/", signed_in(), Outcome::Redirect(Route::Dashboard))]
    #[case("/login", signed_in(), Outcome::Redirect(Route::Dashboard))]
    #[case("/dashboard?payment=success", signed_in(), Outcome::Render(View::Dashboard))]
    #[case("/premium?payment=cancelled", signed_in(), Outcome::Render(View::Upgrade))]
    #[case("/nowhere", signed_in(), Outcome::Redirect(Route::Dashboard))]
    #[trace]
    fn resolve_tests(#[case] path: &str, #[case] state: AuthState, #[case] expected: Outcome) {
        // Arrange
        let route: Route = path.parse().unwrap();

        // Act
        let outcome = resolve(&route, &state);

        // Assert
        assert_eq!(outcome, expected);
    }

    #[rstest]
    #[case("/nowhere", AuthState::SignedOut, Route::Landing, View::Landing)]
    #[case("/premium", AuthState::SignedOut, Route::Login, View::Login)]
    #[case("/login", signed_in(), Route::Dashboard, View::Dashboard)]
    #[trace]
    fn land_follows_redirects(
        #[case] path: &str,
        #[case] state: AuthState,
        #[case] expected_route: Route,
        #[case] expected_view: View,
    ) {
        // Arrange
        let route: Route = path.parse().unwrap();

        // Act
        let (landed, view) = land(&route, &state);

        // Assert
        assert_eq!(landed, expected_route);
        assert_eq!(view, expected_view);
    }

    #[tokio::test]
    async fn guard_follows_auth_changes_and_unsubscribes_on_drop() {
        // Arrange
        let identity = StaticIdentity::new("t");
        identity.publish(AuthState::SignedOut);
        let guard = RouteGuard::new(&identity);
        assert_eq!(identity.subscriber_count(), 1);
        assert_eq!(
            guard.resolve(&Route::Dashboard),
            Outcome::Redirect(Route::Login)
        );

        // Act
        identity.publish(signed_in());

        // Assert
        assert_eq!(
            guard.resolve(&Route::Dashboard),
            Outcome::Render(View::Dashboard)
        );
        drop(guard);
        assert_eq!(identity.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn settled_waits_for_first_report() {
        // Arrange
        let identity = std::sync::Arc::new(StaticIdentity::new("t"));
        let mut guard = RouteGuard::new(identity.as_ref());
        let publisher = identity.clone();

        // Act
        tokio::spawn(async move {
            publisher.publish(AuthState::SignedOut);
        });
        let state = guard.settled().await;

        // Assert
        assert_eq!(state, AuthState::SignedOut);
    }
}
