//! Identity provider seam.
//!
//! Sign-in, sign-up, token issuance and auth-state notifications all belong
//! to a hosted identity service. Everything else in this crate reaches it
//! through [`IdentityProvider`] only.

use std::time::Duration;

use async_trait::async_trait;
use kernel::{AuthSession, Credentials, RefreshRequest};
use parking_lot::Mutex;
use reqwest::Client;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::api::read_detail;
use crate::error::ClientError;
use crate::resource::Resource;

/// Tokens closer than this to expiry are refreshed before use.
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// What the application knows about the current user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    /// The provider has not reported yet
    Unknown,
    SignedOut,
    SignedIn(AuthSession),
}

impl AuthState {
    #[must_use]
    pub fn session(&self) -> Option<&AuthSession> {
        match self {
            AuthState::SignedIn(session) => Some(session),
            _ => None,
        }
    }
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn sign_in(&self, credentials: &Credentials) -> Result<AuthSession, ClientError>;

    async fn sign_up(&self, credentials: &Credentials) -> Result<AuthSession, ClientError>;

    async fn sign_out(&self) -> Result<(), ClientError>;

    /// A bearer token for the signed in user, fetched fresh for every request.
    async fn id_token(&self) -> Result<String, ClientError>;

    /// Auth-state notifications. Dropping the receiver unsubscribes.
    fn subscribe(&self) -> watch::Receiver<AuthState>;

    fn current_user(&self) -> Option<AuthSession> {
        self.subscribe().borrow().session().cloned()
    }
}

/// Broadcasts auth-state changes to every live subscriber.
#[derive(Debug)]
pub struct AuthStateCell {
    sender: watch::Sender<AuthState>,
}

impl Default for AuthStateCell {
    fn default() -> Self {
        let (sender, _) = watch::channel(AuthState::Unknown);
        Self { sender }
    }
}

impl AuthStateCell {
    pub fn publish(&self, state: AuthState) {
        self.sender.send_replace(state);
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.sender.subscribe()
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    #[must_use]
    pub fn current(&self) -> AuthState {
        self.sender.borrow().clone()
    }
}

struct Held {
    session: AuthSession,
    expires_at: Instant,
}

/// Email/password identity backed by the REST identity endpoints
/// (`/auth/signup`, `/auth/signin`, `/auth/token`, `/auth/signout`).
pub struct PasswordIdentity {
    http: Client,
    base: Resource,
    state: AuthStateCell,
    held: Mutex<Option<Held>>,
}

impl PasswordIdentity {
    pub fn new(uri: &str) -> Result<Self, ClientError> {
        Ok(Self {
            http: Client::new(),
            base: Resource::parse(uri)?,
            state: AuthStateCell::default(),
            held: Mutex::new(None),
        })
    }

    /// Resolves the initial `Unknown` state when nobody signs in.
    pub fn settle(&self) {
        if self.held.lock().is_none() {
            self.state.publish(AuthState::SignedOut);
        }
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.state.subscriber_count()
    }

    fn endpoint(&self, path: &str) -> String {
        let mut resource = self.base.clone();
        resource.append_path(path);
        resource.to_string()
    }

    async fn exchange<B: serde::Serialize + Sync>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<AuthSession, ClientError> {
        let response = self.http.post(self.endpoint(path)).json(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let detail = read_detail(response)
                .await
                .unwrap_or_else(|| format!("Identity request failed: {status}"));
            return Err(ClientError::Api { status, detail });
        }
        let session: AuthSession = response.json().await?;
        self.hold(session.clone());
        Ok(session)
    }

    fn hold(&self, session: AuthSession) {
        let expires_at = Instant::now() + Duration::from_secs(session.expires_in);
        *self.held.lock() = Some(Held {
            session: session.clone(),
            expires_at,
        });
        self.state.publish(AuthState::SignedIn(session));
    }

    fn forget(&self) {
        *self.held.lock() = None;
        self.state.publish(AuthState::SignedOut);
    }
}

#[async_trait]
impl IdentityProvider for PasswordIdentity {
    async fn sign_in(&self, credentials: &Credentials) -> Result<AuthSession, ClientError> {
        let session = self.exchange("auth/signin", credentials).await?;
        tracing::info!("signed in as {}", session.email);
        Ok(session)
    }

    async fn sign_up(&self, credentials: &Credentials) -> Result<AuthSession, ClientError> {
        let session = self.exchange("auth/signup", credentials).await?;
        tracing::info!("account {} created", session.email);
        Ok(session)
    }

    async fn sign_out(&self) -> Result<(), ClientError> {
        let token = self.held.lock().as_ref().map(|h| h.session.id_token.clone());
        if let Some(token) = token {
            let result = self
                .http
                .post(self.endpoint("auth/signout"))
                .bearer_auth(token)
                .send()
                .await;
            if let Err(e) = result {
                tracing::warn!("sign out was not acknowledged: {e}");
            }
        }
        self.forget();
        Ok(())
    }

    async fn id_token(&self) -> Result<String, ClientError> {
        let refresh = {
            let held = self.held.lock();
            let Some(held) = held.as_ref() else {
                return Err(ClientError::NotAuthenticated);
            };
            if held.expires_at.saturating_duration_since(Instant::now()) > REFRESH_MARGIN {
                return Ok(held.session.id_token.clone());
            }
            RefreshRequest {
                refresh_token: held.session.refresh_token.clone(),
            }
        };

        tracing::debug!("id token is about to expire, refreshing");
        match self.exchange("auth/token", &refresh).await {
            Ok(session) => Ok(session.id_token),
            Err(e) => {
                tracing::error!("token refresh failed: {e}");
                if e.status() == Some(reqwest::StatusCode::UNAUTHORIZED) {
                    self.forget();
                }
                Err(e)
            }
        }
    }

    fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn id_token_without_session_fails() {
        // Arrange
        let identity = PasswordIdentity::new("http://localhost:8000/api").unwrap();

        // Act
        let result = identity.id_token().await;

        // Assert
        assert!(matches!(result, Err(ClientError::NotAuthenticated)));
        assert_eq!(
            result.unwrap_err().to_string(),
            "User not authenticated"
        );
    }

    #[tokio::test]
    async fn settle_moves_unknown_to_signed_out() {
        // Arrange
        let identity = PasswordIdentity::new("http://localhost:8000/api").unwrap();
        let rx = identity.subscribe();
        assert_eq!(*rx.borrow(), AuthState::Unknown);

        // Act
        identity.settle();

        // Assert
        assert_eq!(*rx.borrow(), AuthState::SignedOut);
    }

    #[tokio::test]
    async fn held_token_is_returned_while_fresh() {
        // Arrange
        let identity = PasswordIdentity::new("http://localhost:8000/api").unwrap();
        let session = AuthSession {
            uid: "u1".to_owned(),
            email: "a@b.c".to_owned(),
            id_token: "token-1".to_owned(),
            refresh_token: "refresh-1".to_owned(),
            expires_in: 3600,
        };

        // Act
        identity.hold(session.clone());
        let token = identity.id_token().await.unwrap();

        // Assert
        assert_eq!(token, "token-1");
        assert_eq!(identity.current_user(), Some(session));
    }

    #[test]
    fn dropping_receiver_unsubscribes() {
        // Arrange
        let cell = AuthStateCell::default();
        let rx = cell.subscribe();
        assert_eq!(cell.subscriber_count(), 1);

        // Act
        drop(rx);

        // Assert
        assert_eq!(cell.subscriber_count(), 0);
    }
}
