use kernel::{AuthSession, Credentials};

use crate::error::ClientError;
use crate::identity::IdentityProvider;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FormMode {
    #[default]
    SignIn,
    SignUp,
}

/// Email/password form submitted to the identity provider.
///
/// Password rules, rate limiting and the like are the provider's business;
/// its error message is shown as is.
#[derive(Debug, Default)]
pub struct CredentialForm {
    pub email: String,
    pub password: String,
    mode: FormMode,
    submitting: bool,
    error: Option<String>,
}

impl CredentialForm {
    pub fn new(email: impl Into<String>, password: impl Into<String>, mode: FormMode) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
            mode,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn mode(&self) -> FormMode {
        self.mode
    }

    pub fn toggle_mode(&mut self) {
        self.mode = match self.mode {
            FormMode::SignIn => FormMode::SignUp,
            FormMode::SignUp => FormMode::SignIn,
        };
    }

    #[must_use]
    pub fn can_submit(&self) -> bool {
        !self.submitting
    }

    #[must_use]
    pub fn submit_label(&self) -> &'static str {
        match (self.submitting, self.mode) {
            (true, _) => "Please wait...",
            (false, FormMode::SignIn) => "Sign In",
            (false, FormMode::SignUp) => "Create Account",
        }
    }

    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub async fn submit(
        &mut self,
        identity: &dyn IdentityProvider,
    ) -> Result<AuthSession, ClientError> {
        if self.submitting {
            return Err(ClientError::Refused("A request is already in progress".to_owned()));
        }
        self.submitting = true;
        self.error = None;

        let credentials = Credentials {
            email: self.email.clone(),
            password: self.password.clone(),
        };
        let result = match self.mode {
            FormMode::SignIn => identity.sign_in(&credentials).await,
            FormMode::SignUp => identity.sign_up(&credentials).await,
        };
        if let Err(e) = &result {
            tracing::error!("{:?} failed for {}: {e}", self.mode, self.email);
            self.error = Some(e.to_string());
        }

        self.submitting = false;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::StaticIdentity;

    #[test]
    fn labels_follow_mode() {
        // Arrange
        let mut form = CredentialForm::default();
        let sign_in_label = form.submit_label();

        // Act
        form.toggle_mode();

        // Assert
        assert_eq!(sign_in_label, "Sign In");
        assert_eq!(form.submit_label(), "Create Account");
        assert_eq!(form.mode(), FormMode::SignUp);
    }

    #[tokio::test]
    async fn failed_sign_in_shows_provider_message_verbatim() {
        // Arrange
        let identity = StaticIdentity::new("t").rejecting("Invalid email or password");
        let mut form = CredentialForm::new("a@b.c", "wrong", FormMode::SignIn);

        // Act
        let result = form.submit(&identity).await;

        // Assert
        assert!(result.is_err());
        assert_eq!(form.error(), Some("Invalid email or password"));
        assert!(form.can_submit());
        assert_eq!(form.submit_label(), "Sign In");
    }

    #[tokio::test]
    async fn sign_up_uses_sign_up_endpoint_and_clears_error() {
        // Arrange
        let identity = StaticIdentity::new("t");
        let mut form = CredentialForm::new("a@b.c", "secret", FormMode::SignUp);
        form.error = Some("old".to_owned());

        // Act
        let session = form.submit(&identity).await.unwrap();

        // Assert
        assert_eq!(session.email, "a@b.c");
        assert_eq!(identity.sign_ups(), 1);
        assert_eq!(identity.sign_ins(), 0);
        assert_eq!(form.error(), None);
    }
}
