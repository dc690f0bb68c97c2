use std::path::PathBuf;
use std::sync::Arc;

use client::checkout::{self, CheckoutOutcome};
use client::display::{community_table, files_table, progress_table, usage_line};
use client::download::{Control, DownloadOutcome, SystemDelivery};
use client::form::{CredentialForm, FormMode};
use client::guard::{Route, RouteGuard};
use client::prompt::TerminalPrompt;
use client::{ApiClient, ClientError, Dashboard, PasswordIdentity, UploadFile};
use kernel::AuthSession;

/// Connection and interaction settings collected from flags and environment.
pub struct Settings {
    pub uri: String,
    pub identity_uri: String,
    pub email: Option<String>,
    pub password: Option<String>,
    pub origin: String,
    pub download_dir: PathBuf,
    pub assume_yes: bool,
    pub browser: bool,
}

struct Session {
    identity: Arc<PasswordIdentity>,
    api: ApiClient,
    prompt: TerminalPrompt,
    delivery: SystemDelivery,
}

impl Session {
    fn new(settings: &Settings) -> Result<Self, ClientError> {
        let identity = Arc::new(PasswordIdentity::new(&settings.identity_uri)?);
        let api = ApiClient::new(&settings.uri, identity.clone())?;
        Ok(Self {
            identity,
            api,
            prompt: TerminalPrompt::new(settings.assume_yes),
            delivery: SystemDelivery::new(&settings.download_dir, settings.browser),
        })
    }

    async fn connect(settings: &Settings, mode: FormMode) -> Result<(Self, AuthSession), ClientError> {
        let session = Self::new(settings)?;
        let auth = session.sign_in(settings, mode).await?;
        Ok((session, auth))
    }

    async fn sign_in(&self, settings: &Settings, mode: FormMode) -> Result<AuthSession, ClientError> {
        fn present(v: &Option<String>) -> Option<&str> {
            v.as_deref().filter(|v| !v.is_empty())
        }
        let (Some(email), Some(password)) = (present(&settings.email), present(&settings.password))
        else {
            return Err(ClientError::NotAuthenticated);
        };
        let mut form = CredentialForm::new(email, password, mode);
        form.submit(self.identity.as_ref()).await
    }

    fn dashboard(&self) -> Dashboard<'_, ApiClient> {
        Dashboard::new(&self.api, &self.prompt)
    }
}

fn report_download(outcome: &DownloadOutcome) {
    match outcome {
        DownloadOutcome::Cancelled => println!("Download cancelled"),
        DownloadOutcome::Opened => println!("Opened in the browser"),
        DownloadOutcome::Saved(path) => println!("Saved to {}", path.display()),
    }
}

pub async fn sign_up(settings: &Settings) -> Result<(), ClientError> {
    let (_, auth) = Session::connect(settings, FormMode::SignUp).await?;
    println!("Account created for {} ({})", auth.email, auth.uid);
    Ok(())
}

pub async fn whoami(settings: &Settings) -> Result<(), ClientError> {
    let (session, _) = Session::connect(settings, FormMode::SignIn).await?;
    let user = session.api.verify_user().await?;
    println!("{} <{}>", user.display_name.as_deref().unwrap_or("-"), user.email);
    println!("Id: {}", user.uid);
    println!("{}", usage_line(&user));
    Ok(())
}

pub async fn list(settings: &Settings) -> Result<(), ClientError> {
    let (session, _) = Session::connect(settings, FormMode::SignIn).await?;
    let dashboard = session.dashboard();
    dashboard.refresh().await;
    if let Some(user) = dashboard.user() {
        println!("{}", usage_line(&user));
    }
    let files = dashboard.files();
    if files.is_empty() {
        println!("No backups yet");
    } else {
        println!("{}", files_table(&files));
    }
    Ok(())
}

async fn stage(paths: &[PathBuf]) -> Result<Vec<UploadFile>, ClientError> {
    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        files.push(UploadFile::from_path(path).await?);
    }
    Ok(files)
}

/// Uploads the files. With `dropped` set, files that are not custom content are skipped first.
pub async fn upload(settings: &Settings, paths: &[PathBuf], dropped: bool) -> Result<(), ClientError> {
    let files = stage(paths).await?;
    let (session, _) = Session::connect(settings, FormMode::SignIn).await?;
    let dashboard = session.dashboard();
    dashboard.refresh().await;

    let result = if dropped {
        dashboard.upload_dropped(files).await
    } else {
        dashboard.upload(files).await
    };
    let summary = result.map_err(|r| ClientError::Refused(r.to_string()))?;

    println!("{}", progress_table(&dashboard.progress().snapshot()));
    if summary.needs_refresh() {
        println!("{}", files_table(&dashboard.files()));
    }
    Ok(())
}

pub async fn download(settings: &Settings, id: &str) -> Result<(), ClientError> {
    let (session, _) = Session::connect(settings, FormMode::SignIn).await?;
    let dashboard = session.dashboard();
    dashboard.load_files().await;
    let mut control = Control::new("Download");
    let outcome = dashboard.download(id, &session.delivery, &mut control).await?;
    report_download(&outcome);
    Ok(())
}

pub async fn delete(settings: &Settings, id: &str) -> Result<(), ClientError> {
    let (session, _) = Session::connect(settings, FormMode::SignIn).await?;
    let dashboard = session.dashboard();
    dashboard.refresh().await;
    if dashboard.delete(id).await? {
        println!("{}", files_table(&dashboard.files()));
    }
    Ok(())
}

pub async fn upgrade(settings: &Settings) -> Result<(), ClientError> {
    let (session, auth) = Session::connect(settings, FormMode::SignIn).await?;
    let outcome = checkout::upgrade(
        &session.api,
        &auth,
        &settings.origin,
        &session.prompt,
        &session.delivery,
    )
    .await?;
    if let CheckoutOutcome::Navigated(url) = outcome {
        println!("Checkout opened: {url}");
    }
    Ok(())
}

/// Prints where `path` lands. Signs in first when credentials are configured.
pub async fn route(settings: &Settings, path: &str) -> Result<(), ClientError> {
    let session = Session::new(settings)?;
    let mut guard = RouteGuard::new(session.identity.as_ref());
    if settings.email.is_some() && settings.password.is_some() {
        session.sign_in(settings, FormMode::SignIn).await?;
    } else {
        session.identity.settle();
    }
    let state = guard.settled().await;
    let requested = path.parse::<Route>().unwrap_or_else(|never| match never {});
    let (landed, view) = guard.land(&requested);
    tracing::debug!("auth state: {state:?}");
    println!("{requested} -> {landed} ({view:?})");
    Ok(())
}

pub async fn community_list(settings: &Settings, offset: u32) -> Result<(), ClientError> {
    let session = Session::new(settings)?;
    let dashboard = session.dashboard();
    dashboard.load_community(offset).await?;
    let files = dashboard.community_files().await;
    if files.is_empty() {
        println!("Nothing shared yet");
    } else {
        println!("{}", community_table(&files));
    }
    Ok(())
}

pub async fn community_share(settings: &Settings, id: &str, description: &str) -> Result<(), ClientError> {
    let (session, _) = Session::connect(settings, FormMode::SignIn).await?;
    let dashboard = session.dashboard();
    dashboard.refresh().await;
    dashboard.share(id, description).await?;
    Ok(())
}

/// Downloads an entry of the community page starting at `offset`.
pub async fn community_download(settings: &Settings, id: &str, offset: u32) -> Result<(), ClientError> {
    let (session, _) = Session::connect(settings, FormMode::SignIn).await?;
    let dashboard = session.dashboard();
    dashboard.load_community(offset).await?;
    let mut control = Control::new("Download");
    let outcome = dashboard
        .download_shared(id, &session.delivery, &mut control)
        .await?;
    report_download(&outcome);
    Ok(())
}

pub async fn community_rate(settings: &Settings, id: &str, stars: u8) -> Result<(), ClientError> {
    let (session, _) = Session::connect(settings, FormMode::SignIn).await?;
    let dashboard = session.dashboard();
    dashboard.load_user().await;
    dashboard.rate(id, stars).await
}

pub async fn community_unshare(settings: &Settings, id: &str) -> Result<(), ClientError> {
    let (session, _) = Session::connect(settings, FormMode::SignIn).await?;
    session.dashboard().unshare(id).await?;
    println!("File removed from community sharing");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn settings(email: Option<&str>, password: Option<&str>) -> Settings {
        Settings {
            uri: "http://127.0.0.1:9".to_owned(),
            identity_uri: "http://127.0.0.1:9".to_owned(),
            email: email.map(str::to_owned),
            password: password.map(str::to_owned),
            origin: "http://localhost".to_owned(),
            download_dir: PathBuf::from("."),
            assume_yes: true,
            browser: false,
        }
    }

    #[rstest]
    #[case(None, None)]
    #[case(Some("simmer@simsync.dev"), None)]
    #[case(None, Some("secret"))]
    #[case(Some(""), Some("secret"))]
    #[case(Some("simmer@simsync.dev"), Some(""))]
    #[trace]
    #[tokio::test]
    async fn sign_in_without_credentials_is_refused(
        #[case] email: Option<&str>,
        #[case] password: Option<&str>,
    ) {
        // Arrange
        let settings = settings(email, password);
        let session = Session::new(&settings).unwrap();

        // Act
        let result = session.sign_in(&settings, FormMode::SignIn).await;

        // Assert
        assert!(matches!(result, Err(ClientError::NotAuthenticated)));
    }
}
