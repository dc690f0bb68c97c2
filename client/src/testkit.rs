//! In-memory fakes shared by the unit tests.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use kernel::{
    AuthSession, CheckoutSession, CommunityDownload, CommunityFile, CommunityPage, Credentials,
    FileList, FileMetadata, Message, RateReceipt, ShareReceipt, Tier, UploadReceipt, UserInfo,
};
use parking_lot::Mutex;
use reqwest::StatusCode;
use tokio::sync::watch;

use crate::download::Delivery;
use crate::error::ClientError;
use crate::identity::{AuthState, AuthStateCell, IdentityProvider};
use crate::prompt::Prompt;
use crate::service::{CheckoutService, CommunityService, FileService};
use crate::upload::UploadFile;

pub fn session() -> AuthSession {
    AuthSession {
        uid: "u1".to_owned(),
        email: "a@b.c".to_owned(),
        id_token: "t".to_owned(),
        refresh_token: "r".to_owned(),
        expires_in: 3600,
    }
}

pub fn user(tier: Tier, used: f64) -> UserInfo {
    UserInfo {
        uid: "u1".to_owned(),
        email: "a@b.c".to_owned(),
        display_name: None,
        subscription_tier: tier,
        storage_used: used,
        storage_limit: tier.storage_limit_mb(),
    }
}

pub fn stored(id: &str, name: &str, size: u64) -> FileMetadata {
    FileMetadata {
        id: id.to_owned(),
        name: name.to_owned(),
        size,
        upload_date: Utc::now(),
        content_type: "application/octet-stream".to_owned(),
        download_url: Some(format!("http://files/{id}")),
    }
}

pub fn shared(id: &str, name: &str) -> CommunityFile {
    CommunityFile {
        id: id.to_owned(),
        original_file_id: format!("orig-{id}"),
        shared_by_uid: "u2".to_owned(),
        shared_by: "simmer".to_owned(),
        name: name.to_owned(),
        size: 1024,
        description: String::new(),
        downloads: 0,
        average_rating: 0.0,
        rating_count: 0,
        created_at: Utc::now(),
    }
}

fn not_found(what: &str) -> ClientError {
    ClientError::Api {
        status: StatusCode::NOT_FOUND,
        detail: format!("{what} not found"),
    }
}

/// Identity that hands out a fixed token and counts how often it did.
pub struct StaticIdentity {
    token: Option<String>,
    rejection: Option<String>,
    state: AuthStateCell,
    issued: AtomicUsize,
    sign_ins: AtomicUsize,
    sign_ups: AtomicUsize,
}

impl StaticIdentity {
    pub fn new(token: &str) -> Self {
        Self {
            token: Some(token.to_owned()),
            rejection: None,
            state: AuthStateCell::default(),
            issued: AtomicUsize::new(0),
            sign_ins: AtomicUsize::new(0),
            sign_ups: AtomicUsize::new(0),
        }
    }

    pub fn signed_out() -> Self {
        Self {
            token: None,
            ..Self::new("")
        }
    }

    /// Sign in and sign up fail with `message`.
    pub fn rejecting(mut self, message: &str) -> Self {
        self.rejection = Some(message.to_owned());
        self
    }

    pub fn publish(&self, state: AuthState) {
        self.state.publish(state);
    }

    pub fn subscriber_count(&self) -> usize {
        self.state.subscriber_count()
    }

    pub fn tokens_issued(&self) -> usize {
        self.issued.load(Ordering::SeqCst)
    }

    pub fn sign_ins(&self) -> usize {
        self.sign_ins.load(Ordering::SeqCst)
    }

    pub fn sign_ups(&self) -> usize {
        self.sign_ups.load(Ordering::SeqCst)
    }

    fn authenticate(&self, credentials: &Credentials) -> Result<AuthSession, ClientError> {
        if let Some(message) = &self.rejection {
            return Err(ClientError::AuthenticationFailed(message.clone()));
        }
        let session = AuthSession {
            email: credentials.email.clone(),
            ..session()
        };
        self.state.publish(AuthState::SignedIn(session.clone()));
        Ok(session)
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentity {
    async fn sign_in(&self, credentials: &Credentials) -> Result<AuthSession, ClientError> {
        self.sign_ins.fetch_add(1, Ordering::SeqCst);
        self.authenticate(credentials)
    }

    async fn sign_up(&self, credentials: &Credentials) -> Result<AuthSession, ClientError> {
        self.sign_ups.fetch_add(1, Ordering::SeqCst);
        self.authenticate(credentials)
    }

    async fn sign_out(&self) -> Result<(), ClientError> {
        self.state.publish(AuthState::SignedOut);
        Ok(())
    }

    async fn id_token(&self) -> Result<String, ClientError> {
        let token = self.token.clone().ok_or(ClientError::NotAuthenticated)?;
        self.issued.fetch_add(1, Ordering::SeqCst);
        Ok(token)
    }

    fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }
}

#[derive(Default)]
struct Calls {
    uploads: usize,
    verifies: usize,
    lists: usize,
    deletes: Vec<String>,
    shares: Vec<(String, String)>,
    ratings: Vec<(String, u8)>,
    community_pages: Vec<(u32, u32)>,
    community_downloads: Vec<String>,
    unshares: Vec<String>,
    checkouts: Vec<(String, String, String)>,
}

/// Backend double keeping files in memory.
#[derive(Default)]
pub struct FakeService {
    user: Option<UserInfo>,
    files: Mutex<Vec<FileMetadata>>,
    community: Vec<CommunityFile>,
    upload_failures: HashMap<String, String>,
    upload_delay: Option<Duration>,
    checkout_url: Option<String>,
    calls: Mutex<Calls>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeService {
    pub fn with_user(mut self, user: UserInfo) -> Self {
        self.user = Some(user);
        self
    }

    pub fn with_files(self, files: Vec<FileMetadata>) -> Self {
        *self.files.lock() = files;
        self
    }

    pub fn with_community(mut self, files: Vec<CommunityFile>) -> Self {
        self.community = files;
        self
    }

    pub fn failing_upload(mut self, name: &str, message: &str) -> Self {
        self.upload_failures
            .insert(name.to_owned(), message.to_owned());
        self
    }

    pub fn with_upload_delay(mut self, delay: Duration) -> Self {
        self.upload_delay = Some(delay);
        self
    }

    pub fn with_checkout_url(mut self, url: &str) -> Self {
        self.checkout_url = Some(url.to_owned());
        self
    }

    pub fn upload_calls(&self) -> usize {
        self.calls.lock().uploads
    }

    pub fn verify_calls(&self) -> usize {
        self.calls.lock().verifies
    }

    pub fn list_calls(&self) -> usize {
        self.calls.lock().lists
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn deleted(&self) -> Vec<String> {
        self.calls.lock().deletes.clone()
    }

    pub fn shares(&self) -> Vec<(String, String)> {
        self.calls.lock().shares.clone()
    }

    pub fn ratings(&self) -> Vec<(String, u8)> {
        self.calls.lock().ratings.clone()
    }

    pub fn community_pages(&self) -> Vec<(u32, u32)> {
        self.calls.lock().community_pages.clone()
    }

    pub fn community_downloads(&self) -> Vec<String> {
        self.calls.lock().community_downloads.clone()
    }

    pub fn unshares(&self) -> Vec<String> {
        self.calls.lock().unshares.clone()
    }

    pub fn checkout_requests(&self) -> Vec<(String, String, String)> {
        self.calls.lock().checkouts.clone()
    }

    fn file_count(&self) -> usize {
        self.files.lock().len()
    }
}

#[async_trait]
impl FileService for FakeService {
    async fn verify_user(&self) -> Result<UserInfo, ClientError> {
        self.calls.lock().verifies += 1;
        self.user.clone().ok_or(ClientError::NotAuthenticated)
    }

    async fn list_files(&self) -> Result<FileList, ClientError> {
        self.calls.lock().lists += 1;
        let files = self.files.lock().clone();
        Ok(FileList {
            total_count: files.len(),
            files,
        })
    }

    async fn upload_file(&self, file: &UploadFile) -> Result<UploadReceipt, ClientError> {
        self.calls.lock().uploads += 1;
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.upload_delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Some(message) = self.upload_failures.get(file.name()) {
            return Err(ClientError::Refused(message.clone()));
        }
        let id = format!("f{}", self.file_count() + 1);
        self.files.lock().push(stored(&id, file.name(), file.size()));
        Ok(UploadReceipt {
            message: "File uploaded successfully".to_owned(),
            download_url: format!("http://files/{id}"),
            file_id: id,
        })
    }

    async fn delete_file(&self, id: &str) -> Result<Message, ClientError> {
        self.calls.lock().deletes.push(id.to_owned());
        let mut files = self.files.lock();
        let before = files.len();
        files.retain(|f| f.id != id);
        if files.len() == before {
            return Err(not_found("File"));
        }
        Ok(Message::new("File deleted successfully"))
    }
}

#[async_trait]
impl CommunityService for FakeService {
    async fn share_file(
        &self,
        file_id: &str,
        description: &str,
    ) -> Result<ShareReceipt, ClientError> {
        self.calls
            .lock()
            .shares
            .push((file_id.to_owned(), description.to_owned()));
        Ok(ShareReceipt {
            message: "File shared to community successfully".to_owned(),
            shared_file_id: format!("s-{file_id}"),
            community_url: format!("/community/s-{file_id}"),
        })
    }

    async fn community_files(
        &self,
        limit: u32,
        offset: u32,
    ) -> Result<CommunityPage, ClientError> {
        self.calls.lock().community_pages.push((limit, offset));
        let files = self
            .community
            .iter()
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect();
        Ok(CommunityPage {
            files,
            total: self.community.len(),
        })
    }

    async fn download_community_file(&self, id: &str) -> Result<CommunityDownload, ClientError> {
        self.calls.lock().community_downloads.push(id.to_owned());
        let file = self
            .community
            .iter()
            .find(|f| f.id == id)
            .ok_or_else(|| not_found("Shared file"))?;
        Ok(CommunityDownload {
            download_url: format!("http://files/{}", file.original_file_id),
            file_name: file.name.clone(),
            file_size: file.size,
        })
    }

    async fn rate_community_file(&self, id: &str, rating: u8) -> Result<RateReceipt, ClientError> {
        self.calls.lock().ratings.push((id.to_owned(), rating));
        Ok(RateReceipt {
            message: "Rating submitted successfully".to_owned(),
            your_rating: rating,
            average_rating: f64::from(rating),
            total_ratings: 1,
            previous_rating: None,
        })
    }

    async fn unshare_file(&self, id: &str) -> Result<Message, ClientError> {
        self.calls.lock().unshares.push(id.to_owned());
        Ok(Message::new("File removed from community"))
    }
}

#[async_trait]
impl CheckoutService for FakeService {
    async fn create_checkout_session(
        &self,
        user_id: &str,
        success_url: &str,
        cancel_url: &str,
    ) -> Result<CheckoutSession, ClientError> {
        self.calls.lock().checkouts.push((
            user_id.to_owned(),
            success_url.to_owned(),
            cancel_url.to_owned(),
        ));
        let url = self.checkout_url.clone().ok_or_else(|| ClientError::Api {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            detail: "Payment processing not configured".to_owned(),
        })?;
        Ok(CheckoutSession { url })
    }
}

/// Prompt answering every confirmation the same way.
pub struct ScriptedPrompt {
    answer: bool,
    questions: Mutex<Vec<String>>,
    alerts: Mutex<Vec<String>>,
}

impl ScriptedPrompt {
    fn answering(answer: bool) -> Self {
        Self {
            answer,
            questions: Mutex::new(vec![]),
            alerts: Mutex::new(vec![]),
        }
    }

    pub fn accepting() -> Self {
        Self::answering(true)
    }

    pub fn declining() -> Self {
        Self::answering(false)
    }

    pub fn questions(&self) -> Vec<String> {
        self.questions.lock().clone()
    }

    pub fn alerts(&self) -> Vec<String> {
        self.alerts.lock().clone()
    }
}

impl Prompt for ScriptedPrompt {
    fn confirm(&self, message: &str) -> bool {
        self.questions.lock().push(message.to_owned());
        self.answer
    }

    fn alert(&self, message: &str) {
        self.alerts.lock().push(message.to_owned());
    }
}

/// Delivery that records instead of touching the system.
pub struct FakeDelivery {
    browser: bool,
    opened: AtomicUsize,
    saved: AtomicUsize,
}

impl FakeDelivery {
    fn new(browser: bool) -> Self {
        Self {
            browser,
            opened: AtomicUsize::new(0),
            saved: AtomicUsize::new(0),
        }
    }

    pub fn browser() -> Self {
        Self::new(true)
    }

    /// Every open attempt is blocked.
    pub fn blocked() -> Self {
        Self::new(false)
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn saved(&self) -> usize {
        self.saved.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Delivery for FakeDelivery {
    async fn open(&self, _url: &str) -> bool {
        if self.browser {
            self.opened.fetch_add(1, Ordering::SeqCst);
        }
        self.browser
    }

    async fn save(&self, _url: &str, file_name: &str) -> Result<PathBuf, ClientError> {
        self.saved.fetch_add(1, Ordering::SeqCst);
        Ok(PathBuf::from(file_name))
    }
}
