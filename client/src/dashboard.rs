//! The signed-in user's dashboard: account, files, uploads and community.

use std::sync::atomic::{AtomicBool, Ordering};

use kernel::{CommunityFile, FileMetadata, UserInfo};
use parking_lot::Mutex;

use crate::community::{Community, PAGE_SIZE};
use crate::download::{Control, Delivery, DownloadHandler, DownloadOutcome, DownloadTarget};
use crate::error::ClientError;
use crate::prompt::Prompt;
use crate::service::{CommunityService, FileService};
use crate::upload::{
    filter_dropped, preflight, BatchSummary, Progress, Rejection, UploadFile, UploadOrchestrator,
};

pub struct Dashboard<'a, S: ?Sized> {
    service: &'a S,
    prompt: &'a dyn Prompt,
    user: Mutex<Option<UserInfo>>,
    files: Mutex<Vec<FileMetadata>>,
    files_loaded: AtomicBool,
    progress: Progress,
    uploading: AtomicBool,
    community: tokio::sync::Mutex<Community>,
}

impl<'a, S> Dashboard<'a, S>
where
    S: FileService + CommunityService + ?Sized,
{
    pub fn new(service: &'a S, prompt: &'a dyn Prompt) -> Self {
        Self {
            service,
            prompt,
            user: Mutex::new(None),
            files: Mutex::new(vec![]),
            files_loaded: AtomicBool::new(false),
            progress: Progress::default(),
            uploading: AtomicBool::new(false),
            community: tokio::sync::Mutex::new(Community::default()),
        }
    }

    #[must_use]
    pub fn user(&self) -> Option<UserInfo> {
        self.user.lock().clone()
    }

    #[must_use]
    pub fn files(&self) -> Vec<FileMetadata> {
        self.files.lock().clone()
    }

    #[must_use]
    pub fn progress(&self) -> &Progress {
        &self.progress
    }

    #[must_use]
    pub fn is_uploading(&self) -> bool {
        self.uploading.load(Ordering::SeqCst)
    }

    pub async fn community_files(&self) -> Vec<CommunityFile> {
        self.community.lock().await.files().to_vec()
    }

    pub async fn my_rating(&self, id: &str) -> Option<u8> {
        self.community.lock().await.my_rating(id)
    }

    pub async fn load_user(&self) {
        match self.service.verify_user().await {
            Ok(user) => {
                tracing::debug!("user info loaded for {}", user.uid);
                *self.user.lock() = Some(user);
            }
            Err(e) => tracing::error!("error loading user info: {e}"),
        }
    }

    pub async fn load_files(&self) {
        match self.service.list_files().await {
            Ok(list) => {
                *self.files.lock() = list.files;
                self.files_loaded.store(true, Ordering::SeqCst);
            }
            Err(e) => tracing::error!("error loading backups: {e}"),
        }
    }

    pub async fn refresh(&self) {
        self.load_user().await;
        self.load_files().await;
    }

    /// Runs one upload batch. Refusals are shown to the user and returned
    /// without any request going out.
    pub async fn upload(&self, files: Vec<UploadFile>) -> Result<BatchSummary, Rejection> {
        if files.is_empty() {
            return Ok(BatchSummary {
                total: 0,
                succeeded: 0,
                errors: vec![],
            });
        }
        if self
            .uploading
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(self.refuse(Rejection::Busy));
        }

        let user = self.user();
        // The file count check needs the current list.
        if user.is_some() && !self.files_loaded.load(Ordering::SeqCst) {
            self.load_files().await;
        }
        let existing = self.files.lock().len();
        if let Err(rejection) = preflight(&files, user.as_ref(), existing) {
            self.uploading.store(false, Ordering::SeqCst);
            return Err(self.refuse(rejection));
        }

        let summary = UploadOrchestrator::new(self.service, self.progress.clone())
            .run(&files)
            .await;
        self.uploading.store(false, Ordering::SeqCst);

        self.prompt.alert(&summary.message());
        if summary.needs_refresh() {
            self.refresh().await;
        }
        Ok(summary)
    }

    /// Drag-and-drop intake: unsupported files are skipped before the batch runs.
    pub async fn upload_dropped(&self, files: Vec<UploadFile>) -> Result<BatchSummary, Rejection> {
        let dropped = filter_dropped(files).map_err(|r| self.refuse(r))?;
        if let Some(notice) = dropped.notice() {
            self.prompt.alert(&notice);
        }
        self.upload(dropped.accepted).await
    }

    fn refuse(&self, rejection: Rejection) -> Rejection {
        tracing::warn!("upload refused: {rejection:?}");
        self.prompt.alert(&rejection.to_string());
        rejection
    }

    fn find(&self, id: &str) -> Option<FileMetadata> {
        self.files.lock().iter().find(|f| f.id == id).cloned()
    }

    pub async fn download(
        &self,
        id: &str,
        delivery: &dyn Delivery,
        control: &mut Control,
    ) -> Result<DownloadOutcome, ClientError> {
        let file = self
            .find(id)
            .ok_or_else(|| ClientError::Refused(format!("No file with id {id}")))?;
        DownloadHandler::new(self.prompt, delivery)
            .download(DownloadTarget::from(&file), control)
            .await
    }

    /// Deletes after confirmation. `Ok(false)` when the user declined.
    pub async fn delete(&self, id: &str) -> Result<bool, ClientError> {
        let name = self.find(id).map_or_else(|| id.to_owned(), |f| f.name);
        if !self
            .prompt
            .confirm(&format!("Are you sure you want to delete \"{name}\"?"))
        {
            return Ok(false);
        }

        match self.service.delete_file(id).await {
            Ok(_) => {
                tracing::info!("file {id} deleted");
                self.prompt.alert("File deleted successfully!");
                self.refresh().await;
                Ok(true)
            }
            Err(e) => {
                tracing::error!("error deleting file {id}: {e}");
                self.prompt.alert(&format!("Error deleting file: {e}"));
                Err(e)
            }
        }
    }

    pub async fn load_community(&self, offset: u32) -> Result<(), ClientError> {
        self.community
            .lock()
            .await
            .load(self.service, PAGE_SIZE, offset)
            .await
    }

    /// Shares one of the listed files. `Ok(false)` when nothing was shared.
    pub async fn share(&self, id: &str, description: &str) -> Result<bool, ClientError> {
        let file = self
            .find(id)
            .ok_or_else(|| ClientError::Refused(format!("No file with id {id}")))?;
        let Some(user) = self.user() else {
            return Err(ClientError::NotAuthenticated);
        };
        let receipt = self
            .community
            .lock()
            .await
            .share(self.service, &user, &file, description, self.prompt)
            .await?;
        Ok(receipt.is_some())
    }

    pub async fn download_shared(
        &self,
        id: &str,
        delivery: &dyn Delivery,
        control: &mut Control,
    ) -> Result<DownloadOutcome, ClientError> {
        let handler = DownloadHandler::new(self.prompt, delivery);
        self.community
            .lock()
            .await
            .download(self.service, id, &handler, self.prompt, control)
            .await
    }

    pub async fn rate(&self, id: &str, rating: u8) -> Result<(), ClientError> {
        if self.user.lock().is_none() {
            self.prompt.alert("Please log in to rate files!");
            return Err(ClientError::NotAuthenticated);
        }
        let result = self
            .community
            .lock()
            .await
            .rate(self.service, id, rating)
            .await;
        match result {
            Ok(receipt) => {
                let plural = if receipt.your_rating == 1 { "" } else { "s" };
                self.prompt.alert(&format!(
                    "Thanks for rating! You gave {} star{plural}.",
                    receipt.your_rating
                ));
                Ok(())
            }
            Err(e) => {
                self.prompt.alert(&format!("Error rating file: {e}"));
                Err(e)
            }
        }
    }

    pub async fn unshare(&self, id: &str) -> Result<(), ClientError> {
        self.community.lock().await.unshare(self.service, id).await
    }
}
