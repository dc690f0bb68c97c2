use std::collections::HashMap;

use kernel::{CommunityFile, FileMetadata, RateReceipt, ShareReceipt, UserInfo};

use crate::download::{Control, DownloadHandler, DownloadOutcome, DownloadTarget};
use crate::error::ClientError;
use crate::prompt::Prompt;
use crate::service::CommunityService;

pub const PAGE_SIZE: u32 = 20;

const SHARE_NEEDS_PREMIUM: &str = "File sharing is a Premium feature! Upgrade to Premium to share your content with the SimSync community.";

/// Community listing plus the ratings this user gave during the session.
#[derive(Debug, Default)]
pub struct Community {
    files: Vec<CommunityFile>,
    total: usize,
    my_ratings: HashMap<String, u8>,
}

impl Community {
    #[must_use]
    pub fn files(&self) -> &[CommunityFile] {
        &self.files
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.total
    }

    #[must_use]
    pub fn my_rating(&self, id: &str) -> Option<u8> {
        self.my_ratings.get(id).copied()
    }

    /// Fetches one page; on failure the previous listing stays.
    pub async fn load<S: CommunityService + ?Sized>(
        &mut self,
        service: &S,
        limit: u32,
        offset: u32,
    ) -> Result<(), ClientError> {
        match service.community_files(limit, offset).await {
            Ok(page) => {
                self.files = page.files;
                self.total = page.total;
                Ok(())
            }
            Err(e) => {
                tracing::error!("error loading community files: {e}");
                Err(e)
            }
        }
    }

    /// Publishes one of the user's files. `Ok(None)` when the user declined
    /// or cannot share on their tier; no request is made in either case.
    pub async fn share<S: CommunityService + ?Sized>(
        &self,
        service: &S,
        user: &UserInfo,
        file: &FileMetadata,
        description: &str,
        prompt: &dyn Prompt,
    ) -> Result<Option<ShareReceipt>, ClientError> {
        if !user.subscription_tier.can_share() {
            prompt.alert(SHARE_NEEDS_PREMIUM);
            return Ok(None);
        }
        let question = format!(
            "Share \"{}\" with the SimSync community?\n\nOther users will be able to download this file.",
            file.name
        );
        if !prompt.confirm(&question) {
            return Ok(None);
        }

        match service.share_file(&file.id, description).await {
            Ok(receipt) => {
                tracing::info!("{} shared as {}", file.name, receipt.shared_file_id);
                prompt.alert("File shared with community!");
                Ok(Some(receipt))
            }
            Err(e) => {
                tracing::error!("sharing {} failed: {e}", file.name);
                prompt.alert(&format!("Error sharing file: {e}"));
                Err(e)
            }
        }
    }

    /// Asks first, then records the download with the backend and hands the
    /// URL over. Only entries of the loaded listing can be downloaded, and a
    /// declined download is never counted.
    pub async fn download<S: CommunityService + ?Sized>(
        &self,
        service: &S,
        id: &str,
        handler: &DownloadHandler<'_>,
        prompt: &dyn Prompt,
        control: &mut Control,
    ) -> Result<DownloadOutcome, ClientError> {
        let entry = self
            .files
            .iter()
            .find(|f| f.id == id)
            .ok_or_else(|| ClientError::Refused(format!("Shared file {id} is not in the listing")))?;
        let _busy = control.busy("Downloading...");
        if !handler.confirm(&entry.name, entry.size) {
            return Ok(DownloadOutcome::Cancelled);
        }
        let download = match service.download_community_file(id).await {
            Ok(d) => d,
            Err(e) => {
                tracing::error!("community download {id} refused: {e}");
                prompt.alert(&format!("Error downloading file: {e}"));
                return Err(e);
            }
        };
        handler.finish(DownloadTarget::from(&download)).await
    }

    pub async fn rate<S: CommunityService + ?Sized>(
        &mut self,
        service: &S,
        id: &str,
        rating: u8,
    ) -> Result<RateReceipt, ClientError> {
        if !(1..=5).contains(&rating) {
            return Err(ClientError::Refused(
                "Rating must be between 1 and 5".to_owned(),
            ));
        }
        let receipt = service.rate_community_file(id, rating).await?;
        self.my_ratings.insert(id.to_owned(), receipt.your_rating);
        if let Some(f) = self.files.iter_mut().find(|f| f.id == id) {
            f.average_rating = receipt.average_rating;
            f.rating_count = receipt.total_ratings;
        }
        tracing::info!("rated {id}: {rating} stars");
        Ok(receipt)
    }

    pub async fn unshare<S: CommunityService + ?Sized>(
        &mut self,
        service: &S,
        id: &str,
    ) -> Result<(), ClientError> {
        service.unshare_file(id).await?;
        let before = self.files.len();
        self.files.retain(|f| f.id != id);
        if self.files.len() < before {
            self.total = self.total.saturating_sub(1);
        }
        Ok(())
    }
}
