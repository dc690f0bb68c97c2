use async_trait::async_trait;
use kernel::{
    CheckoutSession, CommunityDownload, CommunityPage, FileList, Message, RateReceipt,
    ShareReceipt, UploadReceipt, UserInfo,
};

use crate::error::ClientError;
use crate::upload::UploadFile;

/// Backup file operations the dashboard relies on.
#[async_trait]
pub trait FileService: Send + Sync {
    async fn verify_user(&self) -> Result<UserInfo, ClientError>;

    async fn list_files(&self) -> Result<FileList, ClientError>;

    async fn upload_file(&self, file: &UploadFile) -> Result<UploadReceipt, ClientError>;

    async fn delete_file(&self, id: &str) -> Result<Message, ClientError>;
}

/// Community sharing operations.
#[async_trait]
pub trait CommunityService: Send + Sync {
    async fn share_file(&self, file_id: &str, description: &str)
        -> Result<ShareReceipt, ClientError>;

    async fn community_files(&self, limit: u32, offset: u32)
        -> Result<CommunityPage, ClientError>;

    async fn download_community_file(&self, id: &str) -> Result<CommunityDownload, ClientError>;

    async fn rate_community_file(&self, id: &str, rating: u8) -> Result<RateReceipt, ClientError>;

    async fn unshare_file(&self, id: &str) -> Result<Message, ClientError>;
}

#[async_trait]
pub trait CheckoutService: Send + Sync {
    async fn create_checkout_session(
        &self,
        user_id: &str,
        success_url: &str,
        cancel_url: &str,
    ) -> Result<CheckoutSession, ClientError>;
}
