use std::io::Read;

use chrono::{DateTime, NaiveDate, Utc};
use kernel::{CommunityFile, FileMetadata, Tier};

use crate::config::Config;
use crate::error::ApiError;

/// Stored account. Password is kept as a salted BLAKE3 hash.
#[derive(Debug, Clone)]
pub struct UserRecord {
    pub uid: String,
    pub email: String,
    pub display_name: Option<String>,
    pub tier: Tier,
    pub password_hash: String,
    pub salt: String,
}

#[derive(Debug, Clone)]
pub struct FileRecord {
    pub id: String,
    pub uid: String,
    pub name: String,
    pub size: u64,
    pub content_type: String,
    pub blake3_hash: String,
    pub upload_date: DateTime<Utc>,
}

impl FileRecord {
    #[must_use]
    pub fn into_metadata(self, config: &Config) -> FileMetadata {
        FileMetadata {
            download_url: Some(config.content_url(&self.id)),
            id: self.id,
            name: self.name,
            size: self.size,
            upload_date: self.upload_date,
            content_type: self.content_type,
        }
    }
}

/// A file about to be stored.
#[derive(Debug)]
pub struct NewFile<'a> {
    pub uid: &'a str,
    pub name: &'a str,
    pub content_type: &'a str,
    pub data: &'a [u8],
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteResult {
    pub files: usize,
    pub blobs: usize,
}

#[derive(Debug, Clone)]
pub struct SharedRecord {
    pub file: CommunityFile,
    pub is_active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RatingTotals {
    pub average: f64,
    pub count: u64,
    pub previous: Option<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Id,
    Refresh,
}

impl TokenKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            TokenKind::Id => "id",
            TokenKind::Refresh => "refresh",
        }
    }
}

/// Persistence of accounts, tokens, files and community entries.
///
/// Quota checks live with the write they guard so that concurrent uploads
/// of one user cannot both slip under the limit.
pub trait Storage {
    fn new_database(&self) -> Result<(), ApiError>;

    fn create_user(&mut self, user: &UserRecord) -> Result<(), ApiError>;

    fn find_user_by_email(&self, email: &str) -> Result<Option<UserRecord>, ApiError>;

    fn get_user(&self, uid: &str) -> Result<Option<UserRecord>, ApiError>;

    fn set_tier(&mut self, uid: &str, tier: Tier) -> Result<bool, ApiError>;

    /// Bytes stored by the user and the number of files.
    fn usage(&self, uid: &str) -> Result<(u64, usize), ApiError>;

    fn store_token(
        &mut self,
        token: &str,
        uid: &str,
        kind: TokenKind,
        expires_at: DateTime<Utc>,
    ) -> Result<(), ApiError>;

    /// Owner of a token that has not expired yet.
    fn token_owner(&self, token: &str, kind: TokenKind) -> Result<Option<String>, ApiError>;

    /// Removes a refresh token and returns its owner.
    fn take_refresh_token(&mut self, token: &str) -> Result<Option<String>, ApiError>;

    fn revoke_tokens(&mut self, uid: &str) -> Result<usize, ApiError>;

    /// Stores a file unless it would break the owner's tier limits.
    fn insert_file(&mut self, file: &NewFile<'_>) -> Result<FileRecord, ApiError>;

    fn list_files(&self, uid: &str) -> Result<Vec<FileRecord>, ApiError>;

    fn get_file(&self, id: &str) -> Result<Option<FileRecord>, ApiError>;

    fn get_file_data(&self, blake3_hash: &str) -> Result<Box<dyn Read + '_>, ApiError>;

    /// Removes a file and its blob once nothing references it.
    fn delete_file(&mut self, id: &str) -> Result<DeleteResult, ApiError>;

    fn share_file(&mut self, shared: &CommunityFile) -> Result<(), ApiError>;

    fn is_shared(&self, original_file_id: &str, uid: &str) -> Result<bool, ApiError>;

    fn get_shared(&self, id: &str) -> Result<Option<SharedRecord>, ApiError>;

    /// Active entries, newest first.
    fn community_files(&self, limit: u32, offset: u32) -> Result<Vec<CommunityFile>, ApiError>;

    /// Counts a community download, enforcing the per-day cap when there is one.
    fn record_download(
        &mut self,
        shared_id: &str,
        uid: &str,
        day: NaiveDate,
        daily_cap: Option<u32>,
    ) -> Result<(), ApiError>;

    fn rate(&mut self, shared_id: &str, uid: &str, rating: u8) -> Result<RatingTotals, ApiError>;

    fn unshare(&mut self, shared_id: &str) -> Result<(), ApiError>;
}

/// Mean of the ratings rounded to one decimal.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn average_rating(sum: u64, count: u64) -> f64 {
    if count == 0 {
        return 0.0;
    }
    let mean = sum as f64 / count as f64;
    (mean * 10.0).round() / 10.0
}
