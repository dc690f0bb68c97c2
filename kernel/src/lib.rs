#![warn(clippy::unwrap_in_result)]
#![warn(clippy::unwrap_used)]

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// File name extensions accepted from drag-and-drop intake.
pub const ACCEPTED_EXTENSIONS: [&str; 9] = [
    ".package",
    ".trayitem",
    ".zip",
    ".rar",
    ".7z",
    ".ts4script",
    ".py",
    ".txt",
    ".md",
];

/// Maximum number of stored files for a basic tier user.
pub const BASIC_FILE_LIMIT: usize = 25;
/// Storage ceiling of the basic tier in megabytes.
pub const BASIC_STORAGE_MB: f64 = 50.0;
/// Storage ceiling of the premium tier in megabytes.
pub const PREMIUM_STORAGE_MB: f64 = 500.0;
/// Community downloads a basic tier user may make per day.
pub const BASIC_DAILY_DOWNLOADS: u32 = 10;

const BYTES_IN_MB: f64 = 1024.0 * 1024.0;

/// Whether the file name ends with one of [`ACCEPTED_EXTENSIONS`], ignoring case.
#[must_use]
pub fn is_accepted_file_name(name: &str) -> bool {
    let name = name.to_lowercase();
    ACCEPTED_EXTENSIONS.iter().any(|ext| name.ends_with(ext))
}

/// Converts a byte count into (binary) megabytes.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn bytes_to_mb(bytes: u64) -> f64 {
    bytes as f64 / BYTES_IN_MB
}

/// Subscription level gating storage quota, file count and sharing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    #[default]
    Basic,
    Premium,
}

impl Tier {
    /// Storage ceiling in megabytes.
    #[must_use]
    pub fn storage_limit_mb(self) -> f64 {
        match self {
            Tier::Basic => BASIC_STORAGE_MB,
            Tier::Premium => PREMIUM_STORAGE_MB,
        }
    }

    /// File count ceiling, `None` when unlimited.
    #[must_use]
    pub fn file_limit(self) -> Option<usize> {
        match self {
            Tier::Basic => Some(BASIC_FILE_LIMIT),
            Tier::Premium => None,
        }
    }

    /// Community downloads allowed per day, `None` when unlimited.
    #[must_use]
    pub fn daily_downloads(self) -> Option<u32> {
        match self {
            Tier::Basic => Some(BASIC_DAILY_DOWNLOADS),
            Tier::Premium => None,
        }
    }

    #[must_use]
    pub fn can_share(self) -> bool {
        self == Tier::Premium
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Basic => "basic",
            Tier::Premium => "premium",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "basic" => Ok(Tier::Basic),
            "premium" => Ok(Tier::Premium),
            other => Err(format!("unknown tier: {other}")),
        }
    }
}

/// Account information of a signed in user.
///
/// Storage figures are megabytes. The backend mutates them on upload,
/// delete and upgrade; clients only ever read them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct UserInfo {
    /// Identity provider's user id
    pub uid: String,
    pub email: String,
    pub display_name: Option<String>,
    pub subscription_tier: Tier,
    /// Megabytes currently used
    pub storage_used: f64,
    /// Megabytes allowed by the tier
    pub storage_limit: f64,
}

impl UserInfo {
    /// Remaining storage in megabytes.
    #[must_use]
    pub fn available_storage(&self) -> f64 {
        self.storage_limit - self.storage_used
    }
}

/// Metadata of a stored backup file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct FileMetadata {
    /// Unique file identifier
    pub id: String,
    /// Original file name
    pub name: String,
    /// Size of the file in bytes
    pub size: u64,
    pub upload_date: DateTime<Utc>,
    pub content_type: String,
    /// Public URL the content can be fetched from
    pub download_url: Option<String>,
}

/// The current user's files.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct FileList {
    pub files: Vec<FileMetadata>,
    pub total_count: usize,
}

/// Result of a single file upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct UploadReceipt {
    pub message: String,
    pub file_id: String,
    pub download_url: String,
}

/// Plain acknowledgement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Message {
    pub message: String,
}

impl Message {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Body of every non-success response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    /// Human readable failure reason
    pub detail: String,
}

/// Unauthenticated liveness probe answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Probe {
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Request for a hosted checkout session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CheckoutRequest {
    /// User the subscription is bought for
    pub user_id: String,
    /// Where the payment processor sends the user after paying
    pub success_url: String,
    /// Where the payment processor sends the user after cancelling
    pub cancel_url: String,
}

/// Hosted checkout session the user is navigated to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CheckoutSession {
    pub url: String,
}

/// Payment processor notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CheckoutEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: CheckoutEventData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CheckoutEventData {
    pub object: CheckoutEventObject,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CheckoutEventObject {
    pub client_reference_id: Option<String>,
}

/// Request to publish one of the caller's files to the community.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ShareRequest {
    pub file_id: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ShareReceipt {
    pub message: String,
    pub shared_file_id: String,
    pub community_url: String,
}

/// A file published for other users to discover and download.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CommunityFile {
    /// Shared entry identifier (differs from the original file id)
    pub id: String,
    pub original_file_id: String,
    pub shared_by_uid: String,
    /// Display name of the sharer
    pub shared_by: String,
    pub name: String,
    /// Size in bytes
    pub size: u64,
    pub description: String,
    /// Number of recorded downloads
    pub downloads: u64,
    /// Mean rating rounded to one decimal
    pub average_rating: f64,
    pub rating_count: u64,
    pub created_at: DateTime<Utc>,
}

/// One page of the community listing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CommunityPage {
    pub files: Vec<CommunityFile>,
    pub total: usize,
}

/// Where to fetch a community file from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CommunityDownload {
    pub download_url: String,
    pub file_name: String,
    pub file_size: u64,
}

/// Star rating, 1 to 5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RateRequest {
    pub rating: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct RateReceipt {
    pub message: String,
    pub your_rating: u8,
    pub average_rating: f64,
    pub total_ratings: u64,
    pub previous_rating: Option<u8>,
}

/// Email and password as typed by the user.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"***")
            .finish()
    }
}

/// Identity provider session.
///
/// The id token is the bearer token attached to API requests; the refresh
/// token is exchanged for a new session once the id token expires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct AuthSession {
    pub uid: String,
    pub email: String,
    pub id_token: String,
    pub refresh_token: String,
    /// Lifetime of the id token in seconds
    pub expires_in: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("mod.package", true)]
    #[case("MOD.PACKAGE", true)]
    #[case("lot.Trayitem", true)]
    #[case("scripts.ts4script", true)]
    #[case("archive.7z", true)]
    #[case("readme.md", true)]
    #[case("photo.png", false)]
    #[case("package", false)]
    #[case("notes.txt.bak", false)]
    #[case("", false)]
    #[trace]
    fn accepted_file_names(#[case] name: &str, #[case] expected: bool) {
        // Arrange

        // Act
        let accepted = is_accepted_file_name(name);

        // Assert
        assert_eq!(accepted, expected);
    }

    #[rstest]
    #[case(Tier::Basic, 50.0, Some(25))]
    #[case(Tier::Premium, 500.0, None)]
    fn tier_limits(#[case] tier: Tier, #[case] storage: f64, #[case] files: Option<usize>) {
        // Arrange

        // Act
        let actual_storage = tier.storage_limit_mb();
        let actual_files = tier.file_limit();

        // Assert
        assert!((actual_storage - storage).abs() < f64::EPSILON);
        assert_eq!(actual_files, files);
    }

    #[test]
    fn tier_serializes_lowercase() {
        // Arrange
        let user = UserInfo {
            uid: "u1".to_owned(),
            email: "a@b.c".to_owned(),
            display_name: None,
            subscription_tier: Tier::Premium,
            storage_used: 1.5,
            storage_limit: 500.0,
        };

        // Act
        let json = serde_json::to_value(&user).unwrap();

        // Assert
        assert_eq!(json["subscription_tier"], "premium");
    }

    #[test]
    fn checkout_event_reads_type_field() {
        // Arrange
        let payload = r#"{"type":"checkout.session.completed","data":{"object":{"client_reference_id":"u1"}}}"#;

        // Act
        let event: CheckoutEvent = serde_json::from_str(payload).unwrap();

        // Assert
        assert_eq!(event.kind, "checkout.session.completed");
        assert_eq!(event.data.object.client_reference_id.as_deref(), Some("u1"));
    }

    #[test]
    fn credentials_debug_hides_password() {
        // Arrange
        let credentials = Credentials {
            email: "a@b.c".to_owned(),
            password: "secret".to_owned(),
        };

        // Act
        let printed = format!("{credentials:?}");

        // Assert
        assert!(!printed.contains("secret"));
    }

    #[test]
    fn bytes_to_mb_binary_megabytes() {
        // Arrange

        // Act
        let mb = bytes_to_mb(3 * 1024 * 1024);

        // Assert
        assert!((mb - 3.0).abs() < f64::EPSILON);
    }
}
