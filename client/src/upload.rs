//! Batch upload orchestration.
//!
//! A batch is checked against the user's quota before anything is sent,
//! then every file is uploaded at once with no concurrency cap. The batch
//! waits for all requests whatever their outcome; one failure never cancels
//! its siblings. Per-file progress lives in a [`Progress`] board that is
//! wiped a fixed delay after the batch settles.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use kernel::{bytes_to_mb, is_accepted_file_name, Tier, UserInfo, ACCEPTED_EXTENSIONS};
use parking_lot::Mutex;
use reqwest::multipart::Part;
use tokio::fs::File;
use tokio::task::JoinHandle;
use tokio_util::io::ReaderStream;

use crate::error::ClientError;
use crate::service::FileService;

/// How long finished progress stays visible.
pub const PROGRESS_CLEAR_DELAY: Duration = Duration::from_secs(3);

enum Payload {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

/// A file staged for upload.
pub struct UploadFile {
    name: String,
    size: u64,
    payload: Payload,
}

impl UploadFile {
    pub async fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ClientError> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("no file name in {}", path.display()),
                )
            })?
            .to_owned();
        let meta = tokio::fs::metadata(path).await?;
        Ok(Self {
            name,
            size: meta.len(),
            payload: Payload::Path(path.to_path_buf()),
        })
    }

    pub fn from_bytes(name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            size: data.len() as u64,
            payload: Payload::Bytes(data),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Size in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    pub(crate) async fn to_part(&self) -> Result<Part, ClientError> {
        let mime = mime_guess::from_path(&self.name).first_or_octet_stream();
        let part = match &self.payload {
            Payload::Path(path) => {
                let f = File::open(path).await?;
                let stream = ReaderStream::new(f);
                let body = reqwest::Body::wrap_stream(stream);
                Part::stream_with_length(body, self.size)
            }
            Payload::Bytes(data) => Part::bytes(data.clone()),
        };
        Ok(part.file_name(self.name.clone()).mime_str(mime.essence_str())?)
    }
}

impl fmt::Debug for UploadFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadFile")
            .field("name", &self.name)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

/// Why a batch was refused before any request went out.
#[derive(Debug, Clone, PartialEq)]
pub enum Rejection {
    StorageExceeded {
        uploading_mb: f64,
        available_mb: f64,
        tier: Tier,
    },
    FileLimitExceeded {
        current: usize,
        incoming: usize,
        limit: usize,
    },
    NoAcceptedFiles,
    Busy,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::StorageExceeded {
                uploading_mb,
                available_mb,
                tier,
            } => {
                let hint = match tier {
                    Tier::Basic => "Upgrade to Premium for 500MB storage!",
                    Tier::Premium => "Please delete some files first.",
                };
                write!(
                    f,
                    "Upload exceeds storage limit!\n\nUploading: {uploading_mb:.1}MB\nAvailable: {available_mb:.1}MB\n\n{hint}"
                )
            }
            Rejection::FileLimitExceeded {
                current,
                incoming,
                limit,
            } => write!(
                f,
                "Upload exceeds file limit!\n\nBasic users can store up to {limit} files.\nYou currently have {current} files and are trying to upload {incoming} more.\n\nUpgrade to Premium for unlimited files!"
            ),
            Rejection::NoAcceptedFiles => write!(
                f,
                "No valid files found. Please drop files with supported extensions:\n{}",
                ACCEPTED_EXTENSIONS.join(", ")
            ),
            Rejection::Busy => write!(f, "An upload is already in progress."),
        }
    }
}

/// Refuses batches that cannot fit the user's quota.
///
/// Without loaded user info nothing is checked; the backend still enforces
/// the quota authoritatively.
pub fn preflight(
    files: &[UploadFile],
    user: Option<&UserInfo>,
    existing: usize,
) -> Result<(), Rejection> {
    let Some(user) = user else {
        return Ok(());
    };

    let uploading_mb = bytes_to_mb(files.iter().map(UploadFile::size).sum());
    let available_mb = user.available_storage();
    if uploading_mb > available_mb {
        return Err(Rejection::StorageExceeded {
            uploading_mb,
            available_mb,
            tier: user.subscription_tier,
        });
    }

    if let Some(limit) = user.subscription_tier.file_limit() {
        if existing + files.len() > limit {
            return Err(Rejection::FileLimitExceeded {
                current: existing,
                incoming: files.len(),
                limit,
            });
        }
    }

    Ok(())
}

/// Dropped files that passed the extension allow-list.
#[derive(Debug)]
pub struct Dropped {
    pub accepted: Vec<UploadFile>,
    pub skipped: usize,
}

impl Dropped {
    /// Notice about skipped files, if any were skipped.
    #[must_use]
    pub fn notice(&self) -> Option<String> {
        (self.skipped > 0).then(|| {
            format!(
                "{} file(s) were skipped because they have unsupported file types.\n\nProceeding with {} valid file(s).",
                self.skipped,
                self.accepted.len()
            )
        })
    }
}

pub fn filter_dropped(files: Vec<UploadFile>) -> Result<Dropped, Rejection> {
    let total = files.len();
    let accepted: Vec<UploadFile> = files
        .into_iter()
        .filter(|f| is_accepted_file_name(f.name()))
        .collect();
    if accepted.is_empty() {
        return Err(Rejection::NoAcceptedFiles);
    }
    Ok(Dropped {
        skipped: total - accepted.len(),
        accepted,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStatus {
    Waiting,
    Uploading,
    Completed,
    Error,
}

impl UploadStatus {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            UploadStatus::Waiting => "Waiting",
            UploadStatus::Uploading => "Uploading",
            UploadStatus::Completed => "Done",
            UploadStatus::Error => "Failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressItem {
    pub index: usize,
    pub name: String,
    pub size: u64,
    pub status: UploadStatus,
}

/// Shared per-file progress of the running batch.
#[derive(Debug, Clone, Default)]
pub struct Progress {
    items: Arc<Mutex<Vec<ProgressItem>>>,
}

impl Progress {
    fn start(&self, files: &[UploadFile]) {
        let items = files
            .iter()
            .enumerate()
            .map(|(index, f)| ProgressItem {
                index,
                name: f.name().to_owned(),
                size: f.size(),
                status: UploadStatus::Waiting,
            })
            .collect();
        *self.items.lock() = items;
    }

    fn set(&self, index: usize, status: UploadStatus) {
        if let Some(item) = self.items.lock().iter_mut().find(|i| i.index == index) {
            tracing::debug!("{}: {:?} -> {:?}", item.name, item.status, status);
            item.status = status;
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<ProgressItem> {
        self.items.lock().clone()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn clear(&self) {
        self.items.lock().clear();
    }

    /// Clears the board after `delay`, whether or not anybody looked at it.
    pub fn clear_after(&self, delay: Duration) -> JoinHandle<()> {
        let progress = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            progress.clear();
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    AllSucceeded,
    Partial,
    AllFailed,
}

/// Aggregate result of a settled batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    /// One `"<name>: <error>"` line per failed file, in batch order
    pub errors: Vec<String>,
}

impl BatchSummary {
    #[must_use]
    pub fn outcome(&self) -> BatchOutcome {
        if self.errors.is_empty() {
            BatchOutcome::AllSucceeded
        } else if self.succeeded > 0 {
            BatchOutcome::Partial
        } else {
            BatchOutcome::AllFailed
        }
    }

    /// Whether the file list and quota must be re-fetched.
    #[must_use]
    pub fn needs_refresh(&self) -> bool {
        self.succeeded > 0
    }

    #[must_use]
    pub fn message(&self) -> String {
        match self.outcome() {
            BatchOutcome::AllSucceeded => format!(
                "Successfully uploaded all {} file(s)!\n\nYour custom content is now safely backed up in the cloud.",
                self.succeeded
            ),
            BatchOutcome::Partial => format!(
                "Partial success: {} of {} files uploaded successfully.\n\nErrors:\n{}",
                self.succeeded,
                self.total,
                self.errors.join("\n")
            ),
            BatchOutcome::AllFailed => format!(
                "Upload failed for all files.\n\nErrors:\n{}",
                self.errors.join("\n")
            ),
        }
    }
}

/// Uploads every file of a batch concurrently and tracks their progress.
pub struct UploadOrchestrator<'a, S: ?Sized> {
    service: &'a S,
    progress: Progress,
    clear_delay: Duration,
}

impl<'a, S: FileService + ?Sized> UploadOrchestrator<'a, S> {
    pub fn new(service: &'a S, progress: Progress) -> Self {
        Self {
            service,
            progress,
            clear_delay: PROGRESS_CLEAR_DELAY,
        }
    }

    #[must_use]
    pub fn with_clear_delay(mut self, delay: Duration) -> Self {
        self.clear_delay = delay;
        self
    }

    pub async fn run(&self, files: &[UploadFile]) -> BatchSummary {
        self.progress.start(files);

        let uploads = files.iter().enumerate().map(|(index, file)| async move {
            self.progress.set(index, UploadStatus::Uploading);
            match self.service.upload_file(file).await {
                Ok(_) => {
                    self.progress.set(index, UploadStatus::Completed);
                    Ok(())
                }
                Err(e) => {
                    self.progress.set(index, UploadStatus::Error);
                    Err(format!("{}: {e}", file.name()))
                }
            }
        });
        let results = join_all(uploads).await;

        let errors: Vec<String> = results.into_iter().filter_map(Result::err).collect();
        let summary = BatchSummary {
            total: files.len(),
            succeeded: files.len() - errors.len(),
            errors,
        };
        tracing::info!(
            "upload batch settled: {} of {} succeeded",
            summary.succeeded,
            summary.total
        );

        self.progress.clear_after(self.clear_delay);
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::FakeService;
    use rstest::rstest;

    const MB: usize = 1024 * 1024;

    fn user(tier: Tier, used: f64, limit: f64) -> UserInfo {
        UserInfo {
            uid: "u1".to_owned(),
            email: "a@b.c".to_owned(),
            display_name: None,
            subscription_tier: tier,
            storage_used: used,
            storage_limit: limit,
        }
    }

    fn file(name: &str, size: usize) -> UploadFile {
        UploadFile::from_bytes(name, vec![0; size])
    }

    #[test]
    fn preflight_rejects_batch_over_remaining_quota() {
        // Arrange
        let user = user(Tier::Basic, 45.0, 50.0);
        let files = vec![file("a.package", 3 * MB), file("b.package", 4 * MB)];

        // Act
        let result = preflight(&files, Some(&user), 0);

        // Assert
        match result {
            Err(Rejection::StorageExceeded {
                uploading_mb,
                available_mb,
                tier,
            }) => {
                assert!((uploading_mb - 7.0).abs() < 1e-9);
                assert!((available_mb - 5.0).abs() < 1e-9);
                assert_eq!(tier, Tier::Basic);
            }
            other => panic!("expected storage rejection, got {other:?}"),
        }
    }

    #[test]
    fn preflight_accepts_batch_that_exactly_fits() {
        // Arrange
        let user = user(Tier::Basic, 45.0, 50.0);
        let files = vec![file("a.package", 5 * MB)];

        // Act
        let result = preflight(&files, Some(&user), 0);

        // Assert
        assert_eq!(result, Ok(()));
    }

    #[rstest]
    #[case(Tier::Basic, 24, 1, true)]
    #[case(Tier::Basic, 24, 2, false)]
    #[case(Tier::Basic, 25, 1, false)]
    #[case(Tier::Premium, 100, 10, true)]
    #[trace]
    fn preflight_file_count(
        #[case] tier: Tier,
        #[case] existing: usize,
        #[case] incoming: usize,
        #[case] allowed: bool,
    ) {
        // Arrange
        let user = user(tier, 0.0, tier.storage_limit_mb());
        let files: Vec<UploadFile> = (0..incoming).map(|i| file(&format!("{i}.md"), 1)).collect();

        // Act
        let result = preflight(&files, Some(&user), existing);

        // Assert
        assert_eq!(result.is_ok(), allowed);
    }

    #[test]
    fn preflight_without_user_info_passes() {
        // Arrange
        let files = vec![file("a.package", 600 * MB)];

        // Act
        let result = preflight(&files, None, 1000);

        // Assert
        assert_eq!(result, Ok(()));
    }

    #[test]
    fn storage_rejection_message_suggests_upgrade_for_basic() {
        // Arrange
        let rejection = Rejection::StorageExceeded {
            uploading_mb: 7.0,
            available_mb: 5.0,
            tier: Tier::Basic,
        };

        // Act
        let message = rejection.to_string();

        // Assert
        assert!(message.contains("Uploading: 7.0MB"));
        assert!(message.contains("Available: 5.0MB"));
        assert!(message.ends_with("Upgrade to Premium for 500MB storage!"));
    }

    #[test]
    fn filter_dropped_keeps_accepted_extensions() {
        // Arrange
        let files = vec![
            file("hair.package", 1),
            file("photo.png", 1),
            file("LOT.TRAYITEM", 1),
            file("script.exe", 1),
        ];

        // Act
        let dropped = filter_dropped(files).unwrap();

        // Assert
        let names: Vec<&str> = dropped.accepted.iter().map(UploadFile::name).collect();
        assert_eq!(names, vec!["hair.package", "LOT.TRAYITEM"]);
        assert_eq!(dropped.skipped, 2);
        assert_eq!(
            dropped.notice().unwrap(),
            "2 file(s) were skipped because they have unsupported file types.\n\nProceeding with 2 valid file(s)."
        );
    }

    #[test]
    fn filter_dropped_nothing_accepted() {
        // Arrange
        let files = vec![file("photo.png", 1), file("video.mp4", 1)];

        // Act
        let result = filter_dropped(files);

        // Assert
        assert!(matches!(result, Err(Rejection::NoAcceptedFiles)));
    }

    #[test]
    fn filter_dropped_all_accepted_has_no_notice() {
        // Arrange
        let files = vec![file("a.zip", 1), file("b.7z", 1)];

        // Act
        let dropped = filter_dropped(files).unwrap();

        // Assert
        assert_eq!(dropped.notice(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn partial_batch_reports_successes_and_error_lines() {
        // Arrange
        let service = FakeService::default().failing_upload("b.package", "Upload failed: 500");
        let files = vec![
            file("a.package", 1),
            file("b.package", 1),
            file("c.package", 1),
        ];
        let progress = Progress::default();
        let orchestrator = UploadOrchestrator::new(&service, progress.clone());

        // Act
        let summary = orchestrator.run(&files).await;

        // Assert
        assert_eq!(summary.total, 3);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.errors, vec!["b.package: Upload failed: 500".to_owned()]);
        assert_eq!(summary.outcome(), BatchOutcome::Partial);
        assert!(summary.needs_refresh());
        assert_eq!(service.upload_calls(), 3);
        let statuses: Vec<UploadStatus> = progress.snapshot().iter().map(|i| i.status).collect();
        assert_eq!(
            statuses,
            vec![
                UploadStatus::Completed,
                UploadStatus::Error,
                UploadStatus::Completed
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn all_failed_batch_needs_no_refresh() {
        // Arrange
        let service = FakeService::default()
            .failing_upload("a.md", "boom")
            .failing_upload("b.md", "bang");
        let files = vec![file("a.md", 1), file("b.md", 1)];
        let orchestrator = UploadOrchestrator::new(&service, Progress::default());

        // Act
        let summary = orchestrator.run(&files).await;

        // Assert
        assert_eq!(summary.outcome(), BatchOutcome::AllFailed);
        assert!(!summary.needs_refresh());
        assert_eq!(
            summary.message(),
            "Upload failed for all files.\n\nErrors:\na.md: boom\nb.md: bang"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn uploads_run_concurrently() {
        // Arrange
        let service = FakeService::default().with_upload_delay(Duration::from_secs(10));
        let files: Vec<UploadFile> = (0..5).map(|i| file(&format!("{i}.txt"), 1)).collect();
        let orchestrator = UploadOrchestrator::new(&service, Progress::default());
        let started = tokio::time::Instant::now();

        // Act
        let summary = orchestrator.run(&files).await;

        // Assert
        assert_eq!(summary.outcome(), BatchOutcome::AllSucceeded);
        assert!(started.elapsed() < Duration::from_secs(20));
        assert_eq!(service.max_in_flight(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn progress_cleared_after_delay() {
        // Arrange
        let service = FakeService::default();
        let files = vec![file("a.md", 1)];
        let progress = Progress::default();
        let orchestrator = UploadOrchestrator::new(&service, progress.clone());

        // Act
        orchestrator.run(&files).await;
        let right_after = progress.snapshot();
        tokio::time::sleep(PROGRESS_CLEAR_DELAY + Duration::from_millis(10)).await;

        // Assert
        assert_eq!(right_after.len(), 1);
        assert_eq!(right_after[0].status, UploadStatus::Completed);
        assert!(progress.is_empty());
    }

    #[test]
    fn all_succeeded_message() {
        // Arrange
        let summary = BatchSummary {
            total: 2,
            succeeded: 2,
            errors: vec![],
        };

        // Act
        let message = summary.message();

        // Assert
        assert!(message.starts_with("Successfully uploaded all 2 file(s)!"));
    }
}
