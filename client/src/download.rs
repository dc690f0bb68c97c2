use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use futures::StreamExt;
use kernel::{CommunityDownload, FileMetadata};
use reqwest::Client;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::display::format_file_size;
use crate::error::ClientError;
use crate::prompt::Prompt;

/// Label and enabled state of the control that triggered an action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Control {
    label: String,
    enabled: bool,
}

impl Control {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            enabled: true,
        }
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Disables the control and shows `label` until the guard is dropped.
    pub fn busy(&mut self, label: &str) -> Busy<'_> {
        let saved_label = std::mem::replace(&mut self.label, label.to_owned());
        let saved_enabled = std::mem::replace(&mut self.enabled, false);
        Busy {
            control: self,
            saved_label,
            saved_enabled,
        }
    }
}

/// Restores the control on drop, whatever path the action left through.
pub struct Busy<'a> {
    control: &'a mut Control,
    saved_label: String,
    saved_enabled: bool,
}

impl Busy<'_> {
    #[must_use]
    pub fn control(&self) -> &Control {
        &*self.control
    }
}

impl Drop for Busy<'_> {
    fn drop(&mut self) {
        self.control.label = std::mem::take(&mut self.saved_label);
        self.control.enabled = self.saved_enabled;
    }
}

/// Hands a download URL to the user.
#[async_trait]
pub trait Delivery: Send + Sync {
    /// Opens the URL in a new browsing context; `false` when that is blocked.
    async fn open(&self, url: &str) -> bool;

    /// Fallback path: fetches the URL directly into a local file.
    async fn save(&self, url: &str, file_name: &str) -> Result<PathBuf, ClientError>;
}

/// Opens URLs with the platform's opener and saves into a directory
/// when no browser is available.
pub struct SystemDelivery {
    http: Client,
    dir: PathBuf,
    browser: bool,
    opener: Vec<String>,
}

fn platform_opener() -> Vec<String> {
    let opener: &[&str] = if cfg!(target_os = "windows") {
        &["cmd", "/C", "start", ""]
    } else if cfg!(target_os = "macos") {
        &["open"]
    } else {
        &["xdg-open"]
    };
    opener.iter().map(|s| (*s).to_owned()).collect()
}

impl SystemDelivery {
    pub fn new<P: AsRef<Path>>(dir: P, browser: bool) -> Self {
        Self {
            http: Client::new(),
            dir: dir.as_ref().to_path_buf(),
            browser,
            opener: platform_opener(),
        }
    }

    /// Replaces the platform opener; the URL is appended to `program` and `args`.
    #[must_use]
    pub fn with_opener(mut self, program: &str, args: &[&str]) -> Self {
        self.opener = std::iter::once(program)
            .chain(args.iter().copied())
            .map(str::to_owned)
            .collect();
        self
    }
}

/// Keeps only the last path component so a server-provided name cannot
/// escape the download directory.
fn local_name(file_name: &str) -> &str {
    let name = file_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(file_name);
    if name.is_empty() || name == "." || name == ".." {
        "download"
    } else {
        name
    }
}

#[async_trait]
impl Delivery for SystemDelivery {
    async fn open(&self, url: &str) -> bool {
        let Some((program, args)) = self.opener.split_first() else {
            return false;
        };
        if !self.browser {
            return false;
        }
        let status = Command::new(program)
            .args(args)
            .arg(url)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        match status {
            Ok(s) if s.success() => true,
            Ok(s) => {
                tracing::warn!("opener exited with {s}");
                false
            }
            Err(e) => {
                tracing::warn!("no opener available: {e}");
                false
            }
        }
    }

    async fn save(&self, url: &str, file_name: &str) -> Result<PathBuf, ClientError> {
        let response = self.http.get(url).send().await?.error_for_status()?;
        let target = self.dir.join(local_name(file_name));
        let mut out = tokio::fs::File::create(&target).await?;
        let mut stream = response.bytes_stream();
        let mut written = 0_u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            written += chunk.len() as u64;
            out.write_all(&chunk).await?;
        }
        out.flush().await?;
        tracing::info!("saved {} bytes to {}", written, target.display());
        Ok(target)
    }
}

/// Something downloadable: a backup file or a community file.
#[derive(Debug, Clone, Copy)]
pub struct DownloadTarget<'a> {
    pub name: &'a str,
    pub size: u64,
    pub url: Option<&'a str>,
}

impl<'a> From<&'a FileMetadata> for DownloadTarget<'a> {
    fn from(file: &'a FileMetadata) -> Self {
        Self {
            name: &file.name,
            size: file.size,
            url: file.download_url.as_deref(),
        }
    }
}

impl<'a> From<&'a CommunityDownload> for DownloadTarget<'a> {
    fn from(download: &'a CommunityDownload) -> Self {
        Self {
            name: &download.file_name,
            size: download.file_size,
            url: Some(&download.download_url),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    Cancelled,
    Opened,
    Saved(PathBuf),
}

pub struct DownloadHandler<'a> {
    prompt: &'a dyn Prompt,
    delivery: &'a dyn Delivery,
}

impl<'a> DownloadHandler<'a> {
    pub fn new(prompt: &'a dyn Prompt, delivery: &'a dyn Delivery) -> Self {
        Self { prompt, delivery }
    }

    /// Confirms, then opens the URL or falls back to saving it locally.
    ///
    /// The control is busy for the whole call and restored on every exit.
    pub async fn download(
        &self,
        target: DownloadTarget<'_>,
        control: &mut Control,
    ) -> Result<DownloadOutcome, ClientError> {
        let _busy = control.busy("Downloading...");
        if !self.confirm(target.name, target.size) {
            return Ok(DownloadOutcome::Cancelled);
        }
        self.finish(target).await
    }

    /// Asks the user with the name and human readable size.
    pub fn confirm(&self, name: &str, size: u64) -> bool {
        let question = format!(
            "Ready to download \"{name}\"?\n\nFile size: {}\n\nClick OK to start download.",
            format_file_size(size)
        );
        self.prompt.confirm(&question)
    }

    /// Delivers a target the user already agreed to.
    pub async fn finish(&self, target: DownloadTarget<'_>) -> Result<DownloadOutcome, ClientError> {
        match self.deliver(target).await {
            Ok(outcome) => {
                self.prompt.alert(&format!(
                    "Download initiated for \"{}\"! Check your Downloads folder.",
                    target.name
                ));
                Ok(outcome)
            }
            Err(e) => {
                tracing::error!("download of {} failed: {e}", target.name);
                self.prompt.alert(&format!("Error downloading backup: {e}"));
                Err(e)
            }
        }
    }

    async fn deliver(&self, target: DownloadTarget<'_>) -> Result<DownloadOutcome, ClientError> {
        let url = target.url.ok_or_else(|| {
            ClientError::Refused(format!("No download URL for \"{}\"", target.name))
        })?;
        if self.delivery.open(url).await {
            return Ok(DownloadOutcome::Opened);
        }
        tracing::info!("browser unavailable, fetching {} directly", target.name);
        let path = self.delivery.save(url, target.name).await?;
        Ok(DownloadOutcome::Saved(path))
    }
}
