use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::progress::Observer;
use crate::error::{Error, Result};

/// Files up to this size are sent in a single request.
pub const SIMPLE_UPLOAD_LIMIT: u64 = 4_096_000;

/// Upload fragments must be a multiple of this size.
pub const FRAGMENT_ALIGNMENT: u64 = 320 * 1024;

pub const DEFAULT_FRAGMENT_SIZE: u64 = 41_943_040;

pub const DEFAULT_IO_SIZE: usize = 1_048_576;

/// Connection-level settings of a client, loadable from TOML.
///
/// # Examples
///
/// ```
/// use onedrive::ClientConfig;
///
/// let config = ClientConfig::from_toml_str("page_size = 50\nskip_cache = true").unwrap();
/// assert_eq!(config.page_size, 50);
/// assert!(config.skip_cache);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Prefix every relative API path is joined to.
    pub api_base: String,

    /// Children requested per listing page.
    pub page_size: u32,

    pub connect_timeout_secs: u64,

    /// Whole-request timeout, including streaming a fragment body.
    pub request_timeout_secs: u64,

    /// Bypass every directory's lookup cache.
    pub skip_cache: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base: "https://graph.microsoft.com/v1.0/me/".to_string(),
            page_size: 200,
            connect_timeout_secs: 30,
            request_timeout_secs: 600,
            skip_cache: false,
        }
    }
}

impl ClientConfig {
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Self = toml::from_str(source).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = onedrive_fs::atomic_read(path)?;
        let source = String::from_utf8(bytes).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        Self::from_toml_str(&source)
    }

    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(Error::InvalidConfig("page_size must be positive".into()));
        }
        if !self.api_base.ends_with('/') {
            return Err(Error::InvalidConfig(format!(
                "api_base must end with '/': {}",
                self.api_base
            )));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Configuration for a single upload.
///
/// # Examples
///
/// ```
/// use onedrive::UploadOptions;
/// use std::time::Duration;
///
/// let options = UploadOptions::default()
///     .overwrite(true)
///     .fragment_size(10 * 320 * 1024)
///     .verify_interval(Duration::from_secs(5));
/// assert!(options.validate().is_ok());
/// ```
#[derive(Clone)]
pub struct UploadOptions {
    /// Replace a remote file of the same name instead of letting the server rename.
    ///
    /// Default: false
    pub overwrite: bool,

    /// Remote name, relative to the target directory. Defaults to the source file name.
    pub target_name: Option<String>,

    /// Bytes sent per request in a chunked upload.
    ///
    /// Must be a non-zero multiple of [`FRAGMENT_ALIGNMENT`].
    ///
    /// Default: 40 MiB
    pub fragment_size: u64,

    /// Bytes read from disk per progress notification.
    ///
    /// Default: 1 MiB
    pub io_size: usize,

    /// Times a timed-out fragment is re-sent before the session is restarted.
    ///
    /// Default: 3
    pub chunk_retries: u32,

    /// Attempts at creating an upload session before giving up. `None` keeps
    /// retrying with the capped backoff.
    ///
    /// Default: None
    pub max_session_attempts: Option<u32>,

    /// Base delay between session creation attempts, doubled per attempt.
    ///
    /// Default: 1s
    pub session_retry_backoff: Duration,

    /// Upper bound for the session creation delay.
    ///
    /// Default: 60s
    pub session_retry_max: Duration,

    /// Queries of a recovered session's status before it is abandoned.
    ///
    /// Default: 3
    pub status_attempts: u32,

    /// Default: 10s
    pub status_retry_delay: Duration,

    /// Path lookups made to confirm a finished upload is visible.
    ///
    /// Default: 6
    pub verify_attempts: u32,

    /// Default: 10s
    pub verify_interval: Duration,

    /// Attempts at patching the modification time after an upload.
    ///
    /// Default: 4
    pub mtime_attempts: u32,

    /// Default: 10s
    pub mtime_retry_delay: Duration,

    /// Session restarts tolerated before failing. `None` retries until the
    /// server converges.
    ///
    /// Default: None
    pub max_restarts: Option<u32>,

    /// Receives `new_segment`, `progress`, `finish_segment`, `retry` and
    /// `restart` events.
    ///
    /// Default: None
    pub on_event: Option<Observer>,
}

impl fmt::Debug for UploadOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadOptions")
            .field("overwrite", &self.overwrite)
            .field("target_name", &self.target_name)
            .field("fragment_size", &self.fragment_size)
            .field("io_size", &self.io_size)
            .field("chunk_retries", &self.chunk_retries)
            .field("max_session_attempts", &self.max_session_attempts)
            .field("session_retry_backoff", &self.session_retry_backoff)
            .field("session_retry_max", &self.session_retry_max)
            .field("status_attempts", &self.status_attempts)
            .field("status_retry_delay", &self.status_retry_delay)
            .field("verify_attempts", &self.verify_attempts)
            .field("verify_interval", &self.verify_interval)
            .field("mtime_attempts", &self.mtime_attempts)
            .field("mtime_retry_delay", &self.mtime_retry_delay)
            .field("max_restarts", &self.max_restarts)
            .field("on_event", &"{ ... }")
            .finish()
    }
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            overwrite: false,
            target_name: None,
            fragment_size: DEFAULT_FRAGMENT_SIZE,
            io_size: DEFAULT_IO_SIZE,
            chunk_retries: 3,
            max_session_attempts: None,
            session_retry_backoff: Duration::from_secs(1),
            session_retry_max: Duration::from_secs(60),
            status_attempts: 3,
            status_retry_delay: Duration::from_secs(10),
            verify_attempts: 6,
            verify_interval: Duration::from_secs(10),
            mtime_attempts: 4,
            mtime_retry_delay: Duration::from_secs(10),
            max_restarts: None,
            on_event: None,
        }
    }
}

impl UploadOptions {
    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn target_name(mut self, name: impl Into<String>) -> Self {
        self.target_name = Some(name.into());
        self
    }

    pub fn fragment_size(mut self, size: u64) -> Self {
        self.fragment_size = size;
        self
    }

    pub fn io_size(mut self, size: usize) -> Self {
        self.io_size = size;
        self
    }

    pub fn chunk_retries(mut self, retries: u32) -> Self {
        self.chunk_retries = retries;
        self
    }

    pub fn session_retry(mut self, backoff: Duration, max: Duration) -> Self {
        self.session_retry_backoff = backoff;
        self.session_retry_max = max;
        self
    }

    pub fn max_session_attempts(mut self, max: u32) -> Self {
        self.max_session_attempts = Some(max);
        self
    }

    pub fn status_retry(mut self, attempts: u32, delay: Duration) -> Self {
        self.status_attempts = attempts;
        self.status_retry_delay = delay;
        self
    }

    pub fn verify_attempts(mut self, attempts: u32) -> Self {
        self.verify_attempts = attempts;
        self
    }

    pub fn verify_interval(mut self, interval: Duration) -> Self {
        self.verify_interval = interval;
        self
    }

    pub fn mtime_retry(mut self, attempts: u32, delay: Duration) -> Self {
        self.mtime_attempts = attempts;
        self.mtime_retry_delay = delay;
        self
    }

    pub fn max_restarts(mut self, max: u32) -> Self {
        self.max_restarts = Some(max);
        self
    }

    pub fn on_event(mut self, observer: Observer) -> Self {
        self.on_event = Some(observer);
        self
    }

    pub fn validate(&self) -> Result<()> {
        validate_fragment_size(self.fragment_size)?;
        if self.io_size == 0 {
            return Err(Error::InvalidConfig("io_size must be positive".into()));
        }
        if self.verify_attempts == 0 {
            return Err(Error::InvalidConfig("verify_attempts must be positive".into()));
        }
        if self.max_session_attempts == Some(0) {
            return Err(Error::InvalidConfig(
                "max_session_attempts must be positive when set".into(),
            ));
        }
        Ok(())
    }
}

pub(crate) fn validate_fragment_size(size: u64) -> Result<()> {
    if size == 0 || size % FRAGMENT_ALIGNMENT != 0 {
        return Err(Error::InvalidConfig(format!(
            "fragment size {size} is not a positive multiple of {FRAGMENT_ALIGNMENT}"
        )));
    }
    Ok(())
}

/// Configuration for a single download.
#[derive(Clone)]
pub struct DownloadOptions {
    /// Replace an existing local file. When false an existing target is left alone.
    ///
    /// Default: false
    pub overwrite: bool,

    /// Continue from a non-empty `.incomplete` file instead of starting over.
    ///
    /// Default: true
    pub resume: bool,

    /// Default: None
    pub on_event: Option<Observer>,
}

impl fmt::Debug for DownloadOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadOptions")
            .field("overwrite", &self.overwrite)
            .field("resume", &self.resume)
            .field("on_event", &"{ ... }")
            .finish()
    }
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            overwrite: false,
            resume: true,
            on_event: None,
        }
    }
}

impl DownloadOptions {
    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn resume(mut self, resume: bool) -> Self {
        self.resume = resume;
        self
    }

    pub fn on_event(mut self, observer: Observer) -> Self {
        self.on_event = Some(observer);
        self
    }
}
