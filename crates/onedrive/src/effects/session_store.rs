use std::io;
use std::path::{Path, PathBuf};

use onedrive_fs::{AtomicWriteOptions, atomic_read, atomic_write, remove_if_exists, sidecar_path};
use tracing::{debug, warn};

use crate::data::UploadSession;
use crate::error::Result;

/// Appended to the source file name to form its session sidecar.
pub const SESSION_SUFFIX: &str = ".1drv_upload";

/// The sidecar file holding a chunked upload's session between runs.
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The sidecar kept next to `source`.
    pub fn for_source(source: impl AsRef<Path>) -> Self {
        Self::new(sidecar_path(source, SESSION_SUFFIX))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Best effort: a missing or unreadable sidecar is simply no session.
    pub fn load(&self) -> Option<UploadSession> {
        let bytes = match atomic_read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "no upload session");
                return None;
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(session) => Some(session),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "ignoring malformed upload session");
                None
            }
        }
    }

    pub fn save(&self, session: &UploadSession) -> Result<()> {
        let bytes = serde_json::to_vec(session).map_err(io::Error::from)?;
        atomic_write(&self.path, &bytes, AtomicWriteOptions::default())?;
        Ok(())
    }

    pub fn remove(&self) -> Result<()> {
        remove_if_exists(&self.path)?;
        Ok(())
    }
}
