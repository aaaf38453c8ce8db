//! OneDrive client with resumable chunked uploads and range-resumed downloads.
//!
//! # Architecture
//!
//! This crate follows the three-layer pattern:
//! - [`data`] - Item model, options and transfer events
//! - [`core`] - Pure transformations: fragment ranges, API paths, response classification
//! - `effects` - The [`OneDrive`] client over the [`DriveApi`] and [`HttpClient`] seams
//!
//! # Key Features
//!
//! - **Resumable uploads**: the upload session lives in a sidecar next to the
//!   source, so an interrupted upload continues from the server's offset
//! - **Verified completion**: an upload only succeeds once the target name
//!   resolves to a file with a new identity
//! - **Per-directory caching**: lookups are memoized on the directory node
//!   until cleared or bypassed
//! - **Resumable downloads**: bytes land in `<target>.incomplete` and are
//!   renamed into place once complete
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//!
//! use onedrive::{ClientConfig, GraphApi, OneDrive, ReqwestClient, UploadOptions};
//!
//! # async fn run(token: String) -> onedrive::Result<()> {
//! let config = ClientConfig::default();
//! let drive = OneDrive::new(
//!     GraphApi::new(token, &config)?,
//!     ReqwestClient::new(&config)?,
//!     config,
//! )?;
//!
//! let root = drive.root().await?;
//! let backups = drive.mkdir(root, "backups/2024").await?;
//! let file = drive
//!     .upload(&backups, Path::new("disk.img"), &UploadOptions::default().overwrite(true))
//!     .await?;
//! println!("uploaded {} ({} bytes)", file.absolute_path(), file.meta.size);
//! # Ok(())
//! # }
//! ```

pub mod core;
pub mod data;
mod effects;
mod error;

pub use data::{
    ClientConfig, DownloadOptions, DriveDir, DriveFile, DriveItem, EventKind, ItemMeta, Observer,
    OnNotFound, TransferEvent, UploadOptions, UploadSession,
};
pub use effects::{
    BoundedChunkReader, BoxStream, ChunkResponse, ChunkUpload, DriveApi, HttpClient, OneDrive,
    PARTIAL_SUFFIX, ProgressFn, READ_RETRIES, SESSION_SUFFIX, SessionStore, StreamResponse, Verb,
};
pub use error::{Error, Result, TransportError};

#[cfg(feature = "reqwest")]
pub use effects::{GraphApi, ReqwestClient};
