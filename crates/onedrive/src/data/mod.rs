//! Immutable configuration and types.

mod cache;
mod item;
mod options;
mod progress;
mod session;

pub use cache::{CacheKey, PathCache};
pub use item::{
    ACCESS_DENIED, ApiError, DriveDir, DriveFile, DriveItem, ITEM_NOT_FOUND, ItemMeta,
    NOT_FOUND_ID, OnNotFound, Payload, RemoteOrigin,
};
pub use options::{
    ClientConfig, DEFAULT_FRAGMENT_SIZE, DEFAULT_IO_SIZE, DownloadOptions, FRAGMENT_ALIGNMENT,
    SIMPLE_UPLOAD_LIMIT, UploadOptions,
};
pub(crate) use options::validate_fragment_size;
pub use progress::{EventKind, Observer, TransferEvent};
pub(crate) use progress::Reporter;
pub use session::{ChunkRange, UploadSession};
