//! I/O: the drive client, transfers and their local state files.

mod download;
mod drive;
mod http;
mod session_store;
mod sliced;
mod upload;

pub use download::PARTIAL_SUFFIX;
pub use drive::OneDrive;
pub use http::{
    BoxStream, ChunkResponse, ChunkUpload, DriveApi, HttpClient, StreamResponse, Verb,
};
pub use session_store::{SESSION_SUFFIX, SessionStore};
pub use sliced::{BoundedChunkReader, ProgressFn, READ_RETRIES};

#[cfg(feature = "reqwest")]
pub use http::{GraphApi, ReqwestClient};
