use std::fmt;

use serde::{Deserialize, Serialize};

/// State persisted next to a source file so a chunked upload can resume.
///
/// Never edited in place: a new session replaces the sidecar wholesale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadSession {
    pub session_url: String,
    pub source_size: u64,
    pub fragment_size: u64,
}

/// An inclusive byte range `[from, to]` of the source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRange {
    pub from: u64,
    pub to: u64,
}

impl ChunkRange {
    pub fn new(from: u64, to: u64) -> Self {
        debug_assert!(from <= to, "empty chunk range {from}-{to}");
        Self { from, to }
    }

    pub fn len(&self) -> u64 {
        self.to - self.from + 1
    }

    /// Ranges are inclusive, so they are never empty.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Value of the `Content-Range` header for a source of `total` bytes.
    pub fn content_range(&self, total: u64) -> String {
        format!("bytes {}-{}/{}", self.from, self.to, total)
    }
}

impl fmt::Display for ChunkRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.from, self.to)
    }
}
