//! A window onto one fragment of a larger seekable source.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::warn;

use super::http::BoxStream;
use crate::data::ChunkRange;

/// Called with `(bytes consumed so far, range size)` before every read.
pub type ProgressFn = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// Times a failed local read is retried before the error is returned.
pub const READ_RETRIES: u32 = 5;

const READ_RETRY_PAUSE: Duration = Duration::from_millis(200);

/// Exposes only the inclusive byte range `[from, to]` of `source`.
///
/// The reader owns the cursor of `source`: it seeks to its range on
/// construction and on [`rewind`]. Readers must not share one open file
/// description, so use [`open`] to give each fragment its own handle.
///
/// [`rewind`]: BoundedChunkReader::rewind
/// [`open`]: BoundedChunkReader::open
pub struct BoundedChunkReader<S> {
    source: S,
    range: ChunkRange,
    current: u64,
    on_progress: Option<ProgressFn>,
    retry_pause: Duration,
}

impl BoundedChunkReader<File> {
    /// Open `path` read-only and position a reader at `range`.
    pub fn open(path: impl AsRef<Path>, range: ChunkRange) -> io::Result<Self> {
        Self::new(File::open(path)?, range)
    }
}

impl<S: Read + Seek> BoundedChunkReader<S> {
    pub fn new(mut source: S, range: ChunkRange) -> io::Result<Self> {
        source.seek(SeekFrom::Start(range.from))?;
        Ok(Self {
            source,
            range,
            current: 0,
            on_progress: None,
            retry_pause: READ_RETRY_PAUSE,
        })
    }

    pub fn with_progress(mut self, on_progress: ProgressFn) -> Self {
        self.on_progress = Some(on_progress);
        self
    }

    pub fn retry_pause(mut self, pause: Duration) -> Self {
        self.retry_pause = pause;
        self
    }

    pub fn range(&self) -> ChunkRange {
        self.range
    }

    pub fn size(&self) -> u64 {
        self.range.len()
    }

    /// Bytes handed out since construction or the last rewind.
    pub fn position(&self) -> u64 {
        self.current
    }

    pub fn remaining(&self) -> u64 {
        self.size() - self.current
    }

    pub fn rewind(&mut self) -> io::Result<()> {
        self.source.seek(SeekFrom::Start(self.range.from))?;
        self.current = 0;
        Ok(())
    }

    /// Read up to `max_len` bytes of the range.
    ///
    /// Returns `None` once the range is exhausted, without touching the source.
    pub fn read(&mut self, max_len: usize) -> io::Result<Option<Vec<u8>>> {
        let remaining = self.remaining();
        if remaining == 0 {
            return Ok(None);
        }
        let len = remaining.min(max_len as u64) as usize;

        if let Some(on_progress) = &self.on_progress {
            on_progress(self.current, self.size());
        }

        let mut retries = 0;
        loop {
            match self.fill(len) {
                Ok(buf) => {
                    self.current += len as u64;
                    return Ok(Some(buf));
                }
                Err(e) if retries < READ_RETRIES && is_transient(&e) => {
                    retries += 1;
                    warn!(
                        range = %self.range,
                        offset = self.current,
                        retries,
                        error = %e,
                        "local read failed, seeking back"
                    );
                    std::thread::sleep(self.retry_pause);
                    self.source.seek(SeekFrom::Start(self.range.from + self.current))?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn fill(&mut self, len: usize) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        let mut filled = 0;
        while filled < len {
            match self.source.read(&mut buf[filled..])? {
                0 => return Err(io::ErrorKind::UnexpectedEof.into()),
                n => filled += n,
            }
        }
        Ok(buf)
    }
}

impl<S: Read + Seek + Send + 'static> BoundedChunkReader<S> {
    /// Stream the range in pieces of `io_size` bytes.
    ///
    /// Each read runs on the blocking pool so a slow disk never stalls the
    /// runtime driving the request.
    pub fn into_stream(self, io_size: usize) -> BoxStream<'static, io::Result<Bytes>> {
        let stream = futures_util::stream::try_unfold(self, move |reader| async move {
            let (reader, piece) = tokio::task::spawn_blocking(move || {
                let mut reader = reader;
                let piece = reader.read(io_size);
                (reader, piece)
            })
            .await
            .map_err(io::Error::other)?;

            Ok::<_, io::Error>(piece?.map(|bytes| (Bytes::from(bytes), reader)))
        });
        Box::pin(stream)
    }
}

fn is_transient(error: &io::Error) -> bool {
    !matches!(
        error.kind(),
        io::ErrorKind::NotFound
            | io::ErrorKind::PermissionDenied
            | io::ErrorKind::InvalidInput
            | io::ErrorKind::Unsupported
    )
}
