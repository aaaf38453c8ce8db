//! Atomic filesystem primitives for resumable transfers.
//!
//! Transfers keep their resumption state in sidecar files next to the file
//! being moved. These helpers guarantee a sidecar is either fully old or fully
//! new on disk, and that a finished download only appears under its final
//! name once every byte is in place.

mod error;

pub use error::{Error, Result};

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

#[derive(Clone, Copy, Debug)]
pub struct AtomicWriteOptions {
    prefix: &'static str,
    suffix: &'static str,
    sync: bool,
}

impl Default for AtomicWriteOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl AtomicWriteOptions {
    pub fn new() -> Self {
        Self {
            prefix: ".",
            suffix: ".tmp",
            sync: true,
        }
    }

    pub fn prefix(mut self, prefix: &'static str) -> Self {
        self.prefix = prefix;
        self
    }

    pub fn suffix(mut self, suffix: &'static str) -> Self {
        self.suffix = suffix;
        self
    }

    /// Flush the temporary file to stable storage before renaming it.
    pub fn sync(mut self, sync: bool) -> Self {
        self.sync = sync;
        self
    }

    fn temp_path_for(&self, path: &Path) -> PathBuf {
        let parent = path.parent().unwrap_or(Path::new(""));
        let file_name = path.file_name().unwrap_or_default().to_string_lossy();
        parent.join(format!("{}{}{}", self.prefix, file_name, self.suffix))
    }
}

/// Replace `path` with `content` in one rename.
///
/// A crash at any point leaves either the previous file or the new one, never
/// a mix of both.
pub fn atomic_write(
    path: impl AsRef<Path>,
    content: &[u8],
    options: AtomicWriteOptions,
) -> Result<()> {
    let path = path.as_ref();
    let tmp_path = options.temp_path_for(path);

    fs::write(&tmp_path, content).map_err(|source| Error::Write {
        path: tmp_path.clone(),
        source,
    })?;

    if options.sync {
        let file = fs::File::open(&tmp_path).map_err(|source| Error::Write {
            path: tmp_path.clone(),
            source,
        })?;
        file.sync_all().map_err(|source| Error::Write {
            path: tmp_path.clone(),
            source,
        })?;
    }

    fs::rename(&tmp_path, path).map_err(|source| {
        let _ = fs::remove_file(&tmp_path);
        Error::Rename {
            from: tmp_path.clone(),
            to: path.to_path_buf(),
            source,
        }
    })
}

pub fn atomic_read(path: impl AsRef<Path>) -> Result<Vec<u8>> {
    let path = path.as_ref();
    fs::read(path).map_err(|source| Error::Read {
        path: path.to_path_buf(),
        source,
    })
}

#[derive(Clone, Copy, Debug)]
pub struct ReplaceOptions {
    retry_count: u32,
    retry_delay: Duration,
}

impl Default for ReplaceOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplaceOptions {
    pub fn new() -> Self {
        Self {
            retry_count: 5,
            retry_delay: Duration::from_millis(100),
        }
    }

    pub fn retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    pub fn retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }
}

/// Move `src` over `dest`, replacing any existing file.
///
/// A failed rename is retried up to `retry_count` times with a growing
/// pause. A missing `src` fails at once.
pub fn replace_file(
    src: impl AsRef<Path>,
    dest: impl AsRef<Path>,
    options: ReplaceOptions,
) -> Result<()> {
    let src = src.as_ref();
    let dest = dest.as_ref();
    let mut attempts = 0;

    loop {
        match fs::rename(src, dest) {
            Ok(()) => return Ok(()),
            Err(source) => {
                attempts += 1;
                if attempts >= options.retry_count || source.kind() == std::io::ErrorKind::NotFound
                {
                    return Err(Error::Rename {
                        from: src.to_path_buf(),
                        to: dest.to_path_buf(),
                        source,
                    });
                }
                thread::sleep(options.retry_delay * attempts);
            }
        }
    }
}

/// Remove `path`, treating an already missing file as success.
pub fn remove_if_exists(path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(Error::Remove {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Length of `path` in bytes, or 0 when it does not exist.
pub fn len_or_zero(path: impl AsRef<Path>) -> u64 {
    fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

/// The sidecar file kept next to `path`: `movie.mkv` -> `movie.mkv<suffix>`.
pub fn sidecar_path(path: impl AsRef<Path>, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_ref().as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}
