use std::path::{Path, PathBuf};

use futures_util::StreamExt;
use onedrive_fs::{ReplaceOptions, len_or_zero, replace_file, sidecar_path};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};

use super::drive::OneDrive;
use super::http::{DriveApi, HttpClient, Verb};
use crate::core::path;
use crate::data::{DownloadOptions, DriveFile, DriveItem, EventKind, OnNotFound, Reporter};
use crate::error::{Error, Result, TransportError};

/// Appended to the target path while a download is in progress.
pub const PARTIAL_SUFFIX: &str = ".incomplete";

impl<A: DriveApi, C: HttpClient> OneDrive<A, C> {
    /// Download `file` to `target`, resuming an earlier partial download.
    ///
    /// Returns `None` when `target` already exists and `overwrite` is off.
    #[instrument(
        skip(self, file, options),
        fields(file = %file.meta.name, target = %target.display())
    )]
    pub async fn download(
        &self,
        file: &DriveFile,
        target: &Path,
        options: &DownloadOptions,
    ) -> Result<Option<PathBuf>> {
        if !options.overwrite && tokio::fs::try_exists(target).await? {
            info!("target exists, skipping");
            return Ok(None);
        }

        let partial = sidecar_path(target, PARTIAL_SUFFIX);
        let size = file.meta.size;
        let mut offset = if options.resume { len_or_zero(&partial) } else { 0 };

        if offset > 0 && offset == size {
            info!(offset, "partial download already complete");
            replace_file(&partial, target, ReplaceOptions::default())?;
            return Ok(Some(target.to_path_buf()));
        }
        if offset > size {
            warn!(offset, size, "partial download is larger than the file, starting over");
            offset = 0;
        }

        let url = self.download_url(file).await?;
        let mut headers = Vec::new();
        if offset > 0 {
            headers.push(("Range".to_string(), format!("bytes={offset}-")));
        }

        let reporter = Reporter::new(file.meta.name.clone(), options.on_event.clone());
        reporter.emit(EventKind::NewSegment, offset, None);
        let response = self.http.stream(&url, &headers).await?;
        match response.status {
            206 if offset > 0 => info!(offset, "resuming download"),
            200 | 206 => {
                if offset > 0 {
                    warn!(offset, "server ignored the range, starting over");
                }
                offset = 0;
            }
            status => {
                return Err(TransportError::Status {
                    status,
                    body: String::new(),
                }
                .into());
            }
        }

        let mut out = if offset > 0 {
            tokio::fs::OpenOptions::new().append(true).open(&partial).await?
        } else {
            tokio::fs::File::create(&partial).await?
        };

        let mut written = offset;
        let mut body = response.body;
        let streamed = loop {
            match body.next().await {
                Some(Ok(piece)) => {
                    let kind = EventKind::Progress {
                        progress: written,
                        total: size,
                    };
                    reporter.emit(kind, offset, None);
                    out.write_all(&piece).await?;
                    written += piece.len() as u64;
                }
                Some(Err(e)) => break Err(e),
                None => break Ok(()),
            }
        };
        // Whatever arrived stays in the partial file for the next attempt.
        out.flush().await?;
        out.sync_all().await?;
        drop(out);
        if let Err(e) = streamed {
            warn!(written, size, error = %e, "download interrupted");
            return Err(e.into());
        }
        reporter.emit(EventKind::FinishSegment, offset, None);

        if size > 0 && written < size {
            let reason = format!("stream ended after {written} of {size} bytes");
            return Err(TransportError::Socket(reason).into());
        }

        replace_file(&partial, target, ReplaceOptions::default())?;
        info!(bytes = written, "download complete");
        Ok(Some(target.to_path_buf()))
    }

    /// The file's download link, fetching fresh item metadata if it has none.
    async fn download_url(&self, file: &DriveFile) -> Result<String> {
        if let Some(url) = &file.download_url {
            return Ok(url.clone());
        }

        debug!(id = %file.meta.id, "refreshing item for download url");
        let api_path = path::item(&file.meta.id);
        let value = self.call(&api_path, None, Verb::Get).await?;
        DriveItem::from_value(value, &api_path, OnNotFound::RaiseError)?
            .into_file()
            .and_then(|fresh| fresh.download_url)
            .ok_or_else(|| Error::MissingDownloadUrl(file.meta.id.clone()))
    }
}
