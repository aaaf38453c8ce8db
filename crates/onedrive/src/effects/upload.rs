//! Simple and resumable chunked uploads.
//!
//! A chunked upload moves through these steps, restarting from session
//! establishment whenever the exchange breaks:
//!
//! 1. capture the identity of whatever currently sits at the target name
//! 2. recover the persisted session, or create and persist a new one
//! 3. send fragments from the resume offset until the server returns a file
//! 4. poll the target name until it shows a file with a new identity
//! 5. drop the sidecar and patch the modification time

use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use tracing::{debug, info, instrument, warn};

use super::drive::OneDrive;
use super::http::{ChunkUpload, DriveApi, HttpClient, Verb};
use super::session_store::SessionStore;
use super::sliced::BoundedChunkReader;
use crate::core::path::{self, ConflictBehavior};
use crate::core::{
    ChunkOutcome, RestartReason, capped_retry_delay, chunk_ranges, classify_chunk_response,
    next_expected_offset,
};
use crate::data::{
    ACCESS_DENIED, ChunkRange, DriveDir, DriveFile, DriveItem, EventKind, OnNotFound, Payload,
    Reporter, SIMPLE_UPLOAD_LIMIT, UploadOptions, UploadSession, validate_fragment_size,
};
use crate::error::{Error, Result, TransportError};

/// How one pass through the chunked protocol ended.
enum Attempt {
    Done(DriveFile),
    Restart(RestartReason),
}

/// The fixed inputs of one chunked upload.
struct ChunkedUpload<'a> {
    dir: &'a DriveDir,
    name: &'a str,
    source: &'a Path,
    size: u64,
    store: SessionStore,
    reporter: Reporter,
    options: &'a UploadOptions,
}

impl<A: DriveApi, C: HttpClient> OneDrive<A, C> {
    /// Upload the local file `source` into `dir`.
    ///
    /// Files up to [`SIMPLE_UPLOAD_LIMIT`] bytes go in one request. Larger
    /// files use a resumable session persisted next to `source`, so an
    /// interrupted call picks up where the server left off.
    #[instrument(
        skip(self, dir, options),
        fields(dir = %dir.meta.name, source = %source.display())
    )]
    pub async fn upload(
        &self,
        dir: &DriveDir,
        source: &Path,
        options: &UploadOptions,
    ) -> Result<DriveFile> {
        options.validate()?;

        let metadata = match tokio::fs::metadata(source).await {
            Ok(metadata) if metadata.is_file() => metadata,
            Ok(_) => return Err(Error::SourceNotFound(source.to_path_buf())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::SourceNotFound(source.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };
        let size = metadata.len();
        let mtime: DateTime<Utc> = metadata.modified()?.into();

        let name = match &options.target_name {
            Some(name) => name.clone(),
            None => source
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .ok_or_else(|| Error::InvalidPath(source.display().to_string()))?,
        };

        let uploaded = if size <= SIMPLE_UPLOAD_LIMIT {
            info!(%name, size, "simple upload");
            self.upload_simple(dir, source, &name, options).await?
        } else {
            info!(%name, size, fragment_size = options.fragment_size, "chunked upload");
            let upload = ChunkedUpload {
                dir,
                name: &name,
                source,
                size,
                store: SessionStore::for_source(source),
                reporter: Reporter::new(name.clone(), options.on_event.clone()),
                options,
            };
            self.upload_chunked(upload).await?
        };

        match self
            .set_mtime_retrying(&uploaded, mtime, options.mtime_attempts, options.mtime_retry_delay)
            .await
        {
            Ok(patched) => Ok(patched),
            Err(e) => {
                warn!(name = %uploaded.meta.name, error = %e, "keeping server modification time");
                Ok(uploaded)
            }
        }
    }

    async fn upload_simple(
        &self,
        dir: &DriveDir,
        source: &Path,
        name: &str,
        options: &UploadOptions,
    ) -> Result<DriveFile> {
        let content = tokio::fs::read(source).await?;

        let api_path = match self.lookup(dir, name, OnNotFound::ReturnSentinel).await? {
            DriveItem::File(existing) if options.overwrite => path::item_content(&existing.meta.id),
            _ => path::new_content(
                &dir.meta.id,
                name,
                ConflictBehavior::from_overwrite(options.overwrite),
            ),
        };

        debug!(path = %api_path, bytes = content.len(), "api content upload");
        let value = self.api.put_content(&api_path, Bytes::from(content)).await?;
        DriveItem::from_value(value, &api_path, OnNotFound::RaiseError)?
            .into_file()
            .ok_or_else(|| Error::UnexpectedPayload {
                path: api_path,
                expected: "file",
            })
    }

    async fn upload_chunked(&self, upload: ChunkedUpload<'_>) -> Result<DriveFile> {
        let old_id = self
            .lookup(upload.dir, upload.name, OnNotFound::ReturnSentinel)
            .await?
            .id()
            .to_string();
        debug!(name = upload.name, %old_id, "identity before upload");

        let mut restarts = 0;
        loop {
            match self.attempt_chunked(&upload, &old_id).await? {
                Attempt::Done(file) => {
                    upload.store.remove()?;
                    info!(name = %file.meta.name, id = %file.meta.id, restarts, "upload complete");
                    return Ok(file);
                }
                Attempt::Restart(reason) => {
                    if let Some(max) = upload.options.max_restarts
                        && restarts >= max
                    {
                        warn!(name = upload.name, restarts, %reason, "giving up on upload");
                        return Err(Error::MaxRestartsExceeded { count: restarts });
                    }
                    if reason == RestartReason::Unverified {
                        upload.store.remove()?;
                    }

                    restarts += 1;
                    warn!(name = upload.name, restarts, %reason, "restarting upload session");
                    upload.reporter.emit(
                        EventKind::Restart { attempt: restarts },
                        0,
                        Some(upload.size - 1),
                    );
                }
            }
        }
    }

    async fn attempt_chunked(&self, upload: &ChunkedUpload<'_>, old_id: &str) -> Result<Attempt> {
        let (session, start) = self.establish_session(upload).await?;

        let mut uploaded = None;
        for range in chunk_ranges(start, upload.size, session.fragment_size) {
            match self.send_chunk(upload, &session, range).await? {
                ChunkOutcome::Accepted { next_expected } => {
                    debug!(range = %range, ?next_expected, "fragment accepted");
                }
                ChunkOutcome::Completed(file) => {
                    uploaded = Some(file);
                    break;
                }
                ChunkOutcome::Restart(reason) => return Ok(Attempt::Restart(reason)),
            }
        }

        let Some(uploaded) = uploaded else {
            return Ok(Attempt::Restart(RestartReason::NoFinalItem));
        };

        match self.verify(upload, &uploaded, old_id).await? {
            Some(file) => Ok(Attempt::Done(file)),
            None => Ok(Attempt::Restart(RestartReason::Unverified)),
        }
    }

    /// The session to send fragments to and the offset to resume from.
    async fn establish_session(&self, upload: &ChunkedUpload<'_>) -> Result<(UploadSession, u64)> {
        if let Some(session) = upload.store.load() {
            if session.source_size != upload.size {
                info!(
                    name = upload.name,
                    recorded = session.source_size,
                    actual = upload.size,
                    "source size changed, discarding session"
                );
            } else if validate_fragment_size(session.fragment_size).is_err() {
                warn!(
                    name = upload.name,
                    fragment_size = session.fragment_size,
                    "discarding session"
                );
            } else if let Some(offset) = self.recover_offset(upload, &session).await {
                info!(
                    name = upload.name,
                    session = %session.session_url,
                    offset,
                    "resuming session"
                );
                return Ok((session, offset));
            }
        }

        let session = self.create_session(upload).await?;
        upload.store.save(&session)?;
        info!(name = upload.name, session = %session.session_url, "created upload session");
        Ok((session, 0))
    }

    /// Ask the server where a persisted session stands.
    ///
    /// `None` means the session is unusable and must be replaced.
    async fn recover_offset(
        &self,
        upload: &ChunkedUpload<'_>,
        session: &UploadSession,
    ) -> Option<u64> {
        let options = upload.options;
        for attempt in 1..=options.status_attempts {
            let status = match self.http.get_json(&session.session_url).await {
                Ok(status) => status,
                Err(e) => {
                    warn!(session = %session.session_url, error = %e, "session status failed");
                    return None;
                }
            };

            if let Some(offset) = next_expected_offset(&status) {
                if offset < upload.size {
                    return Some(offset);
                }
                warn!(offset, size = upload.size, "server expects bytes past the end");
                return None;
            }

            match Payload::parse(status) {
                Payload::Error(error) if error.code != ACCESS_DENIED => {
                    debug!(code = %error.code, "session is gone");
                    return None;
                }
                _ => debug!(attempt, "session status has no expected ranges yet"),
            }

            if attempt < options.status_attempts {
                tokio::time::sleep(options.status_retry_delay).await;
            }
        }
        None
    }

    async fn create_session(&self, upload: &ChunkedUpload<'_>) -> Result<UploadSession> {
        let options = upload.options;
        let conflict = ConflictBehavior::from_overwrite(options.overwrite);
        let api_path = path::create_upload_session(&upload.dir.meta.id, upload.name);
        let body = json!({
            "item": {
                "@microsoft.graph.conflictBehavior": conflict.as_str(),
                "name": upload.name,
            }
        });

        let mut attempts = 0;
        loop {
            let reason = match self.call(&api_path, Some(&body), Verb::Post).await {
                Ok(value) => match value.get("uploadUrl").and_then(Value::as_str) {
                    Some(url) => {
                        return Ok(UploadSession {
                            session_url: url.to_string(),
                            source_size: upload.size,
                            fragment_size: options.fragment_size,
                        });
                    }
                    None => match Payload::parse(value) {
                        Payload::Error(error) => format!("{}: {}", error.code, error.message),
                        _ => "response has no uploadUrl".to_string(),
                    },
                },
                Err(e) => e.to_string(),
            };

            attempts += 1;
            warn!(name = upload.name, attempts, %reason, "could not create upload session");
            if let Some(max) = options.max_session_attempts
                && attempts >= max
            {
                return Err(Error::SessionUnavailable { attempts, reason });
            }

            let delay = capped_retry_delay(
                attempts - 1,
                options.session_retry_backoff,
                options.session_retry_max,
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// PUT one fragment, re-sending it in place after timeouts.
    async fn send_chunk(
        &self,
        upload: &ChunkedUpload<'_>,
        session: &UploadSession,
        range: ChunkRange,
    ) -> Result<ChunkOutcome> {
        let reporter = &upload.reporter;
        let mut timeouts = 0;
        loop {
            reporter.emit(EventKind::NewSegment, range.from, Some(range.to));
            let chunk = self.chunk_body(upload, range)?;

            match self.http.put_chunk(&session.session_url, chunk).await {
                Ok(response) => {
                    reporter.emit(EventKind::FinishSegment, range.from, Some(range.to));
                    debug!(range = %range, status = response.status, "fragment sent");
                    return Ok(classify_chunk_response(&response.body));
                }
                Err(TransportError::Timeout) if timeouts < upload.options.chunk_retries => {
                    timeouts += 1;
                    warn!(range = %range, timeouts, "fragment timed out, reconnecting");
                    self.http.reconnect()?;
                    reporter.emit(EventKind::Retry, range.from, Some(range.to));
                }
                Err(TransportError::Timeout) => {
                    return Ok(ChunkOutcome::Restart(RestartReason::TimeoutsExhausted));
                }
                Err(TransportError::Socket(reason)) => {
                    return Ok(ChunkOutcome::Restart(RestartReason::Socket(reason)));
                }
                Err(TransportError::InvalidBody(_)) => {
                    return Ok(ChunkOutcome::Restart(RestartReason::NotJson));
                }
                Err(TransportError::Status { status, .. }) => {
                    let reason = RestartReason::Api(format!("HTTP {status}"));
                    return Ok(ChunkOutcome::Restart(reason));
                }
            }
        }
    }

    /// A fresh handle per fragment attempt, so no two bodies share a cursor.
    fn chunk_body(&self, upload: &ChunkedUpload<'_>, range: ChunkRange) -> Result<ChunkUpload> {
        let reporter = upload.reporter.clone();
        let on_progress = Arc::new(move |progress: u64, total: u64| {
            let kind = EventKind::Progress { progress, total };
            reporter.emit(kind, range.from, Some(range.to));
        });
        let reader = BoundedChunkReader::open(upload.source, range)?.with_progress(on_progress);

        Ok(ChunkUpload {
            content_range: range.content_range(upload.size),
            content_length: range.len(),
            body: reader.into_stream(upload.options.io_size),
        })
    }

    /// Poll until the uploaded name resolves to a file other than `old_id`.
    async fn verify(
        &self,
        upload: &ChunkedUpload<'_>,
        uploaded: &DriveFile,
        old_id: &str,
    ) -> Result<Option<DriveFile>> {
        let options = upload.options;
        for attempt in 1..=options.verify_attempts {
            match self
                .lookup(upload.dir, &uploaded.meta.name, OnNotFound::ReturnSentinel)
                .await?
            {
                DriveItem::File(file) if file.meta.id != old_id => return Ok(Some(file)),
                item => debug!(attempt, id = item.id(), "upload not visible yet"),
            }

            if attempt < options.verify_attempts {
                tokio::time::sleep(options.verify_interval).await;
            }
        }
        Ok(None)
    }
}
