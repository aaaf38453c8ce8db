//! Path resolution and directory operations against the remote tree.

use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Value, json};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::http::{DriveApi, HttpClient, Verb};
use crate::core::path;
use crate::data::{
    ClientConfig, DriveDir, DriveFile, DriveItem, ITEM_NOT_FOUND, OnNotFound, Payload,
};
use crate::error::{Error, Result};

/// A drive client over an API channel `A` and a raw transport `C`.
pub struct OneDrive<A, C> {
    pub(crate) api: A,
    pub(crate) http: C,
    pub(crate) config: ClientConfig,
    root: OnceCell<DriveDir>,
}

impl<A: DriveApi, C: HttpClient> OneDrive<A, C> {
    pub fn new(api: A, http: C, config: ClientConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            api,
            http,
            config,
            root: OnceCell::new(),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn http(&self) -> &C {
        &self.http
    }

    pub(crate) async fn call(&self, path: &str, body: Option<&Value>, verb: Verb) -> Result<Value> {
        debug!(verb = verb.as_str(), path, "api request");
        Ok(self.api.request(path, body, verb).await?)
    }

    /// The drive root, fetched once per client.
    ///
    /// Lookups through the returned node share its cache for the lifetime of
    /// the client.
    pub async fn root(&self) -> Result<&DriveDir> {
        self.root
            .get_or_try_init(|| async {
                let value = self.call(&path::root(), None, Verb::Get).await?;
                let item = DriveItem::from_value(value, "/", OnNotFound::RaiseError)?;
                item.into_dir().ok_or_else(|| Error::UnexpectedPayload {
                    path: "/".to_string(),
                    expected: "folder",
                })
            })
            .await
    }

    /// Look up an absolute path. `a/b` and `/a/b` are the same item.
    pub async fn get(&self, path: &str) -> Result<DriveItem> {
        self.get_with(path, OnNotFound::ReturnSentinel).await
    }

    pub async fn get_with(&self, path: &str, on_not_found: OnNotFound) -> Result<DriveItem> {
        let relative = path::normalize(path);
        let api_path = if relative.is_empty() {
            path::root()
        } else {
            path::by_root_path(relative)
        };
        let value = self.call(&api_path, None, Verb::Get).await?;
        DriveItem::from_value(value, path, on_not_found)
    }

    fn bypass_cache(&self, dir: &DriveDir) -> bool {
        self.config.skip_cache || dir.skip_cache()
    }

    /// Every file and folder directly under `dir`.
    ///
    /// A directory known to be empty answers without a request.
    pub async fn children(&self, dir: &DriveDir) -> Result<Vec<DriveItem>> {
        if dir.child_count == 0 {
            return Ok(Vec::new());
        }

        let bypass = self.bypass_cache(dir);
        if !bypass {
            let cached = dir.cache().children();
            if let Some(items) = cached {
                debug!(dir = %dir.meta.name, "children cache hit");
                return Ok(items);
            }
        }

        let mut items = Vec::new();
        let mut next = Some(path::children(&dir.meta.id, self.config.page_size));
        while let Some(page) = next.take() {
            let value = self.call(&page, None, Verb::Get).await?;
            let mut listing = match Payload::parse(value) {
                Payload::Error(error) => return Err(error.into_error(&page)),
                Payload::Other(listing) => listing,
                Payload::File(_) | Payload::Directory(_) => {
                    return Err(Error::UnexpectedPayload {
                        path: page,
                        expected: "child listing",
                    });
                }
            };

            if let Some(Value::Array(entries)) = listing.get_mut("value").map(Value::take) {
                for entry in entries {
                    match Payload::parse(entry) {
                        Payload::File(file) => items.push(DriveItem::File(file)),
                        Payload::Directory(child) => items.push(DriveItem::Directory(child)),
                        Payload::Error(_) | Payload::Other(_) => {}
                    }
                }
            }

            next = match listing.get("@odata.nextLink").and_then(Value::as_str) {
                Some(link) => {
                    let relative = path::relative_to_base(link, &self.config.api_base);
                    if relative.is_none() {
                        warn!(link, "next page is outside the API base, stopping");
                    }
                    relative
                }
                None => None,
            };
        }

        debug!(dir = %dir.meta.name, count = items.len(), "listed children");
        if !bypass {
            dir.cache().store_children(items.clone());
        }
        Ok(items)
    }

    /// The child of `dir` named exactly `name`, from the child listing.
    pub async fn get_child(&self, dir: &DriveDir, name: &str) -> Result<DriveItem> {
        let children = self.children(dir).await?;
        Ok(children
            .into_iter()
            .find(|child| child.name() == Some(name))
            .unwrap_or(DriveItem::NotFound))
    }

    /// Look up `path` relative to `dir` in one request, memoized per path.
    pub async fn resolve(&self, dir: &DriveDir, path: &str) -> Result<DriveItem> {
        self.resolve_with(dir, path, OnNotFound::ReturnSentinel).await
    }

    pub async fn resolve_with(
        &self,
        dir: &DriveDir,
        path: &str,
        on_not_found: OnNotFound,
    ) -> Result<DriveItem> {
        let relative = path::normalize(path);
        if relative.is_empty() {
            return Ok(DriveItem::Directory(dir.clone()));
        }

        let bypass = self.bypass_cache(dir);
        if !bypass {
            let cached = dir.cache().resolved(relative);
            if let Some(item) = cached {
                debug!(dir = %dir.meta.name, path = relative, "resolve cache hit");
                if item == DriveItem::NotFound && on_not_found == OnNotFound::RaiseError {
                    return Err(Error::Api {
                        path: relative.to_string(),
                        code: ITEM_NOT_FOUND.to_string(),
                        message: "item not found".to_string(),
                    });
                }
                return Ok(item);
            }
        }

        let item = self.lookup(dir, relative, on_not_found).await?;
        if !bypass {
            dir.cache().store_resolved(relative, item.clone());
        }
        Ok(item)
    }

    /// Path lookup that neither reads nor fills the cache.
    pub(crate) async fn lookup(
        &self,
        dir: &DriveDir,
        relative: &str,
        on_not_found: OnNotFound,
    ) -> Result<DriveItem> {
        let api_path = path::by_relative_path(&dir.meta.id, relative);
        let value = self.call(&api_path, None, Verb::Get).await?;
        DriveItem::from_value(value, relative, on_not_found)
    }

    /// Create every missing directory along `path` below `dir`.
    ///
    /// Existing directories are reused; a name taken by a file makes the server
    /// pick a fresh name for the new directory.
    pub async fn mkdir(&self, dir: &DriveDir, path: &str) -> Result<DriveDir> {
        let mut current: Option<DriveDir> = None;
        for segment in path::segments(path) {
            let parent = current.as_ref().unwrap_or(dir);
            let child = self.mkdir_child(parent, segment).await?;
            current = Some(child);
        }
        current.ok_or_else(|| Error::InvalidPath(path.to_string()))
    }

    async fn mkdir_child(&self, parent: &DriveDir, name: &str) -> Result<DriveDir> {
        if let DriveItem::Directory(existing) = self.resolve(parent, name).await? {
            return Ok(existing);
        }

        let body = json!({
            "name": name,
            "folder": {},
            "@microsoft.graph.conflictBehavior": "rename",
        });
        let api_path = path::create_child(&parent.meta.id);
        let value = self.call(&api_path, Some(&body), Verb::Post).await?;
        let created = DriveItem::from_value(value, name, OnNotFound::RaiseError)?;
        parent.clear_cache();

        info!(parent = %parent.meta.name, name, "created directory");
        created.into_dir().ok_or_else(|| Error::UnexpectedPayload {
            path: api_path,
            expected: "folder",
        })
    }

    /// Set the remote modification time of `file`.
    pub async fn set_mtime(&self, file: &DriveFile, mtime: DateTime<Utc>) -> Result<DriveFile> {
        let body = json!({
            "fileSystemInfo": {
                "lastModifiedDateTime": mtime.to_rfc3339_opts(SecondsFormat::Secs, true),
            }
        });
        let api_path = path::item(&file.meta.id);
        let value = self.call(&api_path, Some(&body), Verb::Patch).await?;
        DriveItem::from_value(value, &api_path, OnNotFound::RaiseError)?
            .into_file()
            .ok_or_else(|| Error::UnexpectedPayload {
                path: api_path,
                expected: "file",
            })
    }

    /// [`set_mtime`](Self::set_mtime), retried while the server still holds
    /// the freshly written item.
    pub(crate) async fn set_mtime_retrying(
        &self,
        file: &DriveFile,
        mtime: DateTime<Utc>,
        attempts: u32,
        delay: Duration,
    ) -> Result<DriveFile> {
        let mut attempt = 1;
        loop {
            match self.set_mtime(file, mtime).await {
                Ok(patched) => return Ok(patched),
                Err(e) if attempt < attempts => {
                    warn!(
                        file = %file.meta.name,
                        attempt,
                        error = %e,
                        "could not set modification time"
                    );
                    attempt += 1;
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
