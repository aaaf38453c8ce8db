use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use super::cache::PathCache;
use crate::error::{Error, Result};

/// Identifier reported by the [`DriveItem::NotFound`] sentinel.
pub const NOT_FOUND_ID: &str = "_FILE_NOT_FOUND_";

/// Error code the API uses for a missing item.
pub const ITEM_NOT_FOUND: &str = "itemNotFound";

/// Error code the API uses while a freshly uploaded item is still locked.
pub const ACCESS_DENIED: &str = "accessDenied";

const UNKNOWN_ERROR: &str = "unknown_error";
const UNKNOWN_USER: &str = "N/A";

/// Pointer to the item a link refers to when it lives in another user's drive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteOrigin {
    pub drive_id: Option<String>,
    pub item_id: String,
}

/// Fields shared by files and directories.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemMeta {
    pub id: String,
    pub name: String,
    pub etag: Option<String>,
    pub size: u64,
    pub modified_time: Option<DateTime<Utc>>,
    pub created_time: Option<DateTime<Utc>>,
    pub modified_by: String,
    pub created_by: String,
    pub parent_path: Option<String>,
    pub remote_origin: Option<RemoteOrigin>,
}

impl ItemMeta {
    /// Whether the item is a link into another user's drive.
    pub fn is_remote(&self) -> bool {
        self.remote_origin.is_some()
    }

    fn joined_path(&self) -> Option<String> {
        self.parent_path.as_ref().map(|parent| {
            if parent.ends_with('/') {
                format!("{parent}{}", self.name)
            } else {
                format!("{parent}/{}", self.name)
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DriveFile {
    pub meta: ItemMeta,
    pub download_url: Option<String>,
}

impl DriveFile {
    pub fn absolute_path(&self) -> String {
        self.meta.joined_path().unwrap_or_else(|| self.meta.name.clone())
    }
}

/// A remote directory together with the lookups memoized against it.
///
/// The cache is scoped to this node: lookups made through another directory
/// never read or fill it. Clones are handles to the same node, so they share
/// the cache and the skip flag.
#[derive(Debug, Clone)]
pub struct DriveDir {
    pub meta: ItemMeta,
    pub child_count: u64,
    skip_cache: Arc<AtomicBool>,
    cache: Arc<Mutex<PathCache>>,
}

impl DriveDir {
    pub fn new(meta: ItemMeta, child_count: u64) -> Self {
        Self {
            meta,
            child_count,
            skip_cache: Arc::new(AtomicBool::new(false)),
            cache: Arc::new(Mutex::new(PathCache::default())),
        }
    }

    pub fn absolute_path(&self) -> String {
        self.meta.joined_path().unwrap_or_else(|| "/".to_string())
    }

    pub fn skip_cache(&self) -> bool {
        self.skip_cache.load(Ordering::Relaxed)
    }

    /// Bypass this directory's cache for every following lookup.
    pub fn set_skip_cache(&self, skip: bool) {
        self.skip_cache.store(skip, Ordering::Relaxed);
    }

    pub fn clear_cache(&self) {
        self.cache().clear();
    }

    pub(crate) fn cache(&self) -> MutexGuard<'_, PathCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PartialEq for DriveDir {
    fn eq(&self, other: &Self) -> bool {
        self.meta == other.meta && self.child_count == other.child_count
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DriveItem {
    File(DriveFile),
    Directory(DriveDir),
    NotFound,
}

impl DriveItem {
    pub fn id(&self) -> &str {
        match self {
            DriveItem::File(file) => &file.meta.id,
            DriveItem::Directory(dir) => &dir.meta.id,
            DriveItem::NotFound => NOT_FOUND_ID,
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.meta().map(|meta| meta.name.as_str())
    }

    pub fn meta(&self) -> Option<&ItemMeta> {
        match self {
            DriveItem::File(file) => Some(&file.meta),
            DriveItem::Directory(dir) => Some(&dir.meta),
            DriveItem::NotFound => None,
        }
    }

    pub fn is_file(&self) -> bool {
        matches!(self, DriveItem::File(_))
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, DriveItem::Directory(_))
    }

    pub fn into_file(self) -> Option<DriveFile> {
        match self {
            DriveItem::File(file) => Some(file),
            _ => None,
        }
    }

    pub fn into_dir(self) -> Option<DriveDir> {
        match self {
            DriveItem::Directory(dir) => Some(dir),
            _ => None,
        }
    }

    /// Classify an API response for `path`.
    ///
    /// `itemNotFound` becomes the sentinel or an error depending on
    /// `on_not_found`; every other error payload is an [`Error::Api`].
    pub fn from_value(value: Value, path: &str, on_not_found: OnNotFound) -> Result<DriveItem> {
        match Payload::parse(value) {
            Payload::File(file) => Ok(DriveItem::File(file)),
            Payload::Directory(dir) => Ok(DriveItem::Directory(dir)),
            Payload::Error(error)
                if error.code == ITEM_NOT_FOUND && on_not_found == OnNotFound::ReturnSentinel =>
            {
                Ok(DriveItem::NotFound)
            }
            Payload::Error(error) => Err(error.into_error(path)),
            Payload::Other(_) => Err(Error::UnexpectedPayload {
                path: path.to_string(),
                expected: "file or folder",
            }),
        }
    }
}

/// What a path lookup yields when the API answers `itemNotFound`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OnNotFound {
    #[default]
    ReturnSentinel,
    RaiseError,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub code: String,
    pub message: String,
}

impl ApiError {
    pub fn into_error(self, path: &str) -> Error {
        Error::Api {
            path: path.to_string(),
            code: self.code,
            message: self.message,
        }
    }
}

/// The shape of a JSON object returned by the API.
#[derive(Debug)]
pub enum Payload {
    File(DriveFile),
    Directory(DriveDir),
    Error(ApiError),
    Other(Value),
}

impl Payload {
    pub fn parse(mut value: Value) -> Payload {
        if let Some(error) = value.get("error") {
            let field = |name: &str| {
                error
                    .get(name)
                    .and_then(Value::as_str)
                    .unwrap_or(UNKNOWN_ERROR)
                    .to_string()
            };
            return Payload::Error(ApiError {
                code: field("code"),
                message: field("message"),
            });
        }

        let remote_origin = merge_remote_item(&mut value);
        if value.get("file").is_none() && value.get("folder").is_none() {
            return Payload::Other(value);
        }

        let raw = match RawItem::deserialize(&value) {
            Ok(raw) => raw,
            Err(_) => return Payload::Other(value),
        };
        let child_count = raw.folder.as_ref().map(|folder| folder.child_count);
        let download_url = raw.download_url.clone();
        let meta = raw.into_meta(remote_origin);

        match child_count {
            Some(child_count) => Payload::Directory(DriveDir::new(meta, child_count)),
            None => Payload::File(DriveFile { meta, download_url }),
        }
    }
}

/// Fill absent top-level keys from `remoteItem` and report where it points.
fn merge_remote_item(value: &mut Value) -> Option<RemoteOrigin> {
    let remote = value.get("remoteItem")?.clone();
    let origin = RemoteOrigin {
        drive_id: remote
            .pointer("/parentReference/driveId")
            .and_then(Value::as_str)
            .map(String::from),
        item_id: remote
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    };

    if let (Some(target), Value::Object(fields)) = (value.as_object_mut(), remote) {
        for (key, field) in fields {
            target.entry(key).or_insert(field);
        }
    }
    Some(origin)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawItem {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(rename = "eTag")]
    e_tag: Option<String>,
    #[serde(default)]
    size: u64,
    last_modified_date_time: Option<DateTime<Utc>>,
    created_date_time: Option<DateTime<Utc>>,
    last_modified_by: Option<IdentitySet>,
    created_by: Option<IdentitySet>,
    parent_reference: Option<ItemReference>,
    folder: Option<FolderFacet>,
    #[serde(rename = "@microsoft.graph.downloadUrl")]
    download_url: Option<String>,
}

impl RawItem {
    fn into_meta(self, remote_origin: Option<RemoteOrigin>) -> ItemMeta {
        ItemMeta {
            id: self.id,
            name: self.name,
            etag: self.e_tag,
            size: self.size,
            modified_time: self.last_modified_date_time,
            created_time: self.created_date_time,
            modified_by: display_name(self.last_modified_by),
            created_by: display_name(self.created_by),
            parent_path: self.parent_reference.and_then(|parent| parent.path),
            remote_origin,
        }
    }
}

#[derive(Deserialize)]
struct IdentitySet {
    user: Option<Identity>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Identity {
    display_name: Option<String>,
}

#[derive(Deserialize)]
struct ItemReference {
    path: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FolderFacet {
    #[serde(default)]
    child_count: u64,
}

fn display_name(identity: Option<IdentitySet>) -> String {
    identity
        .and_then(|set| set.user)
        .and_then(|user| user.display_name)
        .unwrap_or_else(|| UNKNOWN_USER.to_string())
}
