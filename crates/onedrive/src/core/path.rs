//! Relative API paths for the drive endpoints this client uses.

use std::fmt;

use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};

/// Bytes escaped inside one path segment. `:` is included because it
/// delimits the path part of `items/{id}:/{path}:/...` addresses.
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b':')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'\\')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

/// How the server treats a name that is already taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictBehavior {
    Replace,
    Rename,
}

impl ConflictBehavior {
    pub fn from_overwrite(overwrite: bool) -> Self {
        if overwrite { Self::Replace } else { Self::Rename }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Replace => "replace",
            Self::Rename => "rename",
        }
    }
}

impl fmt::Display for ConflictBehavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Drop leading slashes so `/a/b` and `a/b` address the same item.
pub fn normalize(path: &str) -> &str {
    path.trim_start_matches('/')
}

/// Non-empty `/`-separated segments of `path`.
pub fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|segment| !segment.is_empty())
}

/// Percent-encode every segment of `path`, keeping `/` as the separator.
///
/// # Examples
///
/// ```
/// use onedrive::core::path::encode;
///
/// assert_eq!(encode("/Docs/report #1.pdf"), "Docs/report%20%231.pdf");
/// ```
pub fn encode(path: &str) -> String {
    segments(path)
        .map(|segment| utf8_percent_encode(segment, SEGMENT).to_string())
        .collect::<Vec<_>>()
        .join("/")
}

pub fn root() -> String {
    "drive/root".to_string()
}

pub fn by_root_path(path: &str) -> String {
    format!("drive/root:/{}", encode(path))
}

pub fn item(id: &str) -> String {
    format!("drive/items/{id}")
}

pub fn by_relative_path(dir_id: &str, path: &str) -> String {
    format!("drive/items/{dir_id}:/{}", encode(path))
}

pub fn children(dir_id: &str, page_size: u32) -> String {
    format!("drive/items/{dir_id}/children?$top={page_size}")
}

pub fn create_child(dir_id: &str) -> String {
    format!("drive/items/{dir_id}/children")
}

pub fn create_upload_session(dir_id: &str, name: &str) -> String {
    format!("drive/items/{dir_id}:/{}:/createUploadSession", encode(name))
}

/// Simple upload of a new item, with the server resolving name clashes.
pub fn new_content(dir_id: &str, name: &str, conflict: ConflictBehavior) -> String {
    format!(
        "drive/items/{dir_id}:/{}:/content?@microsoft.graph.conflictBehavior={conflict}",
        encode(name)
    )
}

/// Simple upload replacing the content of an existing item.
pub fn item_content(id: &str) -> String {
    format!("drive/items/{id}/content")
}

/// Turn an absolute `@odata.nextLink` back into a path relative to `api_base`.
pub fn relative_to_base(link: &str, api_base: &str) -> Option<String> {
    link.strip_prefix(api_base).map(String::from)
}
