//! An in-memory drive server implementing both client seams.
#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;
use futures_util::TryStreamExt;
use onedrive::{
    ChunkResponse, ChunkUpload, ClientConfig, DriveApi, DriveFile, DriveItem, EventKind,
    HttpClient, Observer, OnNotFound, OneDrive, StreamResponse, TransferEvent, TransportError,
    UploadOptions, Verb,
};
use percent_encoding::percent_decode_str;
use serde_json::{Value, json};

pub const API_BASE: &str = "https://graph.example/v1.0/me/";
pub const UPLOAD_BASE: &str = "https://upload.example/session/";
pub const DOWNLOAD_BASE: &str = "https://download.example/";
pub const ROOT_ID: &str = "root";

/// Fragment size used by the upload tests: four alignment units.
pub const FRAGMENT: u64 = 4 * 327_680;

/// Just above the simple-upload limit, split into four fragments.
pub const BIG: usize = 4_200_000;

const STREAM_PIECE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Timeout,
    Socket,
    Html,
    AccessDenied,
}

/// A fragment the server stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkLog {
    pub session: String,
    pub from: u64,
    pub to: u64,
    pub total: u64,
}

#[derive(Debug, Clone)]
enum Kind {
    Folder,
    File(Vec<u8>),
    Package,
}

#[derive(Debug, Clone)]
struct Node {
    id: String,
    name: String,
    parent: Option<String>,
    kind: Kind,
    modified: Option<String>,
}

struct Session {
    parent: String,
    name: String,
    conflict: String,
    received: Vec<u8>,
}

/// Lookups of one name that keep answering with what was there before.
struct StaleView {
    parent: String,
    name: String,
    old: Value,
    remaining: usize,
}

#[derive(Default)]
struct State {
    nodes: BTreeMap<String, Node>,
    next_id: u64,
    sessions: HashMap<String, Session>,
    sessions_created: usize,
    requests: Vec<String>,
    http_requests: Vec<String>,
    chunks: Vec<ChunkLog>,
    chunk_calls: usize,
    chunk_faults: HashMap<usize, Fault>,
    failing_creates: usize,
    denied_statuses: usize,
    failing_patches: usize,
    stale_lookups: usize,
    stale: Option<StaleView>,
    reconnects: usize,
    ignore_range: bool,
    fail_after: Option<usize>,
    omit_urls: bool,
}

#[derive(Clone)]
pub struct FakeGraph {
    state: Arc<Mutex<State>>,
}

impl Default for FakeGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeGraph {
    pub fn new() -> Self {
        let mut state = State::default();
        state.nodes.insert(
            ROOT_ID.to_string(),
            Node {
                id: ROOT_ID.to_string(),
                name: "root".to_string(),
                parent: None,
                kind: Kind::Folder,
                modified: None,
            },
        );
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn client(&self) -> OneDrive<FakeGraph, FakeGraph> {
        self.client_with(config())
    }

    pub fn client_with(&self, config: ClientConfig) -> OneDrive<FakeGraph, FakeGraph> {
        OneDrive::new(self.clone(), self.clone(), config).unwrap()
    }

    pub fn add_folder(&self, parent: &str, name: &str) -> String {
        self.lock().insert(parent, name, Kind::Folder)
    }

    pub fn add_file(&self, parent: &str, name: &str, content: &[u8]) -> String {
        self.lock().insert(parent, name, Kind::File(content.to_vec()))
    }

    /// An entry that is neither a file nor a folder.
    pub fn add_package(&self, parent: &str, name: &str) -> String {
        self.lock().insert(parent, name, Kind::Package)
    }

    /// Id of the item at `path` below the root.
    pub fn find(&self, path: &str) -> Option<String> {
        self.lock().walk(ROOT_ID, path)
    }

    pub fn content(&self, id: &str) -> Option<Vec<u8>> {
        match &self.lock().nodes.get(id)?.kind {
            Kind::File(content) => Some(content.clone()),
            _ => None,
        }
    }

    pub fn modified(&self, id: &str) -> Option<String> {
        self.lock().nodes.get(id)?.modified.clone()
    }

    pub fn drive_file(&self, id: &str) -> DriveFile {
        let value = self.lock().node_json(id);
        DriveItem::from_value(value, id, OnNotFound::RaiseError)
            .unwrap()
            .into_file()
            .unwrap()
    }

    pub fn requests(&self) -> Vec<String> {
        self.lock().requests.clone()
    }

    pub fn count_requests(&self, prefix: &str) -> usize {
        self.lock()
            .requests
            .iter()
            .filter(|request| request.starts_with(prefix))
            .count()
    }

    pub fn http_requests(&self) -> Vec<String> {
        self.lock().http_requests.clone()
    }

    pub fn count_http_requests(&self, prefix: &str) -> usize {
        self.lock()
            .http_requests
            .iter()
            .filter(|request| request.starts_with(prefix))
            .count()
    }

    pub fn chunks(&self) -> Vec<ChunkLog> {
        self.lock().chunks.clone()
    }

    pub fn sessions_created(&self) -> usize {
        self.lock().sessions_created
    }

    pub fn open_sessions(&self) -> usize {
        self.lock().sessions.len()
    }

    pub fn reconnects(&self) -> usize {
        self.lock().reconnects
    }

    /// Fail the `index`-th fragment request (counting from zero across sessions).
    pub fn fault_on_chunk(&self, index: usize, fault: Fault) {
        self.lock().chunk_faults.insert(index, fault);
    }

    pub fn fail_session_creates(&self, count: usize) {
        self.lock().failing_creates = count;
    }

    pub fn deny_status_queries(&self, count: usize) {
        self.lock().denied_statuses = count;
    }

    pub fn fail_patches(&self, count: usize) {
        self.lock().failing_patches = count;
    }

    /// After the first completed session, answer `count` lookups of its name
    /// with the item that was there before.
    pub fn stale_lookups(&self, count: usize) {
        self.lock().stale_lookups = count;
    }

    pub fn ignore_range(&self) {
        self.lock().ignore_range = true;
    }

    /// Break the next download stream after `bytes` bytes.
    pub fn fail_download_after(&self, bytes: usize) {
        self.lock().fail_after = Some(bytes);
    }

    pub fn omit_download_urls(&self) {
        self.lock().omit_urls = true;
    }
}

impl State {
    fn new_id(&mut self) -> String {
        self.next_id += 1;
        format!("ID{}", self.next_id)
    }

    fn insert(&mut self, parent: &str, name: &str, kind: Kind) -> String {
        let id = self.new_id();
        self.nodes.insert(
            id.clone(),
            Node {
                id: id.clone(),
                name: name.to_string(),
                parent: Some(parent.to_string()),
                kind,
                modified: None,
            },
        );
        id
    }

    fn children_of(&self, parent: &str) -> Vec<String> {
        let mut children: Vec<&Node> = self
            .nodes
            .values()
            .filter(|node| node.parent.as_deref() == Some(parent))
            .collect();
        children.sort_by(|a, b| a.name.cmp(&b.name));
        children.into_iter().map(|node| node.id.clone()).collect()
    }

    fn find_child(&self, parent: &str, name: &str) -> Option<String> {
        self.children_of(parent)
            .into_iter()
            .find(|id| self.nodes[id].name == name)
    }

    fn walk(&self, from: &str, path: &str) -> Option<String> {
        let mut current = from.to_string();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            current = self.find_child(&current, segment)?;
        }
        Some(current)
    }

    fn free_name(&self, parent: &str, name: &str) -> String {
        let (stem, ext) = match name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => (stem.to_string(), format!(".{ext}")),
            _ => (name.to_string(), String::new()),
        };
        (1..)
            .map(|n| format!("{stem} {n}{ext}"))
            .find(|candidate| self.find_child(parent, candidate).is_none())
            .unwrap()
    }

    /// Store a file the way the server resolves conflicts. A replaced file
    /// gets a new identity.
    fn put_file(&mut self, parent: &str, name: &str, content: Vec<u8>, conflict: &str) -> String {
        let name = match self.find_child(parent, name) {
            Some(existing) if conflict == "replace" => {
                self.nodes.remove(&existing);
                name.to_string()
            }
            Some(_) => self.free_name(parent, name),
            None => name.to_string(),
        };
        self.insert(parent, &name, Kind::File(content))
    }

    fn path_of(&self, id: &str) -> String {
        let mut names = Vec::new();
        let mut current = id.to_string();
        while let Some(node) = self.nodes.get(&current) {
            match &node.parent {
                Some(parent) => {
                    names.push(node.name.clone());
                    current = parent.clone();
                }
                None => break,
            }
        }
        names.reverse();
        if names.is_empty() {
            "/drive/root:".to_string()
        } else {
            format!("/drive/root:/{}", names.join("/"))
        }
    }

    fn node_json(&self, id: &str) -> Value {
        let Some(node) = self.nodes.get(id) else {
            return api_error("itemNotFound", "item does not exist");
        };

        let mut value = json!({
            "id": node.id,
            "name": node.name,
            "eTag": format!("\"{{{}}},1\"", node.id),
            "createdBy": { "user": { "displayName": "Tester" } },
        });
        if let Some(parent) = &node.parent {
            value["parentReference"] = json!({ "id": parent, "path": self.path_of(parent) });
        }
        if let Some(modified) = &node.modified {
            value["lastModifiedDateTime"] = json!(modified);
        }
        match &node.kind {
            Kind::Folder => {
                value["size"] = json!(0);
                value["folder"] = json!({ "childCount": self.children_of(id).len() });
            }
            Kind::File(content) => {
                value["size"] = json!(content.len());
                value["file"] = json!({ "mimeType": "application/octet-stream" });
                if !self.omit_urls {
                    value["@microsoft.graph.downloadUrl"] = json!(format!("{DOWNLOAD_BASE}{id}"));
                }
            }
            Kind::Package => {
                value["package"] = json!({ "type": "oneNote" });
            }
        }
        value
    }

    fn lookup(&mut self, dir: &str, path: &str) -> Value {
        if let Some(view) = &mut self.stale
            && view.remaining > 0
            && view.parent == dir
            && view.name == path
        {
            view.remaining -= 1;
            return view.old.clone();
        }
        match self.walk(dir, path) {
            Some(id) => self.node_json(&id),
            None => api_error("itemNotFound", "item does not exist"),
        }
    }

    fn route(&mut self, path: &str, body: Option<&Value>, verb: Verb) -> Value {
        if path == "drive/root" {
            return self.node_json(ROOT_ID);
        }
        if let Some(relative) = path.strip_prefix("drive/root:/") {
            return self.lookup(ROOT_ID, &decode(relative));
        }
        let Some(rest) = path.strip_prefix("drive/items/") else {
            return api_error("invalidRequest", "unknown path");
        };

        if let Some(target) = rest.strip_suffix(":/createUploadSession") {
            let (parent, name) = target.split_once(":/").unwrap();
            return self.create_session(parent, &decode(name), body);
        }
        if let Some((id, query)) = rest.split_once("/children?") {
            return self.list(id, query);
        }
        if let Some(id) = rest.strip_suffix("/children") {
            return self.create_folder(id, body);
        }
        if let Some((id, relative)) = rest.split_once(":/") {
            return self.lookup(id, &decode(relative));
        }

        match verb {
            Verb::Get => self.node_json(rest),
            Verb::Patch => self.patch(rest, body),
            _ => api_error("invalidRequest", "unsupported verb"),
        }
    }

    fn list(&self, id: &str, query: &str) -> Value {
        let mut top = usize::MAX;
        let mut skip: usize = 0;
        for pair in query.split('&') {
            match pair.split_once('=') {
                Some(("$top", value)) => top = value.parse().unwrap(),
                Some(("$skiptoken", value)) => skip = value.parse().unwrap(),
                _ => {}
            }
        }

        let children = self.children_of(id);
        let end = skip.saturating_add(top).min(children.len());
        let page: Vec<Value> = children[skip..end]
            .iter()
            .map(|child| self.node_json(child))
            .collect();

        let mut value = json!({ "value": page });
        if end < children.len() {
            value["@odata.nextLink"] =
                json!(format!("{API_BASE}drive/items/{id}/children?$top={top}&$skiptoken={end}"));
        }
        value
    }

    fn create_folder(&mut self, parent: &str, body: Option<&Value>) -> Value {
        let name = body.and_then(|b| b["name"].as_str()).unwrap().to_string();
        let name = match self.find_child(parent, &name) {
            Some(_) => self.free_name(parent, &name),
            None => name,
        };
        let id = self.insert(parent, &name, Kind::Folder);
        self.node_json(&id)
    }

    fn patch(&mut self, id: &str, body: Option<&Value>) -> Value {
        if self.failing_patches > 0 {
            self.failing_patches -= 1;
            return api_error("accessDenied", "item is locked");
        }
        let modified = body
            .and_then(|b| b.pointer("/fileSystemInfo/lastModifiedDateTime"))
            .and_then(Value::as_str)
            .map(String::from);
        match self.nodes.get_mut(id) {
            Some(node) => {
                node.modified = modified;
                self.node_json(id)
            }
            None => api_error("itemNotFound", "item does not exist"),
        }
    }

    fn create_session(&mut self, parent: &str, name: &str, body: Option<&Value>) -> Value {
        if self.failing_creates > 0 {
            self.failing_creates -= 1;
            return api_error("serviceNotAvailable", "try again later");
        }
        let conflict = body
            .and_then(|b| b.pointer("/item/@microsoft.graph.conflictBehavior"))
            .and_then(Value::as_str)
            .unwrap_or("fail")
            .to_string();

        self.sessions_created += 1;
        let url = format!("{UPLOAD_BASE}{}", self.sessions_created);
        self.sessions.insert(
            url.clone(),
            Session {
                parent: parent.to_string(),
                name: name.to_string(),
                conflict,
                received: Vec::new(),
            },
        );
        json!({
            "uploadUrl": url,
            "expirationDateTime": "2030-01-01T00:00:00Z",
            "nextExpectedRanges": ["0-"],
        })
    }

    fn put_content(&mut self, path: &str, content: Bytes) -> Value {
        let rest = path.strip_prefix("drive/items/").unwrap();
        if let Some(id) = rest.strip_suffix("/content") {
            if let Some(node) = self.nodes.get_mut(id) {
                node.kind = Kind::File(content.to_vec());
            }
            return self.node_json(id);
        }

        let (target, query) = rest.split_once('?').unwrap();
        let conflict = query.split_once('=').unwrap().1;
        let (parent, name) = target.strip_suffix(":/content").unwrap().split_once(":/").unwrap();
        let id = self.put_file(parent, &decode(name), content.to_vec(), conflict);
        self.node_json(&id)
    }

    fn session_status(&mut self, url: &str) -> Value {
        if self.denied_statuses > 0 {
            self.denied_statuses -= 1;
            return api_error("accessDenied", "session is busy");
        }
        match self.sessions.get(url) {
            Some(session) => json!({
                "expirationDateTime": "2030-01-01T00:00:00Z",
                "nextExpectedRanges": [format!("{}-", session.received.len())],
            }),
            None => api_error("itemNotFound", "upload session expired"),
        }
    }

    fn accept_chunk(
        &mut self,
        url: &str,
        content_range: &str,
        data: Vec<u8>,
    ) -> Result<ChunkResponse, TransportError> {
        let index = self.chunk_calls;
        self.chunk_calls += 1;
        self.http_requests.push(format!("PUT {url} {content_range}"));

        if let Some(fault) = self.chunk_faults.remove(&index) {
            return match fault {
                Fault::Timeout => Err(TransportError::Timeout),
                Fault::Socket => Err(TransportError::Socket("connection reset by peer".into())),
                Fault::Html => Ok(response(502, "<html><body>Bad Gateway</body></html>".into())),
                Fault::AccessDenied => Ok(response(
                    403,
                    api_error("accessDenied", "resource is locked").to_string(),
                )),
            };
        }

        let (from, to, total) = parse_content_range(content_range);
        assert_eq!(data.len() as u64, to - from + 1, "body does not match {content_range}");

        let Some(mut session) = self.sessions.remove(url) else {
            let body = api_error("itemNotFound", "upload session expired");
            return Ok(response(404, body.to_string()));
        };
        if from != session.received.len() as u64 {
            let received = session.received.len();
            self.sessions.insert(url.to_string(), session);
            return Ok(response(
                416,
                api_error("invalidRange", &format!("expected offset {received}")).to_string(),
            ));
        }

        self.chunks.push(ChunkLog {
            session: url.to_string(),
            from,
            to,
            total,
        });
        session.received.extend(data);

        if (session.received.len() as u64) < total {
            let next = session.received.len();
            self.sessions.insert(url.to_string(), session);
            return Ok(response(
                202,
                json!({
                    "expirationDateTime": "2030-01-01T00:00:00Z",
                    "nextExpectedRanges": [format!("{next}-")],
                })
                .to_string(),
            ));
        }

        if self.stale_lookups > 0 {
            let old = self.lookup(&session.parent, &session.name);
            self.stale = Some(StaleView {
                parent: session.parent.clone(),
                name: session.name.clone(),
                old,
                remaining: self.stale_lookups,
            });
            self.stale_lookups = 0;
        }
        let id = self.put_file(&session.parent, &session.name, session.received, &session.conflict);
        Ok(response(201, self.node_json(&id).to_string()))
    }

    fn open_stream(&mut self, url: &str, headers: &[(String, String)]) -> StreamResponse {
        let range = headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case("range"))
            .map(|(_, value)| value.clone());
        self.http_requests
            .push(format!("GET {url} range={}", range.as_deref().unwrap_or("none")));

        let content = url
            .strip_prefix(DOWNLOAD_BASE)
            .and_then(|id| self.nodes.get(id))
            .and_then(|node| match &node.kind {
                Kind::File(content) => Some(content.clone()),
                _ => None,
            });
        let Some(content) = content else {
            return StreamResponse {
                status: 404,
                body: Box::pin(futures_util::stream::empty()),
            };
        };

        let offset = range
            .as_deref()
            .filter(|_| !self.ignore_range)
            .and_then(|value| value.strip_prefix("bytes="))
            .and_then(|value| value.trim_end_matches('-').parse::<usize>().ok());
        let (status, data) = match offset {
            Some(offset) => (206, content[offset..].to_vec()),
            None => (200, content),
        };

        let mut pieces: Vec<Result<Bytes, TransportError>> = Vec::new();
        let limit = self.fail_after.take();
        let cut = limit.unwrap_or(data.len()).min(data.len());
        for piece in data[..cut].chunks(STREAM_PIECE) {
            pieces.push(Ok(Bytes::copy_from_slice(piece)));
        }
        if limit.is_some() {
            pieces.push(Err(TransportError::Socket("connection reset by peer".into())));
        }

        StreamResponse {
            status,
            body: Box::pin(futures_util::stream::iter(pieces)),
        }
    }
}

impl DriveApi for FakeGraph {
    async fn request(
        &self,
        path: &str,
        body: Option<&Value>,
        verb: Verb,
    ) -> Result<Value, TransportError> {
        let mut state = self.lock();
        state.requests.push(format!("{} {}", verb.as_str(), path));
        Ok(state.route(path, body, verb))
    }

    async fn put_content(&self, path: &str, content: Bytes) -> Result<Value, TransportError> {
        let mut state = self.lock();
        state.requests.push(format!("PUT {path}"));
        Ok(state.put_content(path, content))
    }
}

impl HttpClient for FakeGraph {
    async fn get_json(&self, url: &str) -> Result<Value, TransportError> {
        let mut state = self.lock();
        state.http_requests.push(format!("GET {url}"));
        Ok(state.session_status(url))
    }

    async fn put_chunk(
        &self,
        url: &str,
        chunk: ChunkUpload,
    ) -> Result<ChunkResponse, TransportError> {
        let pieces: Vec<Bytes> = chunk
            .body
            .try_collect()
            .await
            .map_err(|e| TransportError::Socket(e.to_string()))?;
        self.lock()
            .accept_chunk(url, &chunk.content_range, pieces.concat())
    }

    async fn stream(
        &self,
        url: &str,
        headers: &[(String, String)],
    ) -> Result<StreamResponse, TransportError> {
        Ok(self.lock().open_stream(url, headers))
    }

    fn reconnect(&self) -> Result<(), TransportError> {
        self.lock().reconnects += 1;
        Ok(())
    }
}

/// Undo the per-segment escaping of an API path.
fn decode(path: &str) -> String {
    percent_decode_str(path).decode_utf8().unwrap().into_owned()
}

fn api_error(code: &str, message: &str) -> Value {
    json!({ "error": { "code": code, "message": message } })
}

fn response(status: u16, body: String) -> ChunkResponse {
    ChunkResponse { status, body }
}

fn parse_content_range(header: &str) -> (u64, u64, u64) {
    let spec = header.strip_prefix("bytes ").unwrap();
    let (range, total) = spec.split_once('/').unwrap();
    let (from, to) = range.split_once('-').unwrap();
    (from.parse().unwrap(), to.parse().unwrap(), total.parse().unwrap())
}

pub fn config() -> ClientConfig {
    ClientConfig {
        api_base: API_BASE.to_string(),
        ..ClientConfig::default()
    }
}

/// Upload options with every pause removed.
pub fn fast_options() -> UploadOptions {
    UploadOptions::default()
        .fragment_size(FRAGMENT)
        .io_size(64 * 1024)
        .session_retry(Duration::ZERO, Duration::ZERO)
        .status_retry(3, Duration::ZERO)
        .verify_interval(Duration::ZERO)
        .mtime_retry(4, Duration::ZERO)
}

pub fn patterned(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

pub fn write_source(dir: &Path, name: &str, len: usize) -> (PathBuf, Vec<u8>) {
    let content = patterned(len);
    let path = dir.join(name);
    std::fs::write(&path, &content).unwrap();
    (path, content)
}

pub type Recorded = Arc<Mutex<Vec<TransferEvent>>>;

pub fn recorder() -> (Observer, Recorded) {
    let events: Recorded = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let observer: Observer = Arc::new(move |event: &TransferEvent| {
        sink.lock().unwrap().push(event.clone());
    });
    (observer, events)
}

pub fn count_events(events: &Recorded, matches: impl Fn(&EventKind) -> bool) -> usize {
    events
        .lock()
        .unwrap()
        .iter()
        .filter(|event| matches(&event.kind))
        .count()
}
