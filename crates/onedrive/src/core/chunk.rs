use std::fmt;

use serde_json::Value;

use super::range::parse_next_expected;
use crate::data::{ACCESS_DENIED, DriveFile, Payload};

/// What the upload loop should do after a fragment request returned.
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkOutcome {
    /// The server stored the fragment and waits for more.
    Accepted { next_expected: Option<u64> },
    /// The last fragment landed and the server returned the new file.
    Completed(DriveFile),
    /// The exchange is broken; re-establish the session.
    Restart(RestartReason),
}

/// Why an upload attempt was abandoned in favour of a new session exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestartReason {
    /// The body was not JSON, e.g. a proxy or interstitial HTML page.
    NotJson,
    AccessDenied,
    Api(String),
    Socket(String),
    TimeoutsExhausted,
    /// Every fragment was sent without the server returning a file.
    NoFinalItem,
    /// The new file never became visible under a fresh identity.
    Unverified,
}

impl fmt::Display for RestartReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestartReason::NotJson => write!(f, "response was not JSON"),
            RestartReason::AccessDenied => write!(f, "access denied"),
            RestartReason::Api(code) => write!(f, "API error {code}"),
            RestartReason::Socket(reason) => write!(f, "socket failure: {reason}"),
            RestartReason::TimeoutsExhausted => write!(f, "fragment kept timing out"),
            RestartReason::NoFinalItem => write!(f, "no file returned after last fragment"),
            RestartReason::Unverified => write!(f, "upload not visible after verification"),
        }
    }
}

/// Classify the body returned for a fragment PUT.
pub fn classify_chunk_response(body: &str) -> ChunkOutcome {
    let value: Value = match serde_json::from_str(body) {
        Ok(value @ Value::Object(_)) => value,
        _ => return ChunkOutcome::Restart(RestartReason::NotJson),
    };
    let next_expected = next_expected_offset(&value);

    match Payload::parse(value) {
        Payload::File(file) => ChunkOutcome::Completed(file),
        Payload::Error(error) if error.code == ACCESS_DENIED => {
            ChunkOutcome::Restart(RestartReason::AccessDenied)
        }
        Payload::Error(error) => ChunkOutcome::Restart(RestartReason::Api(error.code)),
        Payload::Directory(_) | Payload::Other(_) => ChunkOutcome::Accepted { next_expected },
    }
}

/// Offset the server expects next, read from a session status object.
pub fn next_expected_offset(value: &Value) -> Option<u64> {
    let ranges: Vec<&str> = value
        .get("nextExpectedRanges")?
        .as_array()?
        .iter()
        .filter_map(Value::as_str)
        .collect();
    parse_next_expected(&ranges)
}
