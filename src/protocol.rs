//! Wire messages between the UI and the host
//!
//! ```text
//! → {"id": 7, "call": {"op": "readDirectory", "path": "/home/me"}}
//! ← {"id": 7, "ok": true, "data": [{"name": "src", "path": "/home/me/src", "isDirectory": true}], "error": null}
//! ← {"path": "/home/me"}                       (change notification)
//! ```

use crate::error::{BridgeError, ErrorKind};
use crate::watch::ChangeNotification;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One call from the UI, paired with its answer by `id`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: u64,
    pub call: Call,
}

/// The operations the UI may invoke. Nothing else is reachable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum Call {
    ReadDirectory {
        path: PathBuf,
    },
    OpenFolderDialog,
    WatchDirectory {
        path: PathBuf,
    },
    UnwatchDirectory {
        path: PathBuf,
    },
    #[serde(rename_all = "camelCase")]
    MoveFile {
        source_path: PathBuf,
        dest_directory: PathBuf,
    },
}

impl Call {
    /// Operation name as it appears on the wire
    pub fn op(&self) -> &'static str {
        match self {
            Call::ReadDirectory { .. } => "readDirectory",
            Call::OpenFolderDialog => "openFolderDialog",
            Call::WatchDirectory { .. } => "watchDirectory",
            Call::UnwatchDirectory { .. } => "unwatchDirectory",
            Call::MoveFile { .. } => "moveFile",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub code: String,
    pub message: String,
}

impl ErrorBody {
    pub fn protocol(code: &str, message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Protocol,
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl From<&BridgeError> for ErrorBody {
    fn from(err: &BridgeError) -> Self {
        Self {
            kind: err.kind(),
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

/// Answer to one `Request`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: u64,
    pub ok: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<ErrorBody>,
}

impl Response {
    pub fn success(id: u64, data: serde_json::Value) -> Self {
        Self {
            id,
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(id: u64, error: ErrorBody) -> Self {
        Self {
            id,
            ok: false,
            data: None,
            error: Some(error),
        }
    }
}

/// Everything the host writes on a shared stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Outbound {
    Response(Response),
    Event(ChangeNotification),
}

/// Parse one request, recovering the id for the error reply when possible
pub fn parse_request(text: &str) -> Result<Request, Response> {
    serde_json::from_str::<Request>(text).map_err(|e| {
        let id = serde_json::from_str::<serde_json::Value>(text)
            .ok()
            .and_then(|v| v.get("id").and_then(|id| id.as_u64()))
            .unwrap_or(0);
        Response::failure(id, ErrorBody::protocol("badRequest", format!("invalid request: {}", e)))
    })
}
