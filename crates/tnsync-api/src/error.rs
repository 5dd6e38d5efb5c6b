use serde_json::Value;
use thiserror::Error;

/// Top-level error type for the `tnsync-api` crate.
///
/// Covers every failure mode of both transports: spawning `midclt`,
/// websocket connection and authentication, remote RPC failures, job
/// failures, and malformed responses. `tnsync-core` maps these into
/// reconciliation errors.
#[derive(Debug, Error)]
pub enum Error {
    // ── Process ─────────────────────────────────────────────────────
    /// The `midclt` binary could not be started at all.
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Nonzero exit from `midclt`, or any other failure to deliver a call.
    #[error("{program} exited with status {status}: \"{output}\"")]
    Transport {
        program: String,
        status: i32,
        output: String,
    },

    // ── Connection ──────────────────────────────────────────────────
    /// Websocket connection or handshake failed.
    #[error("WebSocket connection failed: {0}")]
    WebSocketConnect(String),

    /// Websocket closed while a reply was outstanding.
    #[error("WebSocket closed (code {code}): {reason}")]
    WebSocketClosed { code: u16, reason: String },

    /// Login was rejected by the daemon.
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    // ── RPC ─────────────────────────────────────────────────────────
    /// The invoked method does not exist on this daemon.
    #[error("Method {method} not found: {detail}")]
    MethodNotFound { method: String, detail: String },

    /// The daemon answered the call with an error.
    #[error("{method} failed: {message}")]
    Remote {
        method: String,
        message: String,
        errname: Option<String>,
    },

    /// A long-running job ended in a non-success state.
    #[error("job {method} ended in state {state}: {}", error.as_deref().unwrap_or("no error message"))]
    Job {
        method: String,
        state: String,
        error: Option<String>,
        exception: Option<String>,
        progress: Option<Value>,
    },

    // ── Data ────────────────────────────────────────────────────────
    /// The response could not be decoded in the expected output format.
    #[error("Can't parse response from {method}: {message}")]
    Decode {
        method: String,
        message: String,
        body: String,
    },
}

impl Error {
    /// Returns `true` when the remote method does not exist.
    ///
    /// Used by dialect detection to tell an older daemon apart from a
    /// generic failure.
    pub fn is_method_not_found(&self) -> bool {
        matches!(self, Self::MethodNotFound { .. })
    }

    /// Returns `true` if the failure happened before the daemon saw the call.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Spawn { .. } | Self::WebSocketConnect(_) | Self::WebSocketClosed { .. }
        )
    }

    /// Returns `true` for malformed-response errors.
    pub fn is_decode(&self) -> bool {
        matches!(self, Self::Decode { .. })
    }

    /// The daemon-side error name (`ENOENT`, `EINVAL`, ...), if any.
    pub fn errname(&self) -> Option<&str> {
        match self {
            Self::Remote { errname, .. } => errname.as_deref(),
            Self::MethodNotFound { .. } => Some("ENOMETHOD"),
            _ => None,
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────
