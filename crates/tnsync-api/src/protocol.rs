//! Wire framing for the two websocket dialects spoken by `middlewared`.
//!
//! - [`Protocol::JsonRpc`]: JSON-RPC 2.0 on `/api/current` (SCALE 25.04+).
//! - [`Protocol::Ddp`]: the older DDP-style protocol on `/websocket`,
//!   which needs a `connect` handshake before any method call.

use serde_json::{Value, json};

use crate::error::Error;

/// JSON-RPC "method not found" error code.
const JSONRPC_METHOD_NOT_FOUND: i64 = -32601;

// ── Protocol ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    JsonRpc,
    Ddp,
}

impl Protocol {
    /// Path joined onto the configured URI for this dialect.
    pub fn endpoint(self) -> &'static str {
        match self {
            Self::JsonRpc => "/api/current",
            Self::Ddp => "/websocket",
        }
    }

    /// Handshake frame sent right after the socket opens, if any.
    pub fn handshake(self) -> Option<String> {
        match self {
            Self::JsonRpc => None,
            Self::Ddp => Some(json!({"msg": "connect", "version": "1", "support": ["1"]}).to_string()),
        }
    }

    /// The id as it appears on the wire.
    pub fn wire_id(self, id: u64) -> Value {
        match self {
            Self::JsonRpc => Value::from(id),
            Self::Ddp => Value::String(id.to_string()),
        }
    }

    /// Encode a method invocation.
    pub fn encode_call(self, id: u64, method: &str, params: &[Value]) -> String {
        match self {
            Self::JsonRpc => json!({
                "jsonrpc": "2.0",
                "id": self.wire_id(id),
                "method": method,
                "params": params,
            }),
            Self::Ddp => json!({
                "id": self.wire_id(id),
                "msg": "method",
                "method": method,
                "params": params,
            }),
        }
        .to_string()
    }

    /// Decode one text frame.
    pub fn decode(self, text: &str) -> Result<Frame, Error> {
        let msg: Value = serde_json::from_str(text).map_err(|e| Error::Decode {
            method: "<websocket>".into(),
            message: e.to_string(),
            body: text.to_owned(),
        })?;

        Ok(match self {
            Self::JsonRpc => decode_jsonrpc(msg),
            Self::Ddp => decode_ddp(msg),
        })
    }
}

// ── Frames ───────────────────────────────────────────────────────────

/// A decoded server frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Reply to the request with the given wire id.
    Reply {
        id: Value,
        outcome: Result<Value, RemoteError>,
    },
    /// DDP handshake accepted.
    Connected,
    /// DDP handshake rejected.
    Failed(String),
    /// DDP keepalive; must be answered with `pong`.
    Ping(Option<Value>),
    /// Notifications and collection updates we don't track.
    Other,
}

/// Error object attached to a failed reply.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteError {
    pub code: Option<i64>,
    pub errname: Option<String>,
    pub reason: String,
    pub trace: Option<Value>,
}

impl RemoteError {
    pub fn is_method_not_found(&self) -> bool {
        self.code == Some(JSONRPC_METHOD_NOT_FOUND) || self.errname.as_deref() == Some("ENOMETHOD")
    }

    /// Turn the wire error into a crate error for `method`.
    pub fn into_error(self, method: &str) -> Error {
        if self.is_method_not_found() {
            return Error::MethodNotFound {
                method: method.to_owned(),
                detail: self.reason,
            };
        }
        Error::Remote {
            method: method.to_owned(),
            message: self.reason,
            errname: self.errname,
        }
    }
}

/// Pong frame answering a DDP ping.
pub fn ddp_pong(id: Option<&Value>) -> String {
    match id {
        Some(id) => json!({"msg": "pong", "id": id}).to_string(),
        None => json!({"msg": "pong"}).to_string(),
    }
}

fn decode_jsonrpc(mut msg: Value) -> Frame {
    let Some(id) = msg.get("id").cloned().filter(|id| !id.is_null()) else {
        return Frame::Other;
    };

    if let Some(err) = msg.get_mut("error").map(Value::take).filter(|e| !e.is_null()) {
        let data = err.get("data").cloned().unwrap_or(Value::Null);
        let reason = data
            .get("reason")
            .and_then(Value::as_str)
            .or_else(|| err.get("message").and_then(Value::as_str))
            .unwrap_or("unknown error")
            .to_owned();
        return Frame::Reply {
            id,
            outcome: Err(RemoteError {
                code: err.get("code").and_then(Value::as_i64),
                errname: data.get("errname").and_then(Value::as_str).map(str::to_owned),
                reason,
                trace: data.get("trace").cloned(),
            }),
        };
    }

    let result = msg.get_mut("result").map(Value::take).unwrap_or(Value::Null);
    Frame::Reply {
        id,
        outcome: Ok(result),
    }
}

fn decode_ddp(mut msg: Value) -> Frame {
    let kind = msg.get("msg").and_then(Value::as_str).map(str::to_owned);
    match kind.as_deref() {
        Some("connected") => Frame::Connected,
        Some("failed") => Frame::Failed(
            msg.get("version")
                .map_or_else(|| "handshake rejected".to_owned(), |v| format!("server wants version {v}")),
        ),
        Some("ping") => Frame::Ping(msg.get("id").cloned()),
        Some("result") => {
            let id = msg.get("id").cloned().unwrap_or(Value::Null);
            if let Some(err) = msg.get_mut("error").map(Value::take).filter(|e| !e.is_null()) {
                return Frame::Reply {
                    id,
                    outcome: Err(RemoteError {
                        code: err.get("error").and_then(Value::as_i64),
                        errname: err.get("errname").and_then(Value::as_str).map(str::to_owned),
                        reason: err
                            .get("reason")
                            .and_then(Value::as_str)
                            .unwrap_or("unknown error")
                            .to_owned(),
                        trace: err.get("trace").cloned(),
                    }),
                };
            }
            let result = msg.get_mut("result").map(Value::take).unwrap_or(Value::Null);
            Frame::Reply {
                id,
                outcome: Ok(result),
            }
        }
        _ => Frame::Other,
    }
}

// ── Tests ────────────────────────────────────────────────────────────
