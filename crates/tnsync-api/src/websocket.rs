//! Persistent websocket transport.
//!
//! Connects lazily on the first call, authenticates once, and reuses the
//! connection for the rest of the session. The JSON-RPC endpoint
//! (`/api/current`) is tried first; if it can't be reached or login fails
//! there, the legacy `/websocket` endpoint is used instead.
//!
//! Jobs are started with a normal call (which returns a job id) and then
//! polled through `core.get_jobs` until they reach a terminal state.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::Error;
use crate::protocol::{Frame, Protocol, ddp_pong};
use crate::transport::{Output, Transport, stringify};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Default interval between `core.get_jobs` polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

// ── Credentials ──────────────────────────────────────────────────────

/// How to log in after the socket opens.
#[derive(Clone, Default)]
pub enum Credentials {
    /// Skip login (the daemon must already trust the peer).
    #[default]
    Anonymous,
    /// `auth.login_with_api_key`.
    ApiKey(SecretString),
    /// `auth.login`.
    Password {
        username: String,
        password: SecretString,
    },
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Anonymous => f.write_str("Anonymous"),
            Self::ApiKey(_) => f.write_str("ApiKey(****)"),
            Self::Password { username, .. } => write!(f, "Password {{ username: {username:?} }}"),
        }
    }
}

// ── WebsocketConfig ──────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct WebsocketConfig {
    /// Base URI of the daemon (`wss://nas.example.com`). The endpoint path
    /// is joined onto it.
    pub uri: Url,
    pub credentials: Credentials,
    pub poll_interval: Duration,
}

impl WebsocketConfig {
    pub fn new(uri: Url, credentials: Credentials) -> Self {
        Self {
            uri,
            credentials,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Resolve the websocket URL for `protocol`, mapping http(s) to ws(s).
    pub fn endpoint_url(&self, protocol: Protocol) -> Result<Url, Error> {
        let mut url = self.uri.join(protocol.endpoint())?;
        let scheme = match url.scheme() {
            "http" => Some("ws"),
            "https" => Some("wss"),
            _ => None,
        };
        if let Some(scheme) = scheme {
            url.set_scheme(scheme)
                .map_err(|()| Error::WebSocketConnect(format!("cannot use scheme {scheme} for {url}")))?;
        }
        Ok(url)
    }
}

// ── Session ──────────────────────────────────────────────────────────

/// One open, authenticated connection.
struct Session {
    stream: WsStream,
    protocol: Protocol,
    next_id: u64,
}

impl Session {
    async fn establish(config: &WebsocketConfig, protocol: Protocol) -> Result<Self, Error> {
        let url = config.endpoint_url(protocol)?;
        info!(url = %url, "Connecting to middleware websocket");

        let (stream, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| Error::WebSocketConnect(e.to_string()))?;

        let mut session = Self {
            stream,
            protocol,
            next_id: 1,
        };
        session.handshake().await?;
        session.login(&config.credentials).await?;
        debug!(?protocol, "websocket session ready");
        Ok(session)
    }

    async fn handshake(&mut self) -> Result<(), Error> {
        let Some(hello) = self.protocol.handshake() else {
            return Ok(());
        };
        self.send(hello).await?;

        loop {
            match self.next_frame("<handshake>").await? {
                Frame::Connected => return Ok(()),
                Frame::Failed(reason) => return Err(Error::WebSocketConnect(reason)),
                Frame::Ping(id) => self.send(ddp_pong(id.as_ref())).await?,
                Frame::Reply { .. } | Frame::Other => {}
            }
        }
    }

    async fn login(&mut self, credentials: &Credentials) -> Result<(), Error> {
        let accepted = match credentials {
            Credentials::Anonymous => return Ok(()),
            Credentials::ApiKey(key) => {
                self.request("auth.login_with_api_key", &[json!(key.expose_secret())])
                    .await?
            }
            Credentials::Password { username, password } => {
                self.request(
                    "auth.login",
                    &[json!(username), json!(password.expose_secret())],
                )
                .await?
            }
        };

        if accepted == Value::Bool(true) {
            Ok(())
        } else {
            Err(Error::Authentication {
                message: "middleware rejected the supplied credentials".into(),
            })
        }
    }

    async fn send(&mut self, text: String) -> Result<(), Error> {
        self.stream
            .send(Message::text(text))
            .await
            .map_err(|e| Error::WebSocketConnect(e.to_string()))
    }

    /// Read until the next text frame and decode it.
    async fn next_frame(&mut self, method: &str) -> Result<Frame, Error> {
        loop {
            let Some(message) = self.stream.next().await else {
                return Err(Error::WebSocketClosed {
                    code: 1006,
                    reason: "stream ended".into(),
                });
            };
            match message.map_err(|e| Error::WebSocketConnect(e.to_string()))? {
                Message::Text(text) => {
                    return self.protocol.decode(text.as_str()).map_err(|e| match e {
                        Error::Decode { message, body, .. } => Error::Decode {
                            method: method.to_owned(),
                            message,
                            body,
                        },
                        other => other,
                    });
                }
                Message::Close(frame) => {
                    let (code, reason) = frame.map_or((1005, String::new()), |f| {
                        (u16::from(f.code), f.reason.to_string())
                    });
                    return Err(Error::WebSocketClosed { code, reason });
                }
                // tungstenite answers pings on the next write
                _ => {}
            }
        }
    }

    /// Send one call and wait for its reply.
    async fn request(&mut self, method: &str, params: &[Value]) -> Result<Value, Error> {
        let id = self.next_id;
        self.next_id += 1;
        let wire_id = self.protocol.wire_id(id);

        debug!(method, id, "websocket call");
        self.send(self.protocol.encode_call(id, method, params)).await?;

        loop {
            match self.next_frame(method).await? {
                Frame::Reply { id, outcome } if id == wire_id => {
                    return outcome.map_err(|e| e.into_error(method));
                }
                Frame::Ping(id) => self.send(ddp_pong(id.as_ref())).await?,
                Frame::Reply { .. } | Frame::Connected | Frame::Failed(_) | Frame::Other => {}
            }
        }
    }
}

// ── WebsocketClient ──────────────────────────────────────────────────

/// Transport over a persistent websocket connection.
pub struct WebsocketClient {
    config: WebsocketConfig,
    session: Mutex<Option<Session>>,
}

impl WebsocketClient {
    /// Create the client. Does NOT connect; the first call does.
    pub fn new(config: WebsocketConfig) -> Self {
        Self {
            config,
            session: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &WebsocketConfig {
        &self.config
    }

    async fn connect(config: &WebsocketConfig) -> Result<Session, Error> {
        match Session::establish(config, Protocol::JsonRpc).await {
            Ok(session) => Ok(session),
            Err(primary) => {
                warn!(error = %primary, "JSON-RPC endpoint failed, trying legacy websocket");
                Session::establish(config, Protocol::Ddp)
                    .await
                    .map_err(|fallback| {
                        Error::WebSocketConnect(format!(
                            "primary URI failed: {primary}, fallback URI failed: {fallback}"
                        ))
                    })
            }
        }
    }

    async fn request(&self, method: &str, params: &[Value]) -> Result<Value, Error> {
        let mut guard = self.session.lock().await;
        if guard.is_none() {
            *guard = Some(Self::connect(&self.config).await?);
        }
        let Some(session) = guard.as_mut() else {
            return Err(Error::WebSocketConnect("no session".into()));
        };
        session.request(method, params).await
    }

    /// Close the connection, if one was opened.
    pub async fn close(&self) {
        if let Some(mut session) = self.session.lock().await.take() {
            let _ = session.stream.close(None).await;
        }
    }
}

#[async_trait]
impl Transport for WebsocketClient {
    fn name(&self) -> &'static str {
        "websocket"
    }

    async fn call(&self, method: &str, args: &[Value], output: Output) -> Result<Value, Error> {
        let value = self.request(method, args).await?;
        Ok(match output {
            Output::Json => value,
            Output::Str => stringify(value),
        })
    }

    async fn job(&self, method: &str, args: &[Value]) -> Result<Value, Error> {
        let started = self.request(method, args).await?;
        let Some(job_id) = started.as_i64() else {
            // Not a job method after all; the reply is the result.
            return Ok(started);
        };
        info!(method, job_id, "waiting for job");

        loop {
            let jobs = self
                .request("core.get_jobs", &[json!([["id", "=", job_id]])])
                .await?;
            let Some(job) = jobs.get(0) else {
                return Err(Error::Decode {
                    method: "core.get_jobs".into(),
                    message: format!("job {job_id} not found"),
                    body: jobs.to_string(),
                });
            };

            match job.get("state").and_then(Value::as_str) {
                Some("SUCCESS") => {
                    return Ok(job.get("result").cloned().unwrap_or(Value::Null));
                }
                Some(state @ ("FAILED" | "ABORTED")) => {
                    return Err(Error::Job {
                        method: method.to_owned(),
                        state: state.to_owned(),
                        error: job.get("error").and_then(Value::as_str).map(str::to_owned),
                        exception: job.get("exception").and_then(Value::as_str).map(str::to_owned),
                        progress: job.get("progress").cloned(),
                    });
                }
                _ => tokio::time::sleep(self.config.poll_interval).await,
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────
