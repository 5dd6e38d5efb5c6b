// ── Middleware facade ──
//
// Owns the boxed transport for one session and gives reconcilers a
// narrower surface: JSON calls, jobs, and query helpers that return rows.
// Reconcilers never see which transport is underneath.

use serde_json::{Value, json};
use tnsync_api::websocket::{Credentials, WebsocketClient, WebsocketConfig};
use tnsync_api::{Midclt, Output, Transport};
use tracing::{debug, warn};

use crate::config::{AuthCredentials, MiddlewareConfig, TransportMethod};
use crate::error::CoreError;

pub struct Middleware {
    transport: Box<dyn Transport>,
}

impl Middleware {
    /// Wrap an existing transport (test doubles go through here).
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Build the transport selected by `config`.
    pub fn from_config(config: &MiddlewareConfig) -> Self {
        let transport: Box<dyn Transport> = match config.method {
            TransportMethod::Midclt => Box::new(Midclt::with_program(&config.midclt_program)),
            TransportMethod::Websocket => {
                let credentials = match &config.auth {
                    AuthCredentials::None => Credentials::Anonymous,
                    AuthCredentials::ApiKey(key) => Credentials::ApiKey(key.clone()),
                    AuthCredentials::Password { username, password } => Credentials::Password {
                        username: username.clone(),
                        password: password.clone(),
                    },
                };
                let mut ws = WebsocketConfig::new(config.uri.clone(), credentials);
                ws.poll_interval = config.job_poll_interval;
                Box::new(WebsocketClient::new(ws))
            }
        };
        debug!(transport = transport.name(), "middleware transport selected");
        Self { transport }
    }

    pub fn transport_name(&self) -> &'static str {
        self.transport.name()
    }

    /// The underlying transport, for raw calls.
    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    // ── Read-only calls ──────────────────────────────────────────────

    /// Call a read-only method and return its JSON result.
    pub async fn call(&self, method: &str, args: &[Value]) -> Result<Value, CoreError> {
        self.transport
            .call(method, args, Output::Json)
            .await
            .map_err(|e| CoreError::lookup(method, method, e))
    }

    /// Call a read-only method whose result is a bare string.
    pub async fn call_str(&self, method: &str, args: &[Value]) -> Result<String, CoreError> {
        let value = self
            .transport
            .call(method, args, Output::Str)
            .await
            .map_err(|e| CoreError::lookup(method, method, e))?;
        match value {
            Value::String(s) => Ok(s),
            other => Ok(other.to_string()),
        }
    }

    /// Run a read-only job (`plugin.available`) and return its result.
    pub async fn job(&self, method: &str, args: &[Value]) -> Result<Value, CoreError> {
        self.transport
            .job(method, args)
            .await
            .map_err(|e| CoreError::lookup(method, method, e))
    }

    /// Run `<ns>.query` with a filter list and return the rows.
    pub async fn query(&self, method: &str, filters: Value) -> Result<Vec<Value>, CoreError> {
        match self.call(method, &[filters]).await? {
            Value::Array(rows) => Ok(rows),
            other => Err(CoreError::unexpected(
                method,
                format!("expected a list of rows, got {other}"),
            )),
        }
    }

    /// First row where `field = value`, if any.
    pub async fn query_one(
        &self,
        method: &str,
        field: &str,
        value: impl Into<Value>,
    ) -> Result<Option<Value>, CoreError> {
        let value = value.into();
        let rows = self.query(method, json!([[field, "=", value]])).await?;
        if rows.len() > 1 {
            warn!(method, field, %value, matches = rows.len(), "query matched several rows, using the first");
        }
        Ok(rows.into_iter().next())
    }

    // ── Mutating calls ───────────────────────────────────────────────

    /// Call a method without error wrapping (the plan executor wraps).
    pub async fn call_raw(&self, method: &str, args: &[Value]) -> Result<Value, tnsync_api::Error> {
        self.transport.call(method, args, Output::Json).await
    }

    /// Run a job to completion without error wrapping.
    pub async fn job_raw(&self, method: &str, args: &[Value]) -> Result<Value, tnsync_api::Error> {
        self.transport.job(method, args).await
    }
}

impl std::fmt::Debug for Middleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Middleware")
            .field("transport", &self.transport.name())
            .finish()
    }
}
