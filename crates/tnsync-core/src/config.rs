// ── Runtime middleware configuration ──
//
// Describes *how* to reach middlewared: which transport, and for the
// websocket transport where and as whom. Never touches disk; tnsync-config
// (or a test) builds one and hands it in.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;
use url::Url;

use crate::error::CoreError;

/// Where a local websocket client connects when no URI is configured.
pub const DEFAULT_URI: &str = "ws://127.0.0.1:6000";

/// Which transport talks to middlewared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum TransportMethod {
    /// Spawn `midclt` for every call.
    #[default]
    Midclt,
    /// Persistent websocket connection. `client` is the historical name.
    #[strum(to_string = "websocket", serialize = "client")]
    Websocket,
}

impl TransportMethod {
    /// Parse a `middleware_method` value, failing on unknown names.
    pub fn parse(value: &str) -> Result<Self, CoreError> {
        Self::from_str(value.trim()).map_err(|_| CoreError::Config {
            message: format!(
                "unknown middleware method {value:?} (expected midclt, client or websocket)"
            ),
        })
    }
}

/// How to authenticate the websocket transport.
#[derive(Debug, Clone, Default)]
pub enum AuthCredentials {
    /// No login call (local socket, already trusted).
    #[default]
    None,
    ApiKey(SecretString),
    Password {
        username: String,
        password: SecretString,
    },
}

/// Everything needed to build a [`crate::Middleware`].
#[derive(Debug, Clone)]
pub struct MiddlewareConfig {
    pub method: TransportMethod,
    /// Base URI of the websocket endpoint.
    pub uri: Url,
    pub auth: AuthCredentials,
    /// Path or name of the `midclt` binary.
    pub midclt_program: PathBuf,
    /// Interval between job status polls on the websocket transport.
    pub job_poll_interval: Duration,
}

impl Default for MiddlewareConfig {
    fn default() -> Self {
        Self {
            method: TransportMethod::default(),
            uri: default_uri(),
            auth: AuthCredentials::None,
            midclt_program: PathBuf::from(tnsync_api::midclt::MIDCLT_CMD),
            job_poll_interval: tnsync_api::websocket::DEFAULT_POLL_INTERVAL,
        }
    }
}

fn default_uri() -> Url {
    // Constant input; parsing cannot fail.
    Url::parse(DEFAULT_URI).unwrap_or_else(|_| unreachable!("DEFAULT_URI is a valid URL"))
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_is_an_alias_for_websocket() {
        assert_eq!(TransportMethod::parse("client").ok(), Some(TransportMethod::Websocket));
        assert_eq!(TransportMethod::parse("websocket").ok(), Some(TransportMethod::Websocket));
        assert_eq!(TransportMethod::parse("midclt").ok(), Some(TransportMethod::Midclt));
    }

    #[test]
    fn unknown_method_is_config_error() {
        let err = TransportMethod::parse("rest");
        assert!(matches!(err, Err(CoreError::Config { .. })));
    }

    #[test]
    fn defaults_use_midclt() {
        let cfg = MiddlewareConfig::default();
        assert_eq!(cfg.method, TransportMethod::Midclt);
        assert_eq!(cfg.uri.as_str(), "ws://127.0.0.1:6000/");
        assert_eq!(cfg.job_poll_interval, Duration::from_secs(1));
    }
}
