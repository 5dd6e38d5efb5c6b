//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with help
//! text and a process exit code.

use miette::Diagnostic;
use thiserror::Error;

use tnsync_config::ConfigError;
use tnsync_core::CoreError;

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const UNSUPPORTED: i32 = 5;
    pub const CONFLICT: i32 = 6;
    pub const CONNECTION: i32 = 7;
    /// A multi-step change failed after some steps went through.
    pub const PARTIAL: i32 = 9;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not reach middlewared: {message}")]
    #[diagnostic(
        code(tnsync::connection_failed),
        help(
            "With --method midclt, tnsync must run on the appliance itself.\n\
             With --method websocket, check --uri and that the API is reachable."
        )
    )]
    Connection { message: String },

    #[error("Authentication failed: {message}")]
    #[diagnostic(
        code(tnsync::auth_failed),
        help("Set TRUENAS_API_KEY, or TRUENAS_API_USERNAME and TRUENAS_API_PASSWORD.")
    )]
    Auth { message: String },

    // ── Input ────────────────────────────────────────────────────────
    #[error("{message}")]
    #[diagnostic(code(tnsync::validation))]
    Validation { message: String },

    #[error("Unknown resource type '{kind}'")]
    #[diagnostic(code(tnsync::unknown_kind), help("Run: tnsync kinds"))]
    UnknownKind { kind: String },

    #[error("Invalid JSON argument {arg:?}: {reason}")]
    #[diagnostic(code(tnsync::json), help("Each argument to `tnsync call` must be a JSON document, e.g. '[[\"id\", \"=\", 1]]'."))]
    BadArgument { arg: String, reason: String },

    #[error("{field} cannot be changed after creation (current {current}, requested {requested})")]
    #[diagnostic(
        code(tnsync::immutable),
        help("Recreate the resource to change {field}.")
    )]
    Immutable {
        field: String,
        current: String,
        requested: String,
    },

    // ── Remote ───────────────────────────────────────────────────────
    #[error("No such {entity_type}: {identifier}")]
    #[diagnostic(code(tnsync::not_found))]
    NotFound {
        entity_type: String,
        identifier: String,
    },

    #[error("Method {method} is not available on this appliance")]
    #[diagnostic(
        code(tnsync::method_not_found),
        help("{detail}\nRun `tnsync facts` to see the detected product and version.")
    )]
    MethodNotFound { method: String, detail: String },

    #[error(transparent)]
    #[diagnostic(
        code(tnsync::partial_change),
        help("Earlier steps were applied and not rolled back. Re-run once the cause is fixed.")
    )]
    Partial(CoreError),

    #[error(transparent)]
    #[diagnostic(code(tnsync::remote))]
    Remote(CoreError),

    // ── Configuration ────────────────────────────────────────────────
    #[error("{source}")]
    #[diagnostic(code(tnsync::config), help("Config file: {path}"))]
    Config {
        #[source]
        source: ConfigError,
        path: String,
    },

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Cannot render output: {0}")]
    Render(String),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Connection { .. } => exit_code::CONNECTION,
            Self::Auth { .. } => exit_code::AUTH,
            Self::Validation { .. } | Self::UnknownKind { .. } | Self::BadArgument { .. } => {
                exit_code::USAGE
            }
            Self::Immutable { .. } => exit_code::CONFLICT,
            Self::NotFound { .. } => exit_code::NOT_FOUND,
            Self::MethodNotFound { .. } => exit_code::UNSUPPORTED,
            Self::Partial(_) => exit_code::PARTIAL,
            Self::Remote(_) | Self::Config { .. } | Self::Io(_) | Self::Render(_) => {
                exit_code::GENERAL
            }
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        if err.is_partial() {
            return Self::Partial(err);
        }
        match err {
            CoreError::Validation { message } => Self::Validation { message },
            CoreError::FileInput { .. } => Self::Validation {
                message: err.to_string(),
            },
            CoreError::Immutable {
                field,
                current,
                requested,
            } => Self::Immutable {
                field,
                current,
                requested,
            },
            CoreError::NotFound {
                entity_type,
                identifier,
            } => Self::NotFound {
                entity_type,
                identifier,
            },
            CoreError::MethodNotFound { method, detail } => Self::MethodNotFound { method, detail },
            CoreError::Transport { message } if message.contains("Authentication failed") => {
                Self::Auth { message }
            }
            CoreError::Transport { message } => Self::Connection { message },
            CoreError::Config { message } => Self::Validation { message },
            other => Self::Remote(other),
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(source: ConfigError) -> Self {
        Self::Config {
            source,
            path: tnsync_config::config_path().display().to_string(),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes() {
        let usage: CliError = CoreError::validation("name must not be empty").into();
        assert_eq!(usage.exit_code(), exit_code::USAGE);

        let missing: CliError = CoreError::not_found("jail", "web").into();
        assert_eq!(missing.exit_code(), exit_code::NOT_FOUND);

        let down: CliError = CoreError::Transport {
            message: "WebSocket connection failed: refused".into(),
        }
        .into();
        assert_eq!(down.exit_code(), exit_code::CONNECTION);
    }

    #[test]
    fn half_applied_change_is_partial() {
        let err: CliError = CoreError::Mutation {
            method: "jail.start".into(),
            completed: vec!["jail.stop".into(), "jail.fstab".into()],
            message: "boom".into(),
        }
        .into();
        assert_eq!(err.exit_code(), exit_code::PARTIAL);
        assert!(err.to_string().contains("after jail.stop, jail.fstab succeeded"));
    }
}
