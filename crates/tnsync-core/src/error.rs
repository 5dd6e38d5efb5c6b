// ── Core error types ──
//
// Errors surfaced by reconcilers. Transport failures from tnsync-api are
// translated into these variants so callers can tell a validation problem
// apart from a failed lookup or a half-applied mutation.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Caller errors ────────────────────────────────────────────────
    /// Conflicting or missing parameters, detected before any remote call.
    #[error("Invalid parameters: {message}")]
    Validation { message: String },

    /// A creation-only field was asked to change on an existing resource.
    #[error("{field} cannot be changed after creation (current {current}, requested {requested})")]
    Immutable {
        field: String,
        current: String,
        requested: String,
    },

    /// A file referenced by the input could not be read.
    #[error("Cannot read {path}: {source}")]
    FileInput {
        path: String,
        #[source]
        source: std::io::Error,
    },

    // ── Remote errors ────────────────────────────────────────────────
    /// A read-only call failed.
    #[error("Error looking up {what} ({method}): {message}")]
    Lookup {
        what: String,
        method: String,
        message: String,
    },

    /// A create/update/delete call or job failed.
    #[error("{}", mutation_message(.method, .completed, .message))]
    Mutation {
        method: String,
        /// Methods that already succeeded before `method` failed.
        completed: Vec<String>,
        message: String,
    },

    /// The daemon does not implement the method.
    #[error("Method {method} not found: {detail}")]
    MethodNotFound { method: String, detail: String },

    /// The response could not be parsed.
    #[error("Malformed response from {method}: {message}")]
    Decode { method: String, message: String },

    /// The response parsed but did not have the expected shape.
    #[error("Unexpected response from {method}: {message}")]
    UnexpectedResponse { method: String, message: String },

    /// A resource the reconciler depends on does not exist.
    #[error("No such {entity_type}: {identifier}")]
    NotFound {
        entity_type: String,
        identifier: String,
    },

    // ── Environment errors ───────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// The middleware could not be reached at all.
    #[error("Cannot reach middlewared: {message}")]
    Transport { message: String },
}

fn mutation_message(method: &str, completed: &[String], message: &str) -> String {
    if completed.is_empty() {
        format!("{method} failed: {message}")
    } else {
        format!(
            "{method} failed after {} succeeded: {message}",
            completed.join(", ")
        )
    }
}

impl CoreError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn not_found(entity_type: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            identifier: identifier.into(),
        }
    }

    pub fn unexpected(method: impl Into<String>, message: impl Into<String>) -> Self {
        Self::UnexpectedResponse {
            method: method.into(),
            message: message.into(),
        }
    }

    /// Wrap a failed read-only call.
    pub fn lookup(what: impl Into<String>, method: &str, err: tnsync_api::Error) -> Self {
        match err {
            tnsync_api::Error::Remote { message, .. } => Self::Lookup {
                what: what.into(),
                method: method.to_owned(),
                message,
            },
            tnsync_api::Error::Transport { .. } | tnsync_api::Error::Job { .. } => Self::Lookup {
                what: what.into(),
                method: method.to_owned(),
                message: err.to_string(),
            },
            other => other.into(),
        }
    }

    /// Wrap a failed mutating call, recording what already went through.
    pub fn mutation(method: &str, completed: Vec<String>, err: tnsync_api::Error) -> Self {
        if let tnsync_api::Error::MethodNotFound { method, detail } = err {
            return Self::MethodNotFound { method, detail };
        }
        let message = match err {
            tnsync_api::Error::Remote { message, .. } => message,
            other => other.to_string(),
        };
        Self::Mutation {
            method: method.to_owned(),
            completed,
            message,
        }
    }

    pub fn is_method_not_found(&self) -> bool {
        matches!(self, Self::MethodNotFound { .. })
    }

    /// Returns `true` when the error was raised before any remote call.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::Validation { .. } | Self::Immutable { .. } | Self::FileInput { .. }
        )
    }

    /// Returns `true` for failures that left the appliance partly changed.
    pub fn is_partial(&self) -> bool {
        matches!(self, Self::Mutation { completed, .. } if !completed.is_empty())
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<tnsync_api::Error> for CoreError {
    fn from(err: tnsync_api::Error) -> Self {
        match err {
            tnsync_api::Error::MethodNotFound { method, detail } => {
                CoreError::MethodNotFound { method, detail }
            }
            tnsync_api::Error::Decode {
                method, message, ..
            } => CoreError::Decode { method, message },
            tnsync_api::Error::Remote {
                method, message, ..
            } => CoreError::Lookup {
                what: "resource".into(),
                method,
                message,
            },
            tnsync_api::Error::Job { ref method, .. } => CoreError::Mutation {
                method: method.clone(),
                completed: Vec::new(),
                message: err.to_string(),
            },
            tnsync_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URI: {e}"),
            },
            tnsync_api::Error::Spawn { .. }
            | tnsync_api::Error::Transport { .. }
            | tnsync_api::Error::WebSocketConnect(_)
            | tnsync_api::Error::WebSocketClosed { .. }
            | tnsync_api::Error::Authentication { .. } => CoreError::Transport {
                message: err.to_string(),
            },
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────
