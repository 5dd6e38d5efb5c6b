// ── Argument front end ──
//
// Turns caller text (YAML or JSON) into a typed reconciler. File inputs
// are read in full here, before any remote call is made.

use std::path::Path;

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::CoreError;
use crate::reconcile::Reconciler;
use crate::resources::ResourceKind;

/// Parameters that name a file whose contents fill another parameter.
const CERTIFICATE_FILES: &[(&str, &str)] = &[("src", "certificate"), ("private_keyfile", "private_key")];

/// Parse YAML or JSON parameters. The top level must be a mapping.
pub fn parse_params(text: &str) -> Result<Value, CoreError> {
    if text.trim().is_empty() {
        return Ok(Value::Object(Map::new()));
    }
    let value: Value = serde_yaml::from_str(text)
        .map_err(|e| CoreError::validation(format!("cannot parse parameters: {e}")))?;
    match value {
        Value::Object(_) => Ok(value),
        Value::Null => Ok(Value::Object(Map::new())),
        other => Err(CoreError::validation(format!(
            "parameters must be a mapping, got {}",
            kind_of(&other)
        ))),
    }
}

fn kind_of(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "a mapping",
    }
}

/// Replace file-path parameters with the files' contents.
///
/// Relative paths resolve against `base`.
pub fn read_file_inputs(kind: ResourceKind, params: &mut Value, base: &Path) -> Result<(), CoreError> {
    if !matches!(kind, ResourceKind::Certificate | ResourceKind::CertificateAuthority) {
        return Ok(());
    }
    let Some(map) = params.as_object_mut() else {
        return Ok(());
    };
    for (file_param, target) in CERTIFICATE_FILES {
        let Some(path) = map.remove(*file_param) else {
            continue;
        };
        let Value::String(path) = path else {
            return Err(CoreError::validation(format!("{file_param} must be a path")));
        };
        if map.contains_key(*target) {
            return Err(CoreError::validation(format!(
                "{file_param} and {target} are mutually exclusive"
            )));
        }
        let full = base.join(&path);
        debug!(param = file_param, path = %full.display(), "reading file input");
        let text = std::fs::read_to_string(&full).map_err(|source| CoreError::FileInput {
            path: full.display().to_string(),
            source,
        })?;
        map.insert((*target).to_owned(), Value::String(text));
    }
    Ok(())
}

/// Parse, resolve file inputs, and build the reconciler for `kind`.
pub fn load(kind: ResourceKind, text: &str, base: &Path) -> Result<Box<dyn Reconciler>, CoreError> {
    let mut params = parse_params(text)?;
    read_file_inputs(kind, &mut params, base)?;
    kind.reconciler(params)
}

// ── Tests ────────────────────────────────────────────────────────────
