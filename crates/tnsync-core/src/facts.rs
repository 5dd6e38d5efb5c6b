// ── Appliance facts ──
//
// Read-only summary of the appliance: identity, build, feature flags and
// the dialect the reconcilers will use.

use chrono::{DateTime, SecondsFormat};
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::dialect::Capabilities;
use crate::error::CoreError;
use crate::middleware::Middleware;
use crate::session::Session;

const FEATURES: [&str; 4] = ["DEDUP", "FIBRECHANNEL", "JAILS", "VM"];

#[derive(Debug, Clone, Serialize)]
pub struct Facts {
    pub boot_id: String,
    pub host_id: String,
    pub product_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    pub state: String,
    pub system_info: Value,
    /// RFC 3339 when the daemon returns a `$date` timestamp.
    pub build_time: Value,
    pub features: IndexMap<String, bool>,
    pub dialect: String,
    pub capabilities: Capabilities,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// `Some(value)`, or `None` if the method does not exist on this release.
async fn optional_str(mw: &Middleware, method: &str) -> Result<Option<String>, CoreError> {
    match mw.call_str(method, &[]).await {
        Ok(s) => Ok(Some(s)),
        Err(e) if e.is_method_not_found() => {
            debug!(method, "method not available, skipping");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Convert `{"$date": <ms since epoch>}` to an RFC 3339 string.
pub fn build_time(raw: Value) -> Result<Value, Value> {
    let millis = raw.get("$date").and_then(Value::as_i64);
    match millis.and_then(DateTime::from_timestamp_millis) {
        Some(t) => Ok(json!(t.to_rfc3339_opts(SecondsFormat::Secs, true))),
        None if raw.is_string() => Ok(raw),
        None => Err(raw),
    }
}

fn truthy(s: &str) -> bool {
    matches!(s.trim(), "True" | "true" | "1")
}

pub async fn gather(session: &Session) -> Result<Facts, CoreError> {
    let mw = session.middleware();
    let mut warnings = Vec::new();

    let boot_id = mw.call_str("system.boot_id", &[]).await?;
    let host_id = mw.call_str("system.host_id", &[]).await?;
    let product_type = mw.call_str("system.product_type", &[]).await?;
    let product_name = optional_str(mw, "system.product_name").await?;
    let environment = optional_str(mw, "system.environment").await?;
    if product_type == "CORE" && (product_name.is_none() || environment.is_none()) {
        warnings.push("CORE system without system.product_name or system.environment".to_owned());
    }
    let state = mw.call_str("system.state", &[]).await?;
    let system_info = mw.call("system.info", &[]).await?;

    let build_time = build_time(mw.call("system.build_time", &[]).await?).unwrap_or_else(|raw| {
        warnings.push(format!("unexpected build_time format: {raw}"));
        raw
    });

    let mut features = IndexMap::new();
    for feature in FEATURES {
        match mw.call_str("system.feature_enabled", &[json!(feature)]).await {
            Ok(s) => {
                features.insert(feature.to_owned(), truthy(&s));
            }
            Err(e) if e.to_string().contains("Invalid choice") => {
                debug!(feature, "feature not known to this release");
            }
            Err(e) => {
                warn!(feature, error = %e, "feature lookup failed");
                warnings.push(format!("error looking up feature {feature}: {e}"));
            }
        }
    }

    let dialect = session.dialect().await?;
    Ok(Facts {
        boot_id,
        host_id,
        product_type,
        product_name,
        environment,
        state,
        system_info,
        build_time,
        features,
        dialect: dialect.to_string(),
        capabilities: dialect.capabilities(),
        warnings,
    })
}

// ── Tests ────────────────────────────────────────────────────────────
