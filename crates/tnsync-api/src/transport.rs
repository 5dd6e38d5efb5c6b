// Transport abstraction shared by the midclt and websocket clients.
//
// Both clients expose the same two operations: a synchronous `call` and a
// blocking `job`. Resource code only ever sees `dyn Transport`.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Error;

/// Expected shape of a call's response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Output {
    /// Parse the response as JSON (`True`/`False` are accepted as booleans).
    #[default]
    Json,
    /// Return the response as a string with trailing whitespace removed.
    Str,
}

impl fmt::Display for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json => f.write_str("json"),
            Self::Str => f.write_str("str"),
        }
    }
}

impl FromStr for Output {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" => Ok(Self::Json),
            "str" => Ok(Self::Str),
            other => Err(format!("invalid output format {other}")),
        }
    }
}

/// A way of reaching `middlewared`.
///
/// Implementations must be safe to call repeatedly within one session;
/// any connection they hold is created on first use and then reused.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Short name used in logs (`midclt`, `websocket`, ...).
    fn name(&self) -> &'static str;

    /// Invoke `method` with positional `args`.
    async fn call(&self, method: &str, args: &[Value], output: Output) -> Result<Value, Error>;

    /// Start the job `method` and wait until it reaches a terminal state.
    ///
    /// Returns the job's result on success, or [`Error::Job`] carrying
    /// whatever progress/error/exception the daemon reported.
    async fn job(&self, method: &str, args: &[Value]) -> Result<Value, Error>;
}

/// Convert a textual response into a JSON value.
///
/// `midclt` prints Python reprs for some scalar results, so the literal
/// strings `True` and `False` are mapped to JSON booleans first.
pub fn parse_json(method: &str, raw: &str) -> Result<Value, Error> {
    let trimmed = raw.trim();
    let text = match trimmed {
        "True" => "true",
        "False" => "false",
        other => other,
    };
    serde_json::from_str(text).map_err(|e| Error::Decode {
        method: method.to_owned(),
        message: e.to_string(),
        body: raw.to_owned(),
    })
}

/// Render a response in the requested output format.
pub fn render_output(method: &str, raw: &str, output: Output) -> Result<Value, Error> {
    match output {
        Output::Json => parse_json(method, raw),
        Output::Str => Ok(Value::String(raw.trim_end().to_owned())),
    }
}

/// Render an already-decoded value the way `midclt` prints it with
/// `output=str`.
pub fn stringify(value: Value) -> Value {
    match value {
        Value::String(s) => Value::String(s.trim_end().to_owned()),
        Value::Bool(true) => Value::String("True".into()),
        Value::Bool(false) => Value::String("False".into()),
        Value::Null => Value::String("None".into()),
        other => Value::String(other.to_string()),
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn python_booleans_become_json_booleans() {
        assert_eq!(parse_json("m", "True\n").ok(), Some(json!(true)));
        assert_eq!(parse_json("m", "False").ok(), Some(json!(false)));
        assert_eq!(parse_json("m", "null").ok(), Some(Value::Null));
    }

    #[test]
    fn structured_json_is_parsed() {
        let v = parse_json("group.query", r#"[{"id": 1, "gid": 1000}]"#).ok();
        assert_eq!(v, Some(json!([{"id": 1, "gid": 1000}])));
    }

    #[test]
    fn garbage_is_a_decode_error() {
        let err = parse_json("group.query", "Traceback (most recent call last)");
        assert!(matches!(err, Err(Error::Decode { ref method, .. }) if method == "group.query"));
    }

    #[test]
    fn str_output_strips_trailing_whitespace_only() {
        let v = render_output("system.version", "  TrueNAS-13.0-U5\n\n", Output::Str).ok();
        assert_eq!(v, Some(json!("  TrueNAS-13.0-U5")));
    }

    #[test]
    fn stringify_matches_midclt_printing() {
        assert_eq!(stringify(json!(true)), json!("True"));
        assert_eq!(stringify(json!("pool1\n")), json!("pool1"));
        assert_eq!(stringify(json!(42)), json!("42"));
        assert_eq!(stringify(Value::Null), json!("None"));
    }

    #[test]
    fn output_format_parses() {
        assert_eq!("json".parse::<Output>(), Ok(Output::Json));
        assert_eq!("str".parse::<Output>(), Ok(Output::Str));
        assert!("xml".parse::<Output>().is_err());
    }
}
