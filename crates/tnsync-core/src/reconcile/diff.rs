// ── Diff computation ──
//
// Field comparators shared by the reconcilers. A diff only ever contains
// fields the caller asked for and that differ from the observed value
// under the field's comparator.

use std::collections::BTreeSet;

use indexmap::IndexMap;
use serde_json::Value;

/// Ordered map of field to new value.
pub type Diff = IndexMap<String, Value>;

// ── Comparators ──────────────────────────────────────────────────────

/// Case-insensitive string equality. Non-strings fall back to `==`.
pub fn eq_ci(observed: &Value, desired: &Value) -> bool {
    match (observed, desired) {
        (Value::String(a), Value::String(b)) => a.eq_ignore_ascii_case(b),
        _ => observed == desired,
    }
}

/// Set equality for lists whose order does not matter. A missing or null
/// observed value counts as the empty set.
pub fn same_set(observed: &Value, desired: &[Value]) -> bool {
    let observed: BTreeSet<String> = match observed {
        Value::Array(items) => items.iter().map(canonical).collect(),
        Value::Null => BTreeSet::new(),
        other => return scalar_matches(other, desired),
    };
    let desired: BTreeSet<String> = desired.iter().map(canonical).collect();
    observed == desired
}

fn scalar_matches(observed: &Value, desired: &[Value]) -> bool {
    desired.len() == 1 && desired.first() == Some(observed)
}

/// Stable text form used as a set key.
pub fn canonical(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Convert a list of strings to JSON values.
pub fn string_list(items: &[String]) -> Vec<Value> {
    items.iter().cloned().map(Value::String).collect()
}

/// Integer view of a value that may be a number or numeric string.
pub fn as_int(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

// ── Builder ──────────────────────────────────────────────────────────

/// Accumulates the fields that differ from an observed row.
#[derive(Debug)]
pub struct Changes<'a> {
    observed: &'a Value,
    diff: Diff,
}

impl<'a> Changes<'a> {
    pub fn against(observed: &'a Value) -> Self {
        Self {
            observed,
            diff: Diff::new(),
        }
    }

    /// The observed value of `field` (`Null` when absent).
    pub fn observed(&self, field: &str) -> &'a Value {
        self.observed.get(field).unwrap_or(&Value::Null)
    }

    /// Exact comparison.
    pub fn scalar(&mut self, field: &str, desired: Option<impl Into<Value>>) -> &mut Self {
        if let Some(desired) = desired {
            let desired = desired.into();
            if *self.observed(field) != desired {
                self.diff.insert(field.to_owned(), desired);
            }
        }
        self
    }

    /// Case-insensitive comparison for enum-like strings.
    pub fn ci(&mut self, field: &str, desired: Option<impl Into<Value>>) -> &mut Self {
        if let Some(desired) = desired {
            let desired = desired.into();
            if !eq_ci(self.observed(field), &desired) {
                self.diff.insert(field.to_owned(), desired);
            }
        }
        self
    }

    /// Unordered list comparison.
    pub fn set(&mut self, field: &str, desired: Option<&[String]>) -> &mut Self {
        if let Some(desired) = desired {
            let desired = string_list(desired);
            if !same_set(self.observed(field), &desired) {
                self.diff.insert(field.to_owned(), Value::Array(desired));
            }
        }
        self
    }

    /// Record `field` unconditionally.
    pub fn insert(&mut self, field: &str, value: impl Into<Value>) -> &mut Self {
        self.diff.insert(field.to_owned(), value.into());
        self
    }

    pub fn contains(&self, field: &str) -> bool {
        self.diff.contains_key(field)
    }

    pub fn is_empty(&self) -> bool {
        self.diff.is_empty()
    }

    pub fn into_diff(self) -> Diff {
        self.diff
    }
}

/// Add `field: value` to a JSON object payload when `value` is set.
pub fn put(payload: &mut serde_json::Map<String, Value>, field: &str, value: Option<impl Into<Value>>) {
    if let Some(value) = value {
        payload.insert(field.to_owned(), value.into());
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn unset_fields_never_appear() {
        let observed = json!({"gid": 1000, "name": "g1"});
        let mut c = Changes::against(&observed);
        c.scalar("gid", None::<i64>).scalar("name", None::<String>);
        assert!(c.is_empty());
    }

    #[test]
    fn equal_values_produce_no_diff() {
        let observed = json!({"gid": 1000});
        let mut c = Changes::against(&observed);
        c.scalar("gid", Some(1000));
        assert!(c.is_empty());

        c.scalar("gid", Some(1001));
        assert_eq!(c.into_diff().get("gid"), Some(&json!(1001)));
    }

    #[test]
    fn reordered_lists_are_equal() {
        let observed = json!({"hosts": ["b", "a", "c"]});
        let mut c = Changes::against(&observed);
        c.set("hosts", Some(&["a".to_owned(), "c".to_owned(), "b".to_owned()][..]));
        assert!(c.is_empty());

        c.set("hosts", Some(&["a".to_owned()][..]));
        assert!(c.contains("hosts"));
    }

    #[test]
    fn null_list_is_empty_set() {
        assert!(same_set(&Value::Null, &[]));
        assert!(!same_set(&Value::Null, &[json!("x")]));
    }

    #[test]
    fn enum_fields_ignore_case() {
        let observed = json!({"compression": "LZ4"});
        let mut c = Changes::against(&observed);
        c.ci("compression", Some("lz4"));
        assert!(c.is_empty());
    }

    #[test]
    fn numeric_strings() {
        assert_eq!(as_int(&json!("0")), Some(0));
        assert_eq!(as_int(&json!(2)), Some(2));
        assert_eq!(as_int(&json!("x")), None);
    }
}
