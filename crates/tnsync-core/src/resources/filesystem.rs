// ── ZFS datasets and volumes ──
//
// Keyed by full dataset name. Properties come back from `pool.dataset.query`
// as `{value, rawvalue, source, ...}` objects; comparisons use `rawvalue`.
// `volblocksize` and `sparse` can only be set at creation.

use std::str::FromStr;

use async_trait::async_trait;
use bytesize::ByteSize;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value, json};

use super::{Presence, ResourceKind};
use crate::dialect::Capabilities;
use crate::error::CoreError;
use crate::reconcile::diff::{Changes, put};
use crate::reconcile::{Plan, Reconciler, Step, Verb};
use crate::session::Session;

/// Property values compared case-insensitively.
const CASELESS: &[&str] = &[
    "on", "off", "inherit", "standard", "always", "disabled", "visible", "hidden", "lz4",
    "zstd", "nfsv4", "posix", "restricted", "passthrough", "discard", "verify",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, strum::Display)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum DatasetType {
    #[default]
    Filesystem,
    Volume,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UserProperty {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UserPropertyUpdate {
    pub key: String,
    pub value: Option<String>,
    #[serde(default)]
    pub remove: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Filesystem {
    pub name: String,
    #[serde(default)]
    pub state: Presence,
    #[serde(default, rename = "type")]
    pub dataset_type: DatasetType,
    /// Volume size in bytes; accepts `"10 GiB"` or `"512M"`.
    #[serde(default, deserialize_with = "size")]
    pub volsize: Option<u64>,
    pub volblocksize: Option<String>,
    pub sparse: Option<bool>,
    #[serde(default)]
    pub force_size: bool,
    pub create_ancestors: Option<bool>,
    // ZFS properties, settable at create and update time.
    pub comment: Option<String>,
    pub sync: Option<String>,
    pub snapdev: Option<String>,
    pub compression: Option<String>,
    pub atime: Option<String>,
    pub exec: Option<String>,
    pub managedby: Option<String>,
    pub quota: Option<u64>,
    pub quota_warning: Option<String>,
    pub quota_critical: Option<String>,
    pub refquota: Option<u64>,
    pub refquota_warning: Option<String>,
    pub refquota_critical: Option<String>,
    pub reservation: Option<u64>,
    pub refreservation: Option<u64>,
    pub special_small_block_size: Option<String>,
    pub copies: Option<String>,
    pub snapdir: Option<String>,
    pub deduplication: Option<String>,
    pub checksum: Option<String>,
    pub readonly: Option<String>,
    pub recordsize: Option<String>,
    pub aclmode: Option<String>,
    pub acltype: Option<String>,
    pub xattr: Option<String>,
    #[serde(default)]
    pub user_properties: Vec<UserProperty>,
    #[serde(default)]
    pub user_properties_update: Vec<UserPropertyUpdate>,
}

impl Filesystem {
    /// Every ZFS property that was given, in payload order.
    fn properties(&self) -> Vec<(&'static str, Value)> {
        let text = [
            ("comment", &self.comment),
            ("sync", &self.sync),
            ("snapdev", &self.snapdev),
            ("compression", &self.compression),
            ("atime", &self.atime),
            ("exec", &self.exec),
            ("managedby", &self.managedby),
            ("quota_warning", &self.quota_warning),
            ("quota_critical", &self.quota_critical),
            ("refquota_warning", &self.refquota_warning),
            ("refquota_critical", &self.refquota_critical),
            ("special_small_block_size", &self.special_small_block_size),
            ("copies", &self.copies),
            ("snapdir", &self.snapdir),
            ("deduplication", &self.deduplication),
            ("checksum", &self.checksum),
            ("readonly", &self.readonly),
            ("recordsize", &self.recordsize),
            ("aclmode", &self.aclmode),
            ("acltype", &self.acltype),
            ("xattr", &self.xattr),
        ];
        let sizes = [
            ("quota", self.quota),
            ("refquota", self.refquota),
            ("reservation", self.reservation),
            ("refreservation", self.refreservation),
        ];
        text.into_iter()
            .filter_map(|(k, v)| v.as_ref().map(|v| (k, json!(v))))
            .chain(sizes.into_iter().filter_map(|(k, v)| v.map(|v| (k, json!(v)))))
            .collect()
    }
}

/// Byte count from an integer or a human size string.
fn size<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Bytes(u64),
        Text(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Bytes(n)) => Ok(Some(n)),
        Some(Raw::Text(s)) => parse_size(&s).map(Some).map_err(serde::de::Error::custom),
    }
}

/// `512M` means MiB, as it does for `zfs`; explicit `MB` stays decimal.
pub fn parse_size(text: &str) -> Result<u64, String> {
    let t = text.trim();
    if let Ok(n) = t.parse::<u64>() {
        return Ok(n);
    }
    let bare_suffix = t
        .chars()
        .last()
        .filter(|c| matches!(c.to_ascii_uppercase(), 'K' | 'M' | 'G' | 'T' | 'P'));
    let normalized = match bare_suffix {
        Some(_) => format!("{t}iB"),
        None => t.to_owned(),
    };
    ByteSize::from_str(&normalized)
        .map(|b| b.as_u64())
        .map_err(|e| format!("invalid size {text:?}: {e}"))
}

/// Block size in bytes from `512`, `512B`, `16K` or `65536`.
pub fn parse_block_size(text: &str) -> Option<u64> {
    let t = text.trim().to_ascii_uppercase();
    if let Some(k) = t.strip_suffix('K') {
        return k.parse::<u64>().ok().and_then(|n| n.checked_mul(1024));
    }
    t.strip_suffix('B').unwrap_or(&t).parse().ok()
}

/// `rawvalue` of a dataset property, trimmed.
fn rawvalue<'a>(row: &'a Value, prop: &str) -> Option<&'a str> {
    row.get(prop)
        .and_then(|p| p.get("rawvalue"))
        .and_then(Value::as_str)
        .map(str::trim)
}

fn text_of(v: &Value) -> String {
    match v {
        Value::String(s) => s.trim().to_owned(),
        other => other.to_string(),
    }
}

/// Whether the desired value matches the observed `rawvalue`.
fn same_prop(desired: &Value, current: Option<&str>) -> bool {
    let want = text_of(desired);
    let have = current.unwrap_or_default();
    let caseless = |s: &str| CASELESS.iter().any(|c| c.eq_ignore_ascii_case(s));
    if caseless(&want) || caseless(have) {
        want.eq_ignore_ascii_case(have)
    } else {
        want == have
    }
}

fn same_bool(desired: bool, current: &str) -> bool {
    let have = match current.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" | "" => false,
        _ => return false,
    };
    have == desired
}

impl Filesystem {
    fn subject(&self) -> String {
        format!("dataset {}", self.name)
    }

    fn create_payload(&self, caps: Capabilities, plan: &mut Plan) -> Map<String, Value> {
        let mut p = Map::new();
        p.insert("name".into(), json!(self.name));
        p.insert("type".into(), json!(self.dataset_type.to_string()));
        if let Some(ancestors) = self.create_ancestors {
            if caps.create_ancestors {
                p.insert("create_ancestors".into(), json!(ancestors));
            } else {
                plan.warn("create_ancestors is not supported on TrueNAS CORE; ignoring");
            }
        }
        if self.dataset_type == DatasetType::Volume {
            put(&mut p, "volsize", self.volsize);
            put(&mut p, "volblocksize", self.volblocksize.clone());
            put(&mut p, "sparse", self.sparse);
            p.insert("force_size".into(), json!(self.force_size));
        }
        for (key, value) in self.properties() {
            p.insert(key.into(), value);
        }
        if !self.user_properties.is_empty() {
            p.insert("user_properties".into(), user_props_json(&self.user_properties));
        }
        p
    }

    fn update_diff<'a>(&self, row: &'a Value, plan: &mut Plan) -> Result<Changes<'a>, CoreError> {
        let mut c = Changes::against(row);

        if row.get("type").and_then(Value::as_str) == Some("VOLUME") {
            if let Some(volsize) = self.volsize {
                if rawvalue(row, "volsize") != Some(volsize.to_string().as_str()) {
                    c.insert("volsize", volsize);
                }
            }
            if let Some(requested) = &self.volblocksize {
                let current = rawvalue(row, "volblocksize").unwrap_or_default();
                if parse_block_size(current) != parse_block_size(requested) {
                    return Err(CoreError::Immutable {
                        field: "volblocksize".into(),
                        current: current.to_owned(),
                        requested: requested.clone(),
                    });
                }
            }
            if let Some(sparse) = self.sparse {
                match rawvalue(row, "sparse") {
                    Some(current) if !same_bool(sparse, current) => {
                        return Err(CoreError::Immutable {
                            field: "sparse".into(),
                            current: current.to_owned(),
                            requested: sparse.to_string(),
                        });
                    }
                    Some(_) => {}
                    None => plan.warn("sparse cannot be changed on an existing volume; ignoring"),
                }
            }
            // force_size only qualifies a resize.
            if self.force_size && c.contains("volsize") {
                c.insert("force_size", true);
            }
        }

        for (key, value) in self.properties() {
            if !same_prop(&value, rawvalue(row, key)) {
                c.insert(key, value);
            }
        }

        if self.user_properties.iter().any(|up| user_prop(row, &up.key) != Some(up.value.as_str())) {
            c.insert("user_properties", user_props_json(&self.user_properties));
        }

        let updates: Vec<Value> = self
            .user_properties_update
            .iter()
            .filter_map(|u| {
                let current = user_prop(row, &u.key);
                if u.remove {
                    current.map(|_| json!({"key": u.key, "remove": true}))
                } else {
                    u.value
                        .as_deref()
                        .filter(|v| current != Some(*v))
                        .map(|v| json!({"key": u.key, "value": v}))
                }
            })
            .collect();
        if !updates.is_empty() {
            c.insert("user_properties_update", updates);
        }
        Ok(c)
    }

    fn plan_with(&self, caps: Capabilities, observed: Option<&Value>) -> Result<Plan, CoreError> {
        let mut plan = Plan::new(self.subject());
        match (observed, self.state) {
            (None, Presence::Absent) => Ok(Plan::unchanged(self.subject(), None)),

            (None, Presence::Present) => {
                let payload = self.create_payload(caps, &mut plan);
                plan.act(Verb::Created);
                plan.push_state(Step::call("pool.dataset.create", [Value::Object(payload.clone())]));
                Ok(plan.with_diff(payload.into_iter().collect()))
            }

            (Some(row), Presence::Present) => {
                let changes = self.update_diff(row, &mut plan)?;
                if changes.is_empty() {
                    return Ok(Plan {
                        warnings: plan.warnings,
                        ..Plan::unchanged(self.subject(), Some(row))
                    });
                }
                let diff = changes.into_diff();
                plan.act(Verb::Updated);
                plan.push_state(Step::call(
                    "pool.dataset.update",
                    [json!(self.name), Value::Object(diff.clone().into_iter().collect())],
                ));
                Ok(plan.with_diff(diff))
            }

            (Some(_), Presence::Absent) => {
                plan.act(Verb::Deleted);
                plan.push(Step::call(
                    "pool.dataset.delete",
                    [json!(self.name), json!({"recursive": true})],
                ));
                Ok(plan)
            }
        }
    }
}

fn user_props_json(props: &[UserProperty]) -> Value {
    Value::Array(
        props
            .iter()
            .map(|p| json!({"key": p.key, "value": p.value}))
            .collect(),
    )
}

/// Observed value of a user property (`user_properties.<key>.value`).
fn user_prop<'a>(row: &'a Value, key: &str) -> Option<&'a str> {
    let prop = row.get("user_properties")?.get(key)?;
    match prop {
        Value::String(s) => Some(s.as_str()),
        other => other
            .get("value")
            .or_else(|| other.get("rawvalue"))
            .and_then(Value::as_str),
    }
}

#[async_trait]
impl Reconciler for Filesystem {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Filesystem
    }

    fn validate(&self) -> Result<(), CoreError> {
        if self.name.is_empty() || self.name.starts_with('/') {
            return Err(CoreError::validation("name must be a dataset name like tank/data"));
        }
        if let Some(bs) = &self.volblocksize {
            if parse_block_size(bs).is_none() {
                return Err(CoreError::validation(format!("cannot parse volblocksize {bs:?}")));
            }
        }
        if self.state == Presence::Present
            && self.dataset_type == DatasetType::Volume
            && self.volsize.is_none_or(|v| v == 0)
        {
            return Err(CoreError::validation("volsize is required when creating a volume"));
        }
        Ok(())
    }

    async fn observe(&self, session: &Session) -> Result<Option<Value>, CoreError> {
        session
            .middleware()
            .query_one("pool.dataset.query", "name", self.name.as_str())
            .await
    }

    async fn plan(&self, session: &Session, observed: Option<&Value>) -> Result<Plan, CoreError> {
        let caps = if observed.is_none() {
            session.capabilities().await?
        } else {
            Capabilities::default()
        };
        self.plan_with(caps, observed)
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn fs(params: Value) -> Filesystem {
        serde_json::from_value(params).unwrap_or_else(|e| panic!("{e}"))
    }

    fn scale() -> Capabilities {
        Capabilities {
            create_ancestors: true,
            ..Capabilities::default()
        }
    }

    fn volume_row() -> Value {
        json!({
            "id": "tank/vol1",
            "name": "tank/vol1",
            "type": "VOLUME",
            "volsize": {"rawvalue": "10737418240"},
            "volblocksize": {"rawvalue": "16384"},
            "compression": {"rawvalue": "lz4", "value": "LZ4"},
            "user_properties": {"org:owner": {"value": "ops"}}
        })
    }

    #[test]
    fn sizes_parse() {
        assert_eq!(parse_size("10 GiB"), Ok(10 * 1024 * 1024 * 1024));
        assert_eq!(parse_size("512M"), Ok(512 * 1024 * 1024));
        assert_eq!(parse_size("1048576"), Ok(1_048_576));
        assert!(parse_size("lots").is_err());

        assert_eq!(parse_block_size("16K"), Some(16384));
        assert_eq!(parse_block_size("512B"), Some(512));
        assert_eq!(parse_block_size("65536"), Some(65536));
        assert_eq!(parse_block_size("huge"), None);
        assert_eq!(parse_block_size("18014398509481984K"), None);
    }

    #[test]
    fn volume_create_payload() {
        let f = fs(json!({
            "name": "tank/vol1",
            "type": "VOLUME",
            "volsize": "10 GiB",
            "volblocksize": "16K",
            "create_ancestors": true,
            "compression": "lz4"
        }));
        let plan = f.plan_with(scale(), None).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(
            plan.steps[0].preview(),
            json!([{
                "name": "tank/vol1",
                "type": "VOLUME",
                "create_ancestors": true,
                "volsize": 10_737_418_240_u64,
                "volblocksize": "16K",
                "force_size": false,
                "compression": "lz4"
            }])
        );
    }

    #[test]
    fn core_drops_create_ancestors_with_warning() {
        let f = fs(json!({"name": "tank/a/b", "create_ancestors": true}));
        let plan = f.plan_with(Capabilities::default(), None).unwrap_or_else(|e| panic!("{e}"));
        assert!(!plan.diff.contains_key("create_ancestors"));
        assert_eq!(plan.warnings.len(), 1);
    }

    #[test]
    fn volblocksize_is_immutable() {
        let f = fs(json!({"name": "tank/vol1", "type": "VOLUME", "volsize": 10_737_418_240_u64, "volblocksize": "64K"}));
        let err = f.plan_with(scale(), Some(&volume_row())).err();
        assert!(matches!(err, Some(CoreError::Immutable { ref field, .. }) if field == "volblocksize"));

        let same = fs(json!({"name": "tank/vol1", "type": "VOLUME", "volsize": "10G", "volblocksize": "16K"}));
        let plan = same.plan_with(scale(), Some(&volume_row())).unwrap_or_else(|e| panic!("{e}"));
        assert!(plan.is_noop());
    }

    #[test]
    fn force_size_rides_along_with_a_resize() {
        let same = fs(json!({"name": "tank/vol1", "type": "VOLUME", "volsize": "10G", "force_size": true}));
        let plan = same.plan_with(scale(), Some(&volume_row())).unwrap_or_else(|e| panic!("{e}"));
        assert!(plan.is_noop());

        let bigger = fs(json!({"name": "tank/vol1", "type": "VOLUME", "volsize": "20G", "force_size": true}));
        let plan = bigger.plan_with(scale(), Some(&volume_row())).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(plan.diff.get("volsize"), Some(&json!(21_474_836_480_u64)));
        assert_eq!(plan.diff.get("force_size"), Some(&json!(true)));
    }

    #[test]
    fn unexposed_sparse_warns() {
        let f = fs(json!({"name": "tank/vol1", "type": "VOLUME", "volsize": "10G", "sparse": true}));
        let plan = f.plan_with(scale(), Some(&volume_row())).unwrap_or_else(|e| panic!("{e}"));
        assert!(plan.is_noop());
        assert_eq!(plan.warnings.len(), 1);
    }

    #[test]
    fn enum_properties_ignore_case() {
        let f = fs(json!({"name": "tank/vol1", "type": "VOLUME", "volsize": "10G", "compression": "LZ4"}));
        let plan = f.plan_with(scale(), Some(&volume_row())).unwrap_or_else(|e| panic!("{e}"));
        assert!(plan.is_noop());
    }

    #[test]
    fn user_property_updates_only_when_effective() {
        let f = fs(json!({
            "name": "tank/vol1",
            "type": "VOLUME",
            "volsize": "10G",
            "user_properties_update": [
                {"key": "org:owner", "value": "ops"},
                {"key": "org:gone", "remove": true},
                {"key": "org:team", "value": "storage"}
            ]
        }));
        let plan = f.plan_with(scale(), Some(&volume_row())).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(
            plan.diff["user_properties_update"],
            json!([{"key": "org:team", "value": "storage"}])
        );
    }

    #[test]
    fn delete_is_recursive() {
        let f = fs(json!({"name": "tank/vol1", "state": "absent"}));
        let plan = f.plan_with(scale(), Some(&volume_row())).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(plan.steps[0].preview(), json!(["tank/vol1", {"recursive": true}]));
    }

    #[test]
    fn volume_needs_size() {
        assert!(fs(json!({"name": "tank/vol1", "type": "VOLUME"})).validate().is_err());
    }
}
