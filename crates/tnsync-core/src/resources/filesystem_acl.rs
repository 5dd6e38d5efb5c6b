// ── Filesystem ACLs ──
//
// Owner, group and DACL of one path. There is no create or delete: the
// observed ACL always exists, and a difference is applied with a single
// `filesystem.setacl` job. ACEs are compared as unordered lists after
// dropping name fields, `false` bits and default ids, on both sides.

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use super::ResourceKind;
use crate::error::CoreError;
use crate::middleware::Middleware;
use crate::reconcile::diff::Diff;
use crate::reconcile::{Plan, Reconciler, Step, Verb};
use crate::session::Session;

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_false(b: &bool) -> bool {
    !*b
}

fn yes() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AclType {
    Nfs4,
    Posix1e,
    Disabled,
}

// ── NFS4 entries ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Nfs4Tag {
    #[serde(rename = "owner@")]
    Owner,
    #[serde(rename = "group@")]
    Group,
    #[serde(rename = "everyone@")]
    Everyone,
    #[serde(rename = "USER")]
    User,
    #[serde(rename = "GROUP")]
    NamedGroup,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AceType {
    Allow,
    Deny,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BasicPerms {
    FullControl,
    Modify,
    Read,
    Traverse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BasicFlags {
    Inherit,
    Noinherit,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", deny_unknown_fields)]
#[allow(clippy::struct_excessive_bools)]
pub struct Nfs4Perms {
    #[serde(default, skip_serializing_if = "is_false")]
    pub read_data: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub write_data: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub append_data: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub read_named_attrs: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub write_named_attrs: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub execute: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub delete_child: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub read_attributes: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub write_attributes: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub delete: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub read_acl: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub write_acl: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub write_owner: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub synchronize: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub basic: Option<BasicPerms>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", deny_unknown_fields)]
#[allow(clippy::struct_excessive_bools)]
pub struct Nfs4Flags {
    #[serde(default, skip_serializing_if = "is_false")]
    pub file_inherit: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub directory_inherit: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub no_propagate_inherit: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub inherit_only: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub inherited: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub basic: Option<BasicFlags>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Nfs4Ace {
    pub tag: Nfs4Tag,
    #[serde(default, skip_serializing)]
    pub username: Option<String>,
    #[serde(default, skip_serializing)]
    pub groupname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(rename = "type")]
    pub ace_type: AceType,
    #[serde(default)]
    pub perms: Nfs4Perms,
    #[serde(default)]
    pub flags: Nfs4Flags,
}

// ── POSIX1E entries ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PosixTag {
    UserObj,
    GroupObj,
    User,
    Group,
    Other,
    Mask,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE", deny_unknown_fields)]
pub struct PosixPerms {
    #[serde(default, skip_serializing_if = "is_false")]
    pub read: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub write: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub execute: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PosixAce {
    #[serde(default, skip_serializing_if = "is_false")]
    pub default: bool,
    pub tag: PosixTag,
    #[serde(default, skip_serializing)]
    pub username: Option<String>,
    #[serde(default, skip_serializing)]
    pub groupname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(default)]
    pub perms: PosixPerms,
}

// ── Spec ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Nfs41Flags {
    #[serde(default)]
    pub autoinherit: bool,
    #[serde(default)]
    pub protected: bool,
    #[serde(default)]
    pub defaulted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
#[allow(clippy::struct_excessive_bools)]
pub struct AclOptions {
    #[serde(default)]
    pub stripacl: bool,
    #[serde(default)]
    pub recursive: bool,
    #[serde(default)]
    pub traverse: bool,
    #[serde(default = "yes")]
    pub canonicalize: bool,
    #[serde(default = "yes")]
    pub validate_effective_acl: bool,
}

impl Default for AclOptions {
    fn default() -> Self {
        Self {
            stripacl: false,
            recursive: false,
            traverse: false,
            canonicalize: true,
            validate_effective_acl: true,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilesystemAcl {
    pub path: String,
    pub username: Option<String>,
    pub uid: Option<i64>,
    pub groupname: Option<String>,
    pub gid: Option<i64>,
    pub acltype: Option<AclType>,
    #[serde(default)]
    pub dacl_nfs4: Vec<Nfs4Ace>,
    #[serde(default)]
    pub dacl_posix: Vec<PosixAce>,
    pub nfs41_flags: Option<Nfs41Flags>,
    #[serde(default)]
    pub options: AclOptions,
}

/// Owner ids and the DACL with every name replaced by its id.
#[derive(Debug, Clone, Default, PartialEq)]
struct Desired {
    uid: Option<i64>,
    gid: Option<i64>,
    dacl: Option<Vec<Value>>,
}

/// Drop fields that never take part in a comparison.
fn normalize_ace(ace: &Value) -> Value {
    let Some(obj) = ace.as_object() else {
        return ace.clone();
    };
    let mut out = Map::new();
    for (key, value) in obj {
        match key.as_str() {
            "perms" | "flags" => {
                let bits: Map<String, Value> = value
                    .as_object()
                    .map(|m| {
                        m.iter()
                            .filter(|(_, v)| !matches!(v, Value::Null | Value::Bool(false)))
                            .map(|(k, v)| (k.clone(), v.clone()))
                            .collect()
                    })
                    .unwrap_or_default();
                out.insert(key.clone(), Value::Object(bits));
            }
            "id" if value.is_null() || value.as_i64() == Some(-1) => {}
            "default" if value == &Value::Bool(false) => {}
            "tag" | "id" | "type" | "default" => {
                out.insert(key.clone(), value.clone());
            }
            _ => {}
        }
    }
    Value::Object(out)
}

/// Unordered comparison of two ACE lists.
fn same_dacl(observed: &[Value], desired: &[Value]) -> bool {
    let key = |aces: &[Value]| -> Vec<String> {
        let mut v: Vec<String> = aces.iter().map(|a| normalize_ace(a).to_string()).collect();
        v.sort();
        v
    };
    key(observed) == key(desired)
}

impl FilesystemAcl {
    fn subject(&self) -> String {
        format!("ACL on {}", self.path)
    }

    fn plan_with(&self, desired: &Desired, observed: &Value) -> Plan {
        let mut changed: Diff = Diff::new();

        if let Some(uid) = desired.uid {
            if observed.get("uid").and_then(Value::as_i64) != Some(uid) {
                changed.insert("uid".into(), json!(uid));
            }
        }
        if let Some(gid) = desired.gid {
            if observed.get("gid").and_then(Value::as_i64) != Some(gid) {
                changed.insert("gid".into(), json!(gid));
            }
        }
        if let Some(acltype) = self.acltype {
            let want = json!(acltype);
            if observed.get("acltype") != Some(&want) {
                changed.insert("acltype".into(), want);
            }
        }
        if let Some(dacl) = &desired.dacl {
            let have = observed
                .get("acl")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default();
            if !same_dacl(have, dacl) {
                changed.insert("dacl".into(), Value::Array(dacl.clone()));
            }
        }
        if let (Some(flags), Some(AclType::Nfs4)) = (&self.nfs41_flags, self.acltype) {
            let want = json!(flags);
            if observed.get("nfs41_flags").is_some_and(|have| *have != want) {
                changed.insert("nfs41_flags".into(), want);
            }
        }

        if changed.is_empty() {
            return Plan::unchanged(self.subject(), Some(observed));
        }

        let mut payload = Map::new();
        payload.insert("path".into(), json!(self.path));
        if let Some(uid) = desired.uid {
            payload.insert("uid".into(), json!(uid));
        }
        if let Some(gid) = desired.gid {
            payload.insert("gid".into(), json!(gid));
        }
        if let Some(acltype) = self.acltype {
            payload.insert("acltype".into(), json!(acltype));
        }
        let dacl = desired.dacl.clone().unwrap_or_else(|| {
            observed
                .get("acl")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default()
        });
        payload.insert("dacl".into(), Value::Array(dacl));
        if self.acltype == Some(AclType::Nfs4) {
            payload.insert(
                "nfs41_flags".into(),
                json!(self.nfs41_flags.clone().unwrap_or_default()),
            );
        }
        payload.insert("options".into(), json!(self.options));

        let mut plan = Plan::new(self.subject());
        plan.act(Verb::Updated);
        plan.push(Step::job("filesystem.setacl", [Value::Object(payload)]));
        plan.with_diff(changed)
    }

    async fn resolve(&self, mw: &Middleware) -> Result<Desired, CoreError> {
        let mut desired = Desired {
            uid: self.uid,
            gid: self.gid,
            dacl: None,
        };
        if let Some(name) = &self.username {
            desired.uid = Some(lookup_uid(mw, name).await?);
        }
        if let Some(name) = &self.groupname {
            desired.gid = Some(lookup_gid(mw, name).await?);
        }

        match self.acltype {
            Some(AclType::Nfs4) => {
                let mut aces = Vec::with_capacity(self.dacl_nfs4.len());
                for ace in &self.dacl_nfs4 {
                    let mut ace = ace.clone();
                    match (ace.tag, &ace.username, &ace.groupname) {
                        (Nfs4Tag::User, Some(name), _) => ace.id = Some(lookup_uid(mw, name).await?),
                        (Nfs4Tag::NamedGroup, _, Some(name)) => {
                            ace.id = Some(lookup_gid(mw, name).await?);
                        }
                        _ => {}
                    }
                    aces.push(to_json(&ace)?);
                }
                desired.dacl = Some(aces);
            }
            Some(AclType::Posix1e) => {
                let mut aces = Vec::with_capacity(self.dacl_posix.len());
                for ace in &self.dacl_posix {
                    let mut ace = ace.clone();
                    match (ace.tag, &ace.username, &ace.groupname) {
                        (PosixTag::User, Some(name), _) => ace.id = Some(lookup_uid(mw, name).await?),
                        (PosixTag::Group, _, Some(name)) => ace.id = Some(lookup_gid(mw, name).await?),
                        _ => {}
                    }
                    aces.push(to_json(&ace)?);
                }
                desired.dacl = Some(aces);
            }
            Some(AclType::Disabled) | None => {}
        }
        Ok(desired)
    }
}

fn to_json<T: Serialize>(ace: &T) -> Result<Value, CoreError> {
    serde_json::to_value(ace).map_err(|e| CoreError::validation(format!("bad ACL entry: {e}")))
}

async fn lookup_uid(mw: &Middleware, name: &str) -> Result<i64, CoreError> {
    let obj = mw.call("user.get_user_obj", &[json!({"username": name})]).await?;
    obj.get("pw_uid")
        .and_then(Value::as_i64)
        .ok_or_else(|| CoreError::unexpected("user.get_user_obj", format!("no pw_uid for user {name}")))
}

async fn lookup_gid(mw: &Middleware, name: &str) -> Result<i64, CoreError> {
    let obj = mw.call("group.get_group_obj", &[json!({"groupname": name})]).await?;
    obj.get("gr_gid")
        .and_then(Value::as_i64)
        .ok_or_else(|| CoreError::unexpected("group.get_group_obj", format!("no gr_gid for group {name}")))
}

/// `true` when an entry gives both a name and an explicit id.
fn named_with_id(username: Option<&String>, groupname: Option<&String>, id: Option<i64>) -> bool {
    (username.is_some() || groupname.is_some()) && id.is_some_and(|i| i != -1)
}

#[async_trait]
impl Reconciler for FilesystemAcl {
    fn kind(&self) -> ResourceKind {
        ResourceKind::FilesystemAcl
    }

    fn validate(&self) -> Result<(), CoreError> {
        let exclusive = [
            (self.username.is_some() && self.uid.is_some(), "username and uid"),
            (self.groupname.is_some() && self.gid.is_some(), "groupname and gid"),
            (!self.dacl_nfs4.is_empty() && !self.dacl_posix.is_empty(), "dacl_nfs4 and dacl_posix"),
        ];
        if let Some((_, pair)) = exclusive.iter().find(|(both, _)| *both) {
            return Err(CoreError::validation(format!("{pair} are mutually exclusive")));
        }
        if !self.dacl_nfs4.is_empty() && self.acltype != Some(AclType::Nfs4) {
            return Err(CoreError::validation("dacl_nfs4 requires acltype=NFS4"));
        }
        if !self.dacl_posix.is_empty() && self.acltype != Some(AclType::Posix1e) {
            return Err(CoreError::validation("dacl_posix requires acltype=POSIX1E"));
        }
        let nfs4_clash = self
            .dacl_nfs4
            .iter()
            .any(|a| named_with_id(a.username.as_ref(), a.groupname.as_ref(), a.id));
        let posix_clash = self
            .dacl_posix
            .iter()
            .any(|a| named_with_id(a.username.as_ref(), a.groupname.as_ref(), a.id));
        if nfs4_clash || posix_clash {
            return Err(CoreError::validation(
                "an ACL entry may give a username/groupname or an id, not both",
            ));
        }
        Ok(())
    }

    async fn observe(&self, session: &Session) -> Result<Option<Value>, CoreError> {
        let acl = session
            .middleware()
            .call("filesystem.getacl", &[json!(self.path)])
            .await?;
        Ok(Some(acl))
    }

    async fn plan(&self, session: &Session, observed: Option<&Value>) -> Result<Plan, CoreError> {
        let observed = observed.ok_or_else(|| CoreError::not_found("path", self.path.as_str()))?;
        let desired = self.resolve(session.middleware()).await?;
        Ok(self.plan_with(&desired, observed))
    }
}

// ── Tests ────────────────────────────────────────────────────────────
