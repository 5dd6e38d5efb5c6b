// Local users, keyed by username.
//
// Two sudo dialects exist. Older daemons take `sudo` / `sudo_nopasswd`
// booleans plus one `sudo_commands` list; newer ones take separate
// `sudo_commands` and `sudo_commands_nopasswd` lists. Callers may always use
// the list form; on old daemons it is mapped onto the booleans.

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value, json};

use super::{Presence, ResourceKind, row_id};
use crate::dialect::Capabilities;
use crate::error::CoreError;
use crate::middleware::Middleware;
use crate::reconcile::diff::{Changes, as_int, put, string_list};
use crate::reconcile::{Plan, Reconciler, Step, Verb};
use crate::session::Session;

const DEPRECATED_SUDO: &str =
    "sudo and sudo_nopasswd are deprecated; use sudo_commands and sudo_commands_nopasswd";

fn yes() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct User {
    #[serde(alias = "user")]
    pub name: String,
    pub uid: Option<i64>,
    pub password: Option<String>,
    pub password_disabled: Option<bool>,
    /// Full name.
    pub comment: Option<String>,
    pub email: Option<String>,
    pub shell: Option<String>,
    pub home: Option<String>,
    /// Defaults to `true` on create; only compared when given.
    pub smb: Option<bool>,
    /// Primary group name.
    pub group: Option<String>,
    /// Create a same-named primary group.
    #[serde(default = "yes")]
    pub create_group: bool,
    /// Supplementary group names.
    pub groups: Option<Vec<String>>,
    /// Add `groups` to the existing ones instead of replacing them.
    #[serde(default)]
    pub append: bool,
    #[serde(alias = "pubkeys")]
    pub ssh_authorized_keys: Option<Vec<String>>,
    #[serde(default)]
    pub append_pubkeys: bool,
    pub sudo: Option<bool>,
    pub sudo_nopasswd: Option<bool>,
    pub sudo_commands: Option<Vec<String>>,
    pub sudo_commands_nopasswd: Option<Vec<String>>,
    #[serde(default = "yes")]
    pub delete_group: bool,
    #[serde(default)]
    pub state: Presence,
}

/// A sudo field in the daemon's own dialect.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Sudo {
    Flag(&'static str, bool),
    Commands(&'static str, Vec<String>),
}

/// Values that need a lookup before the payload can be built.
#[derive(Debug, Clone, Default, PartialEq)]
struct Resolved {
    next_uid: Option<Value>,
    group: Option<Value>,
    groups: Option<Vec<Value>>,
}

impl User {
    fn subject(&self) -> String {
        format!("user {}", self.name)
    }

    fn uses_legacy_sudo(&self) -> bool {
        self.sudo.is_some() || self.sudo_nopasswd.is_some()
    }

    /// Sudo fields to send, translated into this daemon's dialect.
    fn sudo_fields(&self, caps: Capabilities) -> Result<Vec<Sudo>, CoreError> {
        let mut fields = Vec::new();

        if caps.new_sudo_api {
            if self.uses_legacy_sudo() {
                return Err(CoreError::validation(
                    "sudo and sudo_nopasswd are not supported by this version; \
                     use sudo_commands and sudo_commands_nopasswd",
                ));
            }
            if let Some(cmds) = &self.sudo_commands {
                fields.push(Sudo::Commands("sudo_commands", cmds.clone()));
            }
            if let Some(cmds) = &self.sudo_commands_nopasswd {
                fields.push(Sudo::Commands("sudo_commands_nopasswd", cmds.clone()));
            }
            return Ok(fields);
        }

        if self.sudo_commands.is_some() && self.sudo_commands_nopasswd.is_some() {
            return Err(CoreError::validation(
                "sudo_commands and sudo_commands_nopasswd are mutually exclusive on this version",
            ));
        }

        if self.uses_legacy_sudo() {
            if let Some(sudo) = self.sudo {
                fields.push(Sudo::Flag("sudo", sudo));
            }
            if let Some(nopasswd) = self.sudo_nopasswd {
                fields.push(Sudo::Flag("sudo_nopasswd", nopasswd));
            }
            if let Some(cmds) = &self.sudo_commands {
                fields.push(Sudo::Commands("sudo_commands", cmds.clone()));
            }
            return Ok(fields);
        }

        let mapped = match (&self.sudo_commands, &self.sudo_commands_nopasswd) {
            (Some(cmds), None) => Some((false, cmds)),
            (None, Some(cmds)) => Some((true, cmds)),
            _ => None,
        };
        if let Some((nopasswd, cmds)) = mapped {
            let cmds = if cmds.iter().any(|c| c == "ALL") {
                Vec::new()
            } else {
                cmds.clone()
            };
            fields.push(Sudo::Flag("sudo", true));
            fields.push(Sudo::Flag("sudo_nopasswd", nopasswd));
            fields.push(Sudo::Commands("sudo_commands", cmds));
        }
        Ok(fields)
    }

    fn create_payload(&self, sudo: &[Sudo], resolved: &Resolved) -> Map<String, Value> {
        let mut p = Map::new();
        p.insert("username".into(), json!(self.name));
        p.insert("password".into(), json!(self.password.clone().unwrap_or_default()));
        put(&mut p, "password_disabled", self.password_disabled);
        p.insert("full_name".into(), json!(self.comment.clone().unwrap_or_default()));
        put(&mut p, "email", self.email.clone());
        put(&mut p, "uid", self.uid.map(Value::from).or_else(|| resolved.next_uid.clone()));
        p.insert("smb".into(), json!(self.smb.unwrap_or(true)));
        for field in sudo {
            match field {
                Sudo::Flag(name, v) => p.insert((*name).into(), json!(v)),
                Sudo::Commands(name, v) => p.insert((*name).into(), json!(v)),
            };
        }
        put(&mut p, "shell", self.shell.clone());
        put(&mut p, "home", self.home.clone());
        if let Some(keys) = &self.ssh_authorized_keys {
            p.insert("sshpubkey".into(), json!(format!("{}\n", keys.join("\n"))));
        }
        if self.create_group {
            p.insert("group_create".into(), json!(true));
        } else {
            put(&mut p, "group", resolved.group.clone());
        }
        if let Some(ids) = resolved.groups.as_ref().filter(|ids| !ids.is_empty()) {
            p.insert("groups".into(), Value::Array(ids.clone()));
        }
        p
    }

    fn update_diff<'a>(&self, row: &'a Value, sudo: &[Sudo], resolved: &Resolved) -> Changes<'a> {
        let mut c = Changes::against(row);

        c.scalar("uid", self.uid)
            .scalar("password_disabled", self.password_disabled)
            .scalar("full_name", self.comment.clone())
            .scalar("email", self.email.clone())
            .scalar("shell", self.shell.clone())
            .scalar("smb", self.smb);

        if let Some(home) = &self.home {
            let current = c.observed("home").as_str().unwrap_or_default();
            if current != home.as_str() && current != format!("{home}/{}", self.name) {
                c.insert("home", home.as_str());
            }
        }

        for field in sudo {
            match field {
                Sudo::Flag(name, v) => {
                    c.scalar(name, Some(*v));
                }
                Sudo::Commands(name, v) => {
                    c.set(name, Some(v.as_slice()));
                }
            }
        }

        if let Some(keys) = &self.ssh_authorized_keys {
            if let Some(text) = merged_pubkeys(c.observed("sshpubkey"), keys, self.append_pubkeys) {
                c.insert("sshpubkey", text);
            }
        }

        if let Some(id) = &resolved.group {
            c.insert("group", id.clone());
        }

        if let Some(want) = &resolved.groups {
            let have: BTreeSet<i64> = c
                .observed("groups")
                .as_array()
                .map(|ids| ids.iter().filter_map(as_int).collect())
                .unwrap_or_default();
            let mut wanted: BTreeSet<i64> = want.iter().filter_map(as_int).collect();
            if self.append {
                wanted.extend(have.iter().copied());
            }
            if wanted != have {
                c.insert("groups", json!(wanted.into_iter().collect::<Vec<_>>()));
            }
        }
        c
    }

    fn plan_with(
        &self,
        caps: Capabilities,
        observed: Option<&Value>,
        resolved: &Resolved,
    ) -> Result<Plan, CoreError> {
        let sudo = self.sudo_fields(caps)?;
        let mut plan = Plan::new(self.subject());
        if self.uses_legacy_sudo() {
            plan.warn(DEPRECATED_SUDO);
        }

        match (observed, self.state) {
            (None, Presence::Absent) => Ok(Plan {
                warnings: plan.warnings,
                ..Plan::unchanged(self.subject(), None)
            }),

            (None, Presence::Present) => {
                let payload = self.create_payload(&sudo, resolved);
                plan.act(Verb::Created);
                plan.push(Step::call("user.create", [Value::Object(payload.clone())]));
                Ok(plan.with_diff(payload.into_iter().collect()))
            }

            (Some(row), Presence::Present) => {
                let changes = self.update_diff(row, &sudo, resolved);
                if changes.is_empty() {
                    return Ok(Plan {
                        warnings: plan.warnings,
                        ..Plan::unchanged(self.subject(), Some(row))
                    });
                }
                let diff = changes.into_diff();
                let id = row_id("user.query", row)?;
                plan.act(Verb::Updated);
                plan.push(Step::call(
                    "user.update",
                    [id, Value::Object(diff.clone().into_iter().collect())],
                ));
                Ok(plan.with_diff(diff))
            }

            (Some(row), Presence::Absent) => {
                let id = row_id("user.query", row)?;
                plan.act(Verb::Deleted);
                plan.push(Step::call(
                    "user.delete",
                    [id, json!({"delete_group": self.delete_group})],
                ));
                Ok(plan)
            }
        }
    }

    /// Run the lookups the payload needs for this `observed` row.
    async fn resolve(&self, mw: &Middleware, observed: Option<&Value>) -> Result<Resolved, CoreError> {
        let mut resolved = Resolved::default();
        if self.state == Presence::Absent {
            return Ok(resolved);
        }

        if observed.is_none() && self.home.is_some() && self.uid.is_none() {
            resolved.next_uid = Some(mw.call("user.get_next_uid", &[]).await?);
        }

        let need_group = match (observed, &self.group) {
            (None, group) => !self.create_group && group.is_some(),
            (Some(row), Some(group)) => {
                row.pointer("/group/bsdgrp_group").and_then(Value::as_str) != Some(group.as_str())
            }
            (Some(_), None) => false,
        };
        if need_group {
            if let Some(name) = &self.group {
                let row = mw
                    .query_one("group.query", "group", name.as_str())
                    .await?
                    .ok_or_else(|| CoreError::not_found("group", name.as_str()))?;
                resolved.group = Some(row_id("group.query", &row)?);
            }
        }

        if let Some(groups) = &self.groups {
            let ids = if groups.is_empty() {
                Vec::new()
            } else {
                mw.query("group.query", json!([["group", "in", string_list(groups)]]))
                    .await?
                    .iter()
                    .map(|row| row_id("group.query", row))
                    .collect::<Result<_, _>>()?
            };
            resolved.groups = Some(ids);
        }
        Ok(resolved)
    }
}

/// New `sshpubkey` text, or `None` when the observed keys already match.
fn merged_pubkeys(observed: &Value, keys: &[String], append: bool) -> Option<String> {
    let have: Vec<&str> = observed
        .as_str()
        .map(|s| s.trim_end().split('\n').filter(|k| !k.is_empty()).collect())
        .unwrap_or_default();
    let have_set: BTreeSet<&str> = have.iter().copied().collect();
    let want: Vec<&str> = keys.iter().map(|k| k.trim_end()).collect();
    let want_set: BTreeSet<&str> = want.iter().copied().collect();

    if append {
        let added: Vec<&str> = want.iter().copied().filter(|k| !have_set.contains(k)).collect();
        if added.is_empty() {
            return None;
        }
        let mut all = have;
        all.extend(added);
        return Some(format!("{}\n", all.join("\n")));
    }
    (have_set != want_set).then(|| format!("{}\n", keys.join("\n")))
}

#[async_trait]
impl Reconciler for User {
    fn kind(&self) -> ResourceKind {
        ResourceKind::User
    }

    fn validate(&self) -> Result<(), CoreError> {
        if self.name.is_empty() {
            return Err(CoreError::validation("name must not be empty"));
        }
        if self.password_disabled == Some(false) && self.password.is_none() {
            return Err(CoreError::validation(
                "password_disabled is false but no password was given",
            ));
        }
        Ok(())
    }

    async fn observe(&self, session: &Session) -> Result<Option<Value>, CoreError> {
        session
            .middleware()
            .query_one("user.query", "username", self.name.as_str())
            .await
    }

    async fn plan(&self, session: &Session, observed: Option<&Value>) -> Result<Plan, CoreError> {
        let caps = session.capabilities().await?;
        // Reject dialect mismatches before any further lookups.
        self.sudo_fields(caps)?;
        let resolved = self.resolve(session.middleware(), observed).await?;
        self.plan_with(caps, observed, &resolved)
    }
}

// ── Tests ────────────────────────────────────────────────────────────
