// ── NFS shares ──
//
// Shares are keyed by their comment. When several shares carry the same
// comment the first one is managed and the report says so.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value, json};

use super::{Presence, ResourceKind, row_id};
use crate::dialect::Capabilities;
use crate::error::CoreError;
use crate::reconcile::diff::{Changes, put, string_list};
use crate::reconcile::{Plan, Reconciler, Step, Verb};
use crate::session::Session;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SharingNfs {
    /// Share comment, used as its name.
    #[serde(alias = "comment")]
    pub name: String,
    pub path: Option<String>,
    #[serde(default)]
    pub state: Presence,
    pub alldirs: Option<bool>,
    pub quiet: Option<bool>,
    pub enabled: Option<bool>,
    #[serde(alias = "ro")]
    pub readonly: Option<bool>,
    pub maproot_user: Option<String>,
    pub maproot_group: Option<String>,
    pub mapall_user: Option<String>,
    pub mapall_group: Option<String>,
    pub networks: Option<Vec<String>>,
    pub hosts: Option<Vec<String>>,
}

/// Mapping fields that cannot be set at the same time as their partner.
const EXCLUSIVE: [(&str, &str); 4] = [
    ("maproot_user", "mapall_user"),
    ("maproot_group", "mapall_group"),
    ("mapall_user", "maproot_user"),
    ("mapall_group", "maproot_group"),
];

impl SharingNfs {
    fn subject(&self) -> String {
        format!("NFS share {}", self.name)
    }

    fn mapping(&self, field: &str) -> Option<&String> {
        match field {
            "maproot_user" => self.maproot_user.as_ref(),
            "maproot_group" => self.maproot_group.as_ref(),
            "mapall_user" => self.mapall_user.as_ref(),
            "mapall_group" => self.mapall_group.as_ref(),
            _ => None,
        }
    }

    fn create_payload(&self, path: &str, caps: Capabilities) -> Map<String, Value> {
        let mut payload = Map::new();
        payload.insert("comment".into(), json!(self.name));
        if caps.nfs_share_paths_list {
            payload.insert("paths".into(), json!([path]));
        } else {
            payload.insert("path".into(), json!(path));
        }
        put(&mut payload, "alldirs", self.alldirs);
        put(&mut payload, "quiet", self.quiet);
        put(&mut payload, "enabled", self.enabled);
        put(&mut payload, "ro", self.readonly);
        for (field, _) in EXCLUSIVE {
            put(&mut payload, field, self.mapping(field).cloned());
        }
        put(&mut payload, "networks", self.networks.as_deref().map(string_list));
        put(&mut payload, "hosts", self.hosts.as_deref().map(string_list));
        payload
    }

    fn update_diff<'a>(&self, row: &'a Value, caps: Capabilities) -> Changes<'a> {
        let mut changes = Changes::against(row);
        changes
            .scalar("alldirs", self.alldirs)
            .scalar("quiet", self.quiet)
            .scalar("enabled", self.enabled);

        if let Some(ro) = self.readonly {
            let observed = row.get("ro").or_else(|| row.get("readonly"));
            if observed.and_then(Value::as_bool) != Some(ro) {
                changes.insert("ro", ro);
            }
        }

        for (field, partner) in EXCLUSIVE {
            let Some(want) = self.mapping(field) else {
                continue;
            };
            if changes.observed(field).as_str() == Some(want.as_str()) {
                continue;
            }
            changes.insert(field, want.as_str());
            if !changes.observed(partner).is_null() && self.mapping(partner).is_none() {
                changes.insert(partner, Value::Null);
            }
        }

        if let Some(path) = &self.path {
            if caps.nfs_share_paths_list {
                changes.set("paths", Some(std::slice::from_ref(path)));
            } else {
                changes.scalar("path", Some(path.as_str()));
            }
        }
        changes
            .set("networks", self.networks.as_deref())
            .set("hosts", self.hosts.as_deref());
        changes
    }

    fn plan_with(&self, caps: Capabilities, observed: Option<&Value>) -> Result<Plan, CoreError> {
        let share = observed.and_then(|o| o.get("share")).filter(|s| !s.is_null());
        let matches = observed
            .and_then(|o| o.get("matches"))
            .and_then(Value::as_u64)
            .unwrap_or_default();

        let mut plan = match (share, self.state) {
            (None, Presence::Absent) => Plan::unchanged(self.subject(), None),
            (None, Presence::Present) => {
                let path = self.path.as_deref().ok_or_else(|| {
                    CoreError::validation(format!("path is required to create {}", self.subject()))
                })?;
                let payload = self.create_payload(path, caps);
                let mut plan = Plan::new(self.subject());
                plan.act(Verb::Created);
                plan.push_state(Step::call("sharing.nfs.create", [Value::Object(payload.clone())]));
                plan.with_diff(payload.into_iter().collect())
            }
            (Some(row), Presence::Present) => {
                let changes = self.update_diff(row, caps);
                if changes.is_empty() {
                    Plan::unchanged(self.subject(), Some(row))
                } else {
                    let diff = changes.into_diff();
                    let id = row_id("sharing.nfs.query", row)?;
                    let mut plan = Plan::new(self.subject());
                    plan.act(Verb::Updated);
                    plan.push_state(Step::call(
                        "sharing.nfs.update",
                        [id, Value::Object(diff.clone().into_iter().collect())],
                    ));
                    plan.with_diff(diff)
                }
            }
            (Some(row), Presence::Absent) => {
                let id = row_id("sharing.nfs.query", row)?;
                let mut plan = Plan::new(self.subject());
                plan.act(Verb::Deleted);
                plan.push(Step::call("sharing.nfs.delete", [id]));
                plan
            }
        };

        if matches > 1 {
            plan.warn(format!(
                "{matches} NFS shares have the comment {:?}; only the first was considered",
                self.name
            ));
        }
        Ok(plan)
    }
}

#[async_trait]
impl Reconciler for SharingNfs {
    fn kind(&self) -> ResourceKind {
        ResourceKind::SharingNfs
    }

    fn validate(&self) -> Result<(), CoreError> {
        if self.maproot_user.is_some() && self.mapall_user.is_some() {
            return Err(CoreError::validation("maproot_user and mapall_user are mutually exclusive"));
        }
        if self.maproot_group.is_some() && self.mapall_group.is_some() {
            return Err(CoreError::validation(
                "maproot_group and mapall_group are mutually exclusive",
            ));
        }
        Ok(())
    }

    async fn observe(&self, session: &Session) -> Result<Option<Value>, CoreError> {
        let rows = session
            .middleware()
            .query("sharing.nfs.query", json!([["comment", "=", self.name]]))
            .await?;
        let matches = rows.len();
        Ok(rows
            .into_iter()
            .next()
            .map(|share| json!({"share": share, "matches": matches})))
    }

    async fn plan(&self, session: &Session, observed: Option<&Value>) -> Result<Plan, CoreError> {
        let caps = session.capabilities().await?;
        self.plan_with(caps, observed)
    }
}

// ── Tests ────────────────────────────────────────────────────────────
