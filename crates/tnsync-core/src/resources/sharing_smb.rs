// ── SMB shares ──
//
// Shares are keyed by path; the share name is an ordinary field.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value, json};

use super::{Presence, ResourceKind, row_id};
use crate::error::CoreError;
use crate::reconcile::diff::{Changes, put, string_list};
use crate::reconcile::{Plan, Reconciler, Step, Verb};
use crate::session::Session;

/// Share presets offered by the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, strum::IntoStaticStr)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum SmbPurpose {
    NoPreset,
    DefaultShare,
    EnhancedTimemachine,
    MultiProtocolAfp,
    MultiProtocolNfs,
    PrivateDatasets,
    WormDropbox,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
#[allow(clippy::struct_excessive_bools)]
pub struct SharingSmb {
    pub path: String,
    pub name: String,
    #[serde(default)]
    pub state: Presence,
    pub purpose: Option<SmbPurpose>,
    pub hostsallow: Option<Vec<String>>,
    pub hostsdeny: Option<Vec<String>>,
    pub enabled: Option<bool>,
    pub path_suffix: Option<String>,
    pub comment: Option<String>,
    pub auxsmbconf: Option<String>,
    pub home: Option<bool>,
    pub ro: Option<bool>,
    pub browsable: Option<bool>,
    pub timemachine: Option<bool>,
    pub recyclebin: Option<bool>,
    pub guestok: Option<bool>,
    pub abe: Option<bool>,
    /// Sent as `aapl_name_mangling`.
    pub apple_encoding: Option<bool>,
    pub acl: Option<bool>,
    pub durablehandle: Option<bool>,
    pub shadowcopy: Option<bool>,
    pub streams: Option<bool>,
    pub fsrvp: Option<bool>,
}

impl SharingSmb {
    fn subject(&self) -> String {
        format!("SMB share {}", self.name)
    }

    fn flags(&self) -> [(&'static str, Option<bool>); 14] {
        [
            ("enabled", self.enabled),
            ("home", self.home),
            ("ro", self.ro),
            ("browsable", self.browsable),
            ("timemachine", self.timemachine),
            ("recyclebin", self.recyclebin),
            ("guestok", self.guestok),
            ("abe", self.abe),
            ("aapl_name_mangling", self.apple_encoding),
            ("acl", self.acl),
            ("durablehandle", self.durablehandle),
            ("shadowcopy", self.shadowcopy),
            ("streams", self.streams),
            ("fsrvp", self.fsrvp),
        ]
    }

    fn purpose(&self) -> Option<&'static str> {
        self.purpose.map(Into::into)
    }

    fn create_payload(&self) -> Map<String, Value> {
        let mut payload = Map::new();
        payload.insert("path".into(), json!(self.path));
        payload.insert("name".into(), json!(self.name));
        put(&mut payload, "purpose", self.purpose());
        put(&mut payload, "hostsallow", self.hostsallow.as_deref().map(string_list));
        put(&mut payload, "hostsdeny", self.hostsdeny.as_deref().map(string_list));
        put(&mut payload, "path_suffix", self.path_suffix.clone());
        put(&mut payload, "comment", self.comment.clone());
        put(&mut payload, "auxsmbconf", self.auxsmbconf.clone());
        for (field, value) in self.flags() {
            put(&mut payload, field, value);
        }
        payload
    }

    fn plan_with(&self, observed: Option<&Value>) -> Result<Plan, CoreError> {
        let mut plan = Plan::new(self.subject());
        match (observed, self.state) {
            (None, Presence::Absent) => Ok(Plan::unchanged(self.subject(), None)),
            (None, Presence::Present) => {
                let payload = self.create_payload();
                plan.act(Verb::Created);
                plan.push_state(Step::call("sharing.smb.create", [Value::Object(payload.clone())]));
                Ok(plan.with_diff(payload.into_iter().collect()))
            }
            (Some(row), Presence::Present) => {
                let mut changes = Changes::against(row);
                changes
                    .scalar("name", Some(self.name.as_str()))
                    .scalar("purpose", self.purpose())
                    .set("hostsallow", self.hostsallow.as_deref())
                    .set("hostsdeny", self.hostsdeny.as_deref())
                    .scalar("path_suffix", self.path_suffix.as_deref())
                    .scalar("comment", self.comment.as_deref())
                    .scalar("auxsmbconf", self.auxsmbconf.as_deref());
                for (field, value) in self.flags() {
                    changes.scalar(field, value);
                }
                if changes.is_empty() {
                    return Ok(Plan::unchanged(self.subject(), Some(row)));
                }
                let diff = changes.into_diff();
                let id = row_id("sharing.smb.query", row)?;
                plan.act(Verb::Updated);
                plan.push_state(Step::call(
                    "sharing.smb.update",
                    [id, Value::Object(diff.clone().into_iter().collect())],
                ));
                Ok(plan.with_diff(diff))
            }
            (Some(row), Presence::Absent) => {
                let id = row_id("sharing.smb.query", row)?;
                plan.act(Verb::Deleted);
                plan.push(Step::call("sharing.smb.delete", [id]));
                Ok(plan)
            }
        }
    }
}

#[async_trait]
impl Reconciler for SharingSmb {
    fn kind(&self) -> ResourceKind {
        ResourceKind::SharingSmb
    }

    fn validate(&self) -> Result<(), CoreError> {
        if self.path.is_empty() || self.name.is_empty() {
            return Err(CoreError::validation("path and name must not be empty"));
        }
        Ok(())
    }

    async fn observe(&self, session: &Session) -> Result<Option<Value>, CoreError> {
        session
            .middleware()
            .query_one("sharing.smb.query", "path", self.path.as_str())
            .await
    }

    async fn plan(&self, _session: &Session, observed: Option<&Value>) -> Result<Plan, CoreError> {
        self.plan_with(observed)
    }
}

// ── Tests ────────────────────────────────────────────────────────────
