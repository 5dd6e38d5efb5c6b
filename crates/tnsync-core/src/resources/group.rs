// Local groups, keyed by name.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value, json};

use super::{Presence, ResourceKind, row_id};
use crate::dialect::Capabilities;
use crate::error::CoreError;
use crate::reconcile::diff::{Changes, put};
use crate::reconcile::{Plan, Reconciler, Step, Verb};
use crate::session::Session;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Group {
    pub name: String,
    pub gid: Option<u32>,
    /// Allow `gid` to collide with another group's.
    #[serde(default)]
    pub non_unique: bool,
    #[serde(default)]
    pub state: Presence,
}

impl Group {
    fn subject(&self) -> String {
        format!("group {}", self.name)
    }

    /// `allow_duplicate_gid` to send, if this daemon still takes it.
    fn duplicate_flag(&self, caps: Capabilities) -> Option<bool> {
        caps.allow_duplicate_gid.then_some(self.non_unique)
    }

    fn plan_with(&self, caps: Capabilities, observed: Option<&Value>) -> Result<Plan, CoreError> {
        match (observed, self.state) {
            (None, Presence::Absent) => Ok(Plan::unchanged(self.subject(), None)),

            (None, Presence::Present) => {
                let mut payload = Map::new();
                payload.insert("name".into(), json!(self.name));
                put(&mut payload, "gid", self.gid);
                put(&mut payload, "allow_duplicate_gid", self.duplicate_flag(caps));

                let mut plan = Plan::new(self.subject());
                plan.act(Verb::Created);
                plan.push_state(Step::call("group.create", [Value::Object(payload.clone())]));
                Ok(plan.with_diff(payload.into_iter().collect()))
            }

            (Some(row), Presence::Present) => {
                let mut changes = Changes::against(row);
                changes.scalar("gid", self.gid);
                if changes.is_empty() {
                    return Ok(Plan::unchanged(self.subject(), Some(row)));
                }
                if let Some(flag) = self.duplicate_flag(caps) {
                    changes.insert("allow_duplicate_gid", flag);
                }
                let diff = changes.into_diff();
                let id = row_id("group.query", row)?;

                let mut plan = Plan::new(self.subject());
                plan.act(Verb::Updated);
                plan.push(Step::call(
                    "group.update",
                    [id, Value::Object(diff.clone().into_iter().collect())],
                ));
                Ok(plan.with_diff(diff))
            }

            (Some(row), Presence::Absent) => {
                let id = row_id("group.query", row)?;
                let mut plan = Plan::new(self.subject());
                plan.act(Verb::Deleted);
                plan.push(Step::call("group.delete", [id]));
                Ok(plan)
            }
        }
    }
}

#[async_trait]
impl Reconciler for Group {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Group
    }

    fn validate(&self) -> Result<(), CoreError> {
        if self.non_unique && self.gid.is_none() {
            return Err(CoreError::validation("non_unique requires gid"));
        }
        Ok(())
    }

    async fn observe(&self, session: &Session) -> Result<Option<Value>, CoreError> {
        session
            .middleware()
            .query_one("group.query", "group", self.name.as_str())
            .await
    }

    async fn plan(&self, session: &Session, observed: Option<&Value>) -> Result<Plan, CoreError> {
        let caps = session.capabilities().await?;
        self.plan_with(caps, observed)
    }
}

// ── Tests ────────────────────────────────────────────────────────────
