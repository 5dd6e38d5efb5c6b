// ── Pool scrub tasks ──
//
// One scrub schedule per pool, found by pool name. Creating one needs the
// pool's numeric id.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value, json};

use super::schedule::Schedule;
use super::{Presence, ResourceKind, row_id};
use crate::error::CoreError;
use crate::reconcile::diff::{Changes, put};
use crate::reconcile::{Plan, Reconciler, Step, Verb};
use crate::session::Session;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PoolScrubTask {
    pub pool: String,
    pub description: Option<String>,
    /// Days since the last scrub before another one runs.
    pub threshold: Option<u32>,
    pub enabled: Option<bool>,
    #[serde(default)]
    pub state: Presence,
    pub minute: Option<String>,
    pub hour: Option<String>,
    #[serde(alias = "date", alias = "dom")]
    pub day: Option<String>,
    pub month: Option<String>,
    #[serde(alias = "dow")]
    pub weekday: Option<String>,
}

impl PoolScrubTask {
    fn subject(&self) -> String {
        format!("scrub task for pool {}", self.pool)
    }

    fn schedule(&self) -> Schedule {
        Schedule {
            minute: self.minute.clone(),
            hour: self.hour.clone(),
            dom: self.day.clone(),
            month: self.month.clone(),
            dow: self.weekday.clone(),
            ..Schedule::default()
        }
    }

    fn create_plan(&self, pool_id: Value) -> Plan {
        let mut payload = Map::new();
        payload.insert("pool".into(), pool_id);
        put(&mut payload, "description", self.description.clone());
        put(&mut payload, "threshold", self.threshold);
        put(&mut payload, "enabled", self.enabled);
        put(&mut payload, "schedule", self.schedule().payload());

        let mut plan = Plan::new(self.subject());
        plan.act(Verb::Created);
        plan.push_state(Step::call("pool.scrub.create", [Value::Object(payload.clone())]));
        plan.with_diff(payload.into_iter().collect())
    }

    fn update_plan(&self, row: &Value) -> Result<Plan, CoreError> {
        let mut changes = Changes::against(row);
        changes
            .scalar("description", self.description.as_deref())
            .scalar("threshold", self.threshold)
            .scalar("enabled", self.enabled);
        if let Some(schedule) = self.schedule().changes(changes.observed("schedule")) {
            changes.insert("schedule", schedule);
        }
        if changes.is_empty() {
            return Ok(Plan::unchanged(self.subject(), Some(row)));
        }
        let diff = changes.into_diff();
        let mut plan = Plan::new(self.subject());
        plan.act(Verb::Updated);
        plan.push_state(Step::call(
            "pool.scrub.update",
            [
                row_id("pool.scrub.query", row)?,
                Value::Object(diff.clone().into_iter().collect()),
            ],
        ));
        Ok(plan.with_diff(diff))
    }
}

#[async_trait]
impl Reconciler for PoolScrubTask {
    fn kind(&self) -> ResourceKind {
        ResourceKind::PoolScrubTask
    }

    fn validate(&self) -> Result<(), CoreError> {
        if self.pool.is_empty() {
            return Err(CoreError::validation("pool must not be empty"));
        }
        Ok(())
    }

    async fn observe(&self, session: &Session) -> Result<Option<Value>, CoreError> {
        session
            .middleware()
            .query_one("pool.scrub.query", "pool_name", self.pool.as_str())
            .await
    }

    async fn plan(&self, session: &Session, observed: Option<&Value>) -> Result<Plan, CoreError> {
        match (observed, self.state) {
            (None, Presence::Absent) => Ok(Plan::unchanged(self.subject(), None)),
            (None, Presence::Present) => {
                let pool = session
                    .middleware()
                    .query_one("pool.query", "name", self.pool.as_str())
                    .await?
                    .ok_or_else(|| CoreError::not_found("pool", self.pool.as_str()))?;
                Ok(self.create_plan(row_id("pool.query", &pool)?))
            }
            (Some(row), Presence::Present) => self.update_plan(row),
            (Some(row), Presence::Absent) => {
                let mut plan = Plan::new(self.subject());
                plan.act(Verb::Deleted);
                plan.push(Step::call("pool.scrub.delete", [row_id("pool.scrub.query", row)?]));
                Ok(plan)
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn task(spec: Value) -> PoolScrubTask {
        serde_json::from_value(spec).unwrap_or_else(|e| panic!("{e}"))
    }

    #[test]
    fn create_uses_pool_id() {
        let t = task(json!({"pool": "tank", "threshold": 35, "hour": "0", "weekday": "7"}));
        let plan = t.create_plan(json!(1));
        assert_eq!(
            plan.steps[0].preview(),
            json!([{"pool": 1, "threshold": 35, "schedule": {"hour": "0", "dow": "7"}}])
        );
    }

    #[test]
    fn schedule_update_carries_only_changes() {
        let row = json!({
            "id": 1, "pool": 1, "pool_name": "tank", "threshold": 35, "enabled": true,
            "schedule": {"minute": "00", "hour": "00", "dom": "*", "month": "*", "dow": "7"}
        });
        let t = task(json!({"pool": "tank", "threshold": 35, "hour": "03", "dow": "7"}));
        let plan = t.update_plan(&row).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(plan.steps[0].preview(), json!([1, {"schedule": {"hour": "03"}}]));

        let t = task(json!({"pool": "tank", "enabled": true, "minute": "00"}));
        assert!(t.update_plan(&row).unwrap_or_else(|e| panic!("{e}")).is_noop());
    }
}
