// ── S.M.A.R.T. test tasks ──
//
// Periodic disk self-tests keyed by description. Disks are given by
// device name (`ada0`) and sent as identifiers; `ALL` selects every disk.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value, json};

use super::schedule::Schedule;
use super::{Presence, ResourceKind, row_id};
use crate::error::CoreError;
use crate::middleware::Middleware;
use crate::reconcile::diff::{Diff, canonical};
use crate::reconcile::{Plan, Reconciler, Step, Verb};
use crate::session::Session;

const ALL_DISKS: &str = "ALL";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, strum::IntoStaticStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "UPPERCASE")]
pub enum TestType {
    #[serde(alias = "LONG")]
    Long,
    #[serde(alias = "SHORT")]
    Short,
    #[serde(alias = "CONVEYANCE")]
    Conveyance,
    #[serde(alias = "OFFLINE")]
    Offline,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SmartTestTask {
    /// Task description, used as its name.
    pub name: String,
    pub test: Option<TestType>,
    #[serde(default)]
    pub state: Presence,
    #[serde(default, alias = "discs")]
    pub disks: Vec<String>,
    pub hour: Option<String>,
    #[serde(alias = "date", alias = "dom")]
    pub day: Option<String>,
    pub month: Option<String>,
    #[serde(alias = "dow")]
    pub weekday: Option<String>,
}

/// Disk selection after device names have been resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Disks {
    All,
    Listed(Vec<String>),
}

impl SmartTestTask {
    fn subject(&self) -> String {
        format!("S.M.A.R.T. test task {}", self.name)
    }

    fn schedule(&self) -> Schedule {
        Schedule {
            hour: self.hour.clone(),
            dom: self.day.clone(),
            month: self.month.clone(),
            dow: self.weekday.clone(),
            ..Schedule::default()
        }
    }

    fn test_type(&self) -> Option<&'static str> {
        self.test.map(Into::into)
    }

    async fn resolve_disks(&self, mw: &Middleware) -> Result<Disks, CoreError> {
        if self.disks.iter().any(|d| d == ALL_DISKS) {
            return Ok(Disks::All);
        }
        let mut ids = Vec::with_capacity(self.disks.len());
        for disk in &self.disks {
            ids.push(mw.call_str("disk.device_to_identifier", &[json!(disk)]).await?);
        }
        Ok(Disks::Listed(ids))
    }

    fn create_plan(&self, disks: &Disks) -> Plan {
        let mut payload = Map::new();
        payload.insert("desc".into(), json!(self.name));
        match disks {
            Disks::All => payload.insert("all_disks".into(), json!(true)),
            Disks::Listed(ids) => payload.insert("disks".into(), json!(ids)),
        };
        if let Some(test) = self.test_type() {
            payload.insert("type".into(), json!(test));
        }
        if let Some(schedule) = self.schedule().payload() {
            payload.insert("schedule".into(), schedule);
        }

        let mut plan = Plan::new(self.subject());
        plan.act(Verb::Created);
        plan.push_state(Step::call("smart.test.create", [Value::Object(payload.clone())]));
        plan.with_diff(payload.into_iter().collect())
    }

    fn update_diff(&self, row: &Value, disks: &Disks) -> Diff {
        let mut diff = Diff::new();
        let all = row.get("all_disks").and_then(Value::as_bool).unwrap_or_default();
        match disks {
            Disks::All if !all => {
                diff.insert("all_disks".into(), json!(true));
            }
            Disks::All => {}
            Disks::Listed(ids) => {
                let have: std::collections::BTreeSet<String> = row
                    .get("disks")
                    .and_then(Value::as_array)
                    .into_iter()
                    .flatten()
                    .map(canonical)
                    .collect();
                let want: std::collections::BTreeSet<String> = ids.iter().cloned().collect();
                if all {
                    diff.insert("all_disks".into(), json!(false));
                }
                if all || have != want {
                    diff.insert("disks".into(), json!(ids));
                }
            }
        }
        if let Some(test) = self.test_type() {
            if row.get("type").and_then(Value::as_str) != Some(test) {
                diff.insert("type".into(), json!(test));
            }
        }
        let observed = row.get("schedule").unwrap_or(&Value::Null);
        if let Some(schedule) = self.schedule().changes(observed) {
            diff.insert("schedule".into(), schedule);
        }
        diff
    }

    fn plan_with(&self, observed: Option<&Value>, disks: Option<&Disks>) -> Result<Plan, CoreError> {
        match (observed, self.state, disks) {
            (None, Presence::Absent, _) => Ok(Plan::unchanged(self.subject(), None)),
            (Some(row), Presence::Absent, _) => {
                let mut plan = Plan::new(self.subject());
                plan.act(Verb::Deleted);
                plan.push(Step::call("smart.test.delete", [row_id("smart.test.query", row)?]));
                Ok(plan)
            }
            (_, Presence::Present, None) => Err(CoreError::validation("disks were not resolved")),
            (None, Presence::Present, Some(disks)) => Ok(self.create_plan(disks)),
            (Some(row), Presence::Present, Some(disks)) => {
                let diff = self.update_diff(row, disks);
                if diff.is_empty() {
                    return Ok(Plan::unchanged(self.subject(), Some(row)));
                }
                let mut plan = Plan::new(self.subject());
                plan.act(Verb::Updated);
                plan.push_state(Step::call(
                    "smart.test.update",
                    [
                        row_id("smart.test.query", row)?,
                        Value::Object(diff.clone().into_iter().collect()),
                    ],
                ));
                Ok(plan.with_diff(diff))
            }
        }
    }
}

#[async_trait]
impl Reconciler for SmartTestTask {
    fn kind(&self) -> ResourceKind {
        ResourceKind::SmartTestTask
    }

    fn validate(&self) -> Result<(), CoreError> {
        if self.state == Presence::Present {
            if self.disks.is_empty() {
                return Err(CoreError::validation("disks must list at least one disk or ALL"));
            }
            if self.schedule() == Schedule::default() {
                return Err(CoreError::validation(
                    "one of hour, day, month or weekday is required",
                ));
            }
        }
        Ok(())
    }

    async fn observe(&self, session: &Session) -> Result<Option<Value>, CoreError> {
        session
            .middleware()
            .query_one("smart.test.query", "desc", self.name.as_str())
            .await
    }

    async fn plan(&self, session: &Session, observed: Option<&Value>) -> Result<Plan, CoreError> {
        let disks = match self.state {
            Presence::Present => Some(self.resolve_disks(session.middleware()).await?),
            Presence::Absent => None,
        };
        self.plan_with(observed, disks.as_ref())
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn task(spec: Value) -> SmartTestTask {
        serde_json::from_value(spec).unwrap_or_else(|e| panic!("{e}"))
    }

    #[test]
    fn create_all_disks() {
        let t = task(json!({"name": "weekly", "test": "long", "disks": ["ALL"], "dow": "0", "hour": "2"}));
        let plan = t.plan_with(None, Some(&Disks::All)).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(
            plan.steps[0].preview(),
            json!([{"desc": "weekly", "all_disks": true, "type": "LONG", "schedule": {"hour": "2", "dow": "0"}}])
        );
    }

    #[test]
    fn switching_off_all_disks_sends_list() {
        let row = json!({
            "id": 2, "desc": "weekly", "all_disks": true, "disks": [], "type": "LONG",
            "schedule": {"hour": "2", "dom": "*", "month": "*", "dow": "0"}
        });
        let t = task(json!({"name": "weekly", "disks": ["ada0"], "hour": "2"}));
        let disks = Disks::Listed(vec!["{serial}WD-1234".into()]);
        let plan = t.plan_with(Some(&row), Some(&disks)).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(
            plan.steps[0].preview(),
            json!([2, {"all_disks": false, "disks": ["{serial}WD-1234"]}])
        );
    }

    #[test]
    fn same_disks_in_other_order() {
        let row = json!({
            "id": 2, "desc": "daily", "all_disks": false, "disks": ["b", "a"], "type": "SHORT",
            "schedule": {"hour": "*"}
        });
        let t = task(json!({"name": "daily", "test": "SHORT", "disks": ["ada0", "ada1"], "hour": "*"}));
        let disks = Disks::Listed(vec!["a".into(), "b".into()]);
        assert!(t.plan_with(Some(&row), Some(&disks)).unwrap_or_else(|e| panic!("{e}")).is_noop());
    }

    #[test]
    fn present_needs_a_schedule() {
        assert!(task(json!({"name": "x", "disks": ["ALL"]})).validate().is_err());
        assert!(task(json!({"name": "x", "disks": [], "state": "absent"})).validate().is_ok());
    }
}
