// ── Periodic snapshot tasks ──
//
// Snapshot tasks have no name of their own; `match` selects them by id,
// dataset, or naming-schema pattern. The first match is updated, and
// `state: absent` deletes every match.

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value, json};

use super::schedule::{Schedule, clock_time};
use super::{Presence, ResourceKind, row_id};
use crate::error::CoreError;
use crate::reconcile::diff::{Changes, canonical, put, string_list};
use crate::reconcile::{Plan, Reconciler, Step, Verb};
use crate::session::Session;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskMatch {
    pub id: Option<u64>,
    pub dataset: Option<String>,
    /// Regular expression matched against `naming_schema`.
    pub name_format: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, strum::IntoStaticStr)]
#[strum(serialize_all = "UPPERCASE")]
pub enum LifetimeUnit {
    #[serde(alias = "hour", alias = "hours", alias = "HOUR", alias = "HOURS")]
    Hour,
    #[serde(alias = "day", alias = "days", alias = "DAY", alias = "DAYS")]
    Day,
    #[serde(alias = "week", alias = "weeks", alias = "WEEK", alias = "WEEKS")]
    Week,
    #[serde(alias = "month", alias = "months", alias = "MONTH", alias = "MONTHS")]
    Month,
    #[serde(alias = "year", alias = "years", alias = "YEAR", alias = "YEARS")]
    Year,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PoolSnapshotTask {
    #[serde(rename = "match")]
    pub selector: TaskMatch,
    #[serde(default)]
    pub state: Presence,
    pub dataset: Option<String>,
    pub recursive: Option<bool>,
    pub lifetime_value: Option<u32>,
    pub lifetime_unit: Option<LifetimeUnit>,
    /// Sent as `naming_schema`.
    pub name_format: Option<String>,
    #[serde(alias = "begin")]
    pub begin_time: Option<String>,
    #[serde(alias = "end")]
    pub end_time: Option<String>,
    pub exclude: Option<Vec<String>>,
    pub allow_empty: Option<bool>,
    pub enabled: Option<bool>,
    pub minute: Option<String>,
    pub hour: Option<String>,
    #[serde(alias = "date", alias = "dom")]
    pub day: Option<String>,
    pub month: Option<String>,
    #[serde(alias = "dow")]
    pub weekday: Option<String>,
}

impl PoolSnapshotTask {
    fn subject(&self) -> String {
        let target = self
            .dataset
            .as_deref()
            .or(self.selector.dataset.as_deref())
            .unwrap_or("(matched)");
        format!("snapshot task for {target}")
    }

    fn filters(&self) -> Value {
        let mut filters = Vec::new();
        if let Some(id) = self.selector.id {
            filters.push(json!(["id", "=", id]));
        }
        if let Some(dataset) = &self.selector.dataset {
            filters.push(json!(["dataset", "=", dataset]));
        }
        if let Some(pattern) = &self.selector.name_format {
            filters.push(json!(["naming_schema", "~", pattern]));
        }
        Value::Array(filters)
    }

    fn schedule(&self) -> Result<Schedule, CoreError> {
        Ok(Schedule {
            minute: self.minute.clone(),
            hour: self.hour.clone(),
            dom: self.day.clone(),
            month: self.month.clone(),
            dow: self.weekday.clone(),
            begin: self.begin_time.as_deref().map(|t| clock_time("begin_time", t)).transpose()?,
            end: self.end_time.as_deref().map(|t| clock_time("end_time", t)).transpose()?,
        })
    }

    fn lifetime_unit(&self) -> Option<&'static str> {
        self.lifetime_unit.map(Into::into)
    }

    fn create_plan(&self) -> Result<Plan, CoreError> {
        let (Some(dataset), Some(recursive), Some(lifetime_value), Some(unit), Some(naming)) = (
            &self.dataset,
            self.recursive,
            self.lifetime_value,
            self.lifetime_unit(),
            &self.name_format,
        ) else {
            return Err(CoreError::validation(
                "dataset, recursive, lifetime_value, lifetime_unit and name_format are required to create a snapshot task",
            ));
        };

        let mut payload = Map::new();
        payload.insert("dataset".into(), json!(dataset));
        payload.insert("recursive".into(), json!(recursive));
        payload.insert("lifetime_value".into(), json!(lifetime_value));
        payload.insert("lifetime_unit".into(), json!(unit));
        payload.insert("naming_schema".into(), json!(naming));
        if recursive {
            put(&mut payload, "exclude", self.exclude.as_deref().map(string_list));
        }
        put(&mut payload, "allow_empty", self.allow_empty);
        put(&mut payload, "enabled", self.enabled);
        put(&mut payload, "schedule", self.schedule()?.payload());

        let mut plan = Plan::new(self.subject());
        plan.act(Verb::Created);
        plan.push_state(Step::call("pool.snapshottask.create", [Value::Object(payload.clone())]));
        Ok(plan.with_diff(payload.into_iter().collect()))
    }

    fn update_plan(&self, row: &Value) -> Result<Plan, CoreError> {
        let mut changes = Changes::against(row);
        changes
            .scalar("dataset", self.dataset.as_deref())
            .scalar("recursive", self.recursive)
            .scalar("lifetime_value", self.lifetime_value)
            .scalar("lifetime_unit", self.lifetime_unit())
            .scalar("naming_schema", self.name_format.as_deref())
            .scalar("allow_empty", self.allow_empty)
            .scalar("enabled", self.enabled);

        let recursive = self
            .recursive
            .or_else(|| row.get("recursive").and_then(Value::as_bool))
            .unwrap_or_default();
        let have_exclude: BTreeSet<String> = changes
            .observed("exclude")
            .as_array()
            .into_iter()
            .flatten()
            .map(canonical)
            .collect();
        if recursive {
            changes.set("exclude", self.exclude.as_deref());
        } else if !have_exclude.is_empty() {
            changes.insert("exclude", json!([]));
        }

        if let Some(schedule) = self.schedule()?.changes(changes.observed("schedule")) {
            changes.insert("schedule", schedule);
        }
        if changes.is_empty() {
            return Ok(Plan::unchanged(self.subject(), Some(row)));
        }
        let diff = changes.into_diff();
        let mut plan = Plan::new(self.subject());
        plan.act(Verb::Updated);
        plan.push_state(Step::call(
            "pool.snapshottask.update",
            [
                row_id("pool.snapshottask.query", row)?,
                Value::Object(diff.clone().into_iter().collect()),
            ],
        ));
        Ok(plan.with_diff(diff))
    }

    fn plan_with(&self, observed: Option<&Value>) -> Result<Plan, CoreError> {
        let tasks = observed
            .and_then(|o| o.get("tasks"))
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();

        match (tasks.first(), self.state) {
            (None, Presence::Absent) => Ok(Plan::unchanged(self.subject(), None)),
            (None, Presence::Present) => self.create_plan(),
            (Some(first), Presence::Present) => self.update_plan(first),
            (Some(_), Presence::Absent) => {
                let mut plan = Plan::new(self.subject());
                for task in tasks {
                    let id = row_id("pool.snapshottask.query", task)?;
                    plan.act_on(Verb::Deleted, format!("snapshot task {id}"));
                    plan.push(Step::call("pool.snapshottask.delete", [id]));
                }
                Ok(plan)
            }
        }
    }
}

#[async_trait]
impl Reconciler for PoolSnapshotTask {
    fn kind(&self) -> ResourceKind {
        ResourceKind::PoolSnapshotTask
    }

    fn validate(&self) -> Result<(), CoreError> {
        let m = &self.selector;
        if m.id.is_none() && m.dataset.is_none() && m.name_format.is_none() {
            return Err(CoreError::validation("match needs at least one of id, dataset or name_format"));
        }
        self.schedule().map(|_| ())
    }

    async fn observe(&self, session: &Session) -> Result<Option<Value>, CoreError> {
        let tasks = session
            .middleware()
            .query("pool.snapshottask.query", self.filters())
            .await?;
        Ok((!tasks.is_empty()).then(|| json!({"tasks": tasks})))
    }

    async fn plan(&self, _session: &Session, observed: Option<&Value>) -> Result<Plan, CoreError> {
        self.plan_with(observed)
    }
}

// ── Tests ────────────────────────────────────────────────────────────
