// ── Catalog apps ──
//
// Apps are installed from a catalog train and configured through a free
// form `values` tree. Run-state transitions are jobs followed by polling
// `app.query` until the app leaves its transitional state.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value, json};

use super::ResourceKind;
use crate::error::CoreError;
use crate::reconcile::diff::Diff;
use crate::reconcile::{Plan, Reconciler, Step, Verb};
use crate::session::Session;

const RUNNING: &str = "RUNNING";
const STOPPED: &str = "STOPPED";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppState {
    #[default]
    Present,
    Absent,
    Running,
    Stopped,
    Restarted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, strum::IntoStaticStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Train {
    Community,
    Enterprise,
    #[default]
    Stable,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct App {
    pub name: String,
    /// Catalog app to install (`plex`).
    pub template: Option<String>,
    #[serde(default)]
    pub state: AppState,
    #[serde(default)]
    pub remove_ix_volumes: bool,
    #[serde(default)]
    pub train: Train,
    #[serde(default)]
    pub values: Map<String, Value>,
}

/// Whether merging `desired` into `current` would change anything. Only
/// keys present in `desired` are looked at.
pub fn would_change(current: &Value, desired: &Value) -> bool {
    let Value::Object(desired) = desired else {
        return current != desired;
    };
    let Value::Object(current) = current else {
        return true;
    };
    desired
        .iter()
        .any(|(key, want)| current.get(key).is_none_or(|have| would_change(have, want)))
}

impl App {
    fn subject(&self) -> String {
        format!("app {}", self.name)
    }

    fn query_args(&self) -> [Value; 1] {
        [json!([["name", "=", self.name]])]
    }

    /// Wait out `DEPLOYING` and require the app to be running.
    fn settle_running(&self) -> Step {
        Step::settle("app.query", self.query_args(), "/0/state", &["DEPLOYING"], Some(RUNNING))
    }

    fn settle_stopped(&self) -> Step {
        Step::settle("app.query", self.query_args(), "/0/state", &["STOPPING"], Some(STOPPED))
    }

    fn create_plan(&self) -> Result<Plan, CoreError> {
        let template = self.template.as_ref().ok_or_else(|| {
            CoreError::validation(format!("template is required to create {}", self.subject()))
        })?;
        let name = json!(self.name);
        let mut payload = Map::new();
        payload.insert("app_name".into(), name.clone());
        payload.insert("catalog_app".into(), json!(template));
        payload.insert("train".into(), json!(<&str>::from(self.train)));
        payload.insert("values".into(), Value::Object(self.values.clone()));

        let mut plan = Plan::new(self.subject());
        plan.act(Verb::Created);
        plan.push(Step::job("app.create", [Value::Object(payload.clone())]));
        plan.push_state(self.settle_running());
        if self.state == AppState::Stopped {
            plan.act(Verb::Stopped);
            plan.push(Step::job("app.stop", [name]));
            plan.push_state(self.settle_stopped());
        }
        Ok(plan.with_diff(payload.into_iter().collect()))
    }

    fn plan_with(&self, observed: Option<&Value>) -> Result<Plan, CoreError> {
        let Some(observed) = observed else {
            return match self.state {
                AppState::Absent => Ok(Plan::unchanged(self.subject(), None)),
                _ => self.create_plan(),
            };
        };
        let app = observed.get("app").unwrap_or(&Value::Null);
        let current = app.get("state").and_then(Value::as_str).unwrap_or_default();
        let name = json!(self.name);
        let mut plan = Plan::new(self.subject());

        match self.state {
            AppState::Absent => {
                plan.act(Verb::Deleted);
                plan.push(Step::job(
                    "app.delete",
                    [name, json!({"remove_ix_volumes": self.remove_ix_volumes})],
                ));
            }
            AppState::Stopped if current != STOPPED => {
                plan.act(Verb::Stopped);
                plan.push(Step::job("app.stop", [name]));
                plan.push_state(self.settle_stopped());
            }
            AppState::Stopped => {}
            AppState::Present | AppState::Running | AppState::Restarted => {
                let config = observed.get("config").unwrap_or(&Value::Null);
                let values = Value::Object(self.values.clone());
                if would_change(config, &values) {
                    plan.act(Verb::Updated);
                    plan.push(Step::job("app.update", [name.clone(), json!({"values": values})]));
                    let mut diff = Diff::new();
                    diff.insert("values".into(), values);
                    plan.diff = diff;
                }
                if self.state == AppState::Restarted {
                    plan.act(Verb::Restarted);
                    plan.push(Step::job("app.restart", [name.clone()]));
                }
                if current != RUNNING {
                    plan.act(Verb::Started);
                    plan.push(Step::job("app.start", [name]));
                }
                if !plan.is_noop() {
                    plan.push_state(self.settle_running());
                }
            }
        }

        if plan.is_noop() {
            return Ok(Plan::unchanged(self.subject(), Some(app)));
        }
        Ok(plan)
    }
}

#[async_trait]
impl Reconciler for App {
    fn kind(&self) -> ResourceKind {
        ResourceKind::App
    }

    fn validate(&self) -> Result<(), CoreError> {
        if self.name.is_empty() {
            return Err(CoreError::validation("name must not be empty"));
        }
        Ok(())
    }

    async fn observe(&self, session: &Session) -> Result<Option<Value>, CoreError> {
        let mw = session.middleware();
        let Some(app) = mw.query_one("app.query", "name", self.name.as_str()).await? else {
            return Ok(None);
        };
        let config = match self.state {
            AppState::Absent | AppState::Stopped => Value::Null,
            _ => mw.call("app.config", &[json!(self.name)]).await?,
        };
        Ok(Some(json!({"app": app, "config": config})))
    }

    async fn plan(&self, _session: &Session, observed: Option<&Value>) -> Result<Plan, CoreError> {
        self.plan_with(observed)
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::reconcile::StepKind;

    fn app(spec: Value) -> App {
        serde_json::from_value(spec).unwrap_or_else(|e| panic!("{e}"))
    }

    fn methods(plan: &Plan) -> Vec<&str> {
        plan.steps.iter().map(|s| s.method.as_str()).collect()
    }

    fn observed(state: &str, config: Value) -> Value {
        json!({"app": {"name": "plex", "state": state}, "config": config})
    }

    #[test]
    fn merge_detection() {
        let current = json!({"network": {"web_port": 32400, "host_network": false}, "tz": "UTC"});
        assert!(!would_change(&current, &json!({"network": {"web_port": 32400}})));
        assert!(would_change(&current, &json!({"network": {"web_port": 32401}})));
        assert!(would_change(&current, &json!({"storage": {}})));
        assert!(would_change(&json!("x"), &json!({"a": 1})));
    }

    #[test]
    fn create_waits_for_deploy() {
        let plan = app(json!({"name": "plex", "template": "plex", "values": {"tz": "UTC"}}))
            .plan_with(None)
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(methods(&plan), ["app.create", "app.query"]);
        assert_eq!(
            plan.steps[0].preview(),
            json!([{"app_name": "plex", "catalog_app": "plex", "train": "stable", "values": {"tz": "UTC"}}])
        );
        assert!(matches!(
            &plan.steps[1].kind,
            StepKind::Settle { pending, target, .. } if pending == &["DEPLOYING"] && target.as_deref() == Some("RUNNING")
        ));
    }

    #[test]
    fn running_app_with_same_values_is_noop() {
        let a = app(json!({"name": "plex", "state": "running", "values": {"tz": "UTC"}}));
        let plan = a.plan_with(Some(&observed("RUNNING", json!({"tz": "UTC"})))).unwrap_or_else(|e| panic!("{e}"));
        assert!(plan.is_noop());
    }

    #[test]
    fn stopped_app_is_started() {
        let a = app(json!({"name": "plex", "state": "running"}));
        let plan = a.plan_with(Some(&observed("STOPPED", json!({})))).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(methods(&plan), ["app.start", "app.query"]);
    }

    #[test]
    fn stop_waits_for_stopping() {
        let a = app(json!({"name": "plex", "state": "stopped"}));
        let plan = a.plan_with(Some(&observed("RUNNING", Value::Null))).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(methods(&plan), ["app.stop", "app.query"]);
        assert!(a.plan_with(Some(&observed("STOPPED", Value::Null))).unwrap_or_else(|e| panic!("{e}")).is_noop());
    }

    #[test]
    fn delete_passes_volume_flag() {
        let a = app(json!({"name": "plex", "state": "absent", "remove_ix_volumes": true}));
        let plan = a.plan_with(Some(&observed("RUNNING", Value::Null))).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(plan.steps[0].preview(), json!(["plex", {"remove_ix_volumes": true}]));
    }
}
