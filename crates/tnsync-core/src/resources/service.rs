// System services: run state and start-at-boot. Services cannot be
// created or deleted, so an unknown name is an error.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use super::ResourceKind;
use crate::error::CoreError;
use crate::reconcile::{Plan, Reconciler, Step, Verb};
use crate::session::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    Started,
    Stopped,
    Restarted,
    Reloaded,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Service {
    /// Service name as in `service.query` (`nfs`, `ssh`, `cifs`).
    pub name: String,
    pub state: Option<ServiceState>,
    /// Start at boot.
    pub enabled: Option<bool>,
    /// Also act on the standby controller of an HA pair.
    pub ha_propagate: Option<bool>,
}

impl Service {
    fn subject(&self) -> String {
        format!("service {}", self.name)
    }

    fn control_args(&self) -> Vec<Value> {
        let mut args = vec![json!(self.name)];
        if let Some(ha) = self.ha_propagate {
            args.push(json!({"ha_propagate": ha}));
        }
        args
    }

    fn plan_with(&self, row: &Value) -> Plan {
        let running = row.get("state").and_then(Value::as_str);
        let mut plan = Plan::new(self.subject());

        let control = match self.state {
            Some(ServiceState::Started) if running != Some("RUNNING") => {
                Some((Verb::Started, "service.start"))
            }
            Some(ServiceState::Stopped) if running != Some("STOPPED") => {
                Some((Verb::Stopped, "service.stop"))
            }
            Some(ServiceState::Restarted) => Some((Verb::Restarted, "service.restart")),
            Some(ServiceState::Reloaded) => Some((Verb::Reloaded, "service.reload")),
            _ => None,
        };
        if let Some((verb, method)) = control {
            plan.act(verb);
            plan.push(Step::call(method, self.control_args()));
        }

        if let Some(enabled) = self.enabled {
            if row.get("enable").and_then(Value::as_bool) != Some(enabled) {
                plan.act(if enabled { Verb::Enabled } else { Verb::Disabled });
                plan.push(Step::call(
                    "service.update",
                    [json!(self.name), json!({"enable": enabled})],
                ));
                plan.diff.insert("enable".into(), json!(enabled));
            }
        }

        if plan.is_noop() {
            return Plan::unchanged(self.subject(), Some(row));
        }
        plan
    }
}

#[async_trait]
impl Reconciler for Service {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Service
    }

    fn validate(&self) -> Result<(), CoreError> {
        if self.state.is_none() && self.enabled.is_none() {
            return Err(CoreError::validation("one of state or enabled is required"));
        }
        Ok(())
    }

    async fn observe(&self, session: &Session) -> Result<Option<Value>, CoreError> {
        session
            .middleware()
            .query_one("service.query", "service", self.name.as_str())
            .await
    }

    async fn plan(&self, _session: &Session, observed: Option<&Value>) -> Result<Plan, CoreError> {
        let row = observed.ok_or_else(|| CoreError::not_found("service", self.name.as_str()))?;
        Ok(self.plan_with(row))
    }
}

// ── Tests ────────────────────────────────────────────────────────────
