// ── iocage jails ──
//
// `Jail` manages one jail's existence and run state. `Jails` activates
// the pool iocage keeps its jails on.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value, json};

use super::ResourceKind;
use crate::error::CoreError;
use crate::reconcile::diff::put;
use crate::reconcile::{Plan, Reconciler, Step, Verb};
use crate::session::Session;

/// Run state reported by `jail.query` for a running jail.
pub(crate) const UP: &str = "up";

/// Whether a `jail.query` row describes a running jail.
pub(crate) fn is_up(row: &Value) -> bool {
    row.get("state").and_then(Value::as_str) == Some(UP)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JailState {
    #[default]
    Present,
    Absent,
    Running,
    Stopped,
    Restarted,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Jail {
    pub name: String,
    #[serde(default)]
    pub state: JailState,
    /// FreeBSD release to create from (`13.2-RELEASE`).
    pub release: Option<String>,
    #[serde(alias = "pkglist")]
    pub packages: Option<Vec<String>>,
}

impl Jail {
    fn subject(&self) -> String {
        format!("jail {}", self.name)
    }

    fn plan_with(&self, observed: Option<&Value>) -> Result<Plan, CoreError> {
        let name = json!(self.name);
        let mut plan = Plan::new(self.subject());

        let Some(row) = observed else {
            if self.state == JailState::Absent {
                return Ok(Plan::unchanged(self.subject(), None));
            }
            let release = self.release.as_ref().ok_or_else(|| {
                CoreError::validation(format!("release is required to create jail {}", self.name))
            })?;
            let mut payload = Map::new();
            payload.insert("uuid".into(), name.clone());
            payload.insert("release".into(), json!(release));
            put(&mut payload, "pkglist", self.packages.clone());

            plan.act(Verb::Created);
            plan.push_state(Step::job("jail.create", [Value::Object(payload.clone())]));
            if matches!(self.state, JailState::Running | JailState::Restarted) {
                plan.act(Verb::Started);
                plan.push(Step::job("jail.start", [name]));
            }
            return Ok(plan.with_diff(payload.into_iter().collect()));
        };

        match self.state {
            JailState::Absent => {
                if is_up(row) {
                    plan.act(Verb::Stopped);
                    plan.push(Step::job("jail.stop", [name.clone()]));
                }
                plan.act(Verb::Deleted);
                plan.push(Step::call("jail.delete", [name]));
            }
            JailState::Present => {}
            JailState::Running if !is_up(row) => {
                plan.act(Verb::Started);
                plan.push(Step::job("jail.start", [name]));
            }
            JailState::Stopped if is_up(row) => {
                plan.act(Verb::Stopped);
                plan.push(Step::job("jail.stop", [name]));
            }
            JailState::Running | JailState::Stopped => {}
            JailState::Restarted => {
                plan.act(Verb::Restarted);
                plan.push(Step::job("jail.restart", [name]));
            }
        }

        if plan.is_noop() {
            return Ok(Plan::unchanged(self.subject(), Some(row)));
        }
        Ok(plan)
    }
}

#[async_trait]
impl Reconciler for Jail {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Jail
    }

    fn validate(&self) -> Result<(), CoreError> {
        if self.name.is_empty() {
            return Err(CoreError::validation("name must not be empty"));
        }
        Ok(())
    }

    async fn observe(&self, session: &Session) -> Result<Option<Value>, CoreError> {
        session
            .middleware()
            .query_one("jail.query", "id", self.name.as_str())
            .await
    }

    async fn plan(&self, _session: &Session, observed: Option<&Value>) -> Result<Plan, CoreError> {
        self.plan_with(observed)
    }
}

// ── Jail pool activation ─────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Jails {
    /// Pool that should hold the iocage dataset.
    pub pool: Option<String>,
}

impl Jails {
    fn plan_with(&self, observed: &Value) -> Plan {
        let active = observed.get("pool").and_then(Value::as_str);
        match &self.pool {
            Some(pool) if active != Some(pool.as_str()) => {
                let mut plan = Plan::new(format!("jail pool {pool}"));
                plan.act(Verb::Activated);
                plan.push(Step::expect("jail.activate", [json!(pool)], json!(true)));
                plan.state = Some(json!({"pool": pool}));
                plan
            }
            _ => Plan::unchanged(
                format!("jail pool {}", active.unwrap_or("(none)")),
                Some(observed),
            ),
        }
    }
}

#[async_trait]
impl Reconciler for Jails {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Jails
    }

    async fn observe(&self, session: &Session) -> Result<Option<Value>, CoreError> {
        let active = session
            .middleware()
            .call_str("jail.get_activated_pool", &[])
            .await?;
        Ok(Some(json!({"pool": active})))
    }

    async fn plan(&self, _session: &Session, observed: Option<&Value>) -> Result<Plan, CoreError> {
        Ok(observed.map_or_else(|| Plan::new("jail pool"), |row| self.plan_with(row)))
    }
}

// ── Tests ────────────────────────────────────────────────────────────
