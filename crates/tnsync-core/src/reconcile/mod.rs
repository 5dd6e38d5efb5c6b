// ── Reconcile engine ──
//
// Every resource goes through the same loop: validate the desired spec,
// observe the current state, plan the steps that converge it, then either
// execute the plan or (in check mode) just report it.

pub mod diff;
pub mod plan;
pub mod report;
pub mod subresource;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::error::CoreError;
use crate::resources::ResourceKind;
use crate::session::Session;

pub use diff::{Changes, Diff};
pub use plan::{Action, Arg, Plan, Step, StepKind, Verb};
pub use report::{ChangeReport, Invocation};

/// Whether planned steps are executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Apply,
    /// Plan only; no mutating call is made.
    Check,
}

/// One resource type's reconciliation logic.
#[async_trait]
pub trait Reconciler: Send + Sync {
    fn kind(&self) -> ResourceKind;

    /// Reject conflicting or missing parameters before any remote call.
    fn validate(&self) -> Result<(), CoreError> {
        Ok(())
    }

    /// Current state of the resource, or `None` if it does not exist.
    async fn observe(&self, session: &Session) -> Result<Option<Value>, CoreError>;

    /// Steps that take `observed` to the desired state. Read-only.
    async fn plan(&self, session: &Session, observed: Option<&Value>) -> Result<Plan, CoreError>;
}

/// Run one reconciliation end to end.
#[instrument(skip_all, fields(kind = %reconciler.kind()))]
pub async fn converge(
    reconciler: &dyn Reconciler,
    session: &Session,
    mode: Mode,
) -> Result<ChangeReport, CoreError> {
    reconciler.validate()?;

    let observed = reconciler.observe(session).await?;
    debug!(found = observed.is_some(), "observed current state");

    let plan = reconciler.plan(session, observed.as_ref()).await?;
    let check = mode == Mode::Check;

    let invocations = plan
        .steps
        .iter()
        .map(|s| Invocation {
            method: s.method.clone(),
            args: s.preview(),
        })
        .collect();

    let state = if check || plan.is_noop() {
        plan.state.clone()
    } else {
        let results = execute(&plan, session).await?;
        plan.state_from
            .and_then(|i| results.into_iter().nth(i))
            .or_else(|| plan.state.clone())
    };

    Ok(ChangeReport {
        changed: !plan.is_noop(),
        msg: plan.message(check),
        state,
        diff: plan.diff,
        warnings: plan.warnings,
        invocations,
    }
    .redacted())
}

/// Execute every step in order, stopping at the first failure.
async fn execute(plan: &Plan, session: &Session) -> Result<Vec<Value>, CoreError> {
    let mut results: Vec<Value> = Vec::with_capacity(plan.steps.len());
    let mut completed: Vec<String> = Vec::new();

    for step in &plan.steps {
        let args = resolve_args(step, &results)?;
        info!(method = %step.method, subject = %plan.subject, "applying");
        let result = run_step(step, &args, session, &completed).await?;
        completed.push(step.method.clone());
        results.push(result);
    }
    Ok(results)
}

fn resolve_args(step: &Step, results: &[Value]) -> Result<Vec<Value>, CoreError> {
    step.args
        .iter()
        .map(|arg| match arg {
            Arg::Value(v) => Ok(v.clone()),
            Arg::FromStep { step: idx, pointer } => results
                .get(*idx)
                .and_then(|r| r.pointer(pointer))
                .cloned()
                .ok_or_else(|| {
                    CoreError::unexpected(
                        step.method.clone(),
                        format!("no {pointer} in the result of step {idx}"),
                    )
                }),
        })
        .collect()
}

async fn run_step(
    step: &Step,
    args: &[Value],
    session: &Session,
    completed: &[String],
) -> Result<Value, CoreError> {
    let mw = session.middleware();
    let wrap = |e: tnsync_api::Error| CoreError::mutation(&step.method, completed.to_vec(), e);

    match &step.kind {
        StepKind::Call => mw.call_raw(&step.method, args).await.map_err(wrap),
        StepKind::Job => mw.job_raw(&step.method, args).await.map_err(wrap),
        StepKind::Expect(expected) => {
            let got = mw.call_raw(&step.method, args).await.map_err(wrap)?;
            if got == *expected {
                Ok(got)
            } else {
                Err(CoreError::Mutation {
                    method: step.method.clone(),
                    completed: completed.to_vec(),
                    message: format!("expected {expected}, got {got}"),
                })
            }
        }
        StepKind::Settle {
            pointer,
            pending,
            target,
        } => loop {
            let got = mw.call_raw(&step.method, args).await.map_err(wrap)?;
            let current = got.pointer(pointer).and_then(Value::as_str).unwrap_or_default();
            if pending.iter().any(|p| p == current) {
                debug!(method = %step.method, state = current, "waiting");
                tokio::time::sleep(session.poll_interval()).await;
                continue;
            }
            if let Some(target) = target.as_deref().filter(|t| *t != current) {
                return Err(CoreError::Mutation {
                    method: step.method.clone(),
                    completed: completed.to_vec(),
                    message: format!("ended in state {current:?}, expected {target}"),
                });
            }
            break Ok(got);
        },
    }
}
