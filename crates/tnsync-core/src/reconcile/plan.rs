// ── Plans ──
//
// A plan is the ordered list of remote steps a reconciler wants executed,
// plus the human-facing actions they add up to. Building a plan is
// read-only; nothing in this module talks to the daemon.

use serde::Serialize;
use serde_json::Value;

use super::diff::Diff;

/// What a plan does to its subject, for report messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display, strum::AsRefStr)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Verb {
    Created,
    Updated,
    Deleted,
    Started,
    Stopped,
    Restarted,
    Reloaded,
    Activated,
    Enabled,
    Disabled,
    Added,
    Replaced,
    Removed,
}

/// One entry in the report message: `created certificate cert1`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Action {
    pub verb: Verb,
    pub subject: String,
}

/// A positional argument, either literal or taken from an earlier result.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Value(Value),
    /// JSON pointer into the result of step `step` (`/id`).
    FromStep { step: usize, pointer: String },
}

impl From<Value> for Arg {
    fn from(v: Value) -> Self {
        Self::Value(v)
    }
}

impl Arg {
    pub fn from_step(step: usize, pointer: &str) -> Self {
        Self::FromStep {
            step,
            pointer: pointer.to_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StepKind {
    /// Plain `call`.
    Call,
    /// `job`, waiting for the job to finish.
    Job,
    /// `call`, failing unless the result equals the given value.
    Expect(Value),
    /// Poll the call until the value at `pointer` leaves `pending`, then
    /// require it to equal `target` when one is given.
    Settle {
        pointer: String,
        pending: Vec<String>,
        target: Option<String>,
    },
}

/// A single remote call in a plan.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub method: String,
    pub args: Vec<Arg>,
    pub kind: StepKind,
}

impl Step {
    pub fn new(method: &str, kind: StepKind, args: impl IntoIterator<Item = Arg>) -> Self {
        Self {
            method: method.to_owned(),
            args: args.into_iter().collect(),
            kind,
        }
    }

    pub fn call(method: &str, args: impl IntoIterator<Item = Value>) -> Self {
        Self::new(method, StepKind::Call, args.into_iter().map(Arg::Value))
    }

    pub fn job(method: &str, args: impl IntoIterator<Item = Value>) -> Self {
        Self::new(method, StepKind::Job, args.into_iter().map(Arg::Value))
    }

    pub fn expect(method: &str, args: impl IntoIterator<Item = Value>, expected: Value) -> Self {
        Self::new(method, StepKind::Expect(expected), args.into_iter().map(Arg::Value))
    }

    /// Poll `method(args)` while `pointer` is one of `pending`.
    pub fn settle(
        method: &str,
        args: impl IntoIterator<Item = Value>,
        pointer: &str,
        pending: &[&str],
        target: Option<&str>,
    ) -> Self {
        Self::new(
            method,
            StepKind::Settle {
                pointer: pointer.to_owned(),
                pending: pending.iter().map(|s| (*s).to_owned()).collect(),
                target: target.map(str::to_owned),
            },
            args.into_iter().map(Arg::Value),
        )
    }

    /// Literal view of the arguments, with step references rendered as
    /// `"<step N pointer>"` (used for check-mode reports and logs).
    pub fn preview(&self) -> Value {
        Value::Array(
            self.args
                .iter()
                .map(|a| match a {
                    Arg::Value(v) => v.clone(),
                    Arg::FromStep { step, pointer } => Value::String(format!("<step {step} {pointer}>")),
                })
                .collect(),
        )
    }
}

/// Everything a reconciler decided, ready for the executor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Plan {
    /// Human name of the resource (`certificate cert1`).
    pub subject: String,
    pub actions: Vec<Action>,
    pub steps: Vec<Step>,
    /// Payload that is (or would be) sent, for the report.
    pub diff: Diff,
    /// State reported when no step supplies one.
    pub state: Option<Value>,
    /// Index of the step whose result becomes the reported state.
    pub state_from: Option<usize>,
    pub warnings: Vec<String>,
}

impl Plan {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            ..Self::default()
        }
    }

    /// A plan that changes nothing and reports `observed` as the state.
    pub fn unchanged(subject: impl Into<String>, observed: Option<&Value>) -> Self {
        Self {
            state: observed.cloned(),
            ..Self::new(subject)
        }
    }

    pub fn is_noop(&self) -> bool {
        self.steps.is_empty()
    }

    /// Record an action against the plan's own subject.
    pub fn act(&mut self, verb: Verb) -> &mut Self {
        let subject = self.subject.clone();
        self.act_on(verb, subject)
    }

    pub fn act_on(&mut self, verb: Verb, subject: impl Into<String>) -> &mut Self {
        self.actions.push(Action {
            verb,
            subject: subject.into(),
        });
        self
    }

    /// Append a step and return its index.
    pub fn push(&mut self, step: Step) -> usize {
        self.steps.push(step);
        self.steps.len() - 1
    }

    /// Append a step whose result is the resource's new state.
    pub fn push_state(&mut self, step: Step) -> usize {
        let idx = self.push(step);
        self.state_from = Some(idx);
        idx
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn with_diff(mut self, diff: Diff) -> Self {
        self.diff = diff;
        self
    }

    /// `Created certificate cert1; updated ...`, or the check-mode form.
    pub fn message(&self, check_mode: bool) -> String {
        if self.actions.is_empty() {
            return format!("{} is already in the desired state", self.subject);
        }
        let joined = self
            .actions
            .iter()
            .map(|a| format!("{} {}", a.verb, a.subject))
            .collect::<Vec<_>>()
            .join("; ");
        if check_mode {
            format!("Would have {joined}")
        } else {
            capitalize(&joined)
        }
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().chain(chars).collect()
    })
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn messages_for_apply_and_check() {
        let mut plan = Plan::new("certificate cert1");
        plan.act(Verb::Created);
        plan.act_on(Verb::Updated, "certificate cert1 (revoked)");
        assert_eq!(
            plan.message(false),
            "Created certificate cert1; updated certificate cert1 (revoked)"
        );
        assert_eq!(
            plan.message(true),
            "Would have created certificate cert1; updated certificate cert1 (revoked)"
        );
    }

    #[test]
    fn noop_message() {
        let plan = Plan::unchanged("group g1", Some(&json!({"gid": 1000})));
        assert!(plan.is_noop());
        assert_eq!(plan.message(false), "group g1 is already in the desired state");
    }

    #[test]
    fn preview_renders_step_references() {
        let step = Step::new(
            "certificate.update",
            StepKind::Call,
            [Arg::from_step(0, "/id"), Arg::Value(json!({"revoked": true}))],
        );
        assert_eq!(step.preview(), json!(["<step 0 /id>", {"revoked": true}]));
    }
}
