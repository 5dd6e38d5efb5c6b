// ── Init/shutdown scripts ──
//
// Keyed by comment. A script runs a command, a script file, or inline
// script text; switching between them blanks the other two.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value, json};

use super::{Presence, ResourceKind, row_id};
use crate::error::CoreError;
use crate::reconcile::diff::{Changes, put};
use crate::reconcile::{Plan, Reconciler, Step, Verb};
use crate::session::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, strum::IntoStaticStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "UPPERCASE")]
pub enum When {
    #[serde(alias = "PREINIT")]
    Preinit,
    #[serde(alias = "POSTINIT")]
    Postinit,
    #[serde(alias = "SHUTDOWN")]
    Shutdown,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Initscript {
    /// Stored as the script's comment.
    pub name: String,
    #[serde(alias = "cmd")]
    pub command: Option<String>,
    /// Path of a script file on the appliance.
    pub path: Option<String>,
    /// Inline script text.
    pub script: Option<String>,
    pub when: Option<When>,
    /// Seconds.
    pub timeout: Option<u32>,
    #[serde(default)]
    pub state: Presence,
}

/// The three mutually exclusive sources and what each one sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source<'a> {
    Command(&'a str),
    Path(&'a str),
    Text(&'a str),
}

impl Source<'_> {
    fn script_type(self) -> &'static str {
        match self {
            Self::Command(_) => "COMMAND",
            Self::Path(_) | Self::Text(_) => "SCRIPT",
        }
    }

    /// Wanted values of `command`, `script` and `script_text`; the two
    /// unused sources are blank.
    fn fields(self) -> [(&'static str, String); 3] {
        let mut fields = [
            ("command", String::new()),
            ("script", String::new()),
            ("script_text", String::new()),
        ];
        let (slot, text) = match self {
            Self::Command(s) => (0, s),
            Self::Path(s) => (1, s),
            Self::Text(s) => (2, s),
        };
        fields[slot].1 = text.to_owned();
        fields
    }
}

impl Initscript {
    fn subject(&self) -> String {
        format!("init script {}", self.name)
    }

    fn source(&self) -> Option<Source<'_>> {
        if let Some(c) = &self.command {
            Some(Source::Command(c))
        } else if let Some(p) = &self.path {
            Some(Source::Path(p))
        } else {
            self.script.as_deref().map(Source::Text)
        }
    }

    fn when(&self) -> Option<&'static str> {
        self.when.map(Into::into)
    }

    fn create_payload(&self, source: Source<'_>) -> Map<String, Value> {
        let mut payload = Map::new();
        payload.insert("comment".into(), json!(self.name));
        payload.insert("type".into(), json!(source.script_type()));
        for (field, value) in source.fields() {
            if !value.is_empty() {
                payload.insert(field.into(), json!(value));
            }
        }
        put(&mut payload, "when", self.when());
        put(&mut payload, "timeout", self.timeout);
        payload
    }

    fn update_changes<'a>(&self, row: &'a Value, source: Option<Source<'_>>) -> Changes<'a> {
        let mut changes = Changes::against(row);
        if let Some(source) = source {
            changes.scalar("type", Some(source.script_type()));
            for (field, value) in source.fields() {
                let have = changes.observed(field).as_str().unwrap_or_default();
                if have != value {
                    changes.insert(field, value);
                }
            }
        }
        changes.scalar("when", self.when()).scalar("timeout", self.timeout);
        changes
    }

    fn plan_with(&self, observed: Option<&Value>) -> Result<Plan, CoreError> {
        let mut plan = Plan::new(self.subject());
        match (observed, self.state) {
            (None, Presence::Absent) => Ok(Plan::unchanged(self.subject(), None)),
            (None, Presence::Present) => {
                let source = self.source().ok_or_else(|| {
                    CoreError::validation("one of command, path or script is required")
                })?;
                let payload = self.create_payload(source);
                plan.act(Verb::Created);
                plan.push_state(Step::call(
                    "initshutdownscript.create",
                    [Value::Object(payload.clone())],
                ));
                Ok(plan.with_diff(payload.into_iter().collect()))
            }
            (Some(row), Presence::Present) => {
                let changes = self.update_changes(row, self.source());
                if changes.is_empty() {
                    return Ok(Plan::unchanged(self.subject(), Some(row)));
                }
                let diff = changes.into_diff();
                plan.act(Verb::Updated);
                plan.push_state(Step::call(
                    "initshutdownscript.update",
                    [
                        row_id("initshutdownscript.query", row)?,
                        Value::Object(diff.clone().into_iter().collect()),
                    ],
                ));
                Ok(plan.with_diff(diff))
            }
            (Some(row), Presence::Absent) => {
                plan.act(Verb::Deleted);
                plan.push(Step::call(
                    "initshutdownscript.delete",
                    [row_id("initshutdownscript.query", row)?],
                ));
                Ok(plan)
            }
        }
    }
}

#[async_trait]
impl Reconciler for Initscript {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Initscript
    }

    fn validate(&self) -> Result<(), CoreError> {
        let given = [&self.command, &self.path, &self.script]
            .iter()
            .filter(|s| s.is_some())
            .count();
        if given > 1 {
            return Err(CoreError::validation("command, path and script are mutually exclusive"));
        }
        if given == 0 && self.state == Presence::Present {
            return Err(CoreError::validation("one of command, path or script is required"));
        }
        Ok(())
    }

    async fn observe(&self, session: &Session) -> Result<Option<Value>, CoreError> {
        session
            .middleware()
            .query_one("initshutdownscript.query", "comment", self.name.as_str())
            .await
    }

    async fn plan(&self, _session: &Session, observed: Option<&Value>) -> Result<Plan, CoreError> {
        self.plan_with(observed)
    }
}

// ── Tests ────────────────────────────────────────────────────────────
