// ── Jail fstab ──
//
// The USER lines of a jail's fstab, matched by mount point inside the
// jail. Changes go through `jail.fstab(jail, {action: ADD|REPLACE|REMOVE})`;
// a running jail is stopped once before the first change and started
// again after the last.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::jail::is_up;
use super::{Presence, ResourceKind};
use crate::error::CoreError;
use crate::reconcile::diff::{Diff, as_int};
use crate::reconcile::subresource::{Entry, EntryOp, Indexed, plan_entries};
use crate::reconcile::{Plan, Reconciler, Step, Verb};
use crate::session::Session;

fn nullfs() -> String {
    "nullfs".into()
}

fn read_only() -> String {
    "ro".into()
}

/// One desired fstab line.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FstabEntry {
    /// Host path.
    pub src: Option<String>,
    /// Mount point inside the jail.
    pub mount: String,
    #[serde(default = "nullfs")]
    pub fstype: String,
    #[serde(default = "read_only")]
    pub options: String,
    #[serde(default)]
    pub dump: i64,
    #[serde(default)]
    pub fsck_pass: i64,
    #[serde(default)]
    pub state: Presence,
}

/// One USER line as the daemon reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FstabLine {
    pub index: usize,
    pub source: String,
    /// Full host-side path of the mount point.
    pub destination: String,
    /// `destination` relative to the jail root.
    pub mount: String,
    pub fstype: String,
    pub fsoptions: String,
    pub dump: i64,
    pub pass: i64,
}

impl Entry for FstabEntry {
    type Observed = FstabLine;

    fn key(&self) -> &str {
        &self.mount
    }

    fn present(&self) -> bool {
        self.state == Presence::Present
    }

    fn differs_from(&self, line: &FstabLine) -> bool {
        self.src.as_deref() != Some(line.source.as_str())
            || self.fstype != line.fstype
            || self.options != line.fsoptions
            || self.dump != line.dump
            || self.fsck_pass != line.pass
    }
}

impl Indexed for FstabLine {
    fn index(&self) -> usize {
        self.index
    }

    fn key(&self) -> &str {
        &self.mount
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JailFstab {
    pub jail: String,
    pub fstab: Vec<FstabEntry>,
    /// Keep observed lines that are not listed.
    #[serde(default)]
    pub append: bool,
}

/// USER lines from a `jail.fstab LIST` result, with mounts made relative
/// to `jail_root`.
fn user_lines(listing: &Value, jail_root: &str) -> Result<Vec<FstabLine>, CoreError> {
    let bad = |msg: String| CoreError::unexpected("jail.fstab", msg);
    let Some(map) = listing.as_object() else {
        return Err(bad(format!("expected an object, got {listing}")));
    };

    let mut lines = Vec::new();
    for (index, line) in map {
        if line.get("type").and_then(Value::as_str) != Some("USER") {
            continue;
        }
        let index: usize = index
            .parse()
            .map_err(|_| bad(format!("non-numeric fstab index {index:?}")))?;
        let fields = line
            .get("entry")
            .and_then(Value::as_array)
            .filter(|e| e.len() >= 6)
            .ok_or_else(|| bad(format!("fstab line {index} has no 6-field entry")))?;
        let text = |i: usize| fields[i].as_str().unwrap_or_default().to_owned();
        let destination = text(1);
        lines.push(FstabLine {
            index,
            source: text(0),
            mount: destination
                .strip_prefix(jail_root)
                .unwrap_or(&destination)
                .to_owned(),
            destination,
            fstype: text(2),
            fsoptions: text(3),
            dump: as_int(&fields[4]).unwrap_or_default(),
            pass: as_int(&fields[5]).unwrap_or_default(),
        });
    }
    lines.sort_by_key(|l| l.index);
    Ok(lines)
}

impl JailFstab {
    fn subject(&self) -> String {
        format!("fstab of jail {}", self.jail)
    }

    fn change(&self, op: &EntryOp<'_, FstabEntry, FstabLine>) -> (Verb, String, Value) {
        match op {
            EntryOp::Add(want) => (
                Verb::Added,
                want.mount.clone(),
                json!({
                    "action": "ADD",
                    "source": want.src,
                    "destination": want.mount,
                    "fstype": want.fstype,
                    "fsoptions": want.options,
                    "dump": want.dump,
                    "pass": want.fsck_pass,
                }),
            ),
            EntryOp::Replace { desired, observed } => (
                Verb::Replaced,
                desired.mount.clone(),
                json!({
                    "action": "REPLACE",
                    "index": observed.index,
                    "source": desired.src,
                    "destination": desired.mount,
                    "fstype": desired.fstype,
                    "fsoptions": desired.options,
                    "dump": desired.dump,
                    "pass": desired.fsck_pass,
                }),
            ),
            EntryOp::Remove(have) => (
                Verb::Removed,
                have.mount.clone(),
                json!({
                    "action": "REMOVE",
                    "source": have.source,
                    "destination": have.mount,
                }),
            ),
        }
    }

    fn plan_with(&self, observed: &Value) -> Result<Plan, CoreError> {
        let lines: Vec<FstabLine> = serde_json::from_value(observed["entries"].clone())
            .map_err(|e| CoreError::unexpected("jail.fstab", e.to_string()))?;
        let ops = plan_entries(&self.fstab, &lines, self.append);
        if ops.is_empty() {
            return Ok(Plan::unchanged(self.subject(), Some(observed)));
        }

        let jail = json!(self.jail);
        let running = is_up(observed);
        let mut plan = Plan::new(self.subject());
        let mut diff = Diff::new();

        if running {
            plan.act_on(Verb::Stopped, format!("jail {}", self.jail));
            plan.push(Step::job("jail.stop", [jail.clone()]));
        }
        for op in &ops {
            let (verb, mount, args) = self.change(op);
            plan.act_on(verb, format!("fstab entry {mount} of jail {}", self.jail));
            diff.insert(mount, args.clone());
            plan.push(Step::call("jail.fstab", [jail.clone(), args]));
        }
        if running {
            plan.act_on(Verb::Started, format!("jail {}", self.jail));
            plan.push(Step::job("jail.start", [jail]));
        }
        Ok(plan.with_diff(diff))
    }
}

#[async_trait]
impl Reconciler for JailFstab {
    fn kind(&self) -> ResourceKind {
        ResourceKind::JailFstab
    }

    fn validate(&self) -> Result<(), CoreError> {
        if let Some(entry) = self.fstab.iter().find(|e| e.present() && e.src.is_none()) {
            return Err(CoreError::validation(format!(
                "fstab entry {} is present but has no src",
                entry.mount
            )));
        }
        Ok(())
    }

    async fn observe(&self, session: &Session) -> Result<Option<Value>, CoreError> {
        let mw = session.middleware();
        let jail = mw
            .call(
                "jail.query",
                &[json!([["id", "=", self.jail]]), json!({"select": ["state"]})],
            )
            .await?;
        let Some(row) = jail.as_array().and_then(|rows| rows.first()) else {
            return Err(CoreError::not_found("jail", self.jail.as_str()));
        };

        let listing = mw
            .call("jail.fstab", &[json!(self.jail), json!({"action": "LIST"})])
            .await?;
        let iocroot = mw.call_str("jail.get_iocroot", &[]).await?;
        let jail_root = format!("{iocroot}/jails/{}/root", self.jail);

        Ok(Some(json!({
            "jail": self.jail,
            "state": row.get("state").cloned().unwrap_or(Value::Null),
            "root": jail_root,
            "entries": user_lines(&listing, &jail_root)?,
        })))
    }

    async fn plan(&self, _session: &Session, observed: Option<&Value>) -> Result<Plan, CoreError> {
        let observed = observed.ok_or_else(|| CoreError::not_found("jail", self.jail.as_str()))?;
        self.plan_with(observed)
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    const ROOT: &str = "/mnt/tank/iocage/jails/web/root";

    fn listing() -> Value {
        json!({
            "0": {"entry": ["/mnt/tank/iocage/releases/13.2-RELEASE/root/bin", "/mnt/tank/iocage/jails/web/root/bin",
                            "nullfs", "ro", "0", "0"], "type": "SYSTEM"},
            "1": {"entry": ["/mnt/tank/data", "/mnt/tank/iocage/jails/web/root/data", "nullfs", "rw", "0", "0"],
                  "type": "USER"}
        })
    }

    fn observed(state: &str) -> Value {
        let lines = user_lines(&listing(), ROOT).unwrap_or_else(|e| panic!("{e}"));
        json!({"jail": "web", "state": state, "root": ROOT, "entries": lines})
    }

    fn fstab(entries: Value, append: bool) -> JailFstab {
        JailFstab {
            jail: "web".into(),
            fstab: serde_json::from_value(entries).unwrap_or_else(|e| panic!("{e}")),
            append,
        }
    }

    #[test]
    fn only_user_lines_relative_to_root() {
        let lines = user_lines(&listing(), ROOT).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].index, 1);
        assert_eq!(lines[0].mount, "/data");
        assert_eq!(lines[0].fsoptions, "rw");
    }

    #[test]
    fn removal_on_running_jail_stops_and_starts() {
        let f = fstab(json!([{"mount": "/data", "state": "absent"}]), false);
        let plan = f.plan_with(&observed("up")).unwrap_or_else(|e| panic!("{e}"));
        let methods: Vec<&str> = plan.steps.iter().map(|s| s.method.as_str()).collect();
        assert_eq!(methods, ["jail.stop", "jail.fstab", "jail.start"]);
        assert_eq!(
            plan.steps[1].preview(),
            json!(["web", {"action": "REMOVE", "source": "/mnt/tank/data", "destination": "/data"}])
        );
    }

    #[test]
    fn replace_carries_index_and_pass() {
        let f = fstab(
            json!([{"src": "/mnt/tank/data", "mount": "/data", "options": "rw", "fsck_pass": 2}]),
            false,
        );
        let plan = f.plan_with(&observed("down")).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(plan.steps.len(), 1);
        let args = &plan.steps[0].preview()[1];
        assert_eq!(args["action"], "REPLACE");
        assert_eq!(args["index"], 1);
        assert_eq!(args["pass"], 2);
    }

    #[test]
    fn unlisted_lines_survive_in_append_mode() {
        let f = fstab(json!([{"src": "/mnt/tank/media", "mount": "/media"}]), true);
        let plan = f.plan_with(&observed("down")).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.steps[0].preview()[1]["action"], "ADD");
        assert_eq!(plan.steps[0].preview()[1]["fsoptions"], "ro");

        let f = fstab(json!([{"src": "/mnt/tank/media", "mount": "/media"}]), false);
        let plan = f.plan_with(&observed("down")).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(plan.steps.len(), 2);
    }

    #[test]
    fn matching_lines_are_noop() {
        let f = fstab(json!([{"src": "/mnt/tank/data", "mount": "/data", "options": "rw"}]), false);
        assert!(f.plan_with(&observed("up")).unwrap_or_else(|e| panic!("{e}")).is_noop());
    }
}
