#![allow(clippy::unwrap_used)]
// End-to-end reconciliation against a scripted in-memory transport that
// records every call it receives.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};

use tnsync_api::transport::stringify;
use tnsync_api::{Error, Output, Transport};
use tnsync_core::input::load;
use tnsync_core::{ChangeReport, CoreError, Dialect, Middleware, Mode, ResourceKind, Session, converge};

// ── Fake transport ──────────────────────────────────────────────────

type Log = Arc<Mutex<Vec<(String, Vec<Value>)>>>;

/// Replies are queued per method; the last reply for a method repeats.
/// A method marked with `fail` always errors.
#[derive(Default)]
struct Scripted {
    replies: Mutex<HashMap<String, VecDeque<Value>>>,
    failures: Mutex<HashMap<String, fn(&str) -> Error>>,
    log: Log,
}

impl Scripted {
    fn reply(self, method: &str, value: Value) -> Self {
        self.replies
            .lock()
            .unwrap()
            .entry(method.to_owned())
            .or_default()
            .push_back(value);
        self
    }

    fn fail(self, method: &str, error: fn(&str) -> Error) -> Self {
        self.failures.lock().unwrap().insert(method.to_owned(), error);
        self
    }

    fn next(&self, method: &str, args: &[Value]) -> Result<Value, Error> {
        self.log.lock().unwrap().push((method.to_owned(), args.to_vec()));
        if let Some(error) = self.failures.lock().unwrap().get(method) {
            return Err(error(method));
        }
        let mut replies = self.replies.lock().unwrap();
        let Some(queue) = replies.get_mut(method) else {
            return Err(Error::MethodNotFound {
                method: method.to_owned(),
                detail: "not scripted".into(),
            });
        };
        if queue.len() > 1 {
            Ok(queue.pop_front().unwrap())
        } else {
            Ok(queue.front().cloned().unwrap_or(Value::Null))
        }
    }
}

#[async_trait]
impl Transport for Scripted {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn call(&self, method: &str, args: &[Value], output: Output) -> Result<Value, Error> {
        let value = self.next(method, args)?;
        Ok(match output {
            Output::Json => value,
            Output::Str => stringify(value),
        })
    }

    async fn job(&self, method: &str, args: &[Value]) -> Result<Value, Error> {
        self.next(&format!("job:{method}"), args)
    }
}

fn core13() -> Dialect {
    Dialect::from_parts("TrueNAS", "CORE", "TrueNAS-13.0-U6.1")
}

fn session(transport: Scripted) -> (Session, Log) {
    let log = Arc::clone(&transport.log);
    let session = Session::with_dialect(Middleware::new(Box::new(transport)), core13());
    (session, log)
}

fn methods(log: &Log) -> Vec<String> {
    log.lock().unwrap().iter().map(|(m, _)| m.clone()).collect()
}

fn mutating(log: &Log) -> Vec<String> {
    methods(log)
        .into_iter()
        .filter(|m| !m.ends_with(".query") && !m.starts_with("system."))
        .collect()
}

async fn apply(
    kind: ResourceKind,
    params: &str,
    session: &Session,
    mode: Mode,
) -> Result<ChangeReport, CoreError> {
    let reconciler = load(kind, params, Path::new(".")).unwrap();
    converge(reconciler.as_ref(), session, mode).await
}

// ── Certificates ────────────────────────────────────────────────────

#[tokio::test]
async fn test_certificate_import_sends_create_job() {
    let (session, log) = session(
        Scripted::default()
            .reply("certificate.query", json!([]))
            .reply("job:certificate.create", json!({"id": 12, "name": "cert1"})),
    );
    let report = apply(
        ResourceKind::Certificate,
        "name: cert1\ncertificate: PEM\nprivate_key: KEY\n",
        &session,
        Mode::Apply,
    )
    .await
    .unwrap();

    assert!(report.changed);
    assert_eq!(report.msg, "Created certificate cert1");
    assert_eq!(report.state, Some(json!({"id": 12, "name": "cert1"})));

    let calls = log.lock().unwrap().clone();
    assert_eq!(calls[0], ("certificate.query".to_owned(), vec![json!([["name", "=", "cert1"]])]));
    assert_eq!(
        calls[1],
        (
            "job:certificate.create".to_owned(),
            vec![json!({
                "name": "cert1",
                "create_type": "CERTIFICATE_CREATE_IMPORTED",
                "certificate": "PEM",
                "privatekey": "KEY",
            })]
        )
    );
}

// ── Groups ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_matching_group_is_left_alone() {
    let (session, log) = session(
        Scripted::default().reply("group.query", json!([{"id": 40, "group": "g1", "gid": 1000}])),
    );
    let report = apply(ResourceKind::Group, "name: g1\ngid: 1000\n", &session, Mode::Apply)
        .await
        .unwrap();

    assert!(!report.changed);
    assert_eq!(report.msg, "group g1 is already in the desired state");
    assert_eq!(methods(&log), ["group.query"]);
}

#[tokio::test]
async fn test_second_run_only_queries() {
    let (session, log) = session(
        Scripted::default()
            .reply("group.query", json!([]))
            .reply("group.query", json!([{"id": 41, "group": "g2", "gid": 1001}]))
            .reply("group.create", json!({"id": 41, "group": "g2", "gid": 1001})),
    );
    let first = apply(ResourceKind::Group, "name: g2\ngid: 1001\n", &session, Mode::Apply)
        .await
        .unwrap();
    assert!(first.changed);

    log.lock().unwrap().clear();
    let second = apply(ResourceKind::Group, "name: g2\ngid: 1001\n", &session, Mode::Apply)
        .await
        .unwrap();
    assert!(!second.changed);
    assert_eq!(methods(&log), ["group.query"]);
}

#[tokio::test]
async fn test_absent_group_that_does_not_exist() {
    let (session, log) = session(Scripted::default().reply("group.query", json!([])));
    let report = apply(ResourceKind::Group, "name: gone\nstate: absent\n", &session, Mode::Apply)
        .await
        .unwrap();
    assert!(!report.changed);
    assert!(mutating(&log).is_empty());
}

// ── Check mode ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_check_mode_makes_no_mutating_calls() {
    let (session, log) = session(Scripted::default().reply("group.query", json!([])));
    let report = apply(ResourceKind::Group, "name: g3\ngid: 1002\n", &session, Mode::Check)
        .await
        .unwrap();

    assert!(report.changed);
    assert_eq!(report.msg, "Would have created group g3");
    assert_eq!(report.invocations[0].method, "group.create");
    assert_eq!(methods(&log), ["group.query"]);
}

// ── Jail fstab ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_fstab_removal_restarts_running_jail() {
    let listing = json!({
        "0": {"entry": ["/mnt/tank/data", "/mnt/tank/iocage/jails/web/root/data", "nullfs", "rw", "0", "0"],
              "type": "USER"}
    });
    let (session, log) = session(
        Scripted::default()
            .reply("jail.query", json!([{"state": "up"}]))
            .reply("jail.fstab", listing)
            .reply("jail.fstab", json!(true))
            .reply("jail.get_iocroot", json!("/mnt/tank/iocage"))
            .reply("job:jail.stop", json!(true))
            .reply("job:jail.start", json!(true)),
    );
    let report = apply(
        ResourceKind::JailFstab,
        "jail: web\nfstab:\n  - mount: /data\n    state: absent\n",
        &session,
        Mode::Apply,
    )
    .await
    .unwrap();

    assert!(report.changed);
    let calls = log.lock().unwrap().clone();
    let tail: Vec<&str> = calls[3..].iter().map(|(m, _)| m.as_str()).collect();
    assert_eq!(tail, ["job:jail.stop", "jail.fstab", "job:jail.start"]);
    assert_eq!(
        calls[4].1,
        vec![json!("web"), json!({"action": "REMOVE", "source": "/mnt/tank/data", "destination": "/data"})]
    );
}

#[tokio::test]
async fn test_fstab_on_missing_jail_is_not_found() {
    let (session, _log) = session(Scripted::default().reply("jail.query", json!([])));
    let err = apply(
        ResourceKind::JailFstab,
        "jail: nope\nfstab: []\n",
        &session,
        Mode::Apply,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, CoreError::NotFound { .. }), "got {err:?}");
}

// ── NFS shares ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_nfs_conflicting_mappings_fail_before_any_call() {
    let (session, log) = session(Scripted::default());
    let err = apply(
        ResourceKind::SharingNfs,
        "name: media\npath: /mnt/tank/media\nmaproot_user: root\nmapall_user: nobody\n",
        &session,
        Mode::Apply,
    )
    .await
    .unwrap_err();
    assert!(err.is_validation());
    assert!(methods(&log).is_empty());
}

#[tokio::test]
async fn test_nfs_mapall_replaces_maproot() {
    let row = json!({
        "id": 3, "comment": "media", "paths": ["/mnt/tank/media"], "ro": false,
        "maproot_user": "root", "maproot_group": null, "mapall_user": null, "mapall_group": null,
        "networks": [], "hosts": []
    });
    let (session, log) = session(
        Scripted::default()
            .reply("sharing.nfs.query", json!([row]))
            .reply("sharing.nfs.update", json!({"id": 3})),
    );
    apply(
        ResourceKind::SharingNfs,
        "name: media\npath: /mnt/tank/media\nmapall_user: nobody\n",
        &session,
        Mode::Apply,
    )
    .await
    .unwrap();

    let calls = log.lock().unwrap().clone();
    assert_eq!(calls[1].0, "sharing.nfs.update");
    assert_eq!(calls[1].1, vec![json!(3), json!({"mapall_user": "nobody", "maproot_user": null})]);
}

// ── Datasets ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_volblocksize_cannot_change() {
    let row = json!({
        "id": "tank/vol1", "name": "tank/vol1", "type": "VOLUME",
        "volsize": {"rawvalue": "10737418240"},
        "volblocksize": {"rawvalue": "16384"}
    });
    let (session, log) = session(Scripted::default().reply("pool.dataset.query", json!([row])));
    let err = apply(
        ResourceKind::Filesystem,
        "name: tank/vol1\ntype: VOLUME\nvolsize: 10 GiB\nvolblocksize: 64K\n",
        &session,
        Mode::Apply,
    )
    .await
    .unwrap_err();

    assert!(matches!(err, CoreError::Immutable { ref field, .. } if field == "volblocksize"), "got {err:?}");
    assert_eq!(methods(&log), ["pool.dataset.query"]);
}

#[tokio::test]
async fn test_failed_revoke_is_not_rolled_back() {
    let (session, log) = session(
        Scripted::default()
            .reply("certificate.query", json!([]))
            .reply("job:certificate.create", json!({"id": 12, "name": "cert1"}))
            .fail("certificate.update", |method| Error::Remote {
                method: method.to_owned(),
                message: "[EINVAL] nope".into(),
                errname: Some("EINVAL".into()),
            }),
    );
    let err = apply(
        ResourceKind::Certificate,
        "name: cert1\ncertificate: PEM\nrevoked: true\n",
        &session,
        Mode::Apply,
    )
    .await
    .unwrap_err();

    match &err {
        CoreError::Mutation {
            method, completed, ..
        } => {
            assert_eq!(method, "certificate.update");
            assert_eq!(completed, &["certificate.create".to_owned()]);
        }
        other => panic!("expected a mutation error, got {other:?}"),
    }
    assert!(err.is_partial());
    assert!(err.to_string().contains("after certificate.create succeeded"));
    assert_eq!(
        methods(&log),
        ["certificate.query", "job:certificate.create", "certificate.update"]
    );
}

// ── Session ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_failed_version_detection_aborts_before_mutating() {
    let transport = Scripted::default()
        .reply("group.query", json!([]))
        .reply("system.product_name", json!("TrueNAS"))
        .fail("system.product_type", |method| Error::Transport {
            program: "midclt".into(),
            status: 1,
            output: format!("{method}: connection refused"),
        });
    let log = Arc::clone(&transport.log);
    let session = Session::new(Middleware::new(Box::new(transport)));

    let err = apply(ResourceKind::Group, "name: g1\ngid: 1000\n", &session, Mode::Apply)
        .await
        .unwrap_err();

    assert!(matches!(err, CoreError::Transport { ref message } if message.contains("connection refused")));
    assert!(mutating(&log).is_empty());
    assert!(!methods(&log).iter().any(|m| m == "group.create"));
}

#[tokio::test]
async fn test_dialect_is_detected_once() {
    let transport = Scripted::default()
        .reply("system.product_type", json!("SCALE"))
        .reply("system.version", json!("TrueNAS-SCALE-24.04.2"));
    let log = Arc::clone(&transport.log);
    let session = Session::new(Middleware::new(Box::new(transport)));

    let first = session.dialect().await.unwrap().clone();
    let second = session.dialect().await.unwrap().clone();
    assert_eq!(first, second);
    assert_eq!(first.product_name, "TrueNAS");
    assert!(first.is_scale());
    assert_eq!(methods(&log), ["system.product_name", "system.product_type", "system.version"]);
}
