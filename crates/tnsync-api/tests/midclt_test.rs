#![cfg(unix)]
#![allow(clippy::unwrap_used)]
// Integration tests for the `midclt` subprocess transport, using a shell
// script that stands in for the real binary.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use serde_json::json;
use tempfile::TempDir;

use tnsync_api::{Error, Midclt, Output, Transport};

// ── Helpers ─────────────────────────────────────────────────────────

const SCRIPT: &str = r#"#!/bin/sh
echo "$*" >> "$(dirname "$0")/calls.log"
case "$*" in
  "call system.version") printf 'TrueNAS-13.0-U6.1\n' ;;
  "call system.is_freenas") printf 'True\n' ;;
  "call group.query"*) printf '[{"id": 40, "gid": 1000, "group": "wheel"}]\n' ;;
  "call system.product_name") printf '[ENOMETHOD] Method "product_name" not found\n' >&2; exit 1 ;;
  "call -job -jp description jail.start"*) printf 'Starting jail\n50%%: mounting\ntrue\n' ;;
  "call -job -jp description pool.scrub.run"*) printf 'Scrubbing\n' ; printf 'scrub failed: pool busy\n' >&2; exit 1 ;;
  *) printf 'unexpected call: %s\n' "$*" >&2; exit 3 ;;
esac
"#;

fn fake_midclt() -> (TempDir, Midclt) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("midclt");
    std::fs::write(&path, SCRIPT).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    (dir, Midclt::with_program(path))
}

fn calls(dir: &Path) -> Vec<String> {
    std::fs::read_to_string(dir.join("calls.log"))
        .unwrap_or_default()
        .lines()
        .map(str::to_owned)
        .collect()
}

// ── call ────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_str_output_is_trimmed() {
    let (_dir, midclt) = fake_midclt();
    let v = midclt.call("system.version", &[], Output::Str).await.unwrap();
    assert_eq!(v, json!("TrueNAS-13.0-U6.1"));
}

#[tokio::test]
async fn test_python_boolean_is_json() {
    let (_dir, midclt) = fake_midclt();
    let v = midclt.call("system.is_freenas", &[], Output::Json).await.unwrap();
    assert_eq!(v, json!(true));
}

#[tokio::test]
async fn test_arguments_are_passed_as_json_documents() {
    let (dir, midclt) = fake_midclt();
    let v = midclt
        .call("group.query", &[json!([["group", "=", "wheel"]])], Output::Json)
        .await
        .unwrap();

    assert_eq!(v[0]["gid"], 1000);
    assert_eq!(calls(dir.path()), vec![r#"call group.query [["group","=","wheel"]]"#]);
}

#[tokio::test]
async fn test_enomethod_maps_to_method_not_found() {
    let (_dir, midclt) = fake_midclt();
    let err = midclt.call("system.product_name", &[], Output::Str).await.unwrap_err();
    assert!(err.is_method_not_found(), "got {err:?}");
}

#[tokio::test]
async fn test_nonzero_exit_is_transport_error() {
    let (_dir, midclt) = fake_midclt();
    let err = midclt.call("user.create", &[json!({})], Output::Json).await.unwrap_err();
    match err {
        Error::Transport { status, output, .. } => {
            assert_eq!(status, 3);
            assert!(output.starts_with("unexpected call: call user.create"));
        }
        other => panic!("expected transport error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_missing_binary_is_spawn_error() {
    let midclt = Midclt::with_program(PathBuf::from("/nonexistent/bin/midclt"));
    let err = midclt.call("system.version", &[], Output::Str).await.unwrap_err();
    assert!(matches!(err, Error::Spawn { .. }), "got {err:?}");
    assert!(err.is_transient());
}

// ── job ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_job_result_is_last_line() {
    let (dir, midclt) = fake_midclt();
    let v = midclt.job("jail.start", &[json!("web")]).await.unwrap();

    assert_eq!(v, json!(true));
    assert_eq!(calls(dir.path()), vec![r#"call -job -jp description jail.start "web""#]);
}

#[tokio::test]
async fn test_failed_job_carries_output() {
    let (_dir, midclt) = fake_midclt();
    let err = midclt.job("pool.scrub.run", &[json!("tank")]).await.unwrap_err();
    match err {
        Error::Job { state, error, exception, .. } => {
            assert_eq!(state, "FAILED");
            assert_eq!(error.as_deref(), Some("scrub failed: pool busy"));
            assert!(exception.unwrap().contains("Scrubbing"));
        }
        other => panic!("expected job error, got {other:?}"),
    }
}
