#![allow(clippy::unwrap_used)]
// Integration tests for `WebsocketClient` against an in-process fake middlewared.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use secrecy::SecretString;
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use url::Url;

use tnsync_api::{Credentials, Error, Output, Transport, WebsocketClient, WebsocketConfig};

// ── Fake server ─────────────────────────────────────────────────────

type Reply = Result<Value, (&'static str, String)>;
type Handler = Arc<dyn Fn(&str, &[Value]) -> Reply + Send + Sync>;

/// Wrap a closure mapping `(method, params)` to a result or `(errname, reason)`.
fn fake(f: impl Fn(&str, &[Value]) -> Reply + Send + Sync + 'static) -> Handler {
    Arc::new(f)
}

#[derive(Default)]
struct Recorded {
    paths: Mutex<Vec<String>>,
    calls: Mutex<Vec<(String, Vec<Value>)>>,
}

impl Recorded {
    fn paths(&self) -> Vec<String> {
        self.paths.lock().unwrap().clone()
    }

    fn methods(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|(m, _)| m.clone()).collect()
    }

    fn params_of(&self, method: &str) -> Vec<Value> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .find(|(m, _)| m == method)
            .map(|(_, p)| p.clone())
            .unwrap()
    }
}

/// Start a fake daemon. When `jsonrpc` is false, `/api/current` answers 404
/// so clients have to fall back to `/websocket`.
async fn spawn_server(jsonrpc: bool, handler: Handler) -> (Url, Arc<Recorded>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let recorded = Arc::new(Recorded::default());

    let rec = Arc::clone(&recorded);
    tokio::spawn(async move {
        while let Ok((tcp, _)) = listener.accept().await {
            tokio::spawn(serve(tcp, jsonrpc, Arc::clone(&handler), Arc::clone(&rec)));
        }
    });

    (Url::parse(&format!("ws://{addr}")).unwrap(), recorded)
}

async fn serve(tcp: TcpStream, jsonrpc: bool, handler: Handler, rec: Arc<Recorded>) {
    let mut path = String::new();
    let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        path = req.uri().path().to_owned();
        rec.paths.lock().unwrap().push(path.clone());
        if path == "/api/current" && !jsonrpc {
            let mut err = ErrorResponse::new(Some("not found".into()));
            *err.status_mut() = StatusCode::NOT_FOUND;
            return Err(err);
        }
        Ok(resp)
    };
    let Ok(mut ws) = accept_hdr_async(tcp, callback).await else {
        return;
    };
    let ddp = path == "/websocket";

    while let Some(Ok(msg)) = ws.next().await {
        let Message::Text(text) = msg else {
            continue;
        };
        let frame: Value = serde_json::from_str(text.as_str()).unwrap();
        if ddp && frame["msg"] == "connect" {
            let hello = json!({"msg": "connected", "session": "fake"});
            ws.send(Message::text(hello.to_string())).await.unwrap();
            continue;
        }

        let method = frame["method"].as_str().unwrap().to_owned();
        let params = frame["params"].as_array().cloned().unwrap_or_default();
        rec.calls.lock().unwrap().push((method.clone(), params.clone()));

        let id = frame["id"].clone();
        let reply = match (ddp, handler(&method, &params)) {
            (false, Ok(result)) => json!({"jsonrpc": "2.0", "id": id, "result": result}),
            (false, Err(("ENOMETHOD", reason))) => json!({
                "jsonrpc": "2.0", "id": id,
                "error": {"code": -32601, "message": reason}
            }),
            (false, Err((errname, reason))) => json!({
                "jsonrpc": "2.0", "id": id,
                "error": {"code": -32001, "message": "Method call error",
                          "data": {"errname": errname, "reason": reason}}
            }),
            (true, Ok(result)) => json!({"msg": "result", "id": id, "result": result}),
            (true, Err((errname, reason))) => json!({
                "msg": "result", "id": id,
                "error": {"error": 22, "errname": errname, "reason": reason}
            }),
        };
        ws.send(Message::text(reply.to_string())).await.unwrap();
    }
}

fn client(uri: Url, credentials: Credentials) -> WebsocketClient {
    let mut config = WebsocketConfig::new(uri, credentials);
    config.poll_interval = Duration::from_millis(10);
    WebsocketClient::new(config)
}

fn api_key(key: &str) -> Credentials {
    Credentials::ApiKey(SecretString::from(key.to_owned()))
}

// ── Happy-path tests ────────────────────────────────────────────────

#[tokio::test]
async fn test_jsonrpc_call_with_api_key() {
    let handler = fake(|method, _| match method {
        "auth.login_with_api_key" => Ok(json!(true)),
        "system.version" => Ok(json!("TrueNAS-SCALE-24.10.2")),
        _ => Err(("ENOMETHOD", format!("Method {method} not found"))),
    });
    let (uri, rec) = spawn_server(true, handler).await;
    let client = client(uri, api_key("1-abcdef"));

    let version = client.call("system.version", &[], Output::Json).await.unwrap();

    assert_eq!(version, json!("TrueNAS-SCALE-24.10.2"));
    assert_eq!(rec.paths(), vec!["/api/current"]);
    assert_eq!(rec.methods(), vec!["auth.login_with_api_key", "system.version"]);
    assert_eq!(rec.params_of("auth.login_with_api_key"), vec![json!("1-abcdef")]);
}

#[tokio::test]
async fn test_connection_is_reused_across_calls() {
    let handler = fake(|_, params| Ok(json!(params.len())));
    let (uri, rec) = spawn_server(true, handler).await;
    let client = client(uri, Credentials::Anonymous);

    client.call("a.one", &[], Output::Json).await.unwrap();
    client.call("a.two", &[json!(1), json!(2)], Output::Json).await.unwrap();

    assert_eq!(rec.paths().len(), 1);
    assert_eq!(rec.methods(), vec!["a.one", "a.two"]);
}

#[tokio::test]
async fn test_falls_back_to_legacy_websocket() {
    let handler = fake(|method, params| match method {
        "auth.login" => Ok(json!(params == [json!("root"), json!("secret")])),
        "system.is_freenas" => Ok(json!(true)),
        _ => Err(("ENOMETHOD", "Method not found".into())),
    });
    let (uri, rec) = spawn_server(false, handler).await;
    let client = client(
        uri,
        Credentials::Password {
            username: "root".into(),
            password: SecretString::from("secret".to_owned()),
        },
    );

    let value = client.call("system.is_freenas", &[], Output::Str).await.unwrap();

    assert_eq!(value, json!("True"));
    assert_eq!(rec.paths(), vec!["/api/current", "/websocket"]);
    assert_eq!(rec.methods(), vec!["auth.login", "system.is_freenas"]);
}

#[tokio::test]
async fn test_job_is_polled_until_success() {
    let polls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&polls);
    let handler = fake(move |method, _| match method {
        "pool.scrub.run" => Ok(json!(42)),
        "core.get_jobs" => {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                Ok(json!([{"id": 42, "state": "RUNNING", "progress": {"percent": 10}}]))
            } else {
                Ok(json!([{"id": 42, "state": "SUCCESS", "result": {"ok": true}}]))
            }
        }
        _ => Err(("ENOMETHOD", "Method not found".into())),
    });
    let (uri, rec) = spawn_server(true, handler).await;
    let client = client(uri, Credentials::Anonymous);

    let result = client.job("pool.scrub.run", &[json!("tank")]).await.unwrap();

    assert_eq!(result, json!({"ok": true}));
    assert_eq!(polls.load(Ordering::SeqCst), 2);
    assert_eq!(
        rec.params_of("core.get_jobs"),
        vec![json!([["id", "=", 42]])]
    );
}

#[tokio::test]
async fn test_job_returning_non_id_is_passed_through() {
    let handler = fake(|_, _| Ok(json!({"name": "web"})));
    let (uri, rec) = spawn_server(true, handler).await;
    let client = client(uri, Credentials::Anonymous);

    let result = client.job("jail.create", &[]).await.unwrap();

    assert_eq!(result, json!({"name": "web"}));
    assert_eq!(rec.methods(), vec!["jail.create"]);
}

// ── Error-path tests ────────────────────────────────────────────────

#[tokio::test]
async fn test_failed_job_reports_state_and_error() {
    let handler = fake(|method, _| match method {
        "jail.start" => Ok(json!(7)),
        _ => Ok(json!([{
            "id": 7, "state": "FAILED", "error": "jail web is already running",
            "exception": "Traceback ...", "progress": {"percent": 50}
        }])),
    });
    let (uri, _rec) = spawn_server(true, handler).await;
    let client = client(uri, Credentials::Anonymous);

    let err = client.job("jail.start", &[json!("web")]).await.unwrap_err();

    match err {
        Error::Job { method, state, error, exception, progress } => {
            assert_eq!(method, "jail.start");
            assert_eq!(state, "FAILED");
            assert_eq!(error.as_deref(), Some("jail web is already running"));
            assert_eq!(exception.as_deref(), Some("Traceback ..."));
            assert_eq!(progress, Some(json!({"percent": 50})));
        }
        other => panic!("expected job error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_method_not_found_is_reported() {
    let handler = fake(|method, _| Err(("ENOMETHOD", format!("Method {method} not found"))));
    let (uri, _rec) = spawn_server(true, handler).await;
    let client = client(uri, Credentials::Anonymous);

    let err = client.call("system.product_name", &[], Output::Json).await.unwrap_err();

    assert!(err.is_method_not_found(), "got {err:?}");
}

#[tokio::test]
async fn test_remote_error_keeps_errname() {
    let handler = fake(|_, _| Err(("EINVAL", "[EINVAL] group_create.gid: in use".into())));
    let (uri, _rec) = spawn_server(false, handler).await;
    let client = client(uri, Credentials::Anonymous);

    let err = client.call("group.create", &[json!({})], Output::Json).await.unwrap_err();

    assert_eq!(err.errname(), Some("EINVAL"));
    assert!(err.to_string().contains("gid: in use"));
}

#[tokio::test]
async fn test_rejected_login_fails_both_endpoints() {
    let handler = fake(|_, _| Ok(json!(false)));
    let (uri, rec) = spawn_server(true, handler).await;
    let client = client(uri, api_key("wrong"));

    let err = client.call("system.version", &[], Output::Json).await.unwrap_err();

    assert!(matches!(err, Error::WebSocketConnect(_)), "got {err:?}");
    assert!(err.to_string().contains("Authentication failed"));
    assert_eq!(rec.paths(), vec!["/api/current", "/websocket"]);
}

#[tokio::test]
async fn test_unreachable_daemon_names_both_uris() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let client = client(Url::parse(&format!("ws://{addr}")).unwrap(), Credentials::Anonymous);

    let err = client.call("system.version", &[], Output::Json).await.unwrap_err();

    assert!(err.is_transient());
    let text = err.to_string();
    assert!(text.contains("primary URI failed"), "{text}");
    assert!(text.contains("fallback URI failed"), "{text}");
}
