//! End-to-end runs of an assembled runtime over the in-process bus.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use appgrid_bus::{BusExt, BusHeaders, BusMessage, MemoryBus, MessageBus, ReplyStatus, headers};
use appgrid_container::{MockActuator, MockEvent};
use appgrid_core::{AppKey, RuntimeConfig, Version, VersionKey, epoch_secs, subjects};
use appgrid_gateway::{Claims, build_router, hash_token};
use appgrid_manager::ManagerReply;
use appgrid_state::{AppStatus, StateStore};
use appgrid_workspace::{StubToolchain, VersionMetadata, Workspace};
use appgridd::{HealthState, Runtime, RuntimeParts, health_router};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use jsonwebtoken::{EncodingKey, Header};
use serde_json::{Value, json};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tower::ServiceExt;

const SECRET: &str = "runtime-test-secret";
const T: Duration = Duration::from_secs(5);

struct Node {
    runtime: Runtime,
    bus: Arc<dyn MessageBus>,
    _shutdown: watch::Sender<bool>,
    dir: tempfile::TempDir,
}

fn config(base: PathBuf) -> RuntimeConfig {
    let mut config = RuntimeConfig::default();
    config.base_path = base;
    config.runtime_id = "node-a".to_string();
    config.jwt.secret = SECRET.to_string();
    config.qps.window = Duration::from_millis(200);
    config.timeouts.app_invoke = Duration::from_secs(2);
    config.timeouts.app_startup = Duration::from_millis(1500);
    config.timeouts.app_shutdown = Duration::from_secs(1);
    config.timeouts.container_start = Duration::from_secs(2);
    config.timeouts.drain_check_interval = Duration::from_millis(20);
    config.timeouts.drain_max_duration = Duration::from_secs(5);
    config.timeouts.delete_drain_max_duration = Duration::from_secs(2);
    config
}

async fn node() -> Node {
    let dir = tempfile::tempdir().unwrap();
    let bus: Arc<dyn MessageBus> = Arc::new(MemoryBus::new());
    let mock = Arc::new(MockActuator::new());
    tokio::spawn(simulate(Arc::clone(&bus), dir.path().to_path_buf(), mock.events()));

    let parts = RuntimeParts {
        bus: Arc::clone(&bus),
        actuator: mock,
        store: StateStore::open_in_memory().unwrap(),
        toolchain: Arc::new(StubToolchain::new()),
    };
    let runtime = Runtime::assemble(config(dir.path().to_path_buf()), parts).unwrap();
    let (shutdown, rx) = watch::channel(false);
    runtime.start(rx).await.unwrap();
    Node {
        runtime,
        bus,
        _shutdown: shutdown,
        dir,
    }
}

impl Node {
    fn key(&self) -> AppKey {
        AppKey::new("alice", "todo").unwrap()
    }

    fn write_source(&self, body: &str) {
        let code = self.dir.path().join("alice/todo/code");
        std::fs::create_dir_all(&code).unwrap();
        std::fs::write(code.join("main.go"), body).unwrap();
    }

    async fn request(&self, subject: &str, body: Value) -> ManagerReply {
        self.bus
            .request_json(subject, BusHeaders::new(), &body, T)
            .await
            .unwrap()
    }

    async fn create_and_deploy(&self) -> Version {
        let reply = self
            .request(subjects::APP_CREATE, json!({"user": "alice", "app": "todo"}))
            .await;
        assert!(reply.ok);
        self.write_source("package main // v1");
        self.update().await
    }

    async fn update(&self) -> Version {
        let reply = self
            .request(subjects::APP_UPDATE, json!({"user": "alice", "app": "todo"}))
            .await;
        reply.version.unwrap()
    }

    async fn run(&self, token: &str, path: &str) -> (StatusCode, String) {
        let req = Request::post(format!("/api/v1/run/alice/todo/{path}"))
            .header("X-Token", token)
            .body(Body::from("hi"))
            .unwrap();
        let resp = build_router(self.runtime.gateway.clone()).oneshot(req).await.unwrap();
        let status = resp.status();
        (status, body_string(resp).await)
    }
}

fn token(sub: &str) -> String {
    let claims = Claims {
        sub: sub.to_string(),
        exp: epoch_secs() + 3600,
        status: Some("active".to_string()),
    };
    jsonwebtoken::encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap()
}

async fn body_string(resp: axum::response::Response) -> String {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn deployed_app_serves_http_requests() {
    let n = node().await;
    assert_eq!(n.create_and_deploy().await, Version::FIRST);

    let (status, body) = n.run(&token("alice"), "ping").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "v1|/ping|alice|hi");

    let app = n.runtime.store.get_app(&n.key()).unwrap().unwrap();
    assert_eq!(app.status, AppStatus::Active);
    assert_eq!(app.current_version, Some(Version::FIRST));
}

#[tokio::test]
async fn upgrade_under_traffic_drops_nothing() {
    let n = Arc::new(node().await);
    n.create_and_deploy().await;
    let t = token("alice");

    let (stop, mut stopped) = watch::channel(false);
    let load = {
        let n = Arc::clone(&n);
        let t = t.clone();
        tokio::spawn(async move {
            let mut seen = Vec::new();
            while !*stopped.borrow_and_update() {
                let (status, body) = n.run(&t, "ping").await;
                assert_eq!(status, StatusCode::OK, "body: {body}");
                seen.push(body);
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            seen
        })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    n.write_source("package main // v2");
    assert_eq!(n.update().await, Version::new(2).unwrap());

    // Let the old version drain and retire while traffic continues.
    let v1 = n.key().with_version(Version::FIRST);
    let discovery = Arc::clone(&n.runtime.discovery);
    assert!(
        eventually(|| {
            let discovery = Arc::clone(&discovery);
            let v1 = v1.clone();
            async move { !discovery.is_running(&v1).await }
        })
        .await
    );
    let _ = stop.send(true);
    let seen = load.await.unwrap();

    assert!(seen.iter().any(|b| b.starts_with("v1|")));
    assert!(seen.last().unwrap().starts_with("v2|"));
    assert!(n.runtime.store.get_version(&v1).unwrap().unwrap().is_stopped());
}

#[tokio::test]
async fn revoked_token_is_rejected() {
    let n = node().await;
    n.create_and_deploy().await;
    let t = token("alice");
    assert_eq!(n.run(&t, "ping").await.0, StatusCode::OK);

    n.bus
        .publish(
            BusMessage::json(
                subjects::TOKEN_INVALIDATE,
                &json!({
                    "user_id": 7,
                    "tokens": [hash_token(&t)],
                    "reason": "logout",
                    "timestamp": epoch_secs(),
                }),
            )
            .unwrap(),
        )
        .await
        .unwrap();
    let blacklist = Arc::clone(&n.runtime.blacklist);
    let probe = t.clone();
    assert!(eventually(|| {
        let blacklist = Arc::clone(&blacklist);
        let probe = probe.clone();
        async move { blacklist.is_blacklisted(&probe) }
    })
    .await);

    assert_eq!(n.run(&t, "ping").await.0, StatusCode::UNAUTHORIZED);
    assert_eq!(n.run(&token("alice"), "ping").await.0, StatusCode::OK);
}

#[tokio::test]
async fn health_port_reports_runtime_and_apps() {
    let n = node().await;
    n.create_and_deploy().await;
    let router = health_router(HealthState::from_runtime(&n.runtime));

    let resp = router
        .clone()
        .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = serde_json::from_str(&body_string(resp).await).unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["status"], "ok");
    assert_eq!(body["data"]["runtime_id"], "node-a");
    assert_eq!(body["data"]["edition"], "community");

    let resp = router
        .clone()
        .oneshot(Request::get("/apps").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let body: Value = serde_json::from_str(&body_string(resp).await).unwrap();
    assert_eq!(body["data"][0]["user"], "alice");
    assert_eq!(body["data"][0]["current_version"], json!(Version::FIRST));

    let resp = router
        .clone()
        .oneshot(Request::get("/apps/alice/todo").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = serde_json::from_str(&body_string(resp).await).unwrap();
    assert_eq!(body["data"]["app"]["status"], "active");
    assert_eq!(body["data"]["versions"].as_array().unwrap().len(), 1);

    let resp = router
        .oneshot(Request::get("/apps/bob/none").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn deleted_app_is_no_longer_routable() {
    let n = node().await;
    n.create_and_deploy().await;

    let reply = n
        .request(subjects::APP_DELETE, json!({"user": "alice", "app": "todo"}))
        .await;
    assert!(reply.ok);
    assert!(n.runtime.store.get_app(&n.key()).unwrap().is_none());
    assert!(!n.dir.path().join("alice/todo").exists());

    assert_eq!(n.run(&token("alice"), "ping").await.0, StatusCode::NOT_FOUND);
}

/// Play the app processes a container would run.
async fn simulate(bus: Arc<dyn MessageBus>, base: PathBuf, mut events: broadcast::Receiver<MockEvent>) {
    let mut procs: HashMap<String, Vec<JoinHandle<()>>> = HashMap::new();
    while let Ok(event) = events.recv().await {
        let (name, version) = match event {
            MockEvent::Started { name, .. } => {
                let Some(key) = app_of(&name) else { continue };
                let Ok(Some(meta)) = VersionMetadata::read(&Workspace::new(&base).app(&key)) else {
                    continue;
                };
                (name, meta.current_version)
            }
            MockEvent::Exec { name, command } => {
                let Some(version) = command
                    .first()
                    .and_then(|bin| bin.rsplit('_').next())
                    .and_then(|v| v.parse::<Version>().ok())
                else {
                    continue;
                };
                (name, version)
            }
            MockEvent::Stopped { name } | MockEvent::Removed { name } => {
                for p in procs.remove(&name).unwrap_or_default() {
                    p.abort();
                }
                continue;
            }
        };
        let Some(key) = app_of(&name) else { continue };
        procs
            .entry(name)
            .or_default()
            .push(spawn_process(Arc::clone(&bus), key.with_version(version)));
    }
}

fn app_of(container: &str) -> Option<AppKey> {
    let (user, app) = container.split_once('-')?;
    AppKey::new(user, app).ok()
}

/// One app version: answers invocations and exits on shutdown.
fn spawn_process(bus: Arc<dyn MessageBus>, key: VersionKey) -> JoinHandle<()> {
    tokio::spawn(async move {
        let Ok(mut control) = bus.subscribe(&subjects::app_status(&key)).await else {
            return;
        };
        let Ok(mut invocations) = bus.subscribe(&subjects::app_invoke(&key)).await else {
            return;
        };
        let startup = json!({"type": "startup", "start_time": epoch_secs()});
        let _ = bus
            .publish_json(&subjects::runtime_status(&key), BusHeaders::new(), &startup)
            .await;
        loop {
            tokio::select! {
                Some(req) = invocations.next() => {
                    let path = req.headers.get(headers::ROUTER_PATH).unwrap_or("").to_string();
                    let user = req.headers.request_user().unwrap_or("").to_string();
                    let body = format!(
                        "{}|{path}|{user}|{}",
                        key.version,
                        String::from_utf8_lossy(&req.payload)
                    );
                    let _ = bus.respond(&req, ReplyStatus::ok(), body.into()).await;
                }
                Some(msg) = control.next() => {
                    let is_shutdown = msg
                        .decode::<Value>()
                        .map(|v| v["type"] == "shutdown")
                        .unwrap_or(false);
                    if is_shutdown {
                        let close = json!({"type": "close"});
                        let _ = bus
                            .publish_json(&subjects::runtime_status(&key), BusHeaders::new(), &close)
                            .await;
                        return;
                    }
                }
                else => return,
            }
        }
    })
}
