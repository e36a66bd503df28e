//! Operator endpoints on the health port.
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/healthz` | Liveness and license edition |
//! | GET | `/apps` | Discovery view of every known app |
//! | GET | `/apps/{user}/{app}` | Stored rows plus discovery view of one app |

use std::sync::Arc;

use appgrid_core::AppKey;
use appgrid_discovery::{AppSnapshot, DiscoveryService};
use appgrid_license::LicenseGate;
use appgrid_state::{AppRecord, AppVersionRecord, StateStore};
use axum::Json;
use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use serde::Serialize;

use crate::Runtime;

#[derive(Clone)]
pub struct HealthState {
    pub runtime_id: String,
    pub store: StateStore,
    pub discovery: Arc<DiscoveryService>,
    pub license: Arc<LicenseGate>,
}

impl HealthState {
    pub fn from_runtime(runtime: &Runtime) -> Self {
        Self {
            runtime_id: runtime.config.runtime_id.clone(),
            store: runtime.store.clone(),
            discovery: Arc::clone(&runtime.discovery),
            license: Arc::clone(&runtime.license),
        }
    }
}

#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Response {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
        .into_response()
    }
}

fn error_response(msg: &str, status: StatusCode) -> Response {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
        .into_response()
}

pub fn health_router(state: HealthState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/apps", get(list_apps))
        .route("/apps/{user}/{app}", get(get_app))
        .with_state(state)
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
    runtime_id: String,
    edition: String,
}

/// GET /healthz
async fn healthz(State(state): State<HealthState>) -> Response {
    ApiResponse::ok(Health {
        status: "ok",
        runtime_id: state.runtime_id.clone(),
        edition: state.license.edition(),
    })
}

/// GET /apps
async fn list_apps(State(state): State<HealthState>) -> Response {
    ApiResponse::ok(state.discovery.snapshot().await)
}

#[derive(Serialize)]
struct AppDetail {
    app: AppRecord,
    versions: Vec<AppVersionRecord>,
    discovery: Option<AppSnapshot>,
}

/// GET /apps/{user}/{app}
async fn get_app(State(state): State<HealthState>, Path((user, app)): Path<(String, String)>) -> Response {
    let key = match AppKey::new(user, app) {
        Ok(k) => k,
        Err(e) => return error_response(&e.to_string(), StatusCode::BAD_REQUEST),
    };
    let record = match state.store.get_app(&key) {
        Ok(Some(r)) => r,
        Ok(None) => return error_response("app not found", StatusCode::NOT_FOUND),
        Err(e) => return error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR),
    };
    let versions = match state.store.list_versions(&key) {
        Ok(v) => v,
        Err(e) => return error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR),
    };
    ApiResponse::ok(AppDetail {
        app: record,
        versions,
        discovery: state.discovery.app_snapshot(&key).await,
    })
}
