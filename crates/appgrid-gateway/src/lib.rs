//! appgrid-gateway — the HTTP edge of the runtime.
//!
//! Requests pass through trace id, access log, CORS and auth layers,
//! then either reach an app over the bus (`/api/v1/run/{user}/{app}/...`)
//! or are reverse-proxied to a configured route's backend.
//!
//! | Outcome | Status |
//! |---|---|
//! | relayed | backend status, 200 for app calls |
//! | auth failure | 401 |
//! | no route | 404 |
//! | backend error / app error code | 502 |
//! | timeout | 504 |

pub mod auth;
pub mod blacklist;
pub mod dispatch;
pub mod error;
pub mod middleware;
pub mod proxy;
pub mod routes;

use std::net::SocketAddr;
use std::sync::Arc;

use appgrid_core::AppKey;
use appgrid_core::config::RuntimeConfig;
use axum::Router;
use axum::body::Body;
use axum::extract::{Path, Request, State};
use axum::middleware::{from_fn, from_fn_with_state};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use serde::Deserialize;
use tokio::sync::watch;
use tracing::info;

pub use auth::{Authenticator, Claims, RequestUser, TrustedNetworks};
pub use blacklist::{BlacklistListener, TokenBlacklist, TokenRevocation, hash_token};
pub use dispatch::{AppCall, AppDispatcher};
pub use error::{AuthError, GatewayError, GatewayResult};
pub use middleware::{CorsPolicy, TraceId};
pub use proxy::ReverseProxy;
pub use routes::{Route, RouteTable};

pub(crate) const RUN_PREFIX: &str = "/api/v1/run";

/// Largest request body relayed over the bus.
const MAX_APP_BODY: usize = 16 * 1024 * 1024;

/// Everything the handlers and layers share.
#[derive(Clone)]
pub struct GatewayState {
    pub routes: Arc<RouteTable>,
    pub auth: Arc<Authenticator>,
    pub proxy: ReverseProxy,
    pub dispatcher: Arc<AppDispatcher>,
    pub cors: Arc<CorsPolicy>,
}

impl GatewayState {
    pub fn from_config(
        config: &RuntimeConfig,
        blacklist: Arc<TokenBlacklist>,
        dispatcher: Arc<AppDispatcher>,
    ) -> GatewayResult<Self> {
        let routes = RouteTable::from_config(&config.routes)?;
        let trusted = TrustedNetworks::parse(&config.gateway.trusted_networks)?;
        info!(
            specific = routes.specific().len(),
            catch_all = routes.catch_all().map(|r| r.path.as_str()).unwrap_or("-"),
            "route table loaded"
        );
        Ok(Self {
            routes: Arc::new(routes),
            auth: Arc::new(Authenticator::new(&config.jwt.secret, blacklist, trusted)),
            proxy: ReverseProxy::new(config.gateway.default_timeout),
            dispatcher,
            cors: Arc::new(CorsPolicy::new(&config.gateway.allowed_origins)),
        })
    }
}

/// Build the gateway router with its middleware stack.
pub fn build_router(state: GatewayState) -> Router {
    Router::new()
        .route("/api/v1/run/{user}/{app}", any(run_app))
        .route("/api/v1/run/{user}/{app}/{*path}", any(run_app))
        .fallback(proxy_fallback)
        .layer(from_fn_with_state(state.clone(), middleware::auth))
        .layer(from_fn_with_state(state.clone(), middleware::cors))
        .layer(from_fn(middleware::access_log))
        .layer(from_fn(middleware::trace_id))
        .with_state(state)
}

/// Serve `router` on `addr` until `shutdown` flips.
pub async fn serve(router: Router, addr: SocketAddr, mut shutdown: watch::Receiver<bool>) -> GatewayResult<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "gateway listening");
    axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await?;
    Ok(())
}

#[derive(Deserialize)]
struct RunParams {
    user: String,
    app: String,
    #[serde(default)]
    path: String,
}

async fn run_app(State(state): State<GatewayState>, Path(params): Path<RunParams>, req: Request) -> Response {
    let key = match AppKey::new(params.user, params.app) {
        Ok(k) => k,
        Err(e) => return GatewayError::BadRequest(e.to_string()).into_response(),
    };
    let trace_id = req
        .extensions()
        .get::<TraceId>()
        .map(|t| t.0.clone())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let user = req.extensions().get::<RequestUser>().map(|u| u.0.clone());
    let method = req.method().to_string();
    let body = match axum::body::to_bytes(req.into_body(), MAX_APP_BODY).await {
        Ok(b) => b,
        Err(e) => return GatewayError::BadRequest(format!("request body: {e}")).into_response(),
    };
    let call = AppCall {
        key,
        router_path: format!("/{}", params.path.trim_start_matches('/')),
        method,
        trace_id,
        user,
        body,
    };
    match state.dispatcher.dispatch(call).await {
        Ok(reply) => Response::new(Body::from(reply.payload)),
        Err(e) => e.into_response(),
    }
}

async fn proxy_fallback(State(state): State<GatewayState>, req: Request) -> Response {
    let path = req.uri().path().to_string();
    let Some(route) = state.routes.resolve(&path) else {
        return GatewayError::NoRoute(path).into_response();
    };
    let ip = middleware::peer_ip(&req);
    match state.proxy.forward(route, req, ip).await {
        Ok(resp) => resp,
        Err(e) => {
            tracing::warn!(route = %route.path, error = %e, "proxy failed");
            e.into_response()
        }
    }
}
