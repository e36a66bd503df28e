//! Request pipeline: trace id, access log, CORS, auth.

use std::net::{IpAddr, SocketAddr};

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::GatewayState;
use crate::auth::{REQUEST_USER_HEADER, RequestUser};
use crate::error::GatewayError;
use crate::proxy::strip_cors;

pub const TRACE_HEADER: &str = "x-trace-id";

/// Trace id of the current request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceId(pub String);

pub(crate) fn peer_ip(req: &Request) -> Option<IpAddr> {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
}

pub(crate) fn is_run_path(path: &str) -> bool {
    path == crate::RUN_PREFIX || path.starts_with(&format!("{}/", crate::RUN_PREFIX))
}

/// Assign a trace id when the client sent none and echo it back.
pub async fn trace_id(mut req: Request, next: Next) -> Response {
    let id = req
        .headers()
        .get(TRACE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let value = HeaderValue::from_str(&id).ok();
    if let Some(v) = &value {
        req.headers_mut().insert(TRACE_HEADER, v.clone());
    }
    req.extensions_mut().insert(TraceId(id));
    let mut resp = next.run(req).await;
    if let Some(v) = value {
        resp.headers_mut().insert(TRACE_HEADER, v);
    }
    resp
}

pub async fn access_log(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let trace = req
        .extensions()
        .get::<TraceId>()
        .map(|t| t.0.clone())
        .unwrap_or_default();
    let ip = peer_ip(&req);
    let started = Instant::now();

    let resp = next.run(req).await;

    let user = resp
        .extensions()
        .get::<RequestUser>()
        .map(|u| u.0.clone())
        .unwrap_or_default();
    info!(
        %method,
        %path,
        status = resp.status().as_u16(),
        latency_ms = started.elapsed().as_millis() as u64,
        trace_id = %trace,
        %user,
        ip = ?ip,
        "request"
    );
    resp
}

/// Allowed origins; `*` allows any.
#[derive(Debug, Clone)]
pub struct CorsPolicy {
    allow_any: bool,
    origins: Vec<String>,
}

impl CorsPolicy {
    pub fn new(origins: &[String]) -> Self {
        Self {
            allow_any: origins.iter().any(|o| o == "*"),
            origins: origins.to_vec(),
        }
    }

    fn apply(&self, origin: Option<&HeaderValue>, headers: &mut HeaderMap) {
        let allowed = if self.allow_any {
            Some(HeaderValue::from_static("*"))
        } else {
            origin
                .filter(|o| o.to_str().is_ok_and(|o| self.origins.iter().any(|a| a == o)))
                .cloned()
        };
        let Some(allowed) = allowed else { return };
        if !self.allow_any {
            headers.insert(header::VARY, HeaderValue::from_static("Origin"));
        }
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, allowed);
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static("GET, POST, PUT, PATCH, DELETE, OPTIONS"),
        );
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static("Content-Type, X-Token, X-Trace-Id, X-Request-User"),
        );
        headers.insert(
            header::ACCESS_CONTROL_EXPOSE_HEADERS,
            HeaderValue::from_static("X-Trace-Id"),
        );
    }
}

pub async fn cors(State(state): State<GatewayState>, req: Request, next: Next) -> Response {
    let origin = req.headers().get(header::ORIGIN).cloned();
    if *req.method() == Method::OPTIONS {
        let mut resp = StatusCode::NO_CONTENT.into_response();
        state.cors.apply(origin.as_ref(), resp.headers_mut());
        return resp;
    }
    let mut resp = next.run(req).await;
    strip_cors(resp.headers_mut());
    state.cors.apply(origin.as_ref(), resp.headers_mut());
    resp
}

pub async fn auth(State(state): State<GatewayState>, mut req: Request, next: Next) -> Response {
    let path = req.uri().path();
    let public = !is_run_path(path) && state.routes.resolve(path).is_some_and(|r| r.public);
    if public {
        // Identity on a public route comes from a valid token or not at all.
        let user = state.auth.authenticate(req.headers(), peer_ip(&req)).ok();
        req.headers_mut().remove(REQUEST_USER_HEADER);
        if let Some(user) = user {
            if let Ok(v) = HeaderValue::from_str(&user.0) {
                req.headers_mut().insert(REQUEST_USER_HEADER, v);
            }
            req.extensions_mut().insert(user);
        }
        return next.run(req).await;
    }
    match state.auth.authenticate(req.headers(), peer_ip(&req)) {
        Ok(user) => {
            if let Ok(v) = HeaderValue::from_str(&user.0) {
                req.headers_mut().insert(REQUEST_USER_HEADER, v);
            }
            req.extensions_mut().insert(user.clone());
            let mut resp = next.run(req).await;
            resp.extensions_mut().insert(user);
            resp
        }
        Err(e) => {
            debug!(path = %req.uri().path(), error = %e, "rejected unauthenticated request");
            GatewayError::Unauthorized(e).into_response()
        }
    }
}
