//! HTTP reverse proxy for configured routes.

use std::net::IpAddr;
use std::time::Duration;

use axum::body::Body;
use axum::extract::Request;
use axum::http::{HeaderMap, HeaderName, HeaderValue, header};
use axum::response::Response;
use http_body_util::BodyExt;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use tracing::debug;

use crate::error::{GatewayError, GatewayResult};
use crate::routes::Route;

type HttpClient = Client<HttpConnector, Body>;

const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

#[derive(Clone)]
pub struct ReverseProxy {
    client: HttpClient,
    default_timeout: Duration,
}

impl ReverseProxy {
    pub fn new(default_timeout: Duration) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self {
            client,
            default_timeout,
        }
    }

    /// Forward `req` to a target of `route` and relay the response.
    pub async fn forward(&self, route: &Route, mut req: Request, client_ip: Option<IpAddr>) -> GatewayResult<Response> {
        let selected = route.select(client_ip);
        let out_path = route.outbound_path(req.uri().path());
        let path_and_query = match req.uri().query() {
            Some(q) => format!("{out_path}?{q}"),
            None => out_path,
        };
        let uri = selected.uri(&path_and_query)?;
        debug!(route = %route.path, target = %uri, "proxying");
        *req.uri_mut() = uri;

        let headers = req.headers_mut();
        strip_hop_by_hop(headers);
        let host = HeaderValue::from_str(&selected.authority)
            .map_err(|e| GatewayError::Config(format!("target host: {e}")))?;
        headers.insert(header::HOST, host);
        if let Some(ip) = client_ip
            && let Ok(v) = HeaderValue::from_str(&ip.to_string())
        {
            headers.append(X_FORWARDED_FOR, v);
        }

        let timeout = route.timeout.unwrap_or(self.default_timeout);
        let response = match tokio::time::timeout(timeout, self.client.request(req)).await {
            Err(_) => return Err(GatewayError::Timeout(timeout)),
            Ok(Err(e)) => return Err(GatewayError::Backend(e.to_string())),
            Ok(Ok(r)) => r,
        };
        let (mut parts, body) = response.into_parts();
        strip_hop_by_hop(&mut parts.headers);
        strip_cors(&mut parts.headers);
        // The target stays in flight until the body has been relayed.
        let body = body.map_frame(move |frame| {
            let _lease = &selected;
            frame
        });
        Ok(Response::from_parts(parts, Body::new(body)))
    }
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP {
        headers.remove(*name);
    }
}

/// Drop backend CORS headers; the gateway writes its own.
pub(crate) fn strip_cors(headers: &mut HeaderMap) {
    let names: Vec<HeaderName> = headers
        .keys()
        .filter(|k| k.as_str().starts_with("access-control-"))
        .cloned()
        .collect();
    for name in names {
        headers.remove(&name);
    }
}
