//! Reverse proxy to the frontend dev server
//!
//! Requests are forwarded over a pooled hyper client. Responses are streamed
//! back without buffering.

use crate::error::{json_error_response, ErrorCode};
use http_body_util::combinators::BoxBody;
use http_body_util::BodyExt;
use hyper::body::{Bytes, Incoming};
use hyper::header::{HeaderMap, HeaderName, HeaderValue};
use hyper::{Request, Response, Uri, Version};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{debug, error, warn};
use url::Url;
use uuid::Uuid;

/// Header name for request ID
pub const X_REQUEST_ID: &str = "x-request-id";
const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_FORWARDED_HOST: &str = "x-forwarded-host";
const X_FORWARDED_PROTO: &str = "x-forwarded-proto";

/// Headers that describe a single connection and are never forwarded
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Connection pool settings for the proxy client
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_idle_per_host: usize,
    pub idle_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_idle_per_host: 10,
            idle_timeout: Duration::from_secs(90),
        }
    }
}

/// Forwards requests to a single upstream URL
pub struct ReverseProxy {
    target: Url,
    client: Client<HttpConnector, Incoming>,
    request_timeout: Duration,
}

impl ReverseProxy {
    pub fn new(target: Url, request_timeout: Duration, pool: PoolConfig) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_nodelay(true);
        connector.enforce_http(true);

        let client = Client::builder(TokioExecutor::new())
            .pool_max_idle_per_host(pool.max_idle_per_host)
            .pool_idle_timeout(pool.idle_timeout)
            .build(connector);

        debug!(
            upstream = %target,
            max_idle = pool.max_idle_per_host,
            idle_timeout_secs = pool.idle_timeout.as_secs(),
            "Reverse proxy initialized"
        );

        Self {
            target,
            client,
            request_timeout,
        }
    }

    pub fn target(&self) -> &Url {
        &self.target
    }

    /// Forward `req` to the target, mapping failures to JSON error responses
    pub async fn forward(
        &self,
        req: Request<Incoming>,
        client_addr: SocketAddr,
    ) -> Response<BoxBody<Bytes, hyper::Error>> {
        let request_id = req
            .headers()
            .get(X_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .map(String::from)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let path_and_query = req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let uri = match target_uri(&self.target, path_and_query) {
            Ok(uri) => uri,
            Err(e) => {
                warn!(request_id, error = %e, "Could not build upstream URI");
                return json_error_response(ErrorCode::InternalError, "Invalid upstream URI");
            }
        };

        let (mut parts, body) = req.into_parts();
        debug!(method = %parts.method, uri = %uri, request_id, "Proxying request");

        strip_hop_by_hop(&mut parts.headers);
        set_forwarded_headers(&mut parts.headers, client_addr, &request_id);
        parts.uri = uri;
        // The upstream connection is always HTTP/1.1, even for h2 clients
        parts.version = Version::HTTP_11;
        let upstream_req = Request::from_parts(parts, body);

        let result = tokio::time::timeout(self.request_timeout, self.client.request(upstream_req)).await;

        match result {
            Ok(Ok(response)) => {
                let (mut parts, body) = response.into_parts();
                strip_hop_by_hop(&mut parts.headers);
                Response::from_parts(parts, body.boxed())
            }
            Ok(Err(e)) => {
                error!(upstream = %self.target, request_id, error = %e, "Failed to forward request");
                json_error_response(ErrorCode::ConnectionFailed, "Failed to connect to dev server")
            }
            Err(_) => {
                warn!(
                    upstream = %self.target,
                    request_id,
                    timeout_secs = self.request_timeout.as_secs(),
                    "Request timed out"
                );
                json_error_response(
                    ErrorCode::RequestTimeout,
                    format!(
                        "Request timed out after {} seconds",
                        self.request_timeout.as_secs()
                    ),
                )
            }
        }
    }
}

/// Append the request's path and query to the target URL
fn target_uri(target: &Url, path_and_query: &str) -> Result<Uri, String> {
    let base = target.as_str().trim_end_matches('/');
    format!("{}{}", base, path_and_query)
        .parse::<Uri>()
        .map_err(|e| e.to_string())
}

/// Remove hop-by-hop headers, including any named in `Connection`
fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(hyper::header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in named {
        headers.remove(name);
    }
    for name in HOP_BY_HOP_HEADERS {
        headers.remove(*name);
    }
}

/// Overwrite X-Forwarded-* so clients cannot spoof them
fn set_forwarded_headers(headers: &mut HeaderMap, client_addr: SocketAddr, request_id: &str) {
    if let Ok(value) = HeaderValue::from_str(request_id) {
        headers.insert(X_REQUEST_ID, value);
    }
    if let Ok(value) = HeaderValue::from_str(&client_addr.ip().to_string()) {
        headers.insert(X_FORWARDED_FOR, value);
    }
    if let Some(host) = headers.get(hyper::header::HOST).cloned() {
        headers.insert(X_FORWARDED_HOST, host);
    }
    headers.insert(X_FORWARDED_PROTO, HeaderValue::from_static("http"));
}
