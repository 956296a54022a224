//! Request routing for the frontend
//!
//! The router is built once at startup from a [`Mode`] and the resolved
//! frontend settings, and never changes afterwards:
//!
//! | Mode        | Settings                       | Handler                        |
//! |-------------|--------------------------------|--------------------------------|
//! | Release     | any                            | static files with SPA fallback |
//! | Development | dev server enabled             | proxy to the spawned server    |
//! | Development | dev server skipped, port given | proxy to `localhost:<port>`    |
//! | Development | dev server skipped, no port    | discard                        |

use crate::assets::{AssetResolver, AssetStore};
use crate::config::{Mode, ResolvedFrontend};
use crate::devserver::{DevServer, DevServerOptions, LaunchSpec, OutputSink, TracingSink};
use crate::error::{json_error_response, FrontendError};
use crate::proxy::{PoolConfig, ReverseProxy};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Empty, Full};
use hyper::body::{Bytes, Incoming};
use hyper::{Method, Request, Response, StatusCode};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info};
use url::Url;

/// Which handler a router dispatches to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterKind {
    Static,
    Proxy,
    Discard,
}

/// Builds a [`SpaRouter`]
pub struct RouterBuilder {
    frontend: ResolvedFrontend,
    mode: Mode,
    assets: Option<Arc<dyn AssetStore>>,
    sink: Arc<dyn OutputSink>,
    request_timeout: Duration,
    pool: PoolConfig,
}

impl RouterBuilder {
    pub fn new(frontend: ResolvedFrontend) -> Self {
        Self {
            frontend,
            mode: Mode::default(),
            assets: None,
            sink: Arc::new(TracingSink),
            request_timeout: Duration::from_secs(30),
            pool: PoolConfig::default(),
        }
    }

    pub fn mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    /// Asset store for release mode
    pub fn assets(mut self, store: Arc<dyn AssetStore>) -> Self {
        self.assets = Some(store);
        self
    }

    /// Receiver for dev server output lines
    pub fn sink(mut self, sink: Arc<dyn OutputSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Timeout for proxied requests
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    /// Build the router.
    ///
    /// In development mode this spawns the dev server and waits until it is
    /// ready; any startup failure is returned and no router is produced. The
    /// dev server is stopped when `shutdown` flips to `true`.
    pub async fn build(self, shutdown: watch::Receiver<bool>) -> Result<SpaRouter, FrontendError> {
        let frontend = self.frontend;

        if self.mode == Mode::Release {
            let store = self.assets.ok_or(FrontendError::MissingAssetStore)?;
            let resolver = AssetResolver::new(store, &frontend.dist_folder, frontend.framework)
                .with_fallback_path(&frontend.fallback_path);
            if resolver.base_path().is_empty() {
                return Err(FrontendError::MissingDistFolder(format!("{:?}", frontend.framework)));
            }
            info!(
                dist_folder = %frontend.dist_folder,
                framework = ?frontend.framework,
                fallback = %frontend.fallback_path,
                "Serving static frontend assets"
            );
            return Ok(SpaRouter {
                handler: Handler::Static(Arc::new(resolver)),
                dev_server: None,
            });
        }

        if !frontend.skip_dev_server {
            let command = match frontend.dev_server_command {
                Some(ref command) => command.clone(),
                None => {
                    return Err(FrontendError::DevServerDidNotStart(format!(
                        "no dev server command configured for framework {:?}",
                        frontend.framework
                    )))
                }
            };
            let launch = LaunchSpec::new(frontend.folder_path.clone(), command);
            let options = DevServerOptions {
                startup_timeout: frontend.startup_timeout,
                shutdown_grace_period: frontend.shutdown_grace_period,
            };

            let (dev_server, url) = DevServer::spawn(shutdown, launch, options, self.sink).await?;
            let proxy = ReverseProxy::new(url, self.request_timeout, self.pool);
            return Ok(SpaRouter {
                handler: Handler::Proxy(proxy),
                dev_server: Some(dev_server),
            });
        }

        if let Some(port) = frontend.port {
            let url = Url::parse(&format!("http://localhost:{}", port)).map_err(|source| {
                FrontendError::MalformedUrl {
                    url: format!("http://localhost:{}", port),
                    source,
                }
            })?;
            info!(url = %url, "Dev server spawn skipped, proxying to fixed port");
            return Ok(SpaRouter {
                handler: Handler::Proxy(ReverseProxy::new(url, self.request_timeout, self.pool)),
                dev_server: None,
            });
        }

        info!("No dev server and no port configured, frontend requests are discarded");
        Ok(SpaRouter {
            handler: Handler::Discard,
            dev_server: None,
        })
    }
}

enum Handler {
    Static(Arc<AssetResolver>),
    Proxy(ReverseProxy),
    Discard,
}

/// The frontend request handler
pub struct SpaRouter {
    handler: Handler,
    dev_server: Option<Arc<DevServer>>,
}

impl SpaRouter {
    pub fn kind(&self) -> RouterKind {
        match self.handler {
            Handler::Static(_) => RouterKind::Static,
            Handler::Proxy(_) => RouterKind::Proxy,
            Handler::Discard => RouterKind::Discard,
        }
    }

    /// The dev server this router owns, if it spawned one
    pub fn dev_server(&self) -> Option<&Arc<DevServer>> {
        self.dev_server.as_ref()
    }

    /// Where proxied requests go
    pub fn proxy_target(&self) -> Option<&Url> {
        match &self.handler {
            Handler::Proxy(proxy) => Some(proxy.target()),
            _ => None,
        }
    }

    /// Handle a single request
    pub async fn handle(
        &self,
        req: Request<Incoming>,
        client_addr: SocketAddr,
    ) -> Response<BoxBody<Bytes, hyper::Error>> {
        match &self.handler {
            Handler::Static(resolver) => serve_static(Arc::clone(resolver), req.method(), req.uri().path()).await,
            Handler::Proxy(proxy) => proxy.forward(req, client_addr).await,
            Handler::Discard => empty_response(StatusCode::OK),
        }
    }

    /// Stop the owned dev server, if any. Safe to call more than once.
    pub async fn shutdown(&self) {
        if let Some(dev_server) = &self.dev_server {
            dev_server.stop().await;
        }
    }
}

async fn serve_static(
    resolver: Arc<AssetResolver>,
    method: &Method,
    path: &str,
) -> Response<BoxBody<Bytes, hyper::Error>> {
    if method != Method::GET && method != Method::HEAD {
        let mut response = empty_response(StatusCode::METHOD_NOT_ALLOWED);
        response
            .headers_mut()
            .insert(hyper::header::ALLOW, hyper::header::HeaderValue::from_static("GET, HEAD"));
        return response;
    }
    let head = method == Method::HEAD;

    let decoded = match urlencoding::decode(path) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => path.to_string(),
    };

    let lookup = tokio::task::spawn_blocking({
        let decoded = decoded.clone();
        move || resolver.resolve(&decoded)
    })
    .await;

    let asset = match lookup {
        Ok(Ok(asset)) => asset,
        Ok(Err(e)) => {
            error!(path = %decoded, error = %e, "Failed to resolve frontend asset");
            return json_error_response(e.error_code(), e.to_string());
        }
        Err(e) => {
            error!(path = %decoded, error = %e, "Asset lookup task failed");
            return json_error_response(crate::error::ErrorCode::InternalError, "Asset lookup failed");
        }
    };

    debug!(request_path = %decoded, asset = %asset.path, "Serving asset");

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(hyper::header::CONTENT_LENGTH, asset.bytes.len());
    if let Some(content_type) = asset.content_type {
        builder = builder.header(hyper::header::CONTENT_TYPE, content_type);
    }
    let body = if head { Bytes::new() } else { asset.bytes };

    builder
        .body(Full::new(body).map_err(|never| match never {}).boxed())
        .expect("valid response with static headers")
}

fn empty_response(status: StatusCode) -> Response<BoxBody<Bytes, hyper::Error>> {
    Response::builder()
        .status(status)
        .body(Empty::<Bytes>::new().map_err(|never| match never {}).boxed())
        .expect("valid response builder")
}
