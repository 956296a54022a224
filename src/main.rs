use spagate::assets::{AssetStore, DirStore};
use spagate::config::{Config, Mode, ResolvedFrontend};
use spagate::proxy::PoolConfig;
use spagate::router::RouterBuilder;
use spagate::server::SpaServer;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("spagate=debug".parse().expect("valid log directive")),
        )
        .init();

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("spagate.toml"));

    let config = Config::load(&config_path).map_err(|e| {
        error!(path = %config_path.display(), error = %e, "Failed to load configuration");
        e
    })?;
    info!(path = %config_path.display(), "Configuration loaded");

    let current_dir = std::env::current_dir()?;
    let frontend = config.frontend.resolve(&current_dir).map_err(|e| {
        error!(error = %e, "Failed to locate frontend");
        e
    })?;

    print_startup_banner(&config, &frontend);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut builder = RouterBuilder::new(frontend.clone())
        .mode(config.mode)
        .request_timeout(config.server.request_timeout())
        .pool(PoolConfig {
            max_idle_per_host: config.server.pool_max_idle_per_host,
            idle_timeout: config.server.pool_idle_timeout(),
        });
    if config.mode == Mode::Release {
        let store: Arc<dyn AssetStore> = Arc::new(DirStore::new(&frontend.folder_path));
        builder = builder.assets(store);
    }

    // Dev server startup can take a while; allow Ctrl+C to abort it
    let build = builder.build(shutdown_rx.clone());
    tokio::pin!(build);
    let router = tokio::select! {
        result = &mut build => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Received SIGINT (Ctrl+C) during startup, shutting down...");
            let _ = shutdown_tx.send(true);
            let _ = build.await;
            return Ok(());
        }
    };
    let router = Arc::new(router.map_err(|e| {
        error!(error = %e, "Failed to start frontend");
        e
    })?);

    let ip: IpAddr = config.server.bind.parse()?;
    let addr = SocketAddr::new(ip, config.server.port);
    let server = SpaServer::bind(addr, Arc::clone(&router), shutdown_rx.clone()).await?;

    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.run().await {
            error!(error = %e, "Frontend server error");
        }
    });

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("Failed to install SIGTERM handler");

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT (Ctrl+C), shutting down...");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
        info!("Received Ctrl+C, shutting down...");
    }

    let _ = shutdown_tx.send(true);

    if router.dev_server().is_some() {
        info!("Stopping dev server...");
    }
    router.shutdown().await;

    let _ = tokio::time::timeout(Duration::from_secs(5), server_handle).await;

    info!("Shutdown complete");
    Ok(())
}

fn print_startup_banner(config: &Config, frontend: &ResolvedFrontend) {
    info!(
        name = env!("CARGO_PKG_NAME"),
        version = env!("CARGO_PKG_VERSION"),
        "Starting"
    );
    info!(
        bind = %config.server.bind,
        port = config.server.port,
        mode = ?config.mode,
        request_timeout_secs = config.server.request_timeout_secs,
        "Server configuration"
    );
    info!(
        folder = %frontend.folder_path.display(),
        framework = ?frontend.framework,
        dist_folder = %frontend.dist_folder,
        dev_server_command = ?frontend.dev_server_command,
        skip_dev_server = frontend.skip_dev_server,
        port = ?frontend.port,
        "Frontend configuration"
    );
    info!(
        startup_timeout_secs = frontend.startup_timeout.as_secs(),
        shutdown_grace_period_secs = frontend.shutdown_grace_period.as_secs(),
        "Dev server timeouts"
    );
}
