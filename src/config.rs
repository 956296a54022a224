use crate::error::FrontendError;
use crate::framework::{self, FrameworkType, PACKAGE_JSON};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// How the frontend is served. Picked once at startup and passed to the router.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Proxy to a live dev server
    #[default]
    Development,
    /// Serve prebuilt assets
    Release,
}

/// Top-level configuration file
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub mode: Mode,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub frontend: FrontendOptions,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Bind address (default: 127.0.0.1)
    #[serde(default = "default_bind_address")]
    pub bind: String,

    /// HTTP port (default: 8080)
    #[serde(default = "default_listen_port")]
    pub port: u16,

    /// Max time to wait for the dev server to answer a proxied request
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Maximum idle connections kept open to the dev server (default: 10)
    #[serde(default = "default_pool_max_idle_per_host")]
    pub pool_max_idle_per_host: usize,

    /// Idle connection timeout in seconds (default: 90)
    #[serde(default = "default_pool_idle_timeout")]
    pub pool_idle_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind_address(),
            port: default_listen_port(),
            request_timeout_secs: default_request_timeout(),
            pool_max_idle_per_host: default_pool_max_idle_per_host(),
            pool_idle_timeout_secs: default_pool_idle_timeout(),
        }
    }
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn pool_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.pool_idle_timeout_secs)
    }
}

/// Frontend project settings. Anything left unset is filled in by
/// [`FrontendOptions::resolve`] from the detected framework.
///
/// # Security Warning
///
/// `dev_server_command` is executed as-is in development mode. Keep the
/// configuration file writable only by trusted users.
#[derive(Debug, Deserialize, Clone)]
pub struct FrontendOptions {
    /// Folder name searched for from the current directory upwards (default: "frontend")
    #[serde(default = "default_folder_name")]
    pub folder_name: String,

    /// Explicit frontend folder, skips the search
    pub folder_path: Option<PathBuf>,

    /// Framework, auto-detected from package.json when unset
    pub framework: Option<FrameworkType>,

    /// Build output folder relative to the frontend folder
    pub dist_folder: Option<String>,

    /// Command that starts the dev server
    pub dev_server_command: Option<String>,

    /// Don't spawn a dev server even in development mode
    #[serde(default)]
    pub skip_dev_server: bool,

    /// Port of an already running dev server (used with `skip_dev_server`)
    pub port: Option<u16>,

    /// Shell document served for unmatched routes (default: "index.html")
    #[serde(default = "default_fallback_path")]
    pub fallback_path: String,

    /// How long to wait for the dev server to print its URL
    #[serde(default = "default_startup_timeout")]
    pub startup_timeout_secs: u64,

    /// Grace period in seconds between SIGTERM and SIGKILL
    #[serde(default = "default_shutdown_grace_period")]
    pub shutdown_grace_period_secs: u64,
}

impl Default for FrontendOptions {
    fn default() -> Self {
        Self {
            folder_name: default_folder_name(),
            folder_path: None,
            framework: None,
            dist_folder: None,
            dev_server_command: None,
            skip_dev_server: false,
            port: None,
            fallback_path: default_fallback_path(),
            startup_timeout_secs: default_startup_timeout(),
            shutdown_grace_period_secs: default_shutdown_grace_period(),
        }
    }
}

/// Frontend settings with every default filled in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFrontend {
    pub folder_path: PathBuf,
    pub framework: FrameworkType,
    /// Empty when neither configured nor known for the framework
    pub dist_folder: String,
    pub dev_server_command: Option<String>,
    pub skip_dev_server: bool,
    pub port: Option<u16>,
    pub fallback_path: String,
    pub startup_timeout: Duration,
    pub shutdown_grace_period: Duration,
}

impl ResolvedFrontend {
    /// Settings for a known folder and framework, without touching the filesystem
    pub fn new(folder_path: impl Into<PathBuf>, framework: FrameworkType) -> Self {
        let defaults = framework.defaults();
        Self {
            folder_path: folder_path.into(),
            framework,
            dist_folder: defaults.map(|d| d.dist_folder.to_string()).unwrap_or_default(),
            dev_server_command: defaults.map(|d| d.dev_server_command.to_string()),
            skip_dev_server: false,
            port: None,
            fallback_path: default_fallback_path(),
            startup_timeout: Duration::from_secs(default_startup_timeout()),
            shutdown_grace_period: Duration::from_secs(default_shutdown_grace_period()),
        }
    }

    pub fn with_dev_server_command(mut self, command: &str) -> Self {
        self.dev_server_command = Some(command.to_string());
        self
    }

    pub fn with_dist_folder(mut self, dist_folder: &str) -> Self {
        self.dist_folder = dist_folder.to_string();
        self
    }

    /// Don't spawn anything; proxy to `port` if given, otherwise discard requests
    pub fn skipping_dev_server(mut self, port: Option<u16>) -> Self {
        self.skip_dev_server = true;
        self.port = port;
        self
    }

    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }
}

impl FrontendOptions {
    /// Locate the frontend folder and fill in framework defaults.
    ///
    /// With `folder_path` set, the folder must contain package.json unless the
    /// framework is given explicitly (release deployments often ship without
    /// the project sources). Otherwise `<folder_name>/package.json` is searched
    /// for in `current_dir` and its ancestors.
    pub fn resolve(&self, current_dir: &Path) -> Result<ResolvedFrontend, FrontendError> {
        let folder_path = match &self.folder_path {
            Some(path) => {
                let path = if path.is_absolute() {
                    path.clone()
                } else {
                    current_dir.join(path)
                };
                if self.framework.is_none() && !path.join(PACKAGE_JSON).is_file() {
                    return Err(FrontendError::PackageJsonNotFound(path));
                }
                path
            }
            None => framework::find_frontend_folder(current_dir, &self.folder_name)?,
        };

        let framework = match self.framework {
            Some(framework) => framework,
            None => FrameworkType::detect(&folder_path)?,
        };

        let defaults = framework.defaults();
        let dist_folder = self
            .dist_folder
            .clone()
            .or_else(|| defaults.map(|d| d.dist_folder.to_string()))
            .unwrap_or_default();
        let dev_server_command = self
            .dev_server_command
            .clone()
            .or_else(|| defaults.map(|d| d.dev_server_command.to_string()));

        debug!(
            folder = %folder_path.display(),
            ?framework,
            dist_folder = %dist_folder,
            ?dev_server_command,
            "Frontend resolved"
        );

        Ok(ResolvedFrontend {
            folder_path,
            framework,
            dist_folder,
            dev_server_command,
            skip_dev_server: self.skip_dev_server,
            port: self.port,
            fallback_path: self.fallback_path.clone(),
            startup_timeout: Duration::from_secs(self.startup_timeout_secs),
            shutdown_grace_period: Duration::from_secs(self.shutdown_grace_period_secs),
        })
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.fallback_path.trim().is_empty() {
            return Err("frontend: 'fallback_path' must not be empty".to_string());
        }
        if self.startup_timeout_secs == 0 {
            return Err("frontend: 'startup_timeout_secs' must be greater than 0".to_string());
        }
        if self.port == Some(0) {
            return Err("frontend: 'port' must be greater than 0".to_string());
        }
        Ok(())
    }
}

// Default value functions
fn default_listen_port() -> u16 {
    8080
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_request_timeout() -> u64 {
    30 // 30 seconds max for the dev server to respond
}

fn default_pool_max_idle_per_host() -> usize {
    10
}

fn default_pool_idle_timeout() -> u64 {
    90
}

fn default_folder_name() -> String {
    "frontend".to_string()
}

fn default_fallback_path() -> String {
    "index.html".to_string()
}

fn default_startup_timeout() -> u64 {
    30
}

fn default_shutdown_grace_period() -> u64 {
    5
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate all configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push("server: 'port' must be greater than 0".to_string());
        }
        if self.server.request_timeout_secs == 0 {
            errors.push("server: 'request_timeout_secs' must be greater than 0".to_string());
        }
        if let Err(e) = self.frontend.validate() {
            errors.push(e);
        }

        if !errors.is_empty() {
            anyhow::bail!("Configuration errors:\n  - {}", errors.join("\n  - "));
        }

        Ok(())
    }
}
