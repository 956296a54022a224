//! Frontend framework detection and per-framework defaults

use crate::error::FrontendError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Name of the manifest that marks a frontend project folder
pub const PACKAGE_JSON: &str = "package.json";

/// Supported frontend frameworks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameworkType {
    /// Next.js static export (`next build && next export`)
    #[serde(alias = "next", alias = "next.js")]
    NextJs,
    #[serde(alias = "vue")]
    VueJs,
    SvelteKit,
    #[serde(alias = "solid")]
    SolidJs,
    /// No known framework dependency found
    #[default]
    Unknown,
}

/// Build output folder and dev command a framework uses out of the box
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameworkDefaults {
    pub dist_folder: &'static str,
    pub dev_server_command: &'static str,
}

impl FrameworkType {
    /// Default dist folder and dev command, `None` for [`FrameworkType::Unknown`]
    pub fn defaults(self) -> Option<FrameworkDefaults> {
        let (dist_folder, dev_server_command) = match self {
            FrameworkType::NextJs => ("out", "npm run dev"),
            FrameworkType::VueJs => ("dist", "npm run serve"),
            FrameworkType::SvelteKit => ("build", "npm run dev"),
            FrameworkType::SolidJs => ("dist", "npm run dev"),
            FrameworkType::Unknown => return None,
        };
        Some(FrameworkDefaults {
            dist_folder,
            dev_server_command,
        })
    }

    /// Whether the framework emits one HTML file per route at build time.
    ///
    /// Such builds produce `about.html` for the `/about` route, so the asset
    /// resolver tries `<path>.html` before falling back to the shell.
    pub fn prerenders_routes(self) -> bool {
        matches!(self, FrameworkType::NextJs)
    }

    /// Pick the framework from a parsed package.json
    pub fn from_manifest(manifest: &PackageManifest) -> Self {
        // SvelteKit projects may also depend on other packages, so it goes first
        if manifest.has("@sveltejs/kit") {
            FrameworkType::SvelteKit
        } else if manifest.has("next") {
            FrameworkType::NextJs
        } else if manifest.has("vue") {
            FrameworkType::VueJs
        } else if manifest.has("solid-js") {
            FrameworkType::SolidJs
        } else {
            FrameworkType::Unknown
        }
    }

    /// Read `package.json` in `folder` and detect the framework
    pub fn detect(folder: &Path) -> Result<Self, FrontendError> {
        let manifest = PackageManifest::load(&folder.join(PACKAGE_JSON))?;
        let framework = Self::from_manifest(&manifest);
        debug!(folder = %folder.display(), ?framework, "Detected frontend framework");
        Ok(framework)
    }
}

/// The parts of package.json needed for detection
#[derive(Debug, Default, Deserialize)]
pub struct PackageManifest {
    #[serde(default)]
    pub dependencies: HashMap<String, String>,
    #[serde(default, rename = "devDependencies")]
    pub dev_dependencies: HashMap<String, String>,
}

impl PackageManifest {
    pub fn load(path: &Path) -> Result<Self, FrontendError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                FrontendError::PackageJsonNotFound(
                    path.parent().map(Path::to_path_buf).unwrap_or_default(),
                )
            } else {
                FrontendError::InvalidPackageJson {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                }
            }
        })?;
        serde_json::from_str(&content).map_err(|e| FrontendError::InvalidPackageJson {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Check both dependencies and devDependencies
    pub fn has(&self, package: &str) -> bool {
        self.dependencies.contains_key(package) || self.dev_dependencies.contains_key(package)
    }
}

/// Find `<folder_name>/package.json` in `start` or any of its ancestors.
///
/// Returns the frontend folder (the directory holding package.json).
pub fn find_frontend_folder(start: &Path, folder_name: &str) -> Result<PathBuf, FrontendError> {
    for dir in start.ancestors() {
        let candidate = dir.join(folder_name);
        if candidate.join(PACKAGE_JSON).is_file() {
            debug!(folder = %candidate.display(), "Found frontend folder");
            return Ok(candidate);
        }
    }
    Err(FrontendError::PackageJsonNotFound(PathBuf::from(folder_name)))
}
