//! Static asset stores and SPA asset resolution
//!
//! Release mode serves a read-only tree of built files. A request resolves in
//! order, first hit wins:
//!
//! 1. the exact file under the base path
//! 2. `<path>.html` when the framework pre-renders routes (skipped when step 1
//!    hit a directory)
//! 3. the fallback shell document (`index.html` by default)
//!
//! A directory is neither content nor a miss: it always continues to the
//! fallback. A missing shell is a deployment error and surfaces as
//! [`FrontendError::AssetNotFound`].

use crate::error::FrontendError;
use crate::framework::FrameworkType;
use hyper::body::Bytes;
use rust_embed::RustEmbed;
use std::borrow::Cow;
use std::collections::HashMap;
use std::io;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Result of opening a path in an [`AssetStore`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    File(Bytes),
    Directory,
    NotFound,
}

/// Read-only, path-addressable byte store.
///
/// Paths are relative, `/`-separated and already normalised (no `.` or `..`
/// segments). The empty path is the store root.
pub trait AssetStore: Send + Sync {
    fn open(&self, path: &str) -> io::Result<Entry>;

    fn is_dir(&self, path: &str) -> bool {
        matches!(self.open(path), Ok(Entry::Directory))
    }
}

/// Store backed by a directory on disk
#[derive(Debug, Clone)]
pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl AssetStore for DirStore {
    fn open(&self, path: &str) -> io::Result<Entry> {
        let full = self.root.join(path);
        let metadata = match std::fs::metadata(&full) {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Entry::NotFound),
            Err(e) => return Err(e),
        };
        if metadata.is_dir() {
            return Ok(Entry::Directory);
        }
        Ok(Entry::File(Bytes::from(std::fs::read(&full)?)))
    }

    fn is_dir(&self, path: &str) -> bool {
        self.root.join(path).is_dir()
    }
}

/// In-memory store, handy with `include_bytes!` or in tests.
///
/// Directories are implied by the file paths: `a/b.js` makes `a` a directory.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    files: HashMap<String, Bytes>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: &str, contents: impl Into<Bytes>) {
        self.files
            .insert(path.trim_start_matches('/').to_string(), contents.into());
    }

    pub fn with_file(mut self, path: &str, contents: impl Into<Bytes>) -> Self {
        self.insert(path, contents);
        self
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl AssetStore for MemoryStore {
    fn open(&self, path: &str) -> io::Result<Entry> {
        if let Some(bytes) = self.files.get(path) {
            return Ok(Entry::File(bytes.clone()));
        }
        if contains_dir(self.files.keys().map(String::as_str), path) {
            return Ok(Entry::Directory);
        }
        Ok(Entry::NotFound)
    }
}

/// Store over files embedded at build time with `#[derive(RustEmbed)]`
pub struct EmbeddedStore<E> {
    _assets: PhantomData<fn() -> E>,
}

impl<E: RustEmbed> EmbeddedStore<E> {
    pub fn new() -> Self {
        Self {
            _assets: PhantomData,
        }
    }
}

impl<E: RustEmbed> Default for EmbeddedStore<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: RustEmbed> AssetStore for EmbeddedStore<E> {
    fn open(&self, path: &str) -> io::Result<Entry> {
        if let Some(file) = E::get(path) {
            let bytes = match file.data {
                Cow::Borrowed(data) => Bytes::from_static(data),
                Cow::Owned(data) => Bytes::from(data),
            };
            return Ok(Entry::File(bytes));
        }
        let names: Vec<Cow<'static, str>> = E::iter().collect();
        if contains_dir(names.iter().map(|n| n.as_ref()), path) {
            return Ok(Entry::Directory);
        }
        Ok(Entry::NotFound)
    }
}

fn contains_dir<'a>(mut files: impl Iterator<Item = &'a str>, path: &str) -> bool {
    if path.is_empty() {
        return files.next().is_some();
    }
    let prefix = format!("{}/", path);
    files.any(|f| f.starts_with(&prefix))
}

/// Join `request` onto `base`, dropping `.` segments and resolving `..`
/// without ever climbing above `base`.
pub fn clean_join(base: &str, request: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for segment in request.split(|c: char| c == '/' || c == '\\') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }

    base.split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .chain(parts)
        .collect::<Vec<_>>()
        .join("/")
}

/// MIME type for a path's extension, `None` when unknown
pub fn content_type_for(path: &str) -> Option<&'static str> {
    let file_name = path.rsplit('/').next().unwrap_or(path);
    let (_, ext) = file_name.rsplit_once('.')?;

    let content_type = match ext.to_ascii_lowercase().as_str() {
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" | "mjs" | "cjs" => "application/javascript",
        "json" | "map" => "application/json",
        "webmanifest" => "application/manifest+json",
        "txt" => "text/plain",
        "xml" => "application/xml",
        "wasm" => "application/wasm",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "avif" => "image/avif",
        "ico" => "image/x-icon",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "otf" => "font/otf",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "pdf" => "application/pdf",
        _ => return None,
    };
    Some(content_type)
}

/// A file picked by the resolver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    /// Store path the bytes came from
    pub path: String,
    pub content_type: Option<&'static str>,
    pub bytes: Bytes,
}

/// Outcome of a single lookup step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    File(Asset),
    Directory,
    Missing,
}

/// Resolves request paths against an asset store with SPA fallback
pub struct AssetResolver {
    store: Arc<dyn AssetStore>,
    base_path: String,
    framework: FrameworkType,
    fallback_path: String,
}

impl AssetResolver {
    pub fn new(store: Arc<dyn AssetStore>, base_path: &str, framework: FrameworkType) -> Self {
        Self {
            store,
            base_path: clean_join(base_path, ""),
            framework,
            fallback_path: "index.html".to_string(),
        }
    }

    /// Use a different shell document (for example `200.html`)
    pub fn with_fallback_path(mut self, fallback_path: &str) -> Self {
        self.fallback_path = fallback_path.to_string();
        self
    }

    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    /// Look up a single request path under the base path
    pub fn lookup(&self, request_path: &str) -> Lookup {
        let path = clean_join(&self.base_path, request_path);
        match self.store.open(&path) {
            Ok(Entry::File(bytes)) => Lookup::File(Asset {
                content_type: content_type_for(&path),
                path,
                bytes,
            }),
            Ok(Entry::Directory) => Lookup::Directory,
            Ok(Entry::NotFound) => Lookup::Missing,
            Err(e) => {
                warn!(path = %path, error = %e, "Failed to read asset, treating as missing");
                Lookup::Missing
            }
        }
    }

    /// Resolve a request path to the asset that should be served
    pub fn resolve(&self, request_path: &str) -> Result<Asset, FrontendError> {
        match self.lookup(request_path) {
            Lookup::File(asset) => return Ok(asset),
            Lookup::Directory => {
                debug!(request_path, "Request path is a directory, serving fallback");
            }
            Lookup::Missing if self.framework.prerenders_routes() => {
                let page = format!("{}.html", request_path.trim_end_matches('/'));
                if let Lookup::File(mut asset) = self.lookup(&page) {
                    asset.content_type = Some("text/html");
                    return Ok(asset);
                }
            }
            Lookup::Missing => {}
        }

        match self.lookup(&self.fallback_path) {
            Lookup::File(asset) => Ok(asset),
            Lookup::Directory | Lookup::Missing => Err(FrontendError::AssetNotFound {
                path: request_path.to_string(),
                fallback: clean_join(&self.base_path, &self.fallback_path),
            }),
        }
    }
}
