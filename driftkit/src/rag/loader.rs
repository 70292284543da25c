//! Document loaders: filesystem, URL, and composite.
//!
//! Loaders produce [`LoadedDocument`]s (raw bytes + origin metadata); the
//! ingestion pipeline decodes, splits, embeds, and stores them. The
//! filesystem loader walks recursively with extension and glob filters; the
//! URL loader fetches with configurable headers and timeout; the composite
//! loader unions sub-loaders, preserving per-source metadata.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use walkdir::WalkDir;

use super::document::{LoadedDocument, META_SOURCE};

/// Loader failure.
#[derive(Debug, thiserror::Error)]
pub enum LoaderError {
    #[error("io `{path}`: {message}")]
    Io { path: String, message: String },
    #[error("http `{url}`: {message}")]
    Http { url: String, message: String },
    #[error("invalid loader config: {0}")]
    InvalidConfig(String),
}

/// Produces the documents of one source.
#[async_trait]
pub trait DocumentLoader: Send + Sync {
    async fn load(&self) -> Result<Vec<LoadedDocument>, LoaderError>;
}

/// Recursive filesystem loader with extension, include/exclude, and size
/// filters. Paths relative to the root are matched against the glob
/// patterns; document ids are the relative paths.
pub struct FileSystemLoader {
    root: PathBuf,
    extensions: Vec<String>,
    include: Vec<glob::Pattern>,
    exclude: Vec<glob::Pattern>,
    max_file_size: u64,
    recursive: bool,
}

impl FileSystemLoader {
    /// Default size cap for a single file.
    pub const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            extensions: Vec::new(),
            include: Vec::new(),
            exclude: Vec::new(),
            max_file_size: Self::DEFAULT_MAX_FILE_SIZE,
            recursive: true,
        }
    }

    /// Keeps only files with one of these extensions (no leading dot). Empty
    /// means all extensions.
    pub fn with_extensions(mut self, extensions: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.extensions = extensions
            .into_iter()
            .map(|e| e.into().trim_start_matches('.').to_lowercase())
            .collect();
        self
    }

    /// Adds an include glob (relative path). When any include is set, a file
    /// must match at least one.
    pub fn include(mut self, pattern: &str) -> Result<Self, LoaderError> {
        let compiled = glob::Pattern::new(pattern)
            .map_err(|e| LoaderError::InvalidConfig(format!("include `{pattern}`: {e}")))?;
        self.include.push(compiled);
        Ok(self)
    }

    /// Adds an exclude glob (relative path); matching files are skipped.
    pub fn exclude(mut self, pattern: &str) -> Result<Self, LoaderError> {
        let compiled = glob::Pattern::new(pattern)
            .map_err(|e| LoaderError::InvalidConfig(format!("exclude `{pattern}`: {e}")))?;
        self.exclude.push(compiled);
        Ok(self)
    }

    pub fn max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = bytes;
        self
    }

    /// Disables recursion into subdirectories.
    pub fn non_recursive(mut self) -> Self {
        self.recursive = false;
        self
    }

    fn accepts(&self, relative: &Path, size: u64) -> bool {
        if size > self.max_file_size {
            return false;
        }
        if !self.extensions.is_empty() {
            let ext = relative
                .extension()
                .and_then(|e| e.to_str())
                .map(str::to_lowercase);
            if !ext.is_some_and(|e| self.extensions.contains(&e)) {
                return false;
            }
        }
        if !self.include.is_empty() && !self.include.iter().any(|p| p.matches_path(relative)) {
            return false;
        }
        if self.exclude.iter().any(|p| p.matches_path(relative)) {
            return false;
        }
        true
    }
}

#[async_trait]
impl DocumentLoader for FileSystemLoader {
    async fn load(&self) -> Result<Vec<LoadedDocument>, LoaderError> {
        let max_depth = if self.recursive { usize::MAX } else { 1 };
        let mut documents = Vec::new();
        for entry in WalkDir::new(&self.root)
            .max_depth(max_depth)
            .sort_by_file_name()
        {
            let entry = entry.map_err(|e| LoaderError::Io {
                path: self.root.display().to_string(),
                message: e.to_string(),
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(&self.root)
                .unwrap_or(entry.path())
                .to_path_buf();
            let size = entry.metadata().map(|m| m.len()).unwrap_or(u64::MAX);
            if !self.accepts(&relative, size) {
                continue;
            }
            let bytes = std::fs::read(entry.path()).map_err(|e| LoaderError::Io {
                path: entry.path().display().to_string(),
                message: e.to_string(),
            })?;
            let id = relative.to_string_lossy().replace('\\', "/");
            let mut doc = LoadedDocument::new(id, bytes)
                .with_metadata(META_SOURCE, entry.path().display().to_string());
            if let Some(ext) = relative.extension().and_then(|e| e.to_str()) {
                doc = doc.with_metadata("extension", ext.to_lowercase());
            }
            documents.push(doc);
        }
        Ok(documents)
    }
}

/// Fetches documents over HTTP with configurable headers and timeout.
#[derive(Debug)]
pub struct UrlLoader {
    urls: Vec<url::Url>,
    headers: HashMap<String, String>,
    timeout: Duration,
    client: reqwest::Client,
}

impl UrlLoader {
    pub fn new(urls: impl IntoIterator<Item = impl AsRef<str>>) -> Result<Self, LoaderError> {
        let urls = urls
            .into_iter()
            .map(|raw| {
                url::Url::parse(raw.as_ref()).map_err(|e| LoaderError::InvalidConfig(format!(
                    "url `{}`: {e}",
                    raw.as_ref()
                )))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            urls,
            headers: HashMap::new(),
            timeout: Duration::from_secs(30),
            client: reqwest::Client::new(),
        })
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl DocumentLoader for UrlLoader {
    async fn load(&self) -> Result<Vec<LoadedDocument>, LoaderError> {
        let mut documents = Vec::new();
        for url in &self.urls {
            let mut request = self.client.get(url.clone()).timeout(self.timeout);
            for (name, value) in &self.headers {
                request = request.header(name, value);
            }
            let response = request.send().await.map_err(|e| LoaderError::Http {
                url: url.to_string(),
                message: e.to_string(),
            })?;
            let status = response.status();
            if !status.is_success() {
                return Err(LoaderError::Http {
                    url: url.to_string(),
                    message: format!("status {status}"),
                });
            }
            let content_type = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let bytes = response.bytes().await.map_err(|e| LoaderError::Http {
                url: url.to_string(),
                message: e.to_string(),
            })?;
            let mut doc = LoadedDocument::new(url.to_string(), bytes.to_vec())
                .with_metadata(META_SOURCE, url.to_string());
            if let Some(ct) = content_type {
                doc = doc.with_metadata("content_type", ct);
            }
            documents.push(doc);
        }
        Ok(documents)
    }
}

/// Union of sub-loaders. A failing sub-loader is logged and skipped so one
/// unreachable source does not starve the others; per-source metadata is
/// preserved untouched.
pub struct CompositeLoader {
    loaders: Vec<Arc<dyn DocumentLoader>>,
}

impl CompositeLoader {
    pub fn new(loaders: Vec<Arc<dyn DocumentLoader>>) -> Self {
        Self { loaders }
    }
}

#[async_trait]
impl DocumentLoader for CompositeLoader {
    async fn load(&self) -> Result<Vec<LoadedDocument>, LoaderError> {
        let mut documents = Vec::new();
        for loader in &self.loaders {
            match loader.load().await {
                Ok(mut docs) => documents.append(&mut docs),
                Err(e) => {
                    tracing::warn!(error = %e, "composite sub-loader failed, skipping source");
                }
            }
        }
        Ok(documents)
    }
}
