//! Package sources the image builder checks before installing.
//!
//! A build pinned to a version that the source does not carry must fail with
//! `VersionMismatch` before any image layer is produced, never fall back to
//! whatever is latest.

use async_trait::async_trait;
use mauzr_types::config::{IndexConfig, IndexKind};
use mauzr_types::error::{ReleaseError, ReleaseResult};
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

/// A published release of a package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageRelease {
    pub version: String,
    /// Optional dependency sets the release declares.
    pub extras: Vec<String>,
}

impl PackageRelease {
    /// Whether `extra` is declared, comparing normalized names.
    pub fn provides_extra(&self, extra: &str) -> bool {
        let wanted = normalize_name(extra);
        self.extras.iter().any(|e| normalize_name(e) == wanted)
    }
}

/// A source of package distributions.
#[async_trait]
pub trait PackageIndex: Send + Sync {
    /// Human-readable description for error messages.
    fn describe(&self) -> String;

    /// Look up one exact version. `None` when the source does not carry it.
    async fn lookup(&self, package: &str, version: &str)
        -> ReleaseResult<Option<PackageRelease>>;

    /// All versions the source carries.
    async fn available_versions(&self, package: &str) -> ReleaseResult<Vec<String>>;
}

/// Normalize a package or extra name the way pip compares them.
pub fn normalize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_sep = false;
    for c in name.chars() {
        if matches!(c, '-' | '_' | '.') {
            pending_sep = true;
        } else {
            if pending_sep && !out.is_empty() {
                out.push('-');
            }
            pending_sep = false;
            out.push(c.to_ascii_lowercase());
        }
    }
    out
}

/// Build the index described by the configuration.
pub fn from_config(config: &IndexConfig) -> ReleaseResult<Box<dyn PackageIndex>> {
    match PackageSource::from_config(config)? {
        PackageSource::Pypi { url } => Ok(Box::new(PypiIndex::new(
            &url,
            Duration::from_secs(config.timeout_secs),
        )?)),
        PackageSource::Local { dir } => Ok(Box::new(LocalIndex::new(dir, config.extras.clone()))),
    }
}

/// Where pip inside the image installs from. Always derived from the same
/// `IndexConfig` as the index the preflight checks against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageSource {
    /// A PyPI compatible index, by base URL without trailing slash.
    Pypi { url: String },
    /// A find-links directory, sent to docker as the build context.
    Local { dir: PathBuf },
}

impl PackageSource {
    pub fn from_config(config: &IndexConfig) -> ReleaseResult<Self> {
        match config.kind {
            IndexKind::Pypi => Ok(Self::Pypi {
                url: config.url.trim_end_matches('/').to_string(),
            }),
            IndexKind::Local => config
                .path
                .clone()
                .map(|dir| Self::Local { dir })
                .ok_or_else(|| {
                    ReleaseError::Config("index.path is required for a local index".into())
                }),
        }
    }
}

/// PyPI compatible JSON API (`/pypi/<package>/<version>/json`).
pub struct PypiIndex {
    base_url: String,
    http: reqwest::Client,
}

impl PypiIndex {
    pub fn new(base_url: &str, timeout: Duration) -> ReleaseResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("mauzr-release/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| ReleaseError::Index(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    async fn get_json(&self, url: &str) -> ReleaseResult<Option<serde_json::Value>> {
        debug!(url = %url, "Querying package index");
        let resp = self
            .http
            .get(url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| ReleaseError::Index(format!("Request to {url} failed: {e}")))?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(ReleaseError::Index(format!(
                "{url} returned status {}",
                resp.status()
            )));
        }
        let body = resp
            .json()
            .await
            .map_err(|e| ReleaseError::Index(format!("Parse response from {url}: {e}")))?;
        Ok(Some(body))
    }
}

#[async_trait]
impl PackageIndex for PypiIndex {
    fn describe(&self) -> String {
        self.base_url.clone()
    }

    async fn lookup(
        &self,
        package: &str,
        version: &str,
    ) -> ReleaseResult<Option<PackageRelease>> {
        let url = format!("{}/pypi/{package}/{version}/json", self.base_url);
        Ok(self
            .get_json(&url)
            .await?
            .map(|body| parse_release(&body, version)))
    }

    async fn available_versions(&self, package: &str) -> ReleaseResult<Vec<String>> {
        let url = format!("{}/pypi/{package}/json", self.base_url);
        Ok(self
            .get_json(&url)
            .await?
            .map(|body| parse_versions(&body))
            .unwrap_or_default())
    }
}

/// Extract a release from a `/pypi/<package>/<version>/json` body.
fn parse_release(body: &serde_json::Value, version: &str) -> PackageRelease {
    let extras = body["info"]["provides_extra"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|e| e.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default();
    PackageRelease {
        version: body["info"]["version"]
            .as_str()
            .unwrap_or(version)
            .to_string(),
        extras,
    }
}

/// Extract the release list from a `/pypi/<package>/json` body.
fn parse_versions(body: &serde_json::Value) -> Vec<String> {
    body["releases"]
        .as_object()
        .map(|releases| releases.keys().cloned().collect())
        .unwrap_or_default()
}

/// A directory of sdists and wheels, as used with `pip --find-links`.
///
/// Extras are read from a `<package>-<version>.extras` sidecar listing one
/// extra per line; distributions without one are assumed to declare
/// `default_extras`.
pub struct LocalIndex {
    dir: PathBuf,
    default_extras: Vec<String>,
}

impl LocalIndex {
    pub fn new(dir: impl Into<PathBuf>, default_extras: Vec<String>) -> Self {
        Self {
            dir: dir.into(),
            default_extras,
        }
    }

    fn versions(&self, package: &str) -> ReleaseResult<Vec<String>> {
        let wanted = normalize_name(package);
        let entries = std::fs::read_dir(&self.dir).map_err(|e| {
            ReleaseError::Index(format!("Cannot read {}: {e}", self.dir.display()))
        })?;
        let mut versions: Vec<String> = entries
            .flatten()
            .filter_map(|entry| entry.file_name().to_str().and_then(split_distribution))
            .filter(|(name, _)| normalize_name(name) == wanted)
            .map(|(_, version)| version)
            .collect();
        versions.sort();
        versions.dedup();
        Ok(versions)
    }
}

impl LocalIndex {
    /// The `<package>-<version>.extras` file of a release, matching the
    /// package name in any spelling that normalizes the same way.
    fn sidecar(&self, package: &str, version: &str) -> ReleaseResult<Option<PathBuf>> {
        let wanted = normalize_name(package);
        let entries = std::fs::read_dir(&self.dir).map_err(|e| {
            ReleaseError::Index(format!("Cannot read {}: {e}", self.dir.display()))
        })?;
        let mut found: Vec<PathBuf> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .and_then(|n| n.strip_suffix(".extras"))
                    .and_then(|stem| stem.rsplit_once('-'))
                    .is_some_and(|(name, v)| v == version && normalize_name(name) == wanted)
            })
            .collect();
        // Prefer a stable pick when several spellings exist.
        found.sort();
        Ok(found.into_iter().next())
    }
}

/// Split a distribution file name into `(name, version)`.
fn split_distribution(file_name: &str) -> Option<(String, String)> {
    if let Some(stem) = file_name.strip_suffix(".whl") {
        let mut parts = stem.splitn(3, '-');
        let name = parts.next()?;
        let version = parts.next()?;
        parts.next()?;
        return Some((name.to_string(), version.to_string()));
    }
    let stem = file_name
        .strip_suffix(".tar.gz")
        .or_else(|| file_name.strip_suffix(".zip"))?;
    let (name, version) = stem.rsplit_once('-')?;
    Some((name.to_string(), version.to_string()))
}

#[async_trait]
impl PackageIndex for LocalIndex {
    fn describe(&self) -> String {
        self.dir.display().to_string()
    }

    async fn lookup(
        &self,
        package: &str,
        version: &str,
    ) -> ReleaseResult<Option<PackageRelease>> {
        if !self.versions(package)?.iter().any(|v| v == version) {
            return Ok(None);
        }
        let extras = match self.sidecar(package, version)? {
            Some(path) => std::fs::read_to_string(&path)?
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with('#'))
                .map(String::from)
                .collect(),
            None => self.default_extras.clone(),
        };
        Ok(Some(PackageRelease {
            version: version.to_string(),
            extras,
        }))
    }

    async fn available_versions(&self, package: &str) -> ReleaseResult<Vec<String>> {
        self.versions(package)
    }
}
