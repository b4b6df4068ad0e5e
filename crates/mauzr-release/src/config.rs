//! Configuration loading from `mauzr-release.toml` with defaults.
//!
//! A config file may name other TOML files in `include`; they are resolved
//! relative to the including file and merged underneath it, so the
//! including file wins. Any problem with a config that exists is an error:
//! a release must never run on defaults the user did not ask for.

use mauzr_types::config::{ReleaseConfig, CONFIG_FILE_NAME};
use mauzr_types::error::{ReleaseError, ReleaseResult};
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

/// Maximum include nesting depth.
const MAX_INCLUDE_DEPTH: u32 = 10;

/// Load the release configuration.
///
/// `path` overrides the default of `<repo_root>/mauzr-release.toml`. Only a
/// missing file yields the defaults.
pub fn load_config(path: Option<&Path>, repo_root: &Path) -> ReleaseResult<ReleaseConfig> {
    let config_path = path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| default_config_path(repo_root));

    if !config_path.exists() {
        info!(path = %config_path.display(), "Config file not found, using defaults");
        return Ok(ReleaseConfig::default());
    }

    let value = IncludeResolver::new(&config_path)?.load(&config_path, 0)?;
    let config: ReleaseConfig = value.try_into().map_err(|e| {
        ReleaseError::Config(format!("{}: {e}", config_path.display()))
    })?;
    config.validate()?;

    info!(path = %config_path.display(), "Loaded configuration");
    Ok(config)
}

fn config_error(path: &Path, msg: impl std::fmt::Display) -> ReleaseError {
    ReleaseError::Config(format!("{}: {msg}", path.display()))
}

/// Reads a config file and everything it includes.
///
/// Includes must be relative, free of `..` and stay inside the directory of
/// the top-level config. Each file is read at most once per load.
struct IncludeResolver {
    root_dir: PathBuf,
    seen: HashSet<PathBuf>,
}

impl IncludeResolver {
    fn new(config_path: &Path) -> ReleaseResult<Self> {
        let canonical = canonical(config_path)?;
        let root_dir = canonical
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("/"));
        Ok(Self {
            root_dir,
            seen: HashSet::new(),
        })
    }

    /// Parse `path` and return it merged over its includes.
    fn load(&mut self, path: &Path, depth: u32) -> ReleaseResult<toml::Value> {
        if depth > MAX_INCLUDE_DEPTH {
            return Err(config_error(
                path,
                format!("includes nested deeper than {MAX_INCLUDE_DEPTH}"),
            ));
        }
        let path = canonical(path)?;
        if !self.seen.insert(path.clone()) {
            return Err(config_error(&path, "circular include"));
        }

        let contents = std::fs::read_to_string(&path).map_err(|e| config_error(&path, e))?;
        let mut value: toml::Value =
            toml::from_str(&contents).map_err(|e| config_error(&path, e))?;

        let includes = take_includes(&mut value).map_err(|msg| config_error(&path, msg))?;
        if includes.is_empty() {
            return Ok(value);
        }

        let dir = path.parent().unwrap_or(&self.root_dir).to_path_buf();
        let mut merged = toml::Value::Table(toml::map::Map::new());
        for include in &includes {
            let target = self.check_include(&path, &dir, include)?;
            debug!(include = %target.display(), "Loading config include");
            let included = self.load(&target, depth + 1)?;
            deep_merge_toml(&mut merged, &included);
        }
        deep_merge_toml(&mut merged, &value);
        Ok(merged)
    }

    fn check_include(&self, from: &Path, dir: &Path, include: &str) -> ReleaseResult<PathBuf> {
        let rel = Path::new(include);
        if rel.is_absolute() {
            return Err(config_error(from, format!("include must be relative: {include}")));
        }
        if rel.components().any(|c| c == Component::ParentDir) {
            return Err(config_error(from, format!("include may not use '..': {include}")));
        }
        let target = canonical(&dir.join(rel))?;
        if !target.starts_with(&self.root_dir) {
            return Err(config_error(
                from,
                format!("include leaves the config directory: {include}"),
            ));
        }
        Ok(target)
    }
}

fn canonical(path: &Path) -> ReleaseResult<PathBuf> {
    std::fs::canonicalize(path).map_err(|e| config_error(path, e))
}

/// Remove and return the `include` list of a parsed config.
fn take_includes(value: &mut toml::Value) -> Result<Vec<String>, String> {
    let Some(table) = value.as_table_mut() else {
        return Ok(Vec::new());
    };
    match table.remove("include") {
        None => Ok(Vec::new()),
        Some(toml::Value::Array(items)) => items
            .into_iter()
            .map(|item| match item {
                toml::Value::String(s) => Ok(s),
                other => Err(format!("include entries must be strings, got {other}")),
            })
            .collect(),
        Some(_) => Err("include must be an array of paths".into()),
    }
}

/// Deep-merge two TOML values. `overlay` values override `base` values.
/// Tables merge recursively; arrays and scalars are replaced.
pub fn deep_merge_toml(base: &mut toml::Value, overlay: &toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base_tbl), toml::Value::Table(overlay_tbl)) => {
            for (key, overlay_val) in overlay_tbl {
                match base_tbl.get_mut(key) {
                    Some(base_val) => deep_merge_toml(base_val, overlay_val),
                    None => {
                        base_tbl.insert(key.clone(), overlay_val.clone());
                    }
                }
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}

/// Default config file location inside a repository.
pub fn default_config_path(repo_root: &Path) -> PathBuf {
    repo_root.join(CONFIG_FILE_NAME)
}
