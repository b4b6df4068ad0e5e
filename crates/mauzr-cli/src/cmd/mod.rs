//! Command implementations by domain.

pub mod config;
pub mod esp;
pub mod release;
pub mod system;

use crate::ui;
use mauzr_release::config::load_config;
use mauzr_release::docker::ProcessRunner;
use mauzr_release::git::{GitRepo, RepositoryState};
use mauzr_release::index::{self, PackageIndex};
use mauzr_release::{ReleaseError, ReleaseResult};
use mauzr_types::config::ReleaseConfig;
use mauzr_types::platform::Arch;
use std::path::PathBuf;
use std::time::Duration;

/// Repository and configuration one invocation works on.
pub struct Context {
    pub repo: PathBuf,
    /// Explicit `--config` path, if any.
    pub config_path: Option<PathBuf>,
    pub config: ReleaseConfig,
}

impl Context {
    /// Load the configuration. A config that exists but is broken is fatal.
    pub fn load(config_path: Option<PathBuf>, repo: PathBuf) -> Self {
        let config = require(load_config(config_path.as_deref(), &repo));
        Self {
            repo,
            config_path,
            config,
        }
    }

    /// Process runner bounded by the configured build timeout.
    pub fn runner(&self) -> ProcessRunner {
        ProcessRunner::new(Duration::from_secs(self.config.image.build_timeout_secs))
    }

    pub fn index(&self) -> Box<dyn PackageIndex> {
        index::from_config(&self.config.index).unwrap_or_else(|e| fail(&e))
    }

    pub fn open_repo(&self) -> GitRepo {
        GitRepo::open(&self.repo).unwrap_or_else(|e| fail(&e))
    }

    pub fn load_state(&self) -> RepositoryState {
        self.open_repo().load_state().unwrap_or_else(|e| fail(&e))
    }

    /// Absolute repository path, for bind mounts.
    pub fn repo_root(&self) -> PathBuf {
        std::fs::canonicalize(&self.repo).unwrap_or_else(|e| fail(&ReleaseError::Io(e)))
    }
}

pub fn current_arch() -> Arch {
    Arch::current().unwrap_or_else(|e| fail(&e))
}

pub fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Runtime::new().unwrap_or_else(|e| {
        ui::error(&format!("Failed to start async runtime: {e}"));
        std::process::exit(1);
    })
}

/// Unwrap a release result or print the error and exit.
pub fn require<T>(result: ReleaseResult<T>) -> T {
    result.unwrap_or_else(|e| fail(&e))
}

/// Known remedy for an error, shown under the message.
fn fix_hint(err: &ReleaseError) -> Option<&'static str> {
    match err {
        ReleaseError::NoTagFound { .. } => Some("tag a release commit, e.g. `git tag v240115.1`"),
        ReleaseError::DirtyWorkspace(_) => Some("commit or stash your changes before publishing"),
        ReleaseError::VersionMismatch { .. } => Some(
            "upload the package for this version first, or point [index] at a local dist directory",
        ),
        ReleaseError::Git(_) => Some("run inside a mauzr checkout or pass --repo"),
        ReleaseError::Config(_) => Some("fix mauzr-release.toml or pass --config"),
        _ => None,
    }
}

/// Print a release error with a remedy where one is known, then exit.
pub fn fail(err: &ReleaseError) -> ! {
    let msg = err.to_string();
    match fix_hint(err) {
        Some(fix) => ui::error_with_fix(&msg, fix),
        None => ui::error(&msg),
    }
    std::process::exit(1);
}
