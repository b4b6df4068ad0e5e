//! Shared error types for the mauzr release tooling.

use thiserror::Error;

/// Top-level error type for version resolution, image builds and publishing.
#[derive(Error, Debug)]
pub enum ReleaseError {
    /// No tag of the form `vYYMMDD.N` is reachable from the current commit.
    #[error("No version tag matching vYYMMDD.N is reachable from {head}")]
    NoTagFound {
        /// The commit resolution started from.
        head: String,
    },

    /// A string is not a valid version tag.
    #[error("Invalid version tag: {0}")]
    InvalidTag(String),

    /// A string is not a valid resolved version.
    #[error("Invalid resolved version: {0}")]
    InvalidVersion(String),

    /// The requested version is not available from the package source.
    #[error("Version {requested} of {package} is not available from {index}")]
    VersionMismatch {
        /// The package that was looked up.
        package: String,
        /// The exact version that was requested.
        requested: String,
        /// Description of the package source.
        index: String,
    },

    /// Installing the package or one of its extras failed.
    #[error("Dependency install failed for {directive}: {reason}")]
    DependencyInstallError {
        /// The install directive, e.g. `mauzr[esp]==240115.1`.
        directive: String,
        /// Why the install failed.
        reason: String,
    },

    /// The working tree has uncommitted changes.
    #[error("Workspace must be clean: {0}")]
    DirtyWorkspace(String),

    /// The machine architecture has no image platform mapping.
    #[error("Unsupported machine architecture: {0}")]
    UnsupportedArch(String),

    /// A git invocation failed.
    #[error("Git error: {0}")]
    Git(String),

    /// An external command (docker, manifest-tool) failed.
    #[error("Command failed: {0}")]
    Command(String),

    /// The package index could not be queried.
    #[error("Package index error: {0}")]
    Index(String),

    /// A configuration error occurred.
    #[error("Configuration error: {0}")]
    Config(String),

    /// An external command exceeded its time budget.
    #[error("Timed out after {secs}s: {operation}")]
    Timeout {
        /// What was running.
        operation: String,
        /// The budget in seconds.
        secs: u64,
    },

    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Alias for Result with ReleaseError.
pub type ReleaseResult<T> = Result<T, ReleaseError>;
