//! Container image builds pinned to a resolved version.
//!
//! The Containerfile is rendered from the request and fed to `docker build`
//! on stdin. Label values and the install pin are written literally; only
//! the build date travels as a build argument, so identical inputs render
//! byte-identical Containerfiles. pip installs from the same package source
//! the preflight checked; a local find-links directory becomes the build
//! context and is copied into the image.

use crate::docker::{validate_image_name, CommandRunner, Invocation};
use crate::index::{PackageIndex, PackageSource};
use chrono::{DateTime, Utc};
use mauzr_types::error::{ReleaseError, ReleaseResult};
use mauzr_types::labels::{
    format_build_date, qualify, BuildLabelSet, BuildProvenance, KEY_BUILD_DATE,
};
use mauzr_types::version::ResolvedVersion;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use tracing::{error, info};

/// Where a local package source is copied inside the image.
pub const DIST_DIR: &str = "/tmp/mauzr-dist";

/// pip output that means the pinned version is gone from the source.
const MISSING_VERSION_MARKERS: &[&str] = &[
    "No matching distribution found",
    "Could not find a version that satisfies",
];

/// `<package>[<extra>,...]==<version>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallDirective {
    pub package: String,
    pub extras: BTreeSet<String>,
    pub version: String,
}

impl InstallDirective {
    pub fn new<I, S>(package: &str, extras: I, version: &ResolvedVersion) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            package: package.to_string(),
            extras: extras
                .into_iter()
                .map(|e| e.as_ref().trim().to_string())
                .filter(|e| !e.is_empty())
                .collect(),
            version: version.to_string(),
        }
    }
}

impl fmt::Display for InstallDirective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.package)?;
        if !self.extras.is_empty() {
            let extras: Vec<&str> = self.extras.iter().map(String::as_str).collect();
            write!(f, "[{}]", extras.join(","))?;
        }
        write!(f, "=={}", self.version)
    }
}

/// Everything one image build needs.
#[derive(Debug, Clone)]
pub struct ImageRequest {
    /// Base runtime image reference.
    pub base_image: String,
    /// Package to install.
    pub package: String,
    /// Upstream repository URL.
    pub vcs_url: String,
    /// Commit hash of the build source.
    pub vcs_ref: String,
    /// Version to pin.
    pub version: ResolvedVersion,
    /// Build timestamp, the only build-variant input.
    pub build_date: DateTime<Utc>,
    /// Package extras to install.
    pub extras: Vec<String>,
    /// Tag given to the built image.
    pub tag: String,
    /// Pull the base image before building.
    pub pull: bool,
    /// pip executable inside the base image.
    pub pip: String,
    /// Where pip fetches the package from.
    pub source: PackageSource,
}

impl ImageRequest {
    /// Provenance labels of the image.
    pub fn labels(&self) -> BuildLabelSet {
        BuildLabelSet::new(&BuildProvenance {
            package: self.package.clone(),
            vcs_url: self.vcs_url.clone(),
            vcs_ref: self.vcs_ref.clone(),
            version: self.version,
        })
    }

    /// The pip requirement installed into the image.
    pub fn install_directive(&self) -> InstallDirective {
        InstallDirective::new(&self.package, &self.extras, &self.version)
    }
}

/// Quote a Containerfile string value.
fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Render the Containerfile for a request.
pub fn render_containerfile(request: &ImageRequest) -> String {
    let mut out = String::new();
    out.push_str(&format!("FROM {}\n\n", request.base_image));
    out.push_str("ARG BUILD_DATE\n\n");

    let mut labels: Vec<String> = request
        .labels()
        .qualified()
        .map(|(key, value)| format!("{key}={}", quote(value)))
        .collect();
    labels.push(format!("{}=\"${{BUILD_DATE}}\"", qualify(KEY_BUILD_DATE)));
    out.push_str("LABEL ");
    out.push_str(&labels.join(" \\\n      "));
    out.push_str("\n\n");

    let directive = quote(&request.install_directive().to_string());
    match &request.source {
        PackageSource::Pypi { url } => out.push_str(&format!(
            "RUN {} install --no-cache-dir --index-url {} {directive}\n",
            request.pip,
            quote(&format!("{url}/simple"))
        )),
        PackageSource::Local { .. } => {
            out.push_str(&format!("COPY . {DIST_DIR}/\n"));
            out.push_str(&format!(
                "RUN {} install --no-cache-dir --no-index --find-links {DIST_DIR} {directive}\n",
                request.pip
            ));
        }
    }
    out
}

/// A successfully built image.
#[derive(Debug, Clone, Serialize)]
pub struct BuiltImage {
    pub tag: String,
    pub labels: BuildLabelSet,
    pub build_date: String,
    pub directive: String,
}

/// Builds images through a `CommandRunner` after checking the package index.
pub struct ImageBuilder<'a> {
    runner: &'a dyn CommandRunner,
    index: &'a dyn PackageIndex,
    docker: String,
}

impl<'a> ImageBuilder<'a> {
    pub fn new(runner: &'a dyn CommandRunner, index: &'a dyn PackageIndex, docker: &str) -> Self {
        Self {
            runner,
            index,
            docker: docker.to_string(),
        }
    }

    /// Verify the pinned version and every extra exist in the package source.
    pub async fn preflight(&self, request: &ImageRequest) -> ReleaseResult<()> {
        let directive = request.install_directive();
        let release = self
            .index
            .lookup(&request.package, &request.version.pep440())
            .await?
            .ok_or_else(|| ReleaseError::VersionMismatch {
                package: request.package.clone(),
                requested: request.version.to_string(),
                index: self.index.describe(),
            })?;

        let missing: Vec<&str> = directive
            .extras
            .iter()
            .map(String::as_str)
            .filter(|extra| !release.provides_extra(extra))
            .collect();
        if !missing.is_empty() {
            return Err(ReleaseError::DependencyInstallError {
                directive: directive.to_string(),
                reason: format!(
                    "{} {} does not provide extra(s): {}",
                    request.package,
                    release.version,
                    missing.join(", ")
                ),
            });
        }
        Ok(())
    }

    /// The `docker build` invocation for a request.
    pub fn build_invocation(&self, request: &ImageRequest) -> Invocation {
        let mut invocation = Invocation::new(&self.docker)
            .args(["build", "--rm", "--force-rm"]);
        if request.pull {
            invocation = invocation.arg("--pull");
        }
        invocation
            .args(["-t", request.tag.as_str()])
            .args([
                "--build-arg".to_string(),
                format!("BUILD_DATE={}", format_build_date(&request.build_date)),
            ])
            .args(match &request.source {
                PackageSource::Pypi { .. } => vec!["-".to_string()],
                PackageSource::Local { dir } => {
                    vec!["-f".into(), "-".into(), dir.display().to_string()]
                }
            })
            .stdin(render_containerfile(request))
    }

    /// Check, render and build. A failed build leaves no tagged image.
    pub async fn build(&self, request: &ImageRequest) -> ReleaseResult<BuiltImage> {
        validate_image_name(&request.base_image)?;
        validate_image_name(&request.tag)?;
        self.preflight(request).await?;

        let directive = request.install_directive().to_string();
        info!(tag = %request.tag, directive = %directive, "Building image");

        let output = self.runner.run(&self.build_invocation(request)).await?;
        if !output.success() {
            error!(
                tag = %request.tag,
                exit_code = output.exit_code,
                "Image build failed"
            );
            let combined = format!("{}\n{}", output.stdout, output.stderr);
            if MISSING_VERSION_MARKERS.iter().any(|m| combined.contains(m)) {
                return Err(ReleaseError::VersionMismatch {
                    package: request.package.clone(),
                    requested: request.version.to_string(),
                    index: self.index.describe(),
                });
            }
            return Err(ReleaseError::DependencyInstallError {
                directive,
                reason: output.last_error_line().to_string(),
            });
        }

        info!(tag = %request.tag, "Image built");
        Ok(BuiltImage {
            tag: request.tag.clone(),
            labels: request.labels(),
            build_date: format_build_date(&request.build_date),
            directive,
        })
    }
}
