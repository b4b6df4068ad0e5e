//! Publishing built images per architecture and as multi-arch manifests.
//!
//! Each variant image is tagged `<slug>:<variant>-<arch>-<commit>`,
//! `<slug>:<variant>-<arch>-<version>` and `<slug>:<variant>-<arch><suffix>`,
//! where the suffix is empty on the default branch and `-<branch>` elsewhere.
//! After pushing, manifest-tool stitches the per-arch tags of every
//! architecture into one arch-less tag.

use crate::docker::{CommandRunner, Invocation};
use mauzr_types::error::{ReleaseError, ReleaseResult};
use mauzr_types::platform::Arch;
use mauzr_types::version::ResolvedVersion;
use tracing::info;

/// Identifies the images of one variant on one architecture.
#[derive(Debug, Clone)]
pub struct PublishTarget {
    pub slug: String,
    pub variant: String,
    pub arch: Arch,
    pub commit: String,
    pub version: ResolvedVersion,
    /// `None` on a detached HEAD; no branch tag is produced then.
    pub branch: Option<String>,
    pub default_branch: String,
}

impl PublishTarget {
    /// What follows `<variant>-<arch>` in each tag, build tag first.
    fn suffixes(&self) -> Vec<String> {
        let mut suffixes = vec![format!("-{}", self.commit), format!("-{}", self.version)];
        if let Some(branch) = &self.branch {
            suffixes.push(if *branch == self.default_branch {
                String::new()
            } else {
                format!("-{}", sanitize_tag_part(branch))
            });
        }
        suffixes
    }

    fn tag_with(&self, arch: &str, suffix: &str) -> String {
        format!("{}:{}{arch}{suffix}", self.slug, self.variant)
    }

    /// Tag the image is built under.
    pub fn build_tag(&self) -> String {
        self.tag_with(&format!("-{}", self.arch), &format!("-{}", self.commit))
    }

    /// All tags of this target, build tag first.
    pub fn tags(&self) -> Vec<String> {
        let arch = format!("-{}", self.arch);
        self.suffixes()
            .iter()
            .map(|suffix| self.tag_with(&arch, suffix))
            .collect()
    }

    /// manifest-tool `(template, target)` per tag, in `tags()` order. The
    /// template carries `ARCH` where the architecture goes; the target is
    /// the same tag without architecture.
    pub fn manifests(&self) -> Vec<(String, String)> {
        self.suffixes()
            .iter()
            .map(|suffix| (self.tag_with("-ARCH", suffix), self.tag_with("", suffix)))
            .collect()
    }
}

/// Docker tags allow `[A-Za-z0-9_.-]`; branch names may carry slashes.
fn sanitize_tag_part(part: &str) -> String {
    part.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || "_.-".contains(c) {
                c
            } else {
                '-'
            }
        })
        .collect()
}

/// Tags, pushes and assembles manifests through a `CommandRunner`.
pub struct Publisher<'a> {
    runner: &'a dyn CommandRunner,
    docker: String,
    manifest_tool: String,
    platforms: Vec<String>,
}

impl<'a> Publisher<'a> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        docker: &str,
        manifest_tool: &str,
        platforms: Vec<String>,
    ) -> Self {
        Self {
            runner,
            docker: docker.to_string(),
            manifest_tool: manifest_tool.to_string(),
            platforms,
        }
    }

    /// Every invocation publishing `target` runs, in order.
    pub fn plan(&self, target: &PublishTarget) -> Vec<Invocation> {
        let tags = target.tags();
        let build_tag = target.build_tag();
        let mut plan = Vec::new();

        for tag in tags.iter().filter(|t| **t != build_tag) {
            plan.push(Invocation::new(&self.docker).args(["tag", build_tag.as_str(), tag.as_str()]));
        }
        for tag in &tags {
            plan.push(Invocation::new(&self.docker).args(["push", tag.as_str()]));
        }
        for (template, manifest) in target.manifests() {
            plan.push(Invocation::new(&self.manifest_tool).args([
                "push".to_string(),
                "from-args".to_string(),
                "--ignore-missing".to_string(),
                "--platforms".to_string(),
                self.platforms.join(","),
                "--template".to_string(),
                template,
                "--target".to_string(),
                manifest,
            ]));
        }
        plan
    }

    /// Run the publish plan, stopping at the first failing step.
    pub async fn publish(&self, target: &PublishTarget) -> ReleaseResult<Vec<String>> {
        for invocation in self.plan(target) {
            let output = self.runner.run(&invocation).await?;
            if !output.success() {
                return Err(ReleaseError::Command(format!(
                    "{} failed: {}",
                    invocation.display(),
                    output.last_error_line()
                )));
            }
        }
        let tags = target.tags();
        info!(variant = %target.variant, arch = %target.arch, tags = tags.len(), "Published image");
        Ok(tags)
    }
}
