//! Release pipeline: resolve, build every variant, publish.
//!
//! Variants are processed one after another and the first failure aborts
//! the run, so nothing is pushed for a release that did not fully build.

use crate::docker::CommandRunner;
use crate::git::RepositoryState;
use crate::image::{BuiltImage, ImageBuilder, ImageRequest};
use crate::index::{PackageIndex, PackageSource};
use crate::publish::{PublishTarget, Publisher};
use crate::resolver::{resolve, Resolution};
use chrono::{DateTime, Utc};
use mauzr_types::config::{ReleaseConfig, VariantConfig};
use mauzr_types::error::{ReleaseError, ReleaseResult};
use mauzr_types::platform::Arch;
use serde::Serialize;
use tracing::info;

/// Options for one pipeline run.
#[derive(Debug, Clone)]
pub struct ReleaseOptions {
    /// Restrict the run to these variants; all configured variants otherwise.
    pub variants: Vec<String>,
    /// Push images and manifests after building.
    pub publish: bool,
    /// Pull base images.
    pub pull: bool,
    /// Build timestamp shared by all images of the run.
    pub build_date: DateTime<Utc>,
    /// Architecture the images are built for.
    pub arch: Arch,
}

/// Result for one variant.
#[derive(Debug, Clone, Serialize)]
pub struct VariantOutcome {
    pub variant: String,
    pub image: BuiltImage,
    /// Tags pushed; empty when not publishing.
    pub pushed: Vec<String>,
}

/// Summary of a pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct ReleaseReport {
    pub resolution: Resolution,
    pub branch: Option<String>,
    pub arch: Arch,
    pub outcomes: Vec<VariantOutcome>,
}

impl ReleaseReport {
    /// Human-readable Markdown summary.
    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("# Release {}\n\n", self.resolution.version));
        out.push_str(&format!("- Tag: `{}`\n", self.resolution.tag));
        out.push_str(&format!("- Commit: `{}`\n", self.resolution.head));
        out.push_str(&format!(
            "- Branch: {}\n",
            self.branch.as_deref().unwrap_or("(detached)")
        ));
        out.push_str(&format!("- Architecture: {}\n\n", self.arch));

        out.push_str("## Images\n\n");
        out.push_str("| Variant | Image | Install |\n|---|---|---|\n");
        for outcome in &self.outcomes {
            out.push_str(&format!(
                "| {} | `{}` | `{}` |\n",
                outcome.variant, outcome.image.tag, outcome.image.directive
            ));
        }

        let pushed: Vec<&String> = self.outcomes.iter().flat_map(|o| &o.pushed).collect();
        if !pushed.is_empty() {
            out.push_str("\n## Published\n\n");
            for tag in pushed {
                out.push_str(&format!("- `{tag}`\n"));
            }
        }
        out
    }
}

/// Wires resolver, builder and publisher together.
pub struct Pipeline<'a> {
    config: &'a ReleaseConfig,
    runner: &'a dyn CommandRunner,
    index: &'a dyn PackageIndex,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        config: &'a ReleaseConfig,
        runner: &'a dyn CommandRunner,
        index: &'a dyn PackageIndex,
    ) -> Self {
        Self {
            config,
            runner,
            index,
        }
    }

    /// The variants selected by `names`, in configuration order.
    pub fn select_variants(&self, names: &[String]) -> ReleaseResult<Vec<&'a VariantConfig>> {
        if let Some(unknown) = names.iter().find(|n| self.config.variant(n).is_none()) {
            return Err(ReleaseError::Config(format!("Unknown variant: {unknown}")));
        }
        Ok(self
            .config
            .variants
            .iter()
            .filter(|v| names.is_empty() || names.contains(&v.name))
            .collect())
    }

    /// Publish target of a variant for the resolved commit.
    pub fn target(
        &self,
        variant: &VariantConfig,
        resolution: &Resolution,
        state: &RepositoryState,
        arch: Arch,
    ) -> PublishTarget {
        PublishTarget {
            slug: self.config.image.slug.clone(),
            variant: variant.name.clone(),
            arch,
            commit: resolution.head.clone(),
            version: resolution.version,
            branch: state.branch.clone(),
            default_branch: self.config.default_branch.clone(),
        }
    }

    /// Image request for a variant. pip installs from the configured index.
    pub fn request(
        &self,
        variant: &VariantConfig,
        resolution: &Resolution,
        target: &PublishTarget,
        options: &ReleaseOptions,
    ) -> ReleaseResult<ImageRequest> {
        Ok(ImageRequest {
            base_image: self.config.image.base_image.clone(),
            package: self.config.package.clone(),
            vcs_url: self.config.vcs_url.clone(),
            vcs_ref: resolution.head.clone(),
            version: resolution.version,
            build_date: options.build_date,
            extras: variant.extras.clone(),
            tag: target.build_tag(),
            pull: options.pull,
            pip: self.config.image.pip.clone(),
            source: PackageSource::from_config(&self.config.index)?,
        })
    }

    /// Run the pipeline against a loaded repository state.
    pub async fn run(
        &self,
        state: &RepositoryState,
        options: &ReleaseOptions,
    ) -> ReleaseResult<ReleaseReport> {
        let variants = self.select_variants(&options.variants)?;
        let resolution = resolve(state)?;

        if options.publish && state.dirty {
            return Err(ReleaseError::DirtyWorkspace(
                "refusing to publish images of uncommitted changes".into(),
            ));
        }

        let builder = ImageBuilder::new(self.runner, self.index, &self.config.image.docker);
        let publisher = Publisher::new(
            self.runner,
            &self.config.image.docker,
            &self.config.publish.manifest_tool,
            self.config.publish.platforms.clone(),
        );

        let mut built = Vec::new();
        for variant in &variants {
            let target = self.target(variant, &resolution, state, options.arch);
            let request = self.request(variant, &resolution, &target, options)?;
            let image = builder.build(&request).await?;
            built.push((variant.name.clone(), target, image));
        }

        let mut outcomes = Vec::new();
        for (variant, target, image) in built {
            let pushed = if options.publish {
                publisher.publish(&target).await?
            } else {
                Vec::new()
            };
            outcomes.push(VariantOutcome {
                variant,
                image,
                pushed,
            });
        }

        info!(
            version = %resolution.version,
            variants = outcomes.len(),
            published = options.publish,
            "Release pipeline finished"
        );

        Ok(ReleaseReport {
            resolution,
            branch: state.branch.clone(),
            arch: options.arch,
            outcomes,
        })
    }
}
