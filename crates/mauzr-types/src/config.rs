//! Release configuration, deserialized from `mauzr-release.toml`.
//!
//! Every section has defaults, so an empty file (or no file) describes the
//! upstream mauzr release setup.

use crate::error::{ReleaseError, ReleaseResult};
use crate::labels::PACKAGE_NAME;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

/// Name of the config file looked up in the repository root.
pub const CONFIG_FILE_NAME: &str = "mauzr-release.toml";

/// Top-level release configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReleaseConfig {
    /// Package name, written to the `name` label and the install directive.
    pub package: String,
    /// Upstream repository URL for the `vcs-url` label.
    pub vcs_url: String,
    /// Branch whose images get no branch suffix.
    pub default_branch: String,
    /// Image build settings.
    pub image: ImageConfig,
    /// Package source settings.
    pub index: IndexConfig,
    /// Publish settings.
    pub publish: PublishConfig,
    /// Firmware builder settings.
    pub esp: EspConfig,
    /// Image variants to build, each with its own extras set.
    pub variants: Vec<VariantConfig>,
}

impl Default for ReleaseConfig {
    fn default() -> Self {
        Self {
            package: PACKAGE_NAME.to_string(),
            vcs_url: "https://github.com/eqrx/mauzr".to_string(),
            default_branch: "master".to_string(),
            image: ImageConfig::default(),
            index: IndexConfig::default(),
            publish: PublishConfig::default(),
            esp: EspConfig::default(),
            variants: vec![
                VariantConfig {
                    name: "base".to_string(),
                    extras: Vec::new(),
                },
                VariantConfig {
                    name: "esp".to_string(),
                    extras: vec!["esp".to_string()],
                },
            ],
        }
    }
}

impl ReleaseConfig {
    /// Look up a variant by name.
    pub fn variant(&self, name: &str) -> Option<&VariantConfig> {
        self.variants.iter().find(|v| v.name == name)
    }

    /// Check values that deserialization alone cannot enforce.
    pub fn validate(&self) -> ReleaseResult<()> {
        if self.package.trim().is_empty() {
            return Err(ReleaseError::Config("package must not be empty".into()));
        }
        if self.image.base_image.trim().is_empty() {
            return Err(ReleaseError::Config("image.base_image must not be empty".into()));
        }
        if self.image.slug.trim().is_empty() {
            return Err(ReleaseError::Config("image.slug must not be empty".into()));
        }
        if self.image.build_timeout_secs == 0 {
            return Err(ReleaseError::Config(
                "image.build_timeout_secs must be positive".into(),
            ));
        }
        if self.variants.is_empty() {
            return Err(ReleaseError::Config("at least one variant is required".into()));
        }
        let mut seen = HashSet::new();
        for variant in &self.variants {
            if variant.name.is_empty()
                || !variant
                    .name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
            {
                return Err(ReleaseError::Config(format!(
                    "invalid variant name '{}'",
                    variant.name
                )));
            }
            if !seen.insert(variant.name.as_str()) {
                return Err(ReleaseError::Config(format!(
                    "duplicate variant '{}'",
                    variant.name
                )));
            }
        }
        if self.index.kind == IndexKind::Local && self.index.path.is_none() {
            return Err(ReleaseError::Config(
                "index.path is required for a local index".into(),
            ));
        }
        Ok(())
    }
}

/// Container image build settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    /// Base runtime image the package is installed into.
    pub base_image: String,
    /// Repository the images are published under, e.g. `eqrx/mauzr`.
    pub slug: String,
    /// Pull the base image before building.
    pub pull: bool,
    /// Upper bound for one docker invocation.
    pub build_timeout_secs: u64,
    /// Docker CLI binary.
    pub docker: String,
    /// pip executable inside the base image.
    pub pip: String,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            base_image: "python:3-slim".to_string(),
            slug: "eqrx/mauzr".to_string(),
            pull: true,
            build_timeout_secs: 1800,
            docker: "docker".to_string(),
            pip: "pip3".to_string(),
        }
    }
}

/// Which package source backs version checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    /// A PyPI compatible JSON API.
    Pypi,
    /// A local directory of sdists and wheels.
    Local,
}

/// Package source settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Backend type.
    pub kind: IndexKind,
    /// Base URL of the JSON API.
    pub url: String,
    /// Directory for the local backend.
    pub path: Option<PathBuf>,
    /// Extras assumed for local distributions without an `.extras` sidecar.
    pub extras: Vec<String>,
    /// HTTP timeout for index queries.
    pub timeout_secs: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            kind: IndexKind::Pypi,
            url: "https://pypi.org".to_string(),
            path: None,
            extras: ["build", "esp", "gui", "images"]
                .into_iter()
                .map(String::from)
                .collect(),
            timeout_secs: 30,
        }
    }
}

/// Publish settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    /// manifest-tool binary used to assemble multi-arch manifests.
    pub manifest_tool: String,
    /// Platforms listed in each manifest.
    pub platforms: Vec<String>,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            manifest_tool: "manifest-tool".to_string(),
            platforms: vec!["linux/amd64".to_string(), "linux/arm".to_string()],
        }
    }
}

/// ESP firmware builder settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EspConfig {
    /// Builder image carrying the ESP toolchains.
    pub image: String,
    /// Where the repository is mounted inside the builder.
    pub mount: String,
    /// Uploader for MicroPython units.
    pub ampy: String,
    /// CA bundle staged as `cert/ca.pem` next to a deployed unit.
    pub ca_cert: PathBuf,
}

impl Default for EspConfig {
    fn default() -> Self {
        Self {
            image: "eqrx/mauzr-build:esp".to_string(),
            mount: "/opt/mauzr".to_string(),
            ampy: "ampy".to_string(),
            ca_cert: PathBuf::from("/etc/ssl/certs/DST_Root_CA_X3.pem"),
        }
    }
}

/// One image flavour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantConfig {
    /// Variant name, used as tag prefix.
    pub name: String,
    /// Package extras installed in this variant.
    #[serde(default)]
    pub extras: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = ReleaseConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.package, "mauzr");
        assert_eq!(config.variant("esp").unwrap().extras, vec!["esp"]);
        assert!(config.variant("base").unwrap().extras.is_empty());
    }

    #[test]
    fn test_empty_toml_gives_defaults() {
        let config: ReleaseConfig = toml::from_str("").unwrap();
        assert_eq!(config, ReleaseConfig::default());
    }

    #[test]
    fn test_partial_toml() {
        let config: ReleaseConfig = toml::from_str(
            r#"
            default_branch = "main"

            [image]
            slug = "example/mauzr"

            [[variants]]
            name = "gui"
            extras = ["gui", "images"]
        "#,
        )
        .unwrap();
        assert_eq!(config.default_branch, "main");
        assert_eq!(config.image.slug, "example/mauzr");
        assert_eq!(config.image.docker, "docker");
        assert_eq!(config.variants.len(), 1);
        assert_eq!(config.variants[0].extras, vec!["gui", "images"]);
    }

    #[test]
    fn test_duplicate_variant_rejected() {
        let mut config = ReleaseConfig::default();
        config.variants.push(VariantConfig {
            name: "esp".to_string(),
            extras: vec![],
        });
        assert!(matches!(config.validate(), Err(ReleaseError::Config(_))));
    }

    #[test]
    fn test_invalid_variant_name_rejected() {
        let mut config = ReleaseConfig::default();
        config.variants[0].name = "base:latest".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_local_index_requires_path() {
        let mut config = ReleaseConfig::default();
        config.index.kind = IndexKind::Local;
        assert!(config.validate().is_err());
        config.index.path = Some(PathBuf::from("dist"));
        assert!(config.validate().is_ok());
    }
}
