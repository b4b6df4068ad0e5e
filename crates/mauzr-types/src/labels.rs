//! Build provenance labels attached to container images.
//!
//! Labels follow the label-schema convention: every key is emitted under the
//! `org.label-schema.` namespace. The build date is kept next to the label
//! set rather than inside it, so two builds of the same inputs compare equal.

use crate::version::ResolvedVersion;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Namespace prefix for image labels.
pub const LABEL_NAMESPACE: &str = "org.label-schema";

/// Label-schema revision written into every image.
pub const LABEL_SCHEMA_VERSION: &str = "1.0";

/// Name of the package being released.
pub const PACKAGE_NAME: &str = "mauzr";

/// Label keys.
pub const KEY_SCHEMA_VERSION: &str = "schema-version";
pub const KEY_NAME: &str = "name";
pub const KEY_VCS_URL: &str = "vcs-url";
pub const KEY_VCS_REF: &str = "vcs-ref";
pub const KEY_VERSION: &str = "version";
pub const KEY_BUILD_DATE: &str = "build-date";

/// Inputs that identify what an image was built from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildProvenance {
    /// Package name.
    pub package: String,
    /// Upstream repository URL.
    pub vcs_url: String,
    /// Commit hash the build was made from.
    pub vcs_ref: String,
    /// Resolved version of that commit.
    pub version: ResolvedVersion,
}

/// Immutable label set of a built image, keyed by short label name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BuildLabelSet {
    labels: BTreeMap<String, String>,
}

impl BuildLabelSet {
    /// Derive the label set from build provenance.
    pub fn new(provenance: &BuildProvenance) -> Self {
        let labels = [
            (KEY_SCHEMA_VERSION, LABEL_SCHEMA_VERSION.to_string()),
            (KEY_NAME, provenance.package.clone()),
            (KEY_VCS_URL, provenance.vcs_url.clone()),
            (KEY_VCS_REF, provenance.vcs_ref.clone()),
            (KEY_VERSION, provenance.version.to_string()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        Self { labels }
    }

    /// Look up a label by short name.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    /// Number of labels.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// True when the set holds no labels.
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Iterate `(short name, value)` pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.labels.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Iterate `(namespaced key, value)` pairs as written to the image.
    pub fn qualified(&self) -> impl Iterator<Item = (String, &str)> {
        self.iter().map(|(k, v)| (qualify(k), v))
    }
}

/// Prefix a short label name with the label namespace.
pub fn qualify(key: &str) -> String {
    format!("{LABEL_NAMESPACE}.{key}")
}

/// Format a build timestamp the way it is stored in the `build-date` label.
pub fn format_build_date(date: &DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Secs, true)
}
