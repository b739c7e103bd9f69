//! # Watches
//!
//! Loads the watches file: the list of custom resource types this controller
//! manages, each bound to a Terraform template directory and an optional set
//! of override values.
//!
//! ```yaml
//! - group: infra.example.com
//!   version: v1alpha1
//!   kind: Bucket
//!   template: /opt/templates/bucket
//!   overrideValues:
//!     region: $AWS_REGION
//! ```
//!
//! Loading is all-or-nothing: any invalid or duplicate entry fails the whole
//! load and no partial registry is returned.

use kube::core::GroupVersionKind;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use thiserror::Error;

/// Errors produced while loading the watches file
#[derive(Debug, Error)]
pub enum WatchesError {
    #[error("could not read watches file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not parse watches file: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid GVK: {gvk}: {reason}")]
    InvalidGvk { gvk: String, reason: &'static str },
    #[error("duplicate GVK: {0}")]
    DuplicateGvk(String),
}

/// One watched resource type
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Watch {
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub kind: String,
    /// Directory holding the Terraform configuration for this kind
    #[serde(rename = "template", alias = "templateLocation", default)]
    pub template_dir: PathBuf,
    /// Defaults to true when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub watch_dependent_resources: Option<bool>,
    /// Values forced over every resource's spec, env-expanded at load time
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub override_values: BTreeMap<String, String>,
}

impl Watch {
    pub fn gvk(&self) -> GroupVersionKind {
        GroupVersionKind::gvk(&self.group, &self.version, &self.kind)
    }

    pub fn watches_dependent_resources(&self) -> bool {
        self.watch_dependent_resources.unwrap_or(true)
    }

    fn gvk_display(&self) -> String {
        format!("{}/{}, Kind={}", self.group, self.version, self.kind)
    }
}

/// Load and validate the watches file at `path`
pub fn load(path: impl AsRef<Path>) -> Result<Vec<Watch>, WatchesError> {
    let path = path.as_ref();
    let file = std::fs::File::open(path).map_err(|source| WatchesError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    load_from_reader(file).map_err(|e| match e {
        WatchesError::Io { source, .. } => WatchesError::Io {
            path: path.to_path_buf(),
            source,
        },
        other => other,
    })
}

/// Load and validate watches from any reader
pub fn load_from_reader(mut reader: impl Read) -> Result<Vec<Watch>, WatchesError> {
    let mut content = String::new();
    reader
        .read_to_string(&mut content)
        .map_err(|source| WatchesError::Io {
            path: PathBuf::new(),
            source,
        })?;
    load_from_str(&content)
}

/// Load and validate watches from YAML text
pub fn load_from_str(content: &str) -> Result<Vec<Watch>, WatchesError> {
    let watches: Vec<Watch> = if content.trim().is_empty() {
        Vec::new()
    } else {
        serde_yaml::from_str(content)?
    };
    normalize(watches)
}

/// Validate raw entries and fill in defaults
///
/// Fails on the first entry with an empty version or kind, and on the first
/// group/version/kind seen twice.
pub fn normalize(watches: Vec<Watch>) -> Result<Vec<Watch>, WatchesError> {
    let mut seen = HashSet::new();
    let mut normalized = Vec::with_capacity(watches.len());

    for mut watch in watches {
        verify_gvk(&watch)?;

        let key = (
            watch.group.clone(),
            watch.version.clone(),
            watch.kind.clone(),
        );
        if !seen.insert(key) {
            return Err(WatchesError::DuplicateGvk(watch.gvk_display()));
        }

        watch.watch_dependent_resources = Some(watch.watches_dependent_resources());
        watch.override_values = watch
            .override_values
            .into_iter()
            .map(|(k, v)| (k, expand_env(&v)))
            .collect();
        normalized.push(watch);
    }

    Ok(normalized)
}

// A GVK without a group is valid (core API group).
fn verify_gvk(watch: &Watch) -> Result<(), WatchesError> {
    if watch.version.is_empty() {
        return Err(WatchesError::InvalidGvk {
            gvk: watch.gvk_display(),
            reason: "version must not be empty",
        });
    }
    if watch.kind.is_empty() {
        return Err(WatchesError::InvalidGvk {
            gvk: watch.gvk_display(),
            reason: "kind must not be empty",
        });
    }
    Ok(())
}

static ENV_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$(?:\{([A-Za-z_][A-Za-z0-9_]*)\}|([A-Za-z_][A-Za-z0-9_]*))")
        .expect("environment reference pattern is valid")
});

/// Expand `$NAME` and `${NAME}` references; unset variables become empty strings
pub fn expand_env(value: &str) -> String {
    ENV_REFERENCE
        .replace_all(value, |caps: &Captures<'_>| {
            let name = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map_or("", |m| m.as_str());
            std::env::var(name).unwrap_or_default()
        })
        .into_owned()
}
