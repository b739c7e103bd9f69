//! # Manager Factory
//!
//! Builds a [`DeploymentManager`] for one managed resource: derives the
//! deployment name, extracts the spec and merges the watch's override values
//! over it.

use crate::config::Watch;
use crate::deployment::{CommandRunner, DeploymentManager, TerraformManager};
use kube::core::DynamicObject;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FactoryError {
    #[error("failed to get Terraform deployment name: resource has no name")]
    MissingName,
    #[error("failed to get spec: expected map")]
    SpecNotMapping,
    #[error("failed to parse override values: invalid key {0:?}")]
    InvalidOverrideKey(String),
}

/// Creates managers bound to individual resources
pub trait ManagerFactory: Send + Sync + std::fmt::Debug {
    fn new_manager(
        &self,
        resource: &DynamicObject,
        override_values: &BTreeMap<String, String>,
    ) -> Result<Box<dyn DeploymentManager>, FactoryError>;
}

/// Pick the backend for a watched resource type
///
/// Each watched kind gets its own workspace subtree so that two kinds may use
/// the same resource names without sharing Terraform state.
pub fn manager_factory_for(
    watch: &Watch,
    workspace_root: &Path,
    runner: Arc<dyn CommandRunner>,
) -> Arc<dyn ManagerFactory> {
    let kind_dir = if watch.group.is_empty() {
        watch.kind.to_lowercase()
    } else {
        format!("{}.{}", watch.kind.to_lowercase(), watch.group)
    };
    Arc::new(TerraformManagerFactory::new(
        watch.template_dir.clone(),
        workspace_root.join(kind_dir),
        runner,
    ))
}

#[derive(Debug, Clone)]
pub struct TerraformManagerFactory {
    template_dir: PathBuf,
    workspace_root: PathBuf,
    runner: Arc<dyn CommandRunner>,
}

impl TerraformManagerFactory {
    pub fn new(
        template_dir: impl Into<PathBuf>,
        workspace_root: impl Into<PathBuf>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            template_dir: template_dir.into(),
            workspace_root: workspace_root.into(),
            runner,
        }
    }
}

impl ManagerFactory for TerraformManagerFactory {
    fn new_manager(
        &self,
        resource: &DynamicObject,
        override_values: &BTreeMap<String, String>,
    ) -> Result<Box<dyn DeploymentManager>, FactoryError> {
        let deploy_name = deployment_name(resource)?;
        let namespace = resource.metadata.namespace.clone().unwrap_or_default();

        let spec = match resource.data.get("spec") {
            Some(Value::Object(spec)) => spec,
            _ => return Err(FactoryError::SpecNotMapping),
        };
        let overrides = parse_overrides(override_values)?;
        let values = merge_values(spec, &overrides);

        let work_dir = if namespace.is_empty() {
            self.workspace_root.join(&deploy_name)
        } else {
            self.workspace_root.join(&namespace).join(&deploy_name)
        };

        Ok(Box::new(TerraformManager::new(
            deploy_name,
            namespace,
            values,
            self.template_dir.clone(),
            work_dir,
            Arc::clone(&self.runner),
        )))
    }
}

/// The deployment is named after the resource
fn deployment_name(resource: &DynamicObject) -> Result<String, FactoryError> {
    resource
        .metadata
        .name
        .clone()
        .filter(|name| !name.is_empty())
        .ok_or(FactoryError::MissingName)
}

/// Expand `a.b.c = v` override entries into nested mappings with string leaves
pub fn parse_overrides(
    overrides: &BTreeMap<String, String>,
) -> Result<Map<String, Value>, FactoryError> {
    let mut out = Map::new();
    for (key, value) in overrides {
        let segments: Vec<&str> = key.split('.').collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(FactoryError::InvalidOverrideKey(key.clone()));
        }
        let (leaf, parents) = segments
            .split_last()
            .ok_or_else(|| FactoryError::InvalidOverrideKey(key.clone()))?;

        let mut cursor = &mut out;
        for segment in parents {
            let entry = cursor
                .entry((*segment).to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            cursor = entry
                .as_object_mut()
                .ok_or_else(|| FactoryError::InvalidOverrideKey(key.clone()))?;
        }
        cursor.insert((*leaf).to_string(), Value::String(value.clone()));
    }
    Ok(out)
}

/// Right-biased recursive merge
///
/// Nested mappings present on both sides are merged key by key; any other
/// collision takes the override's value.
pub fn merge_values(base: &Map<String, Value>, overrides: &Map<String, Value>) -> Map<String, Value> {
    let mut out = base.clone();
    for (key, value) in overrides {
        if let (Value::Object(override_map), Some(Value::Object(base_map))) = (value, out.get(key)) {
            let merged = merge_values(base_map, override_map);
            out.insert(key.clone(), Value::Object(merged));
            continue;
        }
        out.insert(key.clone(), value.clone());
    }
    out
}
