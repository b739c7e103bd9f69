//! # Deployment Managers
//!
//! A deployment manager owns the lifecycle of one externally provisioned
//! deployment bound to one managed resource. Managers are built per
//! reconcile by a [`ManagerFactory`] and are never persisted.
//!
//! Each provisioning backend implements [`DeploymentManager`]; Terraform is
//! the only backend today.

pub mod command;
pub mod factory;
pub mod terraform;

pub use command::{CommandOutput, CommandRunner, PlanOutcome, ProcessRunner};
pub use factory::{
    manager_factory_for, merge_values, parse_overrides, FactoryError, ManagerFactory,
    TerraformManagerFactory,
};
pub use terraform::TerraformManager;

use crate::crd::DeployedConfig;
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Lifecycle operation names, used in errors, logs and metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Refresh,
    Create,
    Update,
    Reconcile,
    Delete,
}

impl Operation {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Refresh => "refresh",
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Reconcile => "reconcile",
            Operation::Delete => "delete",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("failed to {operation} deployment: {reason}")]
    ToolFailed { operation: Operation, reason: String },
    #[error("failed to check deployment status: {0}")]
    PlanFailed(String),
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("terraform {operation} timed out after {timeout:?}")]
    Timeout { operation: String, timeout: Duration },
    #[error("terraform executable {program} not found: {reason}")]
    ToolNotFound { program: String, reason: String },
    #[error("failed to prepare workspace {path}: {source}")]
    Workspace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to render variables: {0}")]
    Render(#[from] serde_json::Error),
}

/// What a refresh observed about the deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshOutcome {
    pub exists: bool,
    pub update_required: bool,
}

impl RefreshOutcome {
    pub fn exists(&self) -> bool {
        self.exists
    }

    pub fn is_update_required(&self) -> bool {
        self.update_required
    }
}

/// Lifecycle operations for one deployment
///
/// Calls block for the duration of one tool invocation and must not be made
/// concurrently on the same manager.
#[async_trait]
pub trait DeploymentManager: Send + Sync {
    fn deployment_name(&self) -> &str;

    /// Record describing the configuration this manager would apply
    fn deployed_config(&self) -> DeployedConfig;

    /// Inspect state and check for drift
    ///
    /// "Not found" during inspection means the deployment does not exist; a
    /// drift check that neither reports clean nor pending changes is an error.
    async fn refresh(&self) -> Result<RefreshOutcome, ManagerError>;

    async fn create(&self) -> Result<(), ManagerError>;

    async fn update(&self) -> Result<(), ManagerError>;

    /// Steady-state hook, called when no update is pending
    ///
    /// Must leave the applied state unchanged on success.
    async fn reconcile(&self) -> Result<(), ManagerError>;

    /// Destroy the deployment; succeeds if it is already absent
    async fn delete(&self) -> Result<(), ManagerError>;
}
