//! # Terraform Manager
//!
//! Drives the `terraform` CLI inside a private working directory per
//! deployment. The directory is synced with the template before every
//! lifecycle call: new and changed files are copied in, files removed from the
//! template are removed from the directory, and local state is left alone.

use crate::constants::TFVARS_FILE;
use crate::crd::DeployedConfig;
use crate::deployment::{
    CommandOutput, CommandRunner, DeploymentManager, ManagerError, Operation, PlanOutcome,
    RefreshOutcome,
};
use async_trait::async_trait;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use walkdir::WalkDir;

const COMMON_FLAGS: [&str; 2] = ["-input=false", "-no-color"];
const VAR_FILE_FLAG: &str = "-var-file=terraform.tfvars.json";
const LOCK_FILE: &str = ".terraform.lock.hcl";

/// Manages one Terraform deployment
#[derive(Debug)]
pub struct TerraformManager {
    deploy_name: String,
    namespace: String,
    values: Map<String, Value>,
    template_dir: PathBuf,
    work_dir: PathBuf,
    runner: Arc<dyn CommandRunner>,
}

impl TerraformManager {
    pub fn new(
        deploy_name: String,
        namespace: String,
        values: Map<String, Value>,
        template_dir: PathBuf,
        work_dir: PathBuf,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            deploy_name,
            namespace,
            values,
            template_dir,
            work_dir,
            runner,
        }
    }

    /// Copy the template in, write the variables and initialise if needed
    async fn prepare(&self, operation: Operation) -> Result<(), ManagerError> {
        let tfvars = serde_json::to_vec_pretty(&self.values)?;
        let template_dir = self.template_dir.clone();
        let work_dir = self.work_dir.clone();

        tokio::task::spawn_blocking(move || {
            sync_template(&template_dir, &work_dir)?;
            let tfvars_path = work_dir.join(TFVARS_FILE);
            std::fs::write(&tfvars_path, tfvars).map_err(|source| ManagerError::Workspace {
                path: tfvars_path,
                source,
            })
        })
        .await
        .map_err(|e| ManagerError::Workspace {
            path: self.work_dir.clone(),
            source: std::io::Error::other(e),
        })??;

        if !self.work_dir.join(".terraform").exists() {
            debug!(
                deployment = %self.deploy_name,
                namespace = %self.namespace,
                "Initialising terraform working directory"
            );
            let output = self.run(&["init"], false).await?;
            if !output.success() {
                return Err(ManagerError::ToolFailed {
                    operation,
                    reason: format!("init: {}", output.failure_reason()),
                });
            }
        }
        Ok(())
    }

    async fn run(&self, args: &[&str], with_vars: bool) -> Result<CommandOutput, ManagerError> {
        let mut full: Vec<&str> = args.to_vec();
        full.extend(COMMON_FLAGS);
        if with_vars {
            full.push(VAR_FILE_FLAG);
        }
        self.runner.run(&self.work_dir, &full).await
    }

    /// Whether terraform state tracks any resources
    async fn state_exists(&self) -> Result<bool, ManagerError> {
        let output = self.runner.run(&self.work_dir, &["state", "list"]).await?;
        // A missing or empty state is "not deployed", never an error.
        Ok(output.success() && !output.stdout.trim().is_empty())
    }

    async fn apply(&self, operation: Operation) -> Result<(), ManagerError> {
        self.prepare(operation).await?;
        let output = self.run(&["apply", "-auto-approve"], true).await?;
        if !output.success() {
            return Err(ManagerError::ToolFailed {
                operation,
                reason: output.failure_reason(),
            });
        }
        info!(
            deployment = %self.deploy_name,
            namespace = %self.namespace,
            %operation,
            "Applied terraform configuration"
        );
        Ok(())
    }
}

#[async_trait]
impl DeploymentManager for TerraformManager {
    fn deployment_name(&self) -> &str {
        &self.deploy_name
    }

    fn deployed_config(&self) -> DeployedConfig {
        // serde_json maps are key-ordered, so equal values give equal digests
        let rendered = Value::Object(self.values.clone()).to_string();
        DeployedConfig {
            name: self.deploy_name.clone(),
            manifest: format!("sha256:{:x}", Sha256::digest(rendered.as_bytes())),
        }
    }

    async fn refresh(&self) -> Result<RefreshOutcome, ManagerError> {
        self.prepare(Operation::Refresh).await?;
        let exists = self.state_exists().await?;

        let output = self.run(&["plan", "-detailed-exitcode"], true).await?;
        let update_required = match PlanOutcome::from(&output) {
            PlanOutcome::Clean => false,
            PlanOutcome::ChangesPending => true,
            PlanOutcome::Failed(reason) => return Err(ManagerError::PlanFailed(reason)),
        };

        debug!(
            deployment = %self.deploy_name,
            namespace = %self.namespace,
            exists,
            update_required,
            "Refreshed terraform deployment"
        );
        Ok(RefreshOutcome {
            exists,
            update_required,
        })
    }

    async fn create(&self) -> Result<(), ManagerError> {
        self.apply(Operation::Create).await
    }

    async fn update(&self) -> Result<(), ManagerError> {
        self.apply(Operation::Update).await
    }

    async fn reconcile(&self) -> Result<(), ManagerError> {
        // Terraform has no separate repair step: drift shows up as a pending
        // plan and goes through update instead.
        Ok(())
    }

    async fn delete(&self) -> Result<(), ManagerError> {
        self.prepare(Operation::Delete).await?;
        if !self.state_exists().await? {
            info!(
                deployment = %self.deploy_name,
                namespace = %self.namespace,
                "Nothing deployed, skipping terraform destroy"
            );
            return Ok(());
        }

        let output = self.run(&["destroy", "-auto-approve"], true).await?;
        if !output.success() {
            return Err(ManagerError::ToolFailed {
                operation: Operation::Delete,
                reason: output.failure_reason(),
            });
        }
        info!(
            deployment = %self.deploy_name,
            namespace = %self.namespace,
            "Destroyed terraform deployment"
        );
        Ok(())
    }
}

/// Files that belong to the working directory, never to the template
fn is_local_state(name: &str) -> bool {
    name == ".terraform"
        || name == TFVARS_FILE
        || name.ends_with(".tfstate")
        || name.ends_with(".tfstate.backup")
}

fn workspace_err(path: &Path, source: std::io::Error) -> ManagerError {
    ManagerError::Workspace {
        path: path.to_path_buf(),
        source,
    }
}

fn not_local_state(entry: &walkdir::DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .is_none_or(|name| !is_local_state(name))
}

/// Make the working directory mirror the template, keeping local state
fn sync_template(template_dir: &Path, work_dir: &Path) -> Result<(), ManagerError> {
    if !template_dir.is_dir() {
        return Err(workspace_err(
            template_dir,
            std::io::Error::new(std::io::ErrorKind::NotFound, "template directory not found"),
        ));
    }
    std::fs::create_dir_all(work_dir).map_err(|e| workspace_err(work_dir, e))?;

    prune_stale(template_dir, work_dir)?;

    let walker = WalkDir::new(template_dir)
        .min_depth(1)
        .into_iter()
        .filter_entry(not_local_state);

    for entry in walker {
        let entry = entry.map_err(|e| workspace_err(template_dir, e.into()))?;
        let Ok(relative) = entry.path().strip_prefix(template_dir) else {
            continue;
        };
        let target = work_dir.join(relative);

        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target).map_err(|e| workspace_err(&target, e))?;
        } else {
            std::fs::copy(entry.path(), &target).map_err(|e| workspace_err(&target, e))?;
        }
    }
    Ok(())
}

/// Remove working-directory entries that no longer exist in the template
///
/// The provider lock file written by `init` is kept alongside local state.
fn prune_stale(template_dir: &Path, work_dir: &Path) -> Result<(), ManagerError> {
    let mut walker = WalkDir::new(work_dir)
        .min_depth(1)
        .into_iter()
        .filter_entry(|entry| not_local_state(entry) && entry.file_name() != LOCK_FILE);

    while let Some(entry) = walker.next() {
        let entry = entry.map_err(|e| workspace_err(work_dir, e.into()))?;
        let Ok(relative) = entry.path().strip_prefix(work_dir) else {
            continue;
        };
        let source = template_dir.join(relative);

        if entry.file_type().is_dir() {
            if source.is_dir() {
                continue;
            }
            debug!(path = %entry.path().display(), "Removing directory deleted from template");
            std::fs::remove_dir_all(entry.path()).map_err(|e| workspace_err(entry.path(), e))?;
            walker.skip_current_dir();
        } else if !source.is_file() {
            debug!(path = %entry.path().display(), "Removing file deleted from template");
            std::fs::remove_file(entry.path()).map_err(|e| workspace_err(entry.path(), e))?;
        }
    }
    Ok(())
}
