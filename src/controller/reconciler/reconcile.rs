//! # Reconcile
//!
//! Per-resource state machine. Each pass fetches the resource, builds a
//! deployment manager for it and then follows either the deletion path or the
//! active path (create, update or steady state).
//!
//! Every failing step records a condition on the resource before the error is
//! returned; the returned error drives the error-policy requeue.

use crate::constants::FINALIZER;
use crate::controller::reconciler::events::ResourceEvent;
use crate::controller::reconciler::retry::{write_with_retry, WriteTarget};
use crate::controller::reconciler::store::{ObjectKey, StoreError};
use crate::controller::reconciler::types::{ReconcilerError, TerraformReconciler};
use crate::crd::{
    add_finalizer, has_finalizer, is_being_deleted, remove_finalizer, Condition, ConditionReason,
    ConditionStatus, ConditionType, TfConfigStatus,
};
use crate::deployment::DeploymentManager;
use crate::observability;
use kube::core::DynamicObject;
use kube_runtime::controller::Action;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn, Instrument};

/// Entry point used by the controller runtime
pub async fn reconcile(
    obj: Arc<DynamicObject>,
    ctx: Arc<TerraformReconciler>,
) -> Result<Action, ReconcilerError> {
    let key = ObjectKey::from_object(&obj);
    let span = tracing::info_span!(
        "reconcile",
        namespace = key.namespace.as_deref().unwrap_or(""),
        name = %key.name,
        kind = %ctx.watch.kind,
    );

    async move {
        let start = Instant::now();
        observability::metrics::increment_reconciliations();

        let result = ctx.reconcile_key(&key).await;

        observability::metrics::observe_reconciliation_duration(start.elapsed().as_secs_f64());
        if result.is_ok() && ctx.reset_error_backoff(&key.to_string()) {
            info!("Backoff reset: returning to normal schedule");
        }
        result
    }
    .instrument(span)
    .await
}

impl TerraformReconciler {
    /// Run one reconciliation pass for the resource identified by `key`
    pub async fn reconcile_key(&self, key: &ObjectKey) -> Result<Action, ReconcilerError> {
        debug!(%key, "Reconciling");

        let obj = match self.store.get(key).await {
            Ok(obj) => obj,
            Err(e) if e.is_not_found() => {
                debug!(%key, "Resource no longer exists, nothing to do");
                return Ok(Action::await_change());
            }
            Err(e) => {
                error!(%key, "Failed to lookup resource: {}", e);
                return Err(ReconcilerError::Store {
                    action: "look up resource",
                    source: e,
                });
            }
        };

        let manager = self
            .factory
            .new_manager(&obj, &self.watch.override_values)
            .inspect_err(|e| error!(%key, "Failed to get deployment manager: {}", e))?;

        if is_being_deleted(&obj) {
            return self.delete_handler(obj, manager.as_ref()).await;
        }

        let mut status = TfConfigStatus::from_object(&obj);
        status.set_condition(Condition::new(ConditionType::Initialized, ConditionStatus::True));

        let refreshed = match manager.refresh().await {
            Ok(refreshed) => refreshed,
            Err(e) => {
                error!(%key, deployment = manager.deployment_name(), "Failed to refresh deployment: {}", e);
                status.set_condition(
                    Condition::new(ConditionType::Irreconcilable, ConditionStatus::True)
                        .with_reason(ConditionReason::ReconcileError)
                        .with_message(e.to_string()),
                );
                self.persist_status_best_effort(&obj, &status).await;
                return Err(e.into());
            }
        };
        status.remove_condition(ConditionType::Irreconcilable);

        if !refreshed.exists() {
            return self.create_handler(obj, status, manager.as_ref()).await;
        }

        // Resources deployed before they were ever finalized still need the claim
        let obj = if has_finalizer(&obj, FINALIZER) {
            obj
        } else {
            debug!(%key, finalizer = FINALIZER, "Adding finalizer");
            self.ensure_finalizer(&obj).await?
        };

        if refreshed.is_update_required() {
            return self.update_handler(obj, status, manager.as_ref()).await;
        }

        // A failing change that was since reverted is no longer being applied
        status.remove_condition(ConditionType::ConfigFailed);

        if let Err(e) = manager.reconcile().await {
            error!(%key, deployment = manager.deployment_name(), "Failed to reconcile deployment: {}", e);
            status.set_condition(
                Condition::new(ConditionType::Irreconcilable, ConditionStatus::True)
                    .with_reason(ConditionReason::ReconcileError)
                    .with_message(e.to_string()),
            );
            self.persist_status_best_effort(&obj, &status).await;
            return Err(e.into());
        }
        status.remove_condition(ConditionType::Irreconcilable);

        info!(%key, deployment = manager.deployment_name(), "Reconciled deployment");
        status.set_condition(
            Condition::new(ConditionType::Deployed, ConditionStatus::True)
                .with_reason(ConditionReason::UpdateSuccessful),
        );
        self.persist_status(&obj, &status).await?;
        Ok(self.requeue_after_period())
    }

    async fn create_handler(
        &self,
        obj: DynamicObject,
        mut status: TfConfigStatus,
        manager: &dyn DeploymentManager,
    ) -> Result<Action, ReconcilerError> {
        let key = ObjectKey::from_object(&obj);
        self.publish_override_events(&obj).await;

        if let Err(e) = manager.create().await {
            error!(%key, deployment = manager.deployment_name(), "Failed to create deployment: {}", e);
            status.set_condition(
                Condition::new(ConditionType::ConfigFailed, ConditionStatus::True)
                    .with_reason(ConditionReason::CreateError)
                    .with_message(e.to_string()),
            );
            self.persist_status_best_effort(&obj, &status).await;
            return Err(e.into());
        }
        status.remove_condition(ConditionType::ConfigFailed);

        debug!(%key, finalizer = FINALIZER, "Adding finalizer");
        let obj = self.ensure_finalizer(&obj).await?;

        info!(%key, deployment = manager.deployment_name(), "Created deployment");
        status.set_condition(
            Condition::new(ConditionType::Deployed, ConditionStatus::True)
                .with_reason(ConditionReason::CreateSuccessful),
        );
        status.deployed_config = Some(manager.deployed_config());
        self.persist_status(&obj, &status).await?;
        Ok(self.requeue_after_period())
    }

    async fn update_handler(
        &self,
        obj: DynamicObject,
        mut status: TfConfigStatus,
        manager: &dyn DeploymentManager,
    ) -> Result<Action, ReconcilerError> {
        let key = ObjectKey::from_object(&obj);
        self.publish_override_events(&obj).await;

        if let Err(e) = manager.update().await {
            error!(%key, deployment = manager.deployment_name(), "Failed to update deployment: {}", e);
            status.set_condition(
                Condition::new(ConditionType::ConfigFailed, ConditionStatus::True)
                    .with_reason(ConditionReason::UpdateError)
                    .with_message(e.to_string()),
            );
            self.persist_status_best_effort(&obj, &status).await;
            return Err(e.into());
        }
        status.remove_condition(ConditionType::ConfigFailed);

        info!(%key, deployment = manager.deployment_name(), "Updated deployment");
        status.set_condition(
            Condition::new(ConditionType::Deployed, ConditionStatus::True)
                .with_reason(ConditionReason::UpdateSuccessful)
                .with_message("Configuration change updated"),
        );
        status.deployed_config = Some(manager.deployed_config());
        self.persist_status(&obj, &status).await?;
        Ok(self.requeue_after_period())
    }

    async fn delete_handler(
        &self,
        obj: DynamicObject,
        manager: &dyn DeploymentManager,
    ) -> Result<Action, ReconcilerError> {
        let key = ObjectKey::from_object(&obj);
        if !has_finalizer(&obj, FINALIZER) {
            info!(%key, "Resource is deleted, skipping reconciliation");
            return Ok(Action::await_change());
        }

        let mut status = TfConfigStatus::from_object(&obj);
        if let Err(e) = manager.delete().await {
            error!(%key, deployment = manager.deployment_name(), "Failed to destroy deployment: {}", e);
            status.set_condition(
                Condition::new(ConditionType::ConfigFailed, ConditionStatus::True)
                    .with_reason(ConditionReason::DeleteError)
                    .with_message(e.to_string()),
            );
            self.persist_status_best_effort(&obj, &status).await;
            return Err(e.into());
        }
        status.remove_condition(ConditionType::ConfigFailed);

        info!(%key, deployment = manager.deployment_name(), "Deployment destroyed");
        status.set_condition(
            Condition::new(ConditionType::Deployed, ConditionStatus::False)
                .with_reason(ConditionReason::DeleteSuccessful),
        );
        status.deployed_config = None;
        let obj = self.persist_status(&obj, &status).await?;

        write_with_retry(
            self.store.as_ref(),
            &obj,
            WriteTarget::Resource,
            self.options.conflict_retry,
            |o| {
                remove_finalizer(o, FINALIZER);
                Ok(())
            },
        )
        .await
        .map_err(ReconcilerError::store("remove finalizer"))?;

        self.wait_for_deletion(&key).await?;
        Ok(Action::await_change())
    }

    /// Block until the resource is gone from the read path
    async fn wait_for_deletion(&self, key: &ObjectKey) -> Result<(), ReconcilerError> {
        let timeout = self.options.deletion_timeout;
        let interval = self.options.deletion_poll_interval;

        let poll = async {
            loop {
                match self.store.get(key).await {
                    Err(e) if e.is_not_found() => return Ok(()),
                    Err(e) => return Err(ReconcilerError::store("wait for deletion")(e)),
                    Ok(_) => tokio::time::sleep(interval).await,
                }
            }
        };

        match tokio::time::timeout(timeout, poll).await {
            Ok(result) => result,
            Err(_) => {
                warn!(%key, ?timeout, "Resource still present after finalizer removal");
                Err(ReconcilerError::DeletionTimeout {
                    key: key.clone(),
                    timeout,
                })
            }
        }
    }

    async fn ensure_finalizer(&self, obj: &DynamicObject) -> Result<DynamicObject, ReconcilerError> {
        write_with_retry(
            self.store.as_ref(),
            obj,
            WriteTarget::Resource,
            self.options.conflict_retry,
            |o| {
                add_finalizer(o, FINALIZER);
                Ok(())
            },
        )
        .await
        .map_err(ReconcilerError::store("add finalizer"))
    }

    async fn persist_status(
        &self,
        obj: &DynamicObject,
        status: &TfConfigStatus,
    ) -> Result<DynamicObject, ReconcilerError> {
        write_with_retry(
            self.store.as_ref(),
            obj,
            WriteTarget::Status,
            self.options.conflict_retry,
            |o| status.apply_to(o).map_err(StoreError::from),
        )
        .await
        .map_err(ReconcilerError::store("update status"))
    }

    /// Status write on a failure path; the original failure is what gets returned
    async fn persist_status_best_effort(&self, obj: &DynamicObject, status: &TfConfigStatus) {
        if let Err(e) = self.persist_status(obj, status).await {
            warn!(key = %ObjectKey::from_object(obj), "Failed to record failure in status: {}", e);
        }
    }

    async fn publish_override_events(&self, obj: &DynamicObject) {
        for event in ResourceEvent::overrides_in_use(&self.watch.override_values) {
            self.events.record(obj, event).await;
        }
    }

    fn requeue_after_period(&self) -> Action {
        observability::metrics::increment_requeues_total("reconcile-period");
        Action::requeue(self.options.reconcile_period)
    }
}
