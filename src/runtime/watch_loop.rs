//! # Watch Loop
//!
//! Runs one kube-runtime controller per (watch entry, namespace). The
//! controller runtime guarantees a resource is never reconciled by two
//! workers at once; across resources up to `max_concurrent_reconciles` run
//! in parallel.

use crate::config::ControllerConfig;
use crate::controller::reconciler::{reconcile, TerraformReconciler};
use crate::controller::server::ServerState;
use crate::runtime::error_policy::handle_reconciliation_error;
use futures::StreamExt;
use kube::api::Api;
use kube::core::{ApiResource, DynamicObject};
use kube::Client;
use kube_runtime::{controller, watcher, Controller};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One controller to be started
#[derive(Debug, Clone)]
pub struct WatchTarget {
    pub resource: ApiResource,
    /// `None` watches all namespaces (or a cluster-scoped kind)
    pub namespace: Option<String>,
    pub reconciler: Arc<TerraformReconciler>,
}

/// Run every controller until shutdown
pub async fn run_watch_loop(
    client: Client,
    targets: Vec<WatchTarget>,
    server_state: Arc<ServerState>,
    config: &ControllerConfig,
) -> Result<(), anyhow::Error> {
    if targets.is_empty() {
        warn!("No watches configured, nothing to reconcile");
    }

    let concurrency = config.max_concurrent_reconciles;
    let controllers = targets.into_iter().map(|target| {
        let client = client.clone();
        async move { run_controller(client, target, concurrency).await }
    });

    // Mark as ready once the controllers are about to start
    server_state.set_ready(true);
    futures::future::join_all(controllers).await;
    server_state.set_ready(false);

    info!("Controller stopped gracefully");
    Ok(())
}

async fn run_controller(client: Client, target: WatchTarget, concurrency: u16) {
    let WatchTarget {
        resource,
        namespace,
        reconciler,
    } = target;

    let api: Api<DynamicObject> = match &namespace {
        Some(ns) => Api::namespaced_with(client, ns, &resource),
        None => Api::all_with(client, &resource),
    };

    info!(
        api_version = %resource.api_version,
        kind = %resource.kind,
        namespace = namespace.as_deref().unwrap_or("<all>"),
        reconcile_period = ?reconciler.options().reconcile_period,
        "Watching resource"
    );

    Controller::new_with(api, watcher::Config::default(), resource.clone())
        .with_config(controller::Config::default().concurrency(concurrency))
        .shutdown_on_signal()
        .run(reconcile, handle_reconciliation_error, reconciler)
        .for_each(|result| {
            match result {
                Ok((obj_ref, _action)) => debug!(object = %obj_ref, "watch.event.success"),
                Err(e) => warn!(kind = %resource.kind, "Controller stream error: {}", e),
            }
            futures::future::ready(())
        })
        .await;

    info!(kind = %resource.kind, "Controller for kind stopped");
}
