//! # Initialization
//!
//! Operator startup: rustls setup, tracing, metrics, server startup, watch
//! registry loading, Kubernetes client setup and one reconciler per watched
//! kind.

use crate::config::{watches, ControllerConfig, Watch};
use crate::controller::reconciler::{
    KubeEventRecorder, KubeResourceStore, ReconcilerOptions, TerraformReconciler,
};
use crate::controller::server::{start_server, ServerState};
use crate::deployment::{manager_factory_for, CommandRunner, ProcessRunner};
use crate::observability::{self, logging::LogFormat};
use crate::runtime::watch_loop::WatchTarget;
use anyhow::{Context, Result};
use kube::discovery::{self, Scope};
use kube::Client;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Everything the watch loop needs to start
pub struct InitializationResult {
    pub client: Client,
    pub targets: Vec<WatchTarget>,
    pub server_state: Arc<ServerState>,
}

impl std::fmt::Debug for InitializationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializationResult")
            .field("targets", &self.targets.len())
            .field("server_serving", &self.server_state.is_serving())
            .finish_non_exhaustive()
    }
}

/// Initialize the operator runtime
///
/// Any failure here aborts startup; in particular an invalid watches file
/// never yields a partially configured operator.
pub async fn initialize(config: &ControllerConfig) -> Result<InitializationResult> {
    // Required for rustls 0.23+ before any TLS client is built
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|e| anyhow::anyhow!("Failed to install rustls crypto provider: {e:?}"))?;

    observability::logging::init_tracing(LogFormat::parse(&config.log_format))?;

    info!("Starting Terraform Operator");
    info!(
        "Build info: timestamp={}, datetime={}, git_hash={}",
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_DATETIME"),
        env!("BUILD_GIT_HASH")
    );

    observability::metrics::register_metrics()?;

    let server_state = Arc::new(ServerState::default());
    let server_port = config.metrics_port;
    let server_state_clone = Arc::clone(&server_state);
    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(server_port, server_state_clone).await {
            error!("HTTP server error: {}", e);
        }
    });
    wait_for_server_ready(&server_state, &server_handle, config).await?;

    let watches = watches::load(&config.watches_file).with_context(|| {
        format!(
            "Failed to load watches file {}",
            config.watches_file.display()
        )
    })?;
    info!(
        "Loaded {} watch(es) from {}",
        watches.len(),
        config.watches_file.display()
    );

    let runner: Arc<dyn CommandRunner> = Arc::new(
        ProcessRunner::locate(&config.terraform_binary, config.command_timeout())
            .context("Failed to locate terraform executable")?,
    );

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    let mut targets = Vec::new();
    for watch in watches {
        targets.extend(build_targets(&client, watch, config, Arc::clone(&runner)).await?);
    }

    info!("Operator initialized, starting watch loop...");
    Ok(InitializationResult {
        client,
        targets,
        server_state,
    })
}

/// Resolve a watch against the API server and build its controllers
async fn build_targets(
    client: &Client,
    watch: Watch,
    config: &ControllerConfig,
    runner: Arc<dyn CommandRunner>,
) -> Result<Vec<WatchTarget>> {
    let gvk = watch.gvk();
    let (resource, capabilities) = discovery::pinned_kind(client, &gvk)
        .await
        .with_context(|| format!("Failed to discover {}/{} {}", gvk.group, gvk.version, gvk.kind))?;

    if watch.watches_dependent_resources() {
        debug!(
            kind = %watch.kind,
            "Dependent resource watching has no effect for Terraform deployments"
        );
    }

    let reconciler = Arc::new(TerraformReconciler::new(
        watch.clone(),
        Arc::new(KubeResourceStore::new(client.clone(), resource.clone())),
        manager_factory_for(&watch, &config.workspace_root, runner),
        Arc::new(KubeEventRecorder::new(client.clone(), resource.clone())),
        ReconcilerOptions::from_config(config),
    ));

    let namespaces = match capabilities.scope {
        Scope::Cluster => vec![None],
        Scope::Namespaced => config.watch_namespaces(),
    };

    Ok(namespaces
        .into_iter()
        .map(|namespace| WatchTarget {
            resource: resource.clone(),
            namespace,
            reconciler: Arc::clone(&reconciler),
        })
        .collect())
}

/// Wait for the HTTP server to bind its listener
async fn wait_for_server_ready(
    server_state: &Arc<ServerState>,
    server_handle: &tokio::task::JoinHandle<()>,
    config: &ControllerConfig,
) -> Result<()> {
    let startup_timeout = std::time::Duration::from_secs(config.startup_timeout_secs);
    let poll_interval = std::time::Duration::from_millis(config.poll_interval_ms);
    let start_time = std::time::Instant::now();

    loop {
        if server_handle.is_finished() {
            return Err(anyhow::anyhow!("HTTP server failed to start"));
        }

        if server_state.is_serving() {
            info!("HTTP server is ready and accepting connections");
            return Ok(());
        }

        if start_time.elapsed() > startup_timeout {
            return Err(anyhow::anyhow!(
                "HTTP server failed to become ready within {} seconds",
                startup_timeout.as_secs()
            ));
        }

        tokio::time::sleep(poll_interval).await;
    }
}
