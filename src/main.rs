//! # Terraform Operator
//!
//! Watches the resource kinds listed in a watches file and reconciles each
//! resource into a Terraform deployment rendered from that kind's template.
//!
//! Configuration comes from the environment (see `ControllerConfig`); the
//! flags below override the most common settings.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use terraform_operator::config::ControllerConfig;
use terraform_operator::runtime::{initialization, watch_loop};

/// Terraform operator for Kubernetes
#[derive(Debug, Parser)]
#[command(name = "terraform-operator", version)]
struct Cli {
    /// Path to the watches file
    #[arg(long, value_name = "PATH")]
    watches_file: Option<PathBuf>,

    /// Seconds between successful reconciliations of the same resource
    #[arg(long, value_name = "SECONDS")]
    reconcile_period: Option<u64>,

    /// Maximum number of resources reconciled in parallel per watch
    #[arg(long, value_name = "N")]
    max_concurrent_reconciles: Option<u16>,

    /// Port for the metrics and health probe server
    #[arg(long, value_name = "PORT")]
    metrics_port: Option<u16>,

    /// Comma-separated namespaces to watch (empty watches all namespaces)
    #[arg(long, value_name = "NAMESPACES")]
    watch_namespace: Option<String>,
}

impl Cli {
    /// Flags take precedence over environment variables
    fn apply(self, mut config: ControllerConfig) -> ControllerConfig {
        if let Some(path) = self.watches_file {
            config.watches_file = path;
        }
        if let Some(secs) = self.reconcile_period {
            config.reconcile_period_secs = secs;
        }
        if let Some(n) = self.max_concurrent_reconciles {
            config.max_concurrent_reconciles = n;
        }
        if let Some(port) = self.metrics_port {
            config.metrics_port = port;
        }
        if let Some(namespaces) = self.watch_namespace {
            config.watch_namespace = namespaces;
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Cli::parse().apply(ControllerConfig::from_env());

    let init = initialization::initialize(&config).await?;
    watch_loop::run_watch_loop(init.client, init.targets, init.server_state, &config).await
}
