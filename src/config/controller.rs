//! # Controller Configuration
//!
//! Controller-level settings loaded from environment variables.

use std::path::PathBuf;
use std::time::Duration;

/// Controller-level configuration
///
/// All settings have sensible defaults and can be overridden via environment variables.
/// Environment variables are populated from a ConfigMap using `envFrom` in the deployment.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Path to the watches file listing the resource types to manage
    pub watches_file: PathBuf,
    /// Period between reconciliations of a resource once it has converged (seconds)
    pub reconcile_period_secs: u64,
    /// Maximum concurrent reconciliations per watched resource type
    pub max_concurrent_reconciles: u16,
    /// Raw `WATCH_NAMESPACE` value (empty means all namespaces)
    pub watch_namespace: String,
    /// HTTP port for metrics and probes
    pub metrics_port: u16,
    /// Terraform executable name or path
    pub terraform_binary: String,
    /// Root directory for per-deployment working directories
    pub workspace_root: PathBuf,
    /// Upper bound for a single terraform invocation (seconds)
    pub command_timeout_secs: u64,
    /// Poll interval while waiting for a deleted resource to disappear (milliseconds)
    pub deletion_poll_interval_ms: u64,
    /// Maximum wait for a deleted resource to disappear (seconds)
    pub deletion_timeout_secs: u64,
    /// Write attempts on optimistic-concurrency conflicts
    pub conflict_retry_steps: u32,
    /// Error requeue backoff lower bound (seconds)
    pub error_backoff_min_secs: u64,
    /// Error requeue backoff upper bound (seconds)
    pub error_backoff_max_secs: u64,
    /// Log format (json, text)
    pub log_format: String,
    /// HTTP server startup timeout (seconds)
    pub startup_timeout_secs: u64,
    /// HTTP server readiness poll interval (milliseconds)
    pub poll_interval_ms: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        use crate::constants::*;
        Self {
            watches_file: PathBuf::from(DEFAULT_WATCHES_FILE),
            reconcile_period_secs: DEFAULT_RECONCILE_PERIOD_SECS,
            max_concurrent_reconciles: DEFAULT_MAX_CONCURRENT_RECONCILES,
            watch_namespace: String::new(),
            metrics_port: DEFAULT_METRICS_PORT,
            terraform_binary: DEFAULT_TERRAFORM_BINARY.to_string(),
            workspace_root: PathBuf::from(DEFAULT_WORKSPACE_ROOT),
            command_timeout_secs: DEFAULT_COMMAND_TIMEOUT_SECS,
            deletion_poll_interval_ms: DEFAULT_DELETION_POLL_INTERVAL_MS,
            deletion_timeout_secs: DEFAULT_DELETION_TIMEOUT_SECS,
            conflict_retry_steps: DEFAULT_CONFLICT_RETRY_STEPS,
            error_backoff_min_secs: DEFAULT_ERROR_BACKOFF_MIN_SECS,
            error_backoff_max_secs: DEFAULT_ERROR_BACKOFF_MAX_SECS,
            log_format: "text".to_string(),
            startup_timeout_secs: DEFAULT_SERVER_STARTUP_TIMEOUT_SECS,
            poll_interval_ms: DEFAULT_SERVER_POLL_INTERVAL_MS,
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        use crate::constants::*;
        Self {
            watches_file: PathBuf::from(env_var_or_default_str(
                "WATCHES_FILE",
                DEFAULT_WATCHES_FILE,
            )),
            reconcile_period_secs: env_var_or_default(
                "RECONCILE_PERIOD_SECS",
                DEFAULT_RECONCILE_PERIOD_SECS,
            ),
            max_concurrent_reconciles: env_var_or_default(
                "MAX_CONCURRENT_RECONCILES",
                DEFAULT_MAX_CONCURRENT_RECONCILES,
            ),
            watch_namespace: env_var_or_default_str("WATCH_NAMESPACE", ""),
            metrics_port: env_var_or_default("METRICS_PORT", DEFAULT_METRICS_PORT),
            terraform_binary: env_var_or_default_str("TERRAFORM_BINARY", DEFAULT_TERRAFORM_BINARY),
            workspace_root: PathBuf::from(env_var_or_default_str(
                "TERRAFORM_WORKSPACE_ROOT",
                DEFAULT_WORKSPACE_ROOT,
            )),
            command_timeout_secs: env_var_or_default(
                "TERRAFORM_COMMAND_TIMEOUT_SECS",
                DEFAULT_COMMAND_TIMEOUT_SECS,
            ),
            deletion_poll_interval_ms: env_var_or_default(
                "DELETION_POLL_INTERVAL_MS",
                DEFAULT_DELETION_POLL_INTERVAL_MS,
            ),
            deletion_timeout_secs: env_var_or_default(
                "DELETION_TIMEOUT_SECS",
                DEFAULT_DELETION_TIMEOUT_SECS,
            ),
            conflict_retry_steps: env_var_or_default(
                "CONFLICT_RETRY_STEPS",
                DEFAULT_CONFLICT_RETRY_STEPS,
            ),
            error_backoff_min_secs: env_var_or_default(
                "ERROR_BACKOFF_MIN_SECS",
                DEFAULT_ERROR_BACKOFF_MIN_SECS,
            ),
            error_backoff_max_secs: env_var_or_default(
                "ERROR_BACKOFF_MAX_SECS",
                DEFAULT_ERROR_BACKOFF_MAX_SECS,
            ),
            log_format: env_var_or_default_str("LOG_FORMAT", "text"),
            startup_timeout_secs: env_var_or_default(
                "SERVER_STARTUP_TIMEOUT_SECS",
                DEFAULT_SERVER_STARTUP_TIMEOUT_SECS,
            ),
            poll_interval_ms: env_var_or_default(
                "SERVER_POLL_INTERVAL_MS",
                DEFAULT_SERVER_POLL_INTERVAL_MS,
            ),
        }
    }

    /// Get the reconcile period
    pub fn reconcile_period(&self) -> Duration {
        Duration::from_secs(self.reconcile_period_secs)
    }

    /// Get the terraform command timeout
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    /// Get the deletion confirmation poll interval
    pub fn deletion_poll_interval(&self) -> Duration {
        Duration::from_millis(self.deletion_poll_interval_ms)
    }

    /// Get the deletion confirmation timeout
    pub fn deletion_timeout(&self) -> Duration {
        Duration::from_secs(self.deletion_timeout_secs)
    }

    /// Namespaces to watch, `None` meaning cluster-wide
    ///
    /// An empty value watches all namespaces; a comma-separated value starts
    /// one watch per listed namespace.
    pub fn watch_namespaces(&self) -> Vec<Option<String>> {
        parse_watch_namespaces(&self.watch_namespace)
    }
}

fn parse_watch_namespaces(raw: &str) -> Vec<Option<String>> {
    let namespaces: Vec<Option<String>> = raw
        .split(',')
        .map(str::trim)
        .filter(|ns| !ns.is_empty())
        .map(|ns| Some(ns.to_string()))
        .collect();
    if namespaces.is_empty() {
        vec![None]
    } else {
        namespaces
    }
}

/// Read environment variable or return default value
fn env_var_or_default<T: std::str::FromStr>(key: &str, default: T) -> T
where
    <T as std::str::FromStr>::Err: std::fmt::Debug,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Read environment variable as string or return default
fn env_var_or_default_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_watch_namespace_means_cluster_wide() {
        assert_eq!(parse_watch_namespaces(""), vec![None]);
        assert_eq!(parse_watch_namespaces(" , "), vec![None]);
    }

    #[test]
    fn test_multiple_watch_namespaces() {
        assert_eq!(
            parse_watch_namespaces("team-a, team-b"),
            vec![Some("team-a".to_string()), Some("team-b".to_string())]
        );
    }

    #[test]
    fn test_defaults_match_deletion_poll_design() {
        let config = ControllerConfig::default();
        assert_eq!(config.deletion_poll_interval(), Duration::from_millis(20));
        assert_eq!(config.deletion_timeout(), Duration::from_secs(5));
    }
}
