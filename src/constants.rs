//! # Constants
//!
//! Shared constants used throughout the controller.
//!
//! These values represent reasonable defaults and can be overridden via
//! configuration or environment variables where applicable.

/// Finalizer placed on every managed resource before its first successful create.
/// Blocks physical deletion until the Terraform deployment has been destroyed.
pub const FINALIZER: &str = "destroy-terraform-config";

/// Default watches file, relative to the controller's working directory
pub const DEFAULT_WATCHES_FILE: &str = "./watches.yaml";

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 8080;

/// Default period between successful reconciliations of the same resource (seconds)
pub const DEFAULT_RECONCILE_PERIOD_SECS: u64 = 60;

/// Default number of resources reconciled in parallel per watch
pub const DEFAULT_MAX_CONCURRENT_RECONCILES: u16 = 1;

/// Default terraform executable name, resolved on PATH
pub const DEFAULT_TERRAFORM_BINARY: &str = "terraform";

/// Default root under which per-deployment working directories are created
pub const DEFAULT_WORKSPACE_ROOT: &str = "/tmp/terraform-operator";

/// Default upper bound for a single terraform invocation (seconds)
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 600;

/// Interval between reads while waiting for a deleted resource to disappear
pub const DEFAULT_DELETION_POLL_INTERVAL_MS: u64 = 20;

/// How long to wait for a deleted resource to disappear before giving up
pub const DEFAULT_DELETION_TIMEOUT_SECS: u64 = 5;

/// Number of write attempts made when the API server reports a conflict
pub const DEFAULT_CONFLICT_RETRY_STEPS: u32 = 5;

/// First delay between conflicting writes (milliseconds)
pub const DEFAULT_CONFLICT_RETRY_INITIAL_MS: u64 = 10;

/// Requeue backoff after a failed reconciliation, lower bound (seconds)
pub const DEFAULT_ERROR_BACKOFF_MIN_SECS: u64 = 5;

/// Requeue backoff after a failed reconciliation, upper bound (seconds)
pub const DEFAULT_ERROR_BACKOFF_MAX_SECS: u64 = 300;

/// Default HTTP server startup timeout (how long to wait for server to be ready)
pub const DEFAULT_SERVER_STARTUP_TIMEOUT_SECS: u64 = 10;

/// Default HTTP server readiness poll interval
pub const DEFAULT_SERVER_POLL_INTERVAL_MS: u64 = 50;

/// Variables file written into every deployment workspace
pub const TFVARS_FILE: &str = "terraform.tfvars.json";

/// Event reason used when watches.yaml overrides template values
pub const OVERRIDE_VALUES_EVENT_REASON: &str = "OverrideValuesInUse";

/// Field manager / event reporter name
pub const CONTROLLER_NAME: &str = "terraform-operator";
