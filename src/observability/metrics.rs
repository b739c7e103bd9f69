//! # Metrics
//!
//! Prometheus metrics for monitoring the operator.
//!
//! ## Metrics Exposed
//!
//! - `terraform_operator_reconciliations_total` - Total number of reconciliations
//! - `terraform_operator_reconciliation_errors_total` - Total number of reconciliation errors
//! - `terraform_operator_reconciliation_duration_seconds` - Duration of reconciliations
//! - `terraform_operator_tool_invocations_total` - Terraform invocations by operation and outcome
//! - `terraform_operator_tool_invocation_duration_seconds` - Duration of Terraform invocations
//! - `terraform_operator_requeues_total` - Requeues by reason
//! - `terraform_operator_conflict_retries_total` - Writes retried after a resourceVersion conflict

use anyhow::Result;
use prometheus::{Histogram, HistogramVec, IntCounter, IntCounterVec, Registry};
use std::sync::LazyLock;

// Metrics
pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RECONCILIATIONS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "terraform_operator_reconciliations_total",
        "Total number of reconciliations",
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "terraform_operator_reconciliation_errors_total",
        "Total number of reconciliation errors",
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric - this should never happen")
});

static RECONCILIATION_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "terraform_operator_reconciliation_duration_seconds",
            "Duration of reconciliation in seconds",
        )
        .buckets(vec![0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0]),
    )
    .expect("Failed to create RECONCILIATION_DURATION metric - this should never happen")
});

static TOOL_INVOCATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "terraform_operator_tool_invocations_total",
            "Total number of terraform invocations by subcommand and outcome",
        ),
        &["operation", "outcome"],
    )
    .expect("Failed to create TOOL_INVOCATIONS_TOTAL metric - this should never happen")
});

static TOOL_INVOCATION_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        prometheus::HistogramOpts::new(
            "terraform_operator_tool_invocation_duration_seconds",
            "Duration of terraform invocations in seconds by subcommand",
        )
        .buckets(vec![0.5, 1.0, 5.0, 15.0, 60.0, 300.0, 900.0]),
        &["operation"],
    )
    .expect("Failed to create TOOL_INVOCATION_DURATION metric - this should never happen")
});

static REQUEUES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "terraform_operator_requeues_total",
            "Total number of requeues by reason",
        ),
        &["reason"],
    )
    .expect("Failed to create REQUEUES_TOTAL metric - this should never happen")
});

static CONFLICT_RETRIES_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "terraform_operator_conflict_retries_total",
        "Total number of writes retried after a resourceVersion conflict",
    )
    .expect("Failed to create CONFLICT_RETRIES_TOTAL metric - this should never happen")
});

#[allow(
    clippy::missing_errors_doc,
    reason = "Error documentation is provided in doc comments"
)]
pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(TOOL_INVOCATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(TOOL_INVOCATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(REQUEUES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(CONFLICT_RETRIES_TOTAL.clone()))?;

    Ok(())
}

pub fn increment_reconciliations() {
    RECONCILIATIONS_TOTAL.inc();
}

pub fn increment_reconciliation_errors() {
    RECONCILIATION_ERRORS_TOTAL.inc();
}

pub fn observe_reconciliation_duration(duration: f64) {
    RECONCILIATION_DURATION.observe(duration);
}

/// Record one terraform invocation
pub fn record_tool_invocation(operation: &str, outcome: &str, duration: f64) {
    TOOL_INVOCATIONS_TOTAL
        .with_label_values(&[operation, outcome])
        .inc();
    TOOL_INVOCATION_DURATION
        .with_label_values(&[operation])
        .observe(duration);
}

pub fn increment_requeues_total(reason: &str) {
    REQUEUES_TOTAL.with_label_values(&[reason]).inc();
}

pub fn requeues_total(reason: &str) -> u64 {
    REQUEUES_TOTAL.with_label_values(&[reason]).get()
}

pub fn increment_conflict_retries() {
    CONFLICT_RETRIES_TOTAL.inc();
}
