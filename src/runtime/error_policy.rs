//! # Error Policy
//!
//! Requeue policy for failed reconciliations. Each resource keeps its own
//! Fibonacci backoff so a burst of failures on one resource does not delay
//! the others.

use crate::controller::reconciler::{ObjectKey, ReconcilerError, TerraformReconciler};
use crate::observability;
use kube::core::DynamicObject;
use kube_runtime::controller::Action;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Handle reconciliation errors with Fibonacci backoff
pub fn handle_reconciliation_error(
    obj: Arc<DynamicObject>,
    error: &ReconcilerError,
    ctx: Arc<TerraformReconciler>,
) -> Action {
    let key = ObjectKey::from_object(&obj);

    let error_span = tracing::span!(
        tracing::Level::ERROR,
        "controller.watch.reconciliation_error",
        resource.name = %key.name,
        resource.namespace = key.namespace.as_deref().unwrap_or(""),
        resource.kind = %ctx.watch().kind,
        error = %error
    );
    let _error_guard = error_span.enter();

    error!("Reconciliation error for {}: {}", key, error);
    observability::metrics::increment_reconciliation_errors();

    let (delay, error_count) = match ctx.next_error_backoff(&key.to_string()) {
        Some(next) => next,
        None => {
            warn!("Failed to lock backoff states, using minimum backoff");
            (ctx.options().error_backoff_min, 0)
        }
    };

    let next_trigger_time = chrono::Utc::now()
        + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::seconds(60));
    info!(
        "Retrying with Fibonacci backoff: {}s (error count: {}, next retry: {})",
        delay.as_secs(),
        error_count,
        next_trigger_time.to_rfc3339()
    );

    observability::metrics::increment_requeues_total("error-backoff");
    Action::requeue(delay)
}
