//! # Conflict Retry
//!
//! Optimistic-concurrency writes. A write that loses a race is retried
//! against the freshly fetched object with the same mutation re-applied,
//! never by blindly overwriting.

use crate::controller::backoff::FibonacciBackoff;
use crate::controller::reconciler::store::{ObjectKey, ResourceStore, StoreError};
use crate::observability::metrics;
use kube::core::DynamicObject;
use std::time::Duration;
use tracing::debug;

/// Which part of the resource a write targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteTarget {
    Resource,
    Status,
}

/// Bounded retry schedule for conflicting writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub steps: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            steps: crate::constants::DEFAULT_CONFLICT_RETRY_STEPS,
            initial_delay: Duration::from_millis(crate::constants::DEFAULT_CONFLICT_RETRY_INITIAL_MS),
            max_delay: Duration::from_secs(1),
        }
    }
}

/// Apply `mutate` to `obj` and write it, retrying on conflict
///
/// Returns the object as persisted. When retries are exhausted the last
/// conflict is returned.
pub async fn write_with_retry<F>(
    store: &dyn ResourceStore,
    obj: &DynamicObject,
    target: WriteTarget,
    policy: RetryPolicy,
    mutate: F,
) -> Result<DynamicObject, StoreError>
where
    F: Fn(&mut DynamicObject) -> Result<(), StoreError> + Send + Sync,
{
    let key = ObjectKey::from_object(obj);
    let mut backoff = FibonacciBackoff::new(policy.initial_delay, policy.max_delay);
    let mut candidate = obj.clone();
    mutate(&mut candidate)?;

    let mut attempt = 1;
    loop {
        let result = match target {
            WriteTarget::Resource => store.update(&candidate).await,
            WriteTarget::Status => store.update_status(&candidate).await,
        };
        match result {
            Err(e) if e.is_conflict() && attempt < policy.steps.max(1) => {
                attempt += 1;
                metrics::increment_conflict_retries();
                let delay = backoff.next_backoff();
                debug!(%key, ?target, attempt, ?delay, "Write conflicted, retrying against latest version");
                tokio::time::sleep(delay).await;

                candidate = store.get(&key).await?;
                mutate(&mut candidate)?;
            }
            other => return other,
        }
    }
}
