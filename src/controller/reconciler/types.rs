//! # Types
//!
//! Core types for the reconciler.

use crate::config::{ControllerConfig, Watch};
use crate::controller::backoff::FibonacciBackoff;
use crate::controller::reconciler::events::EventRecorder;
use crate::controller::reconciler::retry::RetryPolicy;
use crate::controller::reconciler::store::{ObjectKey, ResourceStore, StoreError};
use crate::deployment::{FactoryError, ManagerError, ManagerFactory};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconcilerError {
    #[error("failed to get deployment manager: {0}")]
    Factory(#[from] FactoryError),
    #[error(transparent)]
    Manager(#[from] ManagerError),
    #[error("failed to {action}: {source}")]
    Store {
        action: &'static str,
        #[source]
        source: StoreError,
    },
    #[error("timed out after {timeout:?} waiting for {key} to be deleted")]
    DeletionTimeout { key: ObjectKey, timeout: Duration },
}

impl ReconcilerError {
    pub(crate) fn store(action: &'static str) -> impl FnOnce(StoreError) -> Self {
        move |source| ReconcilerError::Store { action, source }
    }
}

/// Timing knobs for one reconciler
#[derive(Debug, Clone)]
pub struct ReconcilerOptions {
    /// Requeue delay after a successful create, update or steady-state pass
    pub reconcile_period: Duration,
    pub deletion_poll_interval: Duration,
    pub deletion_timeout: Duration,
    pub conflict_retry: RetryPolicy,
    pub error_backoff_min: Duration,
    pub error_backoff_max: Duration,
}

impl Default for ReconcilerOptions {
    fn default() -> Self {
        Self::from_config(&ControllerConfig::default())
    }
}

impl ReconcilerOptions {
    pub fn from_config(config: &ControllerConfig) -> Self {
        Self {
            reconcile_period: config.reconcile_period(),
            deletion_poll_interval: config.deletion_poll_interval(),
            deletion_timeout: config.deletion_timeout(),
            conflict_retry: RetryPolicy {
                steps: config.conflict_retry_steps,
                ..RetryPolicy::default()
            },
            error_backoff_min: Duration::from_secs(config.error_backoff_min_secs),
            error_backoff_max: Duration::from_secs(config.error_backoff_max_secs),
        }
    }
}

/// Backoff state for a specific resource
/// Tracks error count and backoff calculator for progressive retries
#[derive(Debug, Clone)]
pub struct BackoffState {
    pub backoff: FibonacciBackoff,
    pub error_count: u32,
}

impl BackoffState {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            backoff: FibonacciBackoff::new(min, max),
            error_count: 0,
        }
    }

    pub fn increment_error(&mut self) {
        self.error_count += 1;
    }

    pub fn reset(&mut self) {
        self.error_count = 0;
        self.backoff.reset();
    }
}

/// Reconciles resources of one watched kind
///
/// Collaborators are injected so the reconciler holds no process-wide state.
pub struct TerraformReconciler {
    pub(crate) store: Arc<dyn ResourceStore>,
    pub(crate) factory: Arc<dyn ManagerFactory>,
    pub(crate) events: Arc<dyn EventRecorder>,
    pub(crate) watch: Watch,
    pub(crate) options: ReconcilerOptions,
    // Backoff state per resource (identified by namespace/name)
    pub backoff_states: Mutex<HashMap<String, BackoffState>>,
}

impl std::fmt::Debug for TerraformReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerraformReconciler")
            .field("gvk", &self.watch.gvk())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl TerraformReconciler {
    pub fn new(
        watch: Watch,
        store: Arc<dyn ResourceStore>,
        factory: Arc<dyn ManagerFactory>,
        events: Arc<dyn EventRecorder>,
        options: ReconcilerOptions,
    ) -> Self {
        Self {
            store,
            factory,
            events,
            watch,
            options,
            backoff_states: Mutex::new(HashMap::new()),
        }
    }

    pub fn watch(&self) -> &Watch {
        &self.watch
    }

    pub fn options(&self) -> &ReconcilerOptions {
        &self.options
    }

    /// Advance the error backoff for a resource; returns (delay, error count)
    pub fn next_error_backoff(&self, key: &str) -> Option<(Duration, u32)> {
        let mut states = self.backoff_states.lock().ok()?;
        let state = states.entry(key.to_string()).or_insert_with(|| {
            BackoffState::new(self.options.error_backoff_min, self.options.error_backoff_max)
        });
        state.increment_error();
        Some((state.backoff.next_backoff(), state.error_count))
    }

    /// Reset the error backoff after a success; returns whether it was backing off
    pub fn reset_error_backoff(&self, key: &str) -> bool {
        let Ok(mut states) = self.backoff_states.lock() else {
            return false;
        };
        match states.remove(key) {
            Some(state) => state.error_count > 0,
            None => false,
        }
    }
}
