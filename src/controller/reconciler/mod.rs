//! # Reconciler
//!
//! Core reconciliation logic for Terraform-managed resources.
//!
//! The reconciler:
//! - Fetches the resource and builds a deployment manager for it
//! - Destroys the deployment once the resource is marked for deletion
//! - Otherwise creates, updates or re-checks the deployment
//! - Records the outcome as status conditions on the resource
//!
//! ## Reconciliation Flow
//!
//! 1. Fetch the resource (absent means nothing to do)
//! 2. Build a manager from the resource spec and the watch's override values
//! 3. Deletion timestamp set: destroy, clear status, drop the finalizer
//! 4. Otherwise refresh, then create, update or run the steady-state hook

pub mod events;
pub mod reconcile;
pub mod retry;
pub mod store;
pub mod types;

pub use events::{EventRecorder, KubeEventRecorder, ResourceEvent};
pub use reconcile::reconcile;
pub use retry::{write_with_retry, RetryPolicy, WriteTarget};
pub use store::{KubeResourceStore, ObjectKey, ResourceStore, StoreError};
pub use types::{BackoffState, ReconcilerError, ReconcilerOptions, TerraformReconciler};
