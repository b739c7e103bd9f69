//! # Prelude
//!
//! Re-exports commonly used types and traits.
//!
//! ```rust
//! use terraform_operator::prelude::*;
//! ```

// Status model and finalizer helpers
pub use crate::crd::*;

// Deployment backends
pub use crate::deployment::{
    CommandOutput, CommandRunner, DeploymentManager, FactoryError, ManagerError, ManagerFactory,
    Operation, PlanOutcome, ProcessRunner, RefreshOutcome, TerraformManager,
    TerraformManagerFactory,
};

// Reconciler types - core controller functionality
pub use crate::controller::reconciler::{
    reconcile, EventRecorder, ObjectKey, ReconcilerError, ReconcilerOptions, ResourceEvent,
    ResourceStore, StoreError, TerraformReconciler,
};

// Config types
pub use crate::config::{ControllerConfig, Watch, WatchesError};

pub use crate::constants::FINALIZER;
