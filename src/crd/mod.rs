//! # Managed Resource Types
//!
//! Managed resources are untyped: their schema comes from the watches file at
//! runtime, so they are handled as [`DynamicObject`]s. Only the status block
//! has a fixed shape, defined in [`status`].

pub mod status;

pub use status::{
    Condition, ConditionReason, ConditionStatus, ConditionType, DeployedConfig, TfConfigStatus,
};

use kube::core::DynamicObject;

/// Whether the resource carries the given finalizer
pub fn has_finalizer(obj: &DynamicObject, finalizer: &str) -> bool {
    obj.metadata
        .finalizers
        .as_ref()
        .is_some_and(|finalizers| finalizers.iter().any(|f| f == finalizer))
}

/// Add a finalizer if not already present; returns true when the list changed
pub fn add_finalizer(obj: &mut DynamicObject, finalizer: &str) -> bool {
    if has_finalizer(obj, finalizer) {
        return false;
    }
    obj.metadata
        .finalizers
        .get_or_insert_with(Vec::new)
        .push(finalizer.to_string());
    true
}

/// Remove a finalizer if present; returns true when the list changed
pub fn remove_finalizer(obj: &mut DynamicObject, finalizer: &str) -> bool {
    let Some(finalizers) = obj.metadata.finalizers.as_mut() else {
        return false;
    };
    let before = finalizers.len();
    finalizers.retain(|f| f != finalizer);
    finalizers.len() != before
}

pub fn is_being_deleted(obj: &DynamicObject) -> bool {
    obj.metadata.deletion_timestamp.is_some()
}
