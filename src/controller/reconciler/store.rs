//! # Resource Store
//!
//! Conflict-checked access to managed resources. The reconciler only reads
//! and writes resources through [`ResourceStore`], which keeps it testable
//! against an in-memory store.

use async_trait::async_trait;
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::core::{ApiResource, DynamicObject};
use kube::Client;
use serde_json::{json, Value};
use thiserror::Error;

/// Identity of a managed resource
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectKey {
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: Option<String>, name: impl Into<String>) -> Self {
        Self {
            namespace,
            name: name.into(),
        }
    }

    pub fn from_object(obj: &DynamicObject) -> Self {
        Self {
            namespace: obj.metadata.namespace.clone(),
            name: obj.metadata.name.clone().unwrap_or_default(),
        }
    }
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{ns}/{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("conflict writing {key}: the object has been modified")]
    Conflict { key: ObjectKey },
    #[error("{key} not found")]
    NotFound { key: ObjectKey },
    #[error("Kubernetes API error for {key}: {source}")]
    Kube {
        key: ObjectKey,
        #[source]
        source: kube::Error,
    },
    #[error("failed to serialize status: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    fn from_kube(key: &ObjectKey, err: kube::Error) -> Self {
        match err {
            kube::Error::Api(api_err) if api_err.code == 409 => StoreError::Conflict { key: key.clone() },
            kube::Error::Api(api_err) if api_err.code == 404 => StoreError::NotFound { key: key.clone() },
            source => StoreError::Kube {
                key: key.clone(),
                source,
            },
        }
    }
}

/// Read and conflict-checked write access to managed resources
///
/// Writes must be rejected with [`StoreError::Conflict`] when the object's
/// `resourceVersion` is stale.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn get(&self, key: &ObjectKey) -> Result<DynamicObject, StoreError>;

    /// Persist metadata and spec (finalizers included)
    async fn update(&self, obj: &DynamicObject) -> Result<DynamicObject, StoreError>;

    /// Persist the `status` block only
    async fn update_status(&self, obj: &DynamicObject) -> Result<DynamicObject, StoreError>;
}

/// [`ResourceStore`] backed by the Kubernetes API server
#[derive(Clone)]
pub struct KubeResourceStore {
    client: Client,
    resource: ApiResource,
}

impl std::fmt::Debug for KubeResourceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeResourceStore")
            .field("kind", &self.resource.kind)
            .field("api_version", &self.resource.api_version)
            .finish_non_exhaustive()
    }
}

impl KubeResourceStore {
    pub fn new(client: Client, resource: ApiResource) -> Self {
        Self { client, resource }
    }

    fn api(&self, key: &ObjectKey) -> Api<DynamicObject> {
        match &key.namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &self.resource),
            None => Api::all_with(self.client.clone(), &self.resource),
        }
    }
}

/// Merge patch carrying the full status block
///
/// `resourceVersion` makes the API server reject the patch when stale. Absent
/// optional fields are sent as explicit nulls so they are cleared server-side.
fn status_patch(obj: &DynamicObject) -> Value {
    let mut status = obj.data.get("status").cloned().unwrap_or_else(|| json!({}));
    if let Some(map) = status.as_object_mut() {
        map.entry("deployedConfig").or_insert(Value::Null);
    }
    json!({
        "metadata": { "resourceVersion": obj.metadata.resource_version },
        "status": status,
    })
}

#[async_trait]
impl ResourceStore for KubeResourceStore {
    async fn get(&self, key: &ObjectKey) -> Result<DynamicObject, StoreError> {
        self.api(key)
            .get(&key.name)
            .await
            .map_err(|e| StoreError::from_kube(key, e))
    }

    async fn update(&self, obj: &DynamicObject) -> Result<DynamicObject, StoreError> {
        let key = ObjectKey::from_object(obj);
        self.api(&key)
            .replace(&key.name, &PostParams::default(), obj)
            .await
            .map_err(|e| StoreError::from_kube(&key, e))
    }

    async fn update_status(&self, obj: &DynamicObject) -> Result<DynamicObject, StoreError> {
        let key = ObjectKey::from_object(obj);
        self.api(&key)
            .patch_status(
                &key.name,
                &PatchParams::default(),
                &Patch::Merge(status_patch(obj)),
            )
            .await
            .map_err(|e| StoreError::from_kube(&key, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::GroupVersionKind;

    #[test]
    fn test_object_key_display() {
        assert_eq!(
            ObjectKey::new(Some("team-a".to_string()), "logs").to_string(),
            "team-a/logs"
        );
        assert_eq!(ObjectKey::new(None, "logs").to_string(), "logs");
    }

    #[test]
    fn test_status_patch_clears_missing_deployed_config() {
        let ar = ApiResource::from_gvk(&GroupVersionKind::gvk("infra.example.com", "v1", "Bucket"));
        let mut obj = DynamicObject::new("logs", &ar)
            .within("default")
            .data(json!({"spec": {}, "status": {"conditions": []}}));
        obj.metadata.resource_version = Some("42".to_string());

        let patch = status_patch(&obj);
        assert_eq!(patch["metadata"]["resourceVersion"], "42");
        assert_eq!(patch["status"]["deployedConfig"], Value::Null);
        assert!(patch.get("spec").is_none());
    }
}
