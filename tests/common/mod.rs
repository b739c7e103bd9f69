//! Common test utilities for reconciler integration tests
//!
//! Provides an in-memory resource store with API-server-like optimistic
//! concurrency, a scripted deployment backend and a recording event sink.

#![allow(dead_code, reason = "each test binary uses a different subset")]

use async_trait::async_trait;
use kube::core::{ApiResource, DynamicObject, GroupVersionKind};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use terraform_operator::config::Watch;
use terraform_operator::controller::reconciler::{
    EventRecorder, ObjectKey, ReconcilerOptions, ResourceEvent, ResourceStore, RetryPolicy,
    StoreError, TerraformReconciler,
};
use terraform_operator::crd::{DeployedConfig, TfConfigStatus};
use terraform_operator::deployment::{
    merge_values, parse_overrides, DeploymentManager, FactoryError, ManagerError, ManagerFactory,
    Operation, RefreshOutcome,
};

pub const NAMESPACE: &str = "default";

pub fn api_resource() -> ApiResource {
    ApiResource::from_gvk(&GroupVersionKind::gvk("infra.example.com", "v1alpha1", "Bucket"))
}

pub fn watch(override_values: &[(&str, &str)]) -> Watch {
    Watch {
        group: "infra.example.com".to_string(),
        version: "v1alpha1".to_string(),
        kind: "Bucket".to_string(),
        template_dir: "/opt/templates/bucket".into(),
        watch_dependent_resources: None,
        override_values: override_values
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect(),
    }
}

pub fn resource(name: &str, spec: Value) -> DynamicObject {
    DynamicObject::new(name, &api_resource())
        .within(NAMESPACE)
        .data(json!({ "spec": spec }))
}

pub fn key(name: &str) -> ObjectKey {
    ObjectKey::new(Some(NAMESPACE.to_string()), name)
}

pub fn status_of(obj: &DynamicObject) -> TfConfigStatus {
    TfConfigStatus::from_object(obj)
}

/// Options with short timings so tests run quickly
pub fn fast_options() -> ReconcilerOptions {
    ReconcilerOptions {
        reconcile_period: Duration::from_secs(60),
        deletion_poll_interval: Duration::from_millis(5),
        deletion_timeout: Duration::from_millis(200),
        conflict_retry: RetryPolicy {
            steps: 5,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        },
        error_backoff_min: Duration::from_secs(5),
        error_backoff_max: Duration::from_secs(300),
    }
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// Store that behaves like the API server for the writes the reconciler makes
///
/// Every write bumps `resourceVersion` and stale versions are rejected with a
/// conflict. A resource marked for deletion disappears once its finalizer
/// list is empty.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    objects: Mutex<HashMap<ObjectKey, DynamicObject>>,
    version: AtomicU64,
    pending_conflicts: AtomicU32,
    linger_after_finalizers: AtomicBool,
    resource_writes: AtomicU32,
    status_writes: AtomicU32,
}

impl InMemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn next_version(&self) -> String {
        (self.version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    pub fn insert(&self, mut obj: DynamicObject) -> DynamicObject {
        obj.metadata.resource_version = Some(self.next_version());
        self.objects
            .lock()
            .unwrap()
            .insert(ObjectKey::from_object(&obj), obj.clone());
        obj
    }

    pub fn object(&self, key: &ObjectKey) -> Option<DynamicObject> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    /// Replace the spec, as a user editing the resource would
    pub fn set_spec(&self, key: &ObjectKey, spec: Value) {
        let mut objects = self.objects.lock().unwrap();
        let obj = objects.get_mut(key).expect("object exists");
        obj.data["spec"] = spec;
        obj.metadata.resource_version = Some(self.next_version());
    }

    /// Request deletion, as `kubectl delete` would
    pub fn request_deletion(&self, key: &ObjectKey) {
        let mut objects = self.objects.lock().unwrap();
        let obj = objects.get_mut(key).expect("object exists");
        if obj.metadata.finalizers.as_ref().is_none_or(Vec::is_empty) {
            objects.remove(key);
            return;
        }
        obj.metadata.deletion_timestamp =
            Some(serde_json::from_value(json!("2026-01-01T00:00:00Z")).expect("valid timestamp"));
        obj.metadata.resource_version = Some(self.next_version());
    }

    /// Make the next `n` writes fail with a conflict caused by a concurrent writer
    pub fn inject_conflicts(&self, n: u32) {
        self.pending_conflicts.store(n, Ordering::SeqCst);
    }

    /// Keep deleted resources readable after their last finalizer is removed
    pub fn linger_after_finalizers(&self) {
        self.linger_after_finalizers.store(true, Ordering::SeqCst);
    }

    pub fn resource_writes(&self) -> u32 {
        self.resource_writes.load(Ordering::SeqCst)
    }

    pub fn status_writes(&self) -> u32 {
        self.status_writes.load(Ordering::SeqCst)
    }

    fn check_version(
        &self,
        stored: &mut DynamicObject,
        incoming: &DynamicObject,
        key: &ObjectKey,
    ) -> Result<(), StoreError> {
        let injected = self
            .pending_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            stored.metadata.resource_version = Some(self.next_version());
        }
        if stored.metadata.resource_version != incoming.metadata.resource_version {
            return Err(StoreError::Conflict { key: key.clone() });
        }
        Ok(())
    }
}

#[async_trait]
impl ResourceStore for InMemoryStore {
    async fn get(&self, key: &ObjectKey) -> Result<DynamicObject, StoreError> {
        self.object(key)
            .ok_or_else(|| StoreError::NotFound { key: key.clone() })
    }

    async fn update(&self, obj: &DynamicObject) -> Result<DynamicObject, StoreError> {
        let key = ObjectKey::from_object(obj);
        let mut objects = self.objects.lock().unwrap();
        let stored = objects
            .get_mut(&key)
            .ok_or_else(|| StoreError::NotFound { key: key.clone() })?;
        self.check_version(stored, obj, &key)?;

        // The main resource endpoint ignores status changes
        let mut next = obj.clone();
        next.data["status"] = stored.data.get("status").cloned().unwrap_or(Value::Null);
        next.metadata.deletion_timestamp = stored.metadata.deletion_timestamp.clone();
        next.metadata.resource_version = Some(self.next_version());
        self.resource_writes.fetch_add(1, Ordering::SeqCst);

        let finalized = next.metadata.deletion_timestamp.is_some()
            && next.metadata.finalizers.as_ref().is_none_or(Vec::is_empty);
        if finalized && !self.linger_after_finalizers.load(Ordering::SeqCst) {
            objects.remove(&key);
        } else {
            *stored = next.clone();
        }
        Ok(next)
    }

    async fn update_status(&self, obj: &DynamicObject) -> Result<DynamicObject, StoreError> {
        let key = ObjectKey::from_object(obj);
        let mut objects = self.objects.lock().unwrap();
        let stored = objects
            .get_mut(&key)
            .ok_or_else(|| StoreError::NotFound { key: key.clone() })?;
        self.check_version(stored, obj, &key)?;

        stored.data["status"] = obj.data.get("status").cloned().unwrap_or(Value::Null);
        stored.metadata.resource_version = Some(self.next_version());
        self.status_writes.fetch_add(1, Ordering::SeqCst);
        Ok(stored.clone())
    }
}

// ---------------------------------------------------------------------------
// Scripted deployment backend
// ---------------------------------------------------------------------------

/// External system the scripted managers provision into
#[derive(Debug, Default)]
pub struct Backend {
    applied: Mutex<HashMap<String, Value>>,
    calls: Mutex<Vec<(Operation, String)>>,
    failing: Mutex<HashSet<Operation>>,
}

impl Backend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail(&self, operation: Operation) {
        self.failing.lock().unwrap().insert(operation);
    }

    pub fn recover(&self, operation: Operation) {
        self.failing.lock().unwrap().remove(&operation);
    }

    /// Values currently deployed under `name`
    pub fn applied(&self, name: &str) -> Option<Value> {
        self.applied.lock().unwrap().get(name).cloned()
    }

    /// Pretend a deployment already exists, e.g. from an earlier operator run
    pub fn seed(&self, name: &str, values: Value) {
        self.applied
            .lock()
            .unwrap()
            .insert(name.to_string(), values);
    }

    pub fn calls(&self) -> Vec<Operation> {
        self.calls.lock().unwrap().iter().map(|(op, _)| *op).collect()
    }

    pub fn count(&self, operation: Operation) -> usize {
        self.calls().into_iter().filter(|op| *op == operation).count()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn call(&self, operation: Operation, name: &str) -> Result<(), ManagerError> {
        self.calls
            .lock()
            .unwrap()
            .push((operation, name.to_string()));
        if self.failing.lock().unwrap().contains(&operation) {
            return Err(ManagerError::ToolFailed {
                operation,
                reason: "exit status 1: Error: boom".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct ScriptedManager {
    name: String,
    values: Value,
    backend: Arc<Backend>,
}

#[async_trait]
impl DeploymentManager for ScriptedManager {
    fn deployment_name(&self) -> &str {
        &self.name
    }

    fn deployed_config(&self) -> DeployedConfig {
        DeployedConfig {
            name: self.name.clone(),
            manifest: self.values.to_string(),
        }
    }

    async fn refresh(&self) -> Result<RefreshOutcome, ManagerError> {
        self.backend.call(Operation::Refresh, &self.name)?;
        Ok(match self.backend.applied(&self.name) {
            Some(applied) => RefreshOutcome {
                exists: true,
                update_required: applied != self.values,
            },
            None => RefreshOutcome {
                exists: false,
                update_required: false,
            },
        })
    }

    async fn create(&self) -> Result<(), ManagerError> {
        self.backend.call(Operation::Create, &self.name)?;
        self.backend.seed(&self.name, self.values.clone());
        Ok(())
    }

    async fn update(&self) -> Result<(), ManagerError> {
        self.backend.call(Operation::Update, &self.name)?;
        self.backend.seed(&self.name, self.values.clone());
        Ok(())
    }

    async fn reconcile(&self) -> Result<(), ManagerError> {
        self.backend.call(Operation::Reconcile, &self.name)
    }

    async fn delete(&self) -> Result<(), ManagerError> {
        self.backend.call(Operation::Delete, &self.name)?;
        self.backend.applied.lock().unwrap().remove(&self.name);
        Ok(())
    }
}

/// Builds [`ScriptedManager`]s the same way the Terraform factory derives
/// names and values
#[derive(Debug)]
pub struct ScriptedFactory {
    pub backend: Arc<Backend>,
}

impl ManagerFactory for ScriptedFactory {
    fn new_manager(
        &self,
        resource: &DynamicObject,
        override_values: &BTreeMap<String, String>,
    ) -> Result<Box<dyn DeploymentManager>, FactoryError> {
        let name = resource
            .metadata
            .name
            .clone()
            .filter(|n| !n.is_empty())
            .ok_or(FactoryError::MissingName)?;
        let spec: &Map<String, Value> = match resource.data.get("spec") {
            Some(Value::Object(spec)) => spec,
            _ => return Err(FactoryError::SpecNotMapping),
        };
        let values = merge_values(spec, &parse_overrides(override_values)?);
        Ok(Box::new(ScriptedManager {
            name,
            values: Value::Object(values),
            backend: Arc::clone(&self.backend),
        }))
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct RecordingEvents {
    events: Mutex<Vec<(ObjectKey, ResourceEvent)>>,
}

impl RecordingEvents {
    pub fn events(&self) -> Vec<ResourceEvent> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|(_, e)| e.clone())
            .collect()
    }
}

#[async_trait]
impl EventRecorder for RecordingEvents {
    async fn record(&self, obj: &DynamicObject, event: ResourceEvent) {
        self.events
            .lock()
            .unwrap()
            .push((ObjectKey::from_object(obj), event));
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub backend: Arc<Backend>,
    pub events: Arc<RecordingEvents>,
    pub reconciler: Arc<TerraformReconciler>,
}

impl Harness {
    pub fn new(watch: Watch) -> Self {
        let store = InMemoryStore::new();
        let backend = Backend::new();
        let events = Arc::new(RecordingEvents::default());
        let reconciler = Arc::new(TerraformReconciler::new(
            watch,
            Arc::clone(&store) as Arc<dyn ResourceStore>,
            Arc::new(ScriptedFactory {
                backend: Arc::clone(&backend),
            }),
            Arc::clone(&events) as Arc<dyn EventRecorder>,
            fast_options(),
        ));
        Self {
            store,
            backend,
            events,
            reconciler,
        }
    }

    pub fn stored(&self, name: &str) -> DynamicObject {
        self.store.object(&key(name)).expect("resource is stored")
    }
}
