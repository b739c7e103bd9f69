//! # Event Recording
//!
//! Kubernetes events attached to managed resources. Publishing is best
//! effort: failures are logged and never fail a reconcile.

use crate::constants::{CONTROLLER_NAME, OVERRIDE_VALUES_EVENT_REASON};
use async_trait::async_trait;
use kube::core::{ApiResource, DynamicObject};
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, Resource};
use std::collections::BTreeMap;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceEvent {
    pub warning: bool,
    pub reason: String,
    pub action: String,
    pub note: String,
}

impl ResourceEvent {
    /// Warning published for each override value applied over a resource's spec
    pub fn override_in_use(key: &str, value: &str) -> Self {
        Self {
            warning: true,
            reason: OVERRIDE_VALUES_EVENT_REASON.to_string(),
            action: "Apply".to_string(),
            note: format!(
                "Template value {key:?} overridden to {value:?} by operator's watches.yaml"
            ),
        }
    }

    /// One warning per override entry, in key order
    pub fn overrides_in_use(overrides: &BTreeMap<String, String>) -> Vec<Self> {
        overrides
            .iter()
            .map(|(k, v)| Self::override_in_use(k, v))
            .collect()
    }
}

#[async_trait]
pub trait EventRecorder: Send + Sync {
    async fn record(&self, obj: &DynamicObject, event: ResourceEvent);
}

/// Publishes events through the Kubernetes events API
#[derive(Clone)]
pub struct KubeEventRecorder {
    recorder: Recorder,
    resource: ApiResource,
}

impl std::fmt::Debug for KubeEventRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeEventRecorder")
            .field("kind", &self.resource.kind)
            .finish_non_exhaustive()
    }
}

impl KubeEventRecorder {
    pub fn new(client: Client, resource: ApiResource) -> Self {
        let reporter = Reporter {
            controller: CONTROLLER_NAME.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
            resource,
        }
    }
}

#[async_trait]
impl EventRecorder for KubeEventRecorder {
    async fn record(&self, obj: &DynamicObject, event: ResourceEvent) {
        let reference = obj.object_ref(&self.resource);
        let ev = Event {
            type_: if event.warning {
                EventType::Warning
            } else {
                EventType::Normal
            },
            reason: event.reason.clone(),
            note: Some(event.note),
            action: event.action,
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&ev, &reference).await {
            warn!(
                name = obj.metadata.name.as_deref().unwrap_or("unknown"),
                namespace = obj.metadata.namespace.as_deref().unwrap_or(""),
                reason = %event.reason,
                "Failed to publish event: {}",
                e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_override_event_message() {
        let event = ResourceEvent::override_in_use("image.tag", "v2");
        assert!(event.warning);
        assert_eq!(event.reason, "OverrideValuesInUse");
        assert_eq!(
            event.note,
            "Template value \"image.tag\" overridden to \"v2\" by operator's watches.yaml"
        );
    }

    #[test]
    fn test_one_event_per_override() {
        let overrides = BTreeMap::from([
            ("b".to_string(), "2".to_string()),
            ("a".to_string(), "1".to_string()),
        ]);
        let events = ResourceEvent::overrides_in_use(&overrides);
        assert_eq!(events.len(), 2);
        assert!(events[0].note.contains("\"a\""));
    }
}
