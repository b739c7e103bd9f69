//! # Terraform Configuration Status
//!
//! Status block written onto every managed resource: a condition list plus
//! the record of the currently deployed configuration.

use chrono::{DateTime, SecondsFormat, Utc};
use kube::core::DynamicObject;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Condition types this controller manages
///
/// Types written by other tools are kept as `Other` and written back as-is.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum ConditionType {
    Initialized,
    Deployed,
    ConfigFailed,
    Irreconcilable,
    #[serde(untagged)]
    Other(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum ConditionStatus {
    True,
    False,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub enum ConditionReason {
    CreateSuccessful,
    UpdateSuccessful,
    DeleteSuccessful,
    CreateError,
    UpdateError,
    ReconcileError,
    DeleteError,
    #[serde(untagged)]
    Other(String),
}

/// Condition represents one aspect of the reconciliation outcome
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub r#type: ConditionType,
    pub status: ConditionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<ConditionReason>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    /// RFC3339, second precision
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

impl Condition {
    pub fn new(r#type: ConditionType, status: ConditionStatus) -> Self {
        Self {
            r#type,
            status,
            reason: None,
            message: String::new(),
            last_transition_time: None,
        }
    }

    #[must_use]
    pub fn with_reason(mut self, reason: ConditionReason) -> Self {
        self.reason = Some(reason);
        self
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }
}

/// Record of the configuration currently applied for this resource
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct DeployedConfig {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub manifest: String,
}

/// Status of a Terraform-managed resource
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TfConfigStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Present only while a deployment is live
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployed_config: Option<DeployedConfig>,
}

impl TfConfigStatus {
    /// Read the status block of a resource
    ///
    /// Missing status yields an empty status rather than an error. Fields are
    /// parsed one by one: a malformed condition entry is dropped on its own and
    /// never takes the rest of the status with it.
    pub fn from_object(obj: &DynamicObject) -> Self {
        let Some(status) = obj.data.get("status") else {
            return Self::default();
        };

        let conditions = status
            .get("conditions")
            .and_then(Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|entry| serde_json::from_value(entry.clone()).ok())
                    .collect()
            })
            .unwrap_or_default();
        let deployed_config = status
            .get("deployedConfig")
            .cloned()
            .and_then(|config| serde_json::from_value(config).ok());

        Self {
            conditions,
            deployed_config,
        }
    }

    /// Write this status into the resource's `status` field (in memory only)
    pub fn apply_to(&self, obj: &mut DynamicObject) -> Result<(), serde_json::Error> {
        let value = serde_json::to_value(self)?;
        match obj.data.as_object_mut() {
            Some(data) => {
                data.insert("status".to_string(), value);
            }
            None => {
                obj.data = serde_json::json!({ "status": value });
            }
        }
        Ok(())
    }

    pub fn condition(&self, r#type: ConditionType) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.r#type == r#type)
    }

    /// Set a condition, replacing any existing condition of the same type
    ///
    /// The transition time is carried over from the existing condition when the
    /// status value is unchanged and stamped with the current time otherwise.
    pub fn set_condition(&mut self, condition: Condition) -> &mut Self {
        self.set_condition_at(condition, Utc::now())
    }

    pub fn set_condition_at(&mut self, mut condition: Condition, now: DateTime<Utc>) -> &mut Self {
        let stamp = now.to_rfc3339_opts(SecondsFormat::Secs, true);
        if let Some(existing) = self
            .conditions
            .iter_mut()
            .find(|c| c.r#type == condition.r#type)
        {
            condition.last_transition_time = if existing.status == condition.status {
                existing.last_transition_time.clone()
            } else {
                Some(stamp)
            };
            *existing = condition;
            return self;
        }

        condition.last_transition_time = Some(stamp);
        self.conditions.push(condition);
        self
    }

    /// Remove the condition of the given type, if present
    pub fn remove_condition(&mut self, r#type: ConditionType) -> &mut Self {
        if let Some(index) = self.conditions.iter().position(|c| c.r#type == r#type) {
            self.conditions.remove(index);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use kube::core::{ApiResource, GroupVersionKind};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_set_condition_same_status_keeps_transition_time() {
        let mut status = TfConfigStatus::default();
        status.set_condition_at(
            Condition::new(ConditionType::Deployed, ConditionStatus::True)
                .with_reason(ConditionReason::CreateSuccessful),
            at(0),
        );
        let first = status.conditions[0].last_transition_time.clone();

        status.set_condition_at(
            Condition::new(ConditionType::Deployed, ConditionStatus::True)
                .with_reason(ConditionReason::UpdateSuccessful),
            at(120),
        );

        assert_eq!(status.conditions.len(), 1);
        assert_eq!(status.conditions[0].last_transition_time, first);
        assert_eq!(
            status.conditions[0].reason,
            Some(ConditionReason::UpdateSuccessful)
        );
    }

    #[test]
    fn test_set_condition_status_change_updates_transition_time() {
        let mut status = TfConfigStatus::default();
        status.set_condition_at(
            Condition::new(ConditionType::Deployed, ConditionStatus::True),
            at(0),
        );
        status.set_condition_at(
            Condition::new(ConditionType::Deployed, ConditionStatus::False)
                .with_reason(ConditionReason::DeleteSuccessful),
            at(60),
        );

        assert_eq!(
            status.conditions[0].last_transition_time.as_deref(),
            Some(at(60).to_rfc3339_opts(SecondsFormat::Secs, true).as_str())
        );
    }

    #[test]
    fn test_one_condition_per_type() {
        let mut status = TfConfigStatus::default();
        status
            .set_condition(Condition::new(ConditionType::Initialized, ConditionStatus::True))
            .set_condition(Condition::new(ConditionType::Deployed, ConditionStatus::True))
            .set_condition(Condition::new(ConditionType::Initialized, ConditionStatus::True));
        assert_eq!(status.conditions.len(), 2);
    }

    #[test]
    fn test_set_then_remove_restores_prior_list() {
        let mut status = TfConfigStatus::default();
        status
            .set_condition_at(
                Condition::new(ConditionType::Initialized, ConditionStatus::True),
                at(0),
            )
            .set_condition_at(
                Condition::new(ConditionType::Deployed, ConditionStatus::True)
                    .with_reason(ConditionReason::CreateSuccessful),
                at(1),
            );
        let before = status.clone();

        status.set_condition(
            Condition::new(ConditionType::ConfigFailed, ConditionStatus::True)
                .with_reason(ConditionReason::UpdateError)
                .with_message("apply failed"),
        );
        status.remove_condition(ConditionType::ConfigFailed);

        assert_eq!(status, before);
    }

    #[test]
    fn test_remove_missing_condition_is_noop() {
        let mut status = TfConfigStatus::default();
        status.set_condition(Condition::new(ConditionType::Initialized, ConditionStatus::True));
        let before = status.clone();
        status.remove_condition(ConditionType::Irreconcilable);
        assert_eq!(status, before);
    }

    #[test]
    fn test_status_round_trips_through_object() {
        let ar = ApiResource::from_gvk(&GroupVersionKind::gvk("infra.example.com", "v1", "Bucket"));
        let mut obj = DynamicObject::new("logs", &ar).within("default");

        assert_eq!(TfConfigStatus::from_object(&obj), TfConfigStatus::default());

        let mut status = TfConfigStatus::default();
        status.set_condition(
            Condition::new(ConditionType::Irreconcilable, ConditionStatus::True)
                .with_reason(ConditionReason::ReconcileError)
                .with_message("plan failed"),
        );
        status.deployed_config = Some(DeployedConfig {
            name: "logs".to_string(),
            manifest: "sha256:abc".to_string(),
        });
        status.apply_to(&mut obj).unwrap();

        assert_eq!(obj.data["status"]["conditions"][0]["type"], "Irreconcilable");
        assert_eq!(obj.data["status"]["deployedConfig"]["manifest"], "sha256:abc");
        assert_eq!(TfConfigStatus::from_object(&obj), status);
    }

    #[test]
    fn test_foreign_conditions_survive_round_trip() {
        let ar = ApiResource::from_gvk(&GroupVersionKind::gvk("infra.example.com", "v1", "Bucket"));
        let mut obj = DynamicObject::new("logs", &ar).data(serde_json::json!({
            "status": {
                "conditions": [
                    {
                        "type": "Deployed",
                        "status": "True",
                        "reason": "CreateSuccessful",
                        "lastTransitionTime": "2026-01-01T00:00:00Z"
                    },
                    { "type": "Ready", "status": "True" },
                    { "type": "ConfigFailed", "status": "True", "reason": "InstallError" }
                ],
                "deployedConfig": { "name": "logs", "manifest": "sha256:abc" }
            }
        }));

        let status = TfConfigStatus::from_object(&obj);

        assert_eq!(status.conditions.len(), 3);
        let deployed = status.condition(ConditionType::Deployed).unwrap();
        assert_eq!(deployed.last_transition_time.as_deref(), Some("2026-01-01T00:00:00Z"));
        assert_eq!(
            status.condition(ConditionType::Other("Ready".to_string())).unwrap().status,
            ConditionStatus::True
        );
        assert_eq!(
            status.condition(ConditionType::ConfigFailed).unwrap().reason,
            Some(ConditionReason::Other("InstallError".to_string()))
        );
        assert_eq!(status.deployed_config.as_ref().unwrap().manifest, "sha256:abc");

        status.apply_to(&mut obj).unwrap();
        assert_eq!(obj.data["status"]["conditions"][1]["type"], "Ready");
        assert_eq!(obj.data["status"]["conditions"][2]["reason"], "InstallError");
    }

    #[test]
    fn test_malformed_condition_keeps_deployed_config() {
        let ar = ApiResource::from_gvk(&GroupVersionKind::gvk("", "v1", "Bucket"));
        let obj = DynamicObject::new("logs", &ar).data(serde_json::json!({
            "status": {
                "conditions": [
                    { "type": "Deployed", "status": "True" },
                    { "status": "True" }
                ],
                "deployedConfig": { "name": "logs", "manifest": "sha256:abc" }
            }
        }));

        let status = TfConfigStatus::from_object(&obj);

        assert_eq!(status.conditions.len(), 1);
        assert!(status.deployed_config.is_some());
    }

    #[test]
    fn test_malformed_status_defaults_to_empty() {
        let ar = ApiResource::from_gvk(&GroupVersionKind::gvk("", "v1", "Bucket"));
        let obj = DynamicObject::new("logs", &ar)
            .data(serde_json::json!({ "status": { "conditions": "not-a-list" } }));
        assert_eq!(TfConfigStatus::from_object(&obj), TfConfigStatus::default());
    }
}
