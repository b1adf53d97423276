use super::{ObjectMeta, Resource};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Alert mirrors a single alert reported by the alert source.
/// It's created on the first observation of an alert identity, and its
/// status is overwritten upon every subsequent observation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: AlertSpec,
    #[serde(default)]
    pub status: AlertStatus,
}

/// Alerts have no desired state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertSpec {}

/// AlertStatus is the observed state of an Alert.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertStatus {
    /// State describes whether the alert is firing or pending.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub state: String,
    /// Key-value data associated with the alert.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    /// Labels which identify the alert.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Timestamp since which the alert is active.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub since: String,
    /// Current value of the alert expression.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub value: String,
}

impl Alert {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, name),
            ..Default::default()
        }
    }
}

impl Resource for Alert {
    const KIND: &'static str = "Alert";

    type Status = AlertStatus;

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }
    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
    fn status(&self) -> &AlertStatus {
        &self.status
    }
    fn status_mut(&mut self) -> &mut AlertStatus {
        &mut self.status
    }
}
