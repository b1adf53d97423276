use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;

/// ObjectKey addresses a single resource within its kind.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Metadata which is common to all resources.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    pub namespace: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub finalizers: Vec<String>,
    /// Opaque version of the stored object, used for optimistic concurrency.
    /// Writes which carry a stale version are rejected by the store.
    /// Writes which carry no version at all are applied unconditionally.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,
    /// Set by the store when deletion was requested but finalizers remain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<DateTime<Utc>>,
}

impl ObjectMeta {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(&self.namespace, &self.name)
    }

    pub fn is_deleting(&self) -> bool {
        self.deletion_timestamp.is_some()
    }

    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.finalizers.iter().any(|f| f == finalizer)
    }

    /// Adds `finalizer`, returning true if it was not already present.
    pub fn add_finalizer(&mut self, finalizer: &str) -> bool {
        if self.has_finalizer(finalizer) {
            return false;
        }
        self.finalizers.push(finalizer.to_string());
        true
    }

    /// Removes `finalizer`, returning true if it was present.
    pub fn remove_finalizer(&mut self, finalizer: &str) -> bool {
        let before = self.finalizers.len();
        self.finalizers.retain(|f| f != finalizer);
        before != self.finalizers.len()
    }

    /// Sets a label without disturbing other labels.
    pub fn set_label(&mut self, label: &str, value: &str) {
        self.labels.insert(label.to_string(), value.to_string());
    }
}

/// Resource is implemented by each kind of object held in a store.
/// Resources have metadata and a separate status sub-document,
/// which is written independently of the rest of the object.
pub trait Resource:
    Clone + std::fmt::Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    const KIND: &'static str;

    type Status: Clone + Default + PartialEq + std::fmt::Debug + Send + Sync;

    fn metadata(&self) -> &ObjectMeta;
    fn metadata_mut(&mut self) -> &mut ObjectMeta;
    fn status(&self) -> &Self::Status;
    fn status_mut(&mut self) -> &mut Self::Status;

    fn key(&self) -> ObjectKey {
        self.metadata().key()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_finalizer_helpers() {
        let mut meta = ObjectMeta::new("monitoring", "a-silence");

        assert!(meta.add_finalizer("alert-operator"));
        assert!(!meta.add_finalizer("alert-operator"));
        assert!(meta.add_finalizer("other"));
        assert_eq!(meta.finalizers, vec!["alert-operator", "other"]);

        assert!(meta.remove_finalizer("alert-operator"));
        assert!(!meta.remove_finalizer("alert-operator"));
        assert!(!meta.has_finalizer("alert-operator"));
        assert!(meta.has_finalizer("other"));
    }

    #[test]
    fn test_key_display() {
        let meta = ObjectMeta::new("monitoring", "a-silence");
        assert_eq!(meta.key().to_string(), "monitoring/a-silence");
    }

    #[test]
    fn test_meta_serde_skips_empty_fields() {
        let meta = ObjectMeta::new("monitoring", "a-silence");
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"name": "a-silence", "namespace": "monitoring"})
        );

        let parsed: ObjectMeta = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, meta);
    }
}
