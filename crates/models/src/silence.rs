use super::{ObjectMeta, Resource};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Silence is a suppression window for alerts matching a set of matchers.
/// Silences are either mirrored from the remote silence service, or authored
/// locally and then created remotely.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Silence {
    pub metadata: ObjectMeta,
    pub spec: SilenceSpec,
    #[serde(default)]
    pub status: SilenceStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SilenceSpec {
    #[serde(default)]
    pub comment: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub created_by: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    /// Labels which a silenced alert must carry with exactly these values.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub match_labels: BTreeMap<String, String>,
    /// Regex and negative matchers, which can't be expressed by `matchLabels`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_expressions: Vec<Matcher>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Matcher {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub is_regex: bool,
    #[serde(default = "default_true")]
    pub is_equal: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SilenceStatus {
    /// ID of the remote silence, or empty if it hasn't been created yet.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub silence_id: String,
    /// Last observed state of the remote silence.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub state: String,
}

fn default_true() -> bool {
    true
}

impl Matcher {
    pub fn equal(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            is_regex: false,
            is_equal: true,
        }
    }

    /// A plain matcher tests a label for exact equality.
    pub fn is_plain(&self) -> bool {
        !self.is_regex && self.is_equal
    }
}

impl SilenceSpec {
    /// Returns all matchers of the spec, in a stable order.
    pub fn matchers(&self) -> Vec<Matcher> {
        let mut matchers: Vec<Matcher> = self
            .match_labels
            .iter()
            .map(|(name, value)| Matcher::equal(name, value))
            .chain(self.match_expressions.iter().cloned())
            .collect();

        matchers.sort();
        matchers.dedup();
        matchers
    }

    /// Replaces the matchers of the spec, placing plain matchers into
    /// `match_labels` and all others into `match_expressions`.
    pub fn set_matchers(&mut self, matchers: impl IntoIterator<Item = Matcher>) {
        self.match_labels.clear();
        self.match_expressions.clear();

        for matcher in matchers {
            if matcher.is_plain() && !self.match_labels.contains_key(&matcher.name) {
                self.match_labels.insert(matcher.name, matcher.value);
            } else {
                self.match_expressions.push(matcher);
            }
        }
        self.match_expressions.sort();
    }
}

impl Silence {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, spec: SilenceSpec) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, name),
            spec,
            status: SilenceStatus::default(),
        }
    }
}

impl Resource for Silence {
    const KIND: &'static str = "Silence";

    type Status = SilenceStatus;

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }
    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
    fn status(&self) -> &SilenceStatus {
        &self.status
    }
    fn status_mut(&mut self) -> &mut SilenceStatus {
        &mut self.status
    }
}
