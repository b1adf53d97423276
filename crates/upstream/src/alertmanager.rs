use super::{Client, Error};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Matcher of a silence, testing a single alert label.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Matcher {
    pub name: String,
    pub value: String,
    pub is_regex: bool,
    #[serde(default = "default_true")]
    pub is_equal: bool,
}

fn default_true() -> bool {
    true
}

/// SilenceRecord is a silence as reported by the silence service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SilenceRecord {
    pub id: String,
    pub status: SilenceStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub created_by: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub matchers: Vec<Matcher>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SilenceStatus {
    pub state: SilenceState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SilenceState {
    Expired,
    Active,
    Pending,
}

impl SilenceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SilenceState::Expired => "expired",
            SilenceState::Active => "active",
            SilenceState::Pending => "pending",
        }
    }

    /// State of a silence spanning `starts_at` through `ends_at`, at `now`.
    pub fn at(starts_at: DateTime<Utc>, ends_at: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        if ends_at <= now {
            SilenceState::Expired
        } else if starts_at > now {
            SilenceState::Pending
        } else {
            SilenceState::Active
        }
    }
}

impl std::fmt::Display for SilenceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// PostableSilence creates a new silence, or updates the silence
/// identified by `id` if it's set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostableSilence {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub comment: String,
    pub created_by: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub matchers: Vec<Matcher>,
}

#[derive(Debug, Deserialize)]
struct PostSilenceResponse {
    #[serde(rename = "silenceID")]
    silence_id: String,
}

/// SilenceService manages silences of the remote silence service.
#[async_trait::async_trait]
pub trait SilenceService: Send + Sync {
    /// List all silences, including expired ones.
    async fn list_silences(&self) -> Result<Vec<SilenceRecord>, Error>;

    /// Fetch the silence identified by `id`.
    async fn get_silence(&self, id: &str) -> Result<SilenceRecord, Error>;

    /// Create or update a silence, returning the ID it was stored under.
    /// An update may be applied by expiring the previous silence and
    /// creating a new one, in which case the returned ID differs.
    async fn post_silence(&self, silence: &PostableSilence) -> Result<String, Error>;

    /// Expire the silence identified by `id`.
    async fn delete_silence(&self, id: &str) -> Result<(), Error>;
}

#[async_trait::async_trait]
impl<T: SilenceService + ?Sized> SilenceService for std::sync::Arc<T> {
    async fn list_silences(&self) -> Result<Vec<SilenceRecord>, Error> {
        (**self).list_silences().await
    }
    async fn get_silence(&self, id: &str) -> Result<SilenceRecord, Error> {
        (**self).get_silence(id).await
    }
    async fn post_silence(&self, silence: &PostableSilence) -> Result<String, Error> {
        (**self).post_silence(silence).await
    }
    async fn delete_silence(&self, id: &str) -> Result<(), Error> {
        (**self).delete_silence(id).await
    }
}

/// AlertmanagerClient is a SilenceService backed by the Alertmanager v2 API.
#[derive(Debug, Clone)]
pub struct AlertmanagerClient {
    client: Client,
}

impl AlertmanagerClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl SilenceService for AlertmanagerClient {
    async fn list_silences(&self) -> Result<Vec<SilenceRecord>, Error> {
        self.client.get(&["api", "v2", "silences"]).await
    }

    async fn get_silence(&self, id: &str) -> Result<SilenceRecord, Error> {
        self.client.get(&["api", "v2", "silence", id]).await
    }

    async fn post_silence(&self, silence: &PostableSilence) -> Result<String, Error> {
        let response: PostSilenceResponse =
            self.client.post(&["api", "v2", "silences"], silence).await?;
        Ok(response.silence_id)
    }

    async fn delete_silence(&self, id: &str) -> Result<(), Error> {
        self.client.delete(&["api", "v2", "silence", id]).await
    }
}
