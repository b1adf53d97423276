use super::{Client, Error};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// AlertRecord is a single active alert, as reported by `GET /api/v1/alerts`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertRecord {
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    pub state: AlertState,
    /// Time at which the alert became active. Together with `alertname`,
    /// this identifies an alert across successive queries.
    pub active_at: DateTime<Utc>,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertState {
    Pending,
    Firing,
    Inactive,
}

impl AlertState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertState::Pending => "pending",
            AlertState::Firing => "firing",
            AlertState::Inactive => "inactive",
        }
    }
}

impl std::fmt::Display for AlertState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AlertsResponse {
    status: String,
    #[serde(default)]
    data: Option<AlertsData>,
    #[serde(default)]
    error: String,
}

#[derive(Debug, Deserialize)]
struct AlertsData {
    alerts: Vec<AlertRecord>,
}

/// AlertSource reports currently active alerts.
#[async_trait::async_trait]
pub trait AlertSource: Send + Sync {
    async fn active_alerts(&self) -> Result<Vec<AlertRecord>, Error>;
}

#[async_trait::async_trait]
impl<T: AlertSource + ?Sized> AlertSource for std::sync::Arc<T> {
    async fn active_alerts(&self) -> Result<Vec<AlertRecord>, Error> {
        (**self).active_alerts().await
    }
}

/// PrometheusClient is an AlertSource backed by the Prometheus HTTP API.
#[derive(Debug, Clone)]
pub struct PrometheusClient {
    client: Client,
}

impl PrometheusClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl AlertSource for PrometheusClient {
    async fn active_alerts(&self) -> Result<Vec<AlertRecord>, Error> {
        const PATH: &[&str] = &["api", "v1", "alerts"];

        let response: AlertsResponse = self.client.get(PATH).await?;
        let url = self.client.endpoint(PATH);

        if response.status != "success" {
            return Err(Error::Unsuccessful {
                url,
                status: response.status,
                error: response.error,
            });
        }
        match response.data {
            Some(AlertsData { alerts }) => Ok(alerts),
            None => Err(Error::Decode {
                url,
                source: <serde_json::Error as serde::de::Error>::missing_field("data"),
            }),
        }
    }
}
