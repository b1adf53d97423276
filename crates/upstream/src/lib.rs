//! Clients of the external systems which the operator mirrors:
//! the Prometheus alerts API, and the Alertmanager v2 silences API.
//!
//! Each system is modeled by a trait (`AlertSource`, `SilenceService`) so
//! that reconcilers can be exercised against in-memory fakes.

pub mod alertmanager;
pub mod prometheus;
mod rest;

pub use alertmanager::{AlertmanagerClient, SilenceService};
pub use prometheus::{AlertSource, PrometheusClient};
pub use rest::{Client, ClientConfig};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid client configuration: {0}")]
    Config(String),
    #[error("request to {url} failed")]
    Transport {
        url: url::Url,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} was not found")]
    NotFound { url: url::Url },
    #[error("request to {url} failed with {status}: {body}")]
    Status {
        url: url::Url,
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("failed to decode response of {url}")]
    Decode {
        url: url::Url,
        #[source]
        source: serde_json::Error,
    },
    #[error("{url} responded with unsuccessful status {status:?}: {error}")]
    Unsuccessful {
        url: url::Url,
        status: String,
        error: String,
    },
}

impl Error {
    /// Transport errors are failures to reach the remote system at all,
    /// such as refused connections or timeouts.
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }
}
