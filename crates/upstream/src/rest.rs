use super::Error;
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Configuration of a REST Client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the API. Request paths are appended to its path.
    pub base_url: url::Url,
    /// Bearer token attached to every request, if set.
    pub bearer_token: Option<String>,
    /// Timeout of each request, from connect to the end of the response body.
    pub request_timeout: Duration,
    /// Accept invalid TLS certificates of the remote API.
    pub tls_skip_verify: bool,
}

impl ClientConfig {
    pub fn new(base_url: url::Url) -> Self {
        Self {
            base_url,
            bearer_token: None,
            request_timeout: Duration::from_secs(30),
            tls_skip_verify: false,
        }
    }
}

/// Client composes a base API URL and an HTTP client.
#[derive(Clone)]
pub struct Client {
    /// Base URL of the REST API.
    pub base_url: url::Url,
    /// HTTP client to use for REST requests.
    pub http_client: reqwest::Client,
    bearer_token: Option<String>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("base_url", &self.base_url.as_str())
            .field("bearer_token", &self.bearer_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Client {
    pub fn new(config: ClientConfig) -> Result<Self, Error> {
        let ClientConfig {
            base_url,
            bearer_token,
            request_timeout,
            tls_skip_verify,
        } = config;

        if base_url.cannot_be_a_base() {
            return Err(Error::Config(format!(
                "{base_url} cannot be used as a base URL"
            )));
        }
        if tls_skip_verify {
            tracing::warn!(%base_url, "TLS certificate verification is disabled");
        }

        let http_client = reqwest::ClientBuilder::new()
            .user_agent(concat!("alert-operator/", env!("CARGO_PKG_VERSION")))
            .timeout(request_timeout)
            .danger_accept_invalid_certs(tls_skip_verify)
            .build()
            .map_err(|err| Error::Config(format!("failed to build HTTP client: {err}")))?;

        Ok(Self {
            base_url,
            http_client,
            bearer_token,
        })
    }

    /// Map path `segments` onto the base URL.
    pub fn endpoint(&self, segments: &[&str]) -> url::Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    pub async fn get<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T, Error> {
        let url = self.endpoint(segments);
        let response = self
            .send(url.clone(), self.http_client.get(url.clone()))
            .await?;
        decode(url, response).await
    }

    pub async fn post<Request, Response>(
        &self,
        segments: &[&str],
        request: &Request,
    ) -> Result<Response, Error>
    where
        Request: serde::Serialize,
        Response: DeserializeOwned,
    {
        let url = self.endpoint(segments);
        let response = self
            .send(url.clone(), self.http_client.post(url.clone()).json(request))
            .await?;
        decode(url, response).await
    }

    pub async fn delete(&self, segments: &[&str]) -> Result<(), Error> {
        let url = self.endpoint(segments);
        self.send(url.clone(), self.http_client.delete(url)).await?;
        Ok(())
    }

    async fn send(
        &self,
        url: url::Url,
        mut builder: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, Error> {
        if let Some(token) = &self.bearer_token {
            builder = builder.bearer_auth(token);
        }

        let response = builder
            .send()
            .await
            .map_err(|source| Error::Transport {
                url: url.clone(),
                source,
            })?;
        let status = response.status();
        tracing::debug!(%url, %status, "received response");

        if status == reqwest::StatusCode::NOT_FOUND {
            Err(Error::NotFound { url })
        } else if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            Err(Error::Status { url, status, body })
        } else {
            Ok(response)
        }
    }
}

async fn decode<T: DeserializeOwned>(url: url::Url, response: reqwest::Response) -> Result<T, Error> {
    let body = match response.bytes().await {
        Ok(body) => body,
        Err(source) => return Err(Error::Transport { url, source }),
    };
    serde_json::from_slice(&body).map_err(|source| Error::Decode { url, source })
}
