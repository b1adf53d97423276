use anyhow::Context;
use automations::{CancellationToken, Controller, Request};
use futures::{future::BoxFuture, FutureExt, StreamExt};
use models::{Alert, Silence};
use std::sync::Arc;
use std::time::Duration;
use store::MemoryStore;
use tokio_stream::wrappers::UnboundedReceiverStream;
use upstream::{AlertmanagerClient, Client, ClientConfig, PrometheusClient};

mod api;
pub mod controllers;
mod error;
pub mod fake_prometheus;

pub use api::{build_router, ApiError};
pub use controllers::{alert_name, AlertReconciler, DriftPolicy, SilenceReconciler, SyncSummary};
pub use error::ReconcileError;

#[derive(clap::Args, Debug, Clone)]
pub struct Args {
    /// Namespace in which Alert and Silence objects are kept.
    #[clap(long = "namespace", env = "ALERT_OPERATOR_NAMESPACE")]
    pub namespace: String,
    /// Base URL of the Prometheus API, from which active alerts are read.
    #[clap(
        long = "prometheus-base-url",
        env = "ALERT_OPERATOR_PROMETHEUS_BASE_URL",
        default_value = "http://localhost:9090"
    )]
    pub prometheus_base_url: url::Url,
    /// Base URL of the Alertmanager API, with which silences are synchronized.
    #[clap(
        long = "alertmanager-base-url",
        env = "ALERT_OPERATOR_ALERTMANAGER_BASE_URL",
        default_value = "http://localhost:9091"
    )]
    pub alertmanager_base_url: url::Url,
    /// Bearer token for authenticating with Alertmanager.
    #[clap(
        long = "alertmanager-bearer-token",
        env = "ALERT_OPERATOR_ALERTMANAGER_BEARER_TOKEN"
    )]
    pub alertmanager_bearer_token: Option<Secret>,
    /// Accept invalid TLS certificates of Alertmanager.
    #[clap(
        long = "alertmanager-tls-skip-verify",
        env = "ALERT_OPERATOR_ALERTMANAGER_TLS_SKIP_VERIFY"
    )]
    pub alertmanager_tls_skip_verify: bool,
    /// Interval at which alerts and silences are synchronized.
    #[clap(
        long = "sync-interval",
        env = "ALERT_OPERATOR_SYNC_INTERVAL",
        default_value = "15s"
    )]
    #[arg(value_parser = parse_interval)]
    pub sync_interval: Duration,
    /// Timeout of each request to Prometheus or Alertmanager.
    #[clap(
        long = "request-timeout",
        env = "ALERT_OPERATOR_REQUEST_TIMEOUT",
        default_value = "30s"
    )]
    #[arg(value_parser = parse_interval)]
    pub request_timeout: Duration,
    /// Number of objects which may be reconciled concurrently, per kind.
    #[clap(
        long = "concurrency",
        env = "ALERT_OPERATOR_CONCURRENCY",
        default_value = "4"
    )]
    pub concurrency: usize,
    /// What to do when a Silence differs from its Alertmanager silence.
    #[clap(
        long = "silence-drift-policy",
        env = "ALERT_OPERATOR_SILENCE_DRIFT_POLICY",
        value_enum,
        default_value_t = DriftPolicy::Ignore
    )]
    pub silence_drift_policy: DriftPolicy,
    /// Address on which to serve the HTTP API. It's not served if unset.
    #[clap(long = "api-address", env = "ALERT_OPERATOR_API_ADDRESS")]
    pub api_address: Option<std::net::SocketAddr>,
    /// Don't synchronize alerts.
    #[clap(long = "disable-alerts", env = "ALERT_OPERATOR_DISABLE_ALERTS")]
    pub disable_alerts: bool,
    /// Don't synchronize silences.
    #[clap(long = "disable-silences", env = "ALERT_OPERATOR_DISABLE_SILENCES")]
    pub disable_silences: bool,
}

/// Secret is a string which is redacted from Debug output.
#[derive(Clone)]
pub struct Secret(pub String);

impl std::str::FromStr for Secret {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("<redacted>")
    }
}

fn parse_interval(s: &str) -> Result<Duration, String> {
    let interval = humantime::parse_duration(s).map_err(|err| err.to_string())?;

    if interval.is_zero() {
        Err("must be greater than zero".to_string())
    } else {
        Ok(interval)
    }
}

/// Run the operator over the given stores until signaled to stop by `shutdown`.
pub async fn run(
    args: Args,
    alerts: MemoryStore<Alert>,
    silences: MemoryStore<Silence>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    tracing::info!(?args, "starting alert-operator");

    let mut tasks: Vec<BoxFuture<'static, anyhow::Result<()>>> = Vec::new();

    if !args.disable_alerts {
        let client = Client::new(ClientConfig {
            base_url: args.prometheus_base_url.clone(),
            bearer_token: None,
            request_timeout: args.request_timeout,
            tls_skip_verify: false,
        })
        .context("failed to build Prometheus client")?;

        let reconciler =
            AlertReconciler::new(alerts.clone(), PrometheusClient::new(client), &args.namespace);

        let (triggers, _) = automations::periodic(args.sync_interval, shutdown.clone())?;
        let requests = UnboundedReceiverStream::new(triggers).map(|_| Request::SyncAll);

        tasks.push(
            Controller::new(Arc::new(reconciler), args.concurrency)
                .serve(requests, shutdown.clone())
                .map(Ok)
                .boxed(),
        );
    }

    if !args.disable_silences {
        let client = Client::new(ClientConfig {
            base_url: args.alertmanager_base_url.clone(),
            bearer_token: args.alertmanager_bearer_token.clone().map(|token| token.0),
            request_timeout: args.request_timeout,
            tls_skip_verify: args.alertmanager_tls_skip_verify,
        })
        .context("failed to build Alertmanager client")?;

        let reconciler = SilenceReconciler::new(
            silences.clone(),
            AlertmanagerClient::new(client),
            &args.namespace,
        )
        .with_drift_policy(args.silence_drift_policy);

        let (triggers, _) = automations::periodic(args.sync_interval, shutdown.clone())?;
        let requests = futures::stream::select(
            UnboundedReceiverStream::new(triggers).map(|_| Request::SyncAll),
            UnboundedReceiverStream::new(silences.watch()).map(Request::Object),
        );

        tasks.push(
            Controller::new(Arc::new(reconciler), args.concurrency)
                .serve(requests, shutdown.clone())
                .map(Ok)
                .boxed(),
        );
    }

    if let Some(address) = args.api_address {
        let listener = tokio::net::TcpListener::bind(address)
            .await
            .with_context(|| format!("failed to bind API address {address}"))?;

        let router = build_router(
            args.namespace.clone(),
            Arc::new(alerts.clone()),
            Arc::new(silences.clone()),
        );
        let shutdown = shutdown.clone();

        tracing::info!(%address, "API listening");

        tasks.push(
            async move {
                axum::serve(listener, router)
                    .with_graceful_shutdown(async move { shutdown.cancelled().await })
                    .await
                    .context("API server failed")
            }
            .boxed(),
        );
    }

    if tasks.is_empty() {
        anyhow::bail!("both alerts and silences are disabled, and there's no API to serve");
    }

    let result = futures::future::try_join_all(tasks).await;
    shutdown.cancel();
    result?;

    tracing::info!("alert-operator stopped");
    Ok(())
}
