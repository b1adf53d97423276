//! A stand-in for the Prometheus alerts API, for local development.
//! It always reports a single firing alert.
use anyhow::Context;

#[derive(clap::Args, Debug)]
pub struct FakePrometheusArgs {
    /// Port on which to serve.
    #[clap(long = "port", env = "FAKE_PROMETHEUS_PORT", default_value = "9090")]
    pub port: u16,
    /// Address on which to serve.
    #[clap(long = "address", env = "FAKE_PROMETHEUS_ADDRESS", default_value = "127.0.0.1")]
    pub address: std::net::IpAddr,
}

pub fn build_router() -> axum::Router<()> {
    axum::Router::new()
        .route("/api/v1/alerts", axum::routing::get(alerts))
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

async fn alerts() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "data": {
            "alerts": [
                {
                    "activeAt": "2018-07-04T20:27:12.60602144+02:00",
                    "annotations": {},
                    "labels": {
                        "alertname": "my-alert"
                    },
                    "state": "firing",
                    "value": "1e+00"
                }
            ]
        },
        "status": "success"
    }))
}

pub async fn serve(args: FakePrometheusArgs) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind((args.address, args.port))
        .await
        .context("failed to bind to port")?;

    tracing::info!(address = %args.address, port = args.port, "fake prometheus listening");

    axum::serve(listener, build_router())
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!(?err, "error subscribing to shutdown signal");
            }
        })
        .await
        .context("HTTP server failed")
}
