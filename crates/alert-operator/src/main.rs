use anyhow::Context;
use clap::Parser;

#[derive(clap::Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    #[clap(subcommand)]
    mode: Mode,
}

#[derive(clap::Subcommand, Debug)]
enum Mode {
    /// Run the operator, synchronizing alerts and silences.
    Run(alert_operator::Args),
    /// Serve a fake Prometheus alerts API, for local development.
    FakePrometheus(alert_operator::fake_prometheus::FakePrometheusArgs),
}

fn main() -> Result<(), anyhow::Error> {
    // Use reasonable defaults for printing structured logs to stderr.
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_ansi(!matches!(std::env::var("NO_COLOR"), Ok(v) if v == "1"))
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("setting tracing default failed")?;

    let cli = Cli::parse();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let result = runtime.block_on(runtime.spawn(async move {
        match cli.mode {
            Mode::Run(args) => {
                let shutdown = automations::CancellationToken::new();

                let signal = shutdown.clone();
                tokio::spawn(async move {
                    match tokio::signal::ctrl_c().await {
                        Ok(()) => {
                            tracing::info!("caught shutdown signal, stopping...");
                            signal.cancel();
                        }
                        Err(err) => tracing::error!(?err, "error subscribing to shutdown signal"),
                    }
                });

                alert_operator::run(
                    args,
                    store::MemoryStore::new(),
                    store::MemoryStore::new(),
                    shutdown,
                )
                .await
            }
            Mode::FakePrometheus(args) => alert_operator::fake_prometheus::serve(args).await,
        }
    }));

    runtime.shutdown_timeout(std::time::Duration::from_secs(5));
    result?
}
