//! webhook-ca - CA lifecycle controller for admission webhooks

use std::sync::Arc;

use clap::Parser;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Secret;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use webhook_ca::config::ControllerConfig;
use webhook_ca::controller::{bootstrap_ca, error_policy, reconcile, Context};
use webhook_ca::retry::RetryConfig;

/// webhook-ca - keeps admission webhook CA material valid and distributed
#[derive(Parser, Debug)]
#[command(name = "webhook-ca", version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    config: ControllerConfig,

    /// Emit logs as JSON lines
    #[arg(long, env = "WEBHOOK_CA_LOG_JSON")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.log_json);

    cli.config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    run_controller(cli.config).await
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

/// Run the CA controller until a shutdown signal arrives
async fn run_controller(config: ControllerConfig) -> anyhow::Result<()> {
    tracing::info!(
        namespace = %config.namespace,
        ca_secret = %config.ca_secret_name,
        tls_secret = %config.tls_secret_name,
        "webhook-ca controller starting..."
    );

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    let ctx = Arc::new(Context::from_client(client.clone(), &config));

    // The controller is driven by CA Secret events, so make sure there is one
    let bootstrap = bootstrap_ca(&ctx, &RetryConfig::with_max_attempts(10))
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bootstrap CA secret: {}", e))?;
    tracing::debug!(?bootstrap, "CA bootstrap finished");

    let secrets: Api<Secret> = Api::namespaced(client, &config.namespace);
    let watcher_config =
        WatcherConfig::default().fields(&format!("metadata.name={}", config.ca_secret_name));

    tracing::info!("Starting CA controller...");

    Controller::new(secrets, watcher_config)
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((obj, action)) => {
                    tracing::debug!(secret = %obj.name, ?action, "CA reconciliation completed");
                }
                Err(e) => {
                    tracing::error!(error = ?e, "CA reconciliation error");
                }
            }
        })
        .await;

    tracing::info!("CA controller shut down");
    Ok(())
}
