//! apploy operator - deploys App trees declared in `Apps` resources

use std::sync::Arc;

use clap::Parser;
use futures::StreamExt;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, CustomResourceExt};
use tokio_util::sync::CancellationToken;

use apploy_common::crd::Apps;
use apploy_common::kube_utils::create_client;
use apploy_common::telemetry::init_tracing;
use apploy_compiler::Registry;
use apploy_operator::client::KubeClientImpl;
use apploy_operator::config::OperatorConfig;
use apploy_operator::controller::{error_policy, reconcile, Context};

const WATCH_TIMEOUT_SECS: u32 = 25;

/// apploy - reconciles Apps custom resources into Kubernetes workloads
#[derive(Parser, Debug)]
#[command(name = "apploy-operator", version, about, long_about = None)]
struct Cli {
    /// Print the Apps CRD and exit
    #[arg(long)]
    crd: bool,

    #[command(flatten)]
    config: OperatorConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        let crd = serde_yaml::to_string(&Apps::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    init_tracing(cli.config.log_format)?;
    cli.config.validate()?;
    run_controller(cli.config).await
}

async fn run_controller(config: OperatorConfig) -> anyhow::Result<()> {
    let client = create_client(config.kubeconfig.as_deref()).await?;
    let registry = Arc::new(Registry::new());
    let kube_client = Arc::new(KubeClientImpl::new(
        client.clone(),
        registry,
        config.field_manager.clone(),
    ));

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_signal(cancel.clone()));

    let ctx = Arc::new(Context::new(kube_client, config.reconciler(), cancel));
    let apps: Api<Apps> = Api::all(client);

    tracing::info!(
        concurrency = config.concurrency,
        field_manager = %config.field_manager,
        "Starting Apps controller"
    );

    Controller::new(apps, WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS))
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| {
            match result {
                Ok(action) => tracing::debug!(?action, "Apps reconciliation completed"),
                Err(e) => tracing::error!(error = ?e, "Apps reconciliation error"),
            }
            std::future::ready(())
        })
        .await;

    tracing::info!("Apps controller stopped");
    Ok(())
}

/// Cancel in-flight reconciliations on SIGINT or SIGTERM
async fn cancel_on_signal(cancel: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    tracing::info!("Shutdown signal received, cancelling reconciliations");
    cancel.cancel();
}
