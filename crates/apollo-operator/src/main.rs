//! Apollo Operator - Kubernetes operator for the Apollo configuration platform

use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use kube::Client;

use apollo_common::telemetry::{init_telemetry, TelemetryConfig};
use apollo_operator::controller::{Context, RequeuePolicy};
use apollo_operator::controller_runner::build_instance_controllers;
use apollo_operator::crds::{crds_yaml, ensure_crds_installed};

/// Apollo - CRD-driven operator for config service, admin service and portal
#[derive(Parser, Debug)]
#[command(name = "apollo-operator", version, about, long_about = None)]
struct Cli {
    /// Print CRD manifests and exit
    #[arg(long)]
    crd: bool,

    #[command(subcommand)]
    command: Option<Commands>,

    /// Controller settings used when no subcommand is given
    #[command(flatten)]
    controller: ControllerArgs,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run as controller (default mode)
    ///
    /// Watches ApolloEnvironment, ApolloPortal and Apollo instances and
    /// converges the objects each one owns.
    Controller(ControllerArgs),
}

#[derive(Args, Debug, Clone)]
struct ControllerArgs {
    /// Seconds before retrying a failed reconcile pass
    #[arg(long, env = "APOLLO_ERROR_REQUEUE_SECS", default_value_t = 5)]
    error_requeue_secs: u64,

    /// Seconds between successful reconcile passes
    #[arg(long, env = "APOLLO_RESYNC_SECS", default_value_t = 10)]
    resync_secs: u64,

    /// Leave CRD installation to the deployment tooling
    #[arg(long, env = "APOLLO_SKIP_CRD_INSTALL")]
    skip_crd_install: bool,
}

impl ControllerArgs {
    fn requeue_policy(&self) -> RequeuePolicy {
        RequeuePolicy {
            error: Duration::from_secs(self.error_requeue_secs),
            resync: Duration::from_secs(self.resync_secs),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        print!("{}", crds_yaml()?);
        return Ok(());
    }

    init_telemetry(TelemetryConfig::default())
        .map_err(|e| anyhow::anyhow!("failed to initialize telemetry: {}", e))?;

    let args = match cli.command {
        Some(Commands::Controller(args)) => args,
        None => cli.controller,
    };
    run_controller(args).await
}

async fn run_controller(args: ControllerArgs) -> anyhow::Result<()> {
    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("failed to create kube client: {}", e))?;

    if args.skip_crd_install {
        tracing::info!("skipping CRD installation");
    } else {
        ensure_crds_installed(&client).await?;
    }

    let requeue = args.requeue_policy();
    tracing::info!(
        error_requeue_secs = requeue.error.as_secs(),
        resync_secs = requeue.resync.as_secs(),
        "starting controllers"
    );
    let ctx = Arc::new(Context::from_client(client.clone(), requeue));

    futures::future::join_all(build_instance_controllers(client, ctx)).await;

    tracing::info!("controllers stopped");
    Ok(())
}
