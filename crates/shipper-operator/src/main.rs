//! Shipper operator - progressive delivery across many clusters

use clap::Parser;
use tracing::info;

use shipper_common::kube_utils::create_client;
use shipper_common::telemetry::{init_logging, LoggingConfig};
use shipper_operator::cli::{Cli, Commands, ControllerArgs};
use shipper_operator::controller_runner::build_release_controller;
use shipper_operator::crds::{ensure_crds_installed, render_crds};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        let yaml = render_crds().map_err(|e| anyhow::anyhow!("failed to render CRDs: {}", e))?;
        print!("{yaml}");
        return Ok(());
    }

    init_logging(LoggingConfig {
        format: cli.log_format.into(),
        ..LoggingConfig::default()
    })?;

    match cli.command {
        Some(Commands::Controller(args)) => run_controller(args).await,
        None => run_controller(ControllerArgs::parse_from(["controller"])).await,
    }
}

async fn run_controller(args: ControllerArgs) -> anyhow::Result<()> {
    let client = create_client(args.kubeconfig.as_deref(), args.context.as_deref()).await?;

    if args.skip_crd_install {
        info!("skipping CRD installation");
    } else {
        ensure_crds_installed(&client).await?;
    }

    build_release_controller(client, args.namespace.clone(), args.controller_config()).await;
    info!("Release controller stopped");
    Ok(())
}
