//! # cmsync - ConfigMap sync controller
//!
//! Entry point for the controller process.
//!
//! ## Initialization Sequence
//!
//! 1. **Tracing** - `RUST_LOG`-driven filter, plain or JSON output
//! 2. **Type Registry** - the kinds this process serves, built once
//! 3. **Configuration** - `CMSYNC_*` environment variables
//! 4. **Client** - in-cluster or kubeconfig credentials
//! 5. **Controller** - runs until SIGINT/SIGTERM
//!
//! Any failure during initialization halts startup with the failing step in
//! the error chain.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]
#![deny(clippy::expect_used)]

mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use cmsync_api::TypeRegistry;
use cmsync_reconciler::ControllerConfig;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let registry = TypeRegistry::with_defaults().context("Failed to register resource kinds")?;

    match cli.command {
        Commands::Run { namespace } => run(&registry, namespace).await,
        Commands::Crd => print_crds(&registry),
    }
}

/// Initialize the tracing subscriber.
fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| fmt::layer().json()))
        .with((!json).then(fmt::layer))
        .init();
}

async fn run(registry: &TypeRegistry, namespace: Option<String>) -> Result<()> {
    let mut config = ControllerConfig::from_env().context("Invalid CMSYNC_* configuration")?;
    if namespace.is_some() {
        config.watch_namespace = namespace;
    }

    let client = kube::Client::try_default()
        .await
        .context("Failed to create Kubernetes client. Check kubeconfig or in-cluster credentials")?;

    info!(version = env!("CARGO_PKG_VERSION"), "cmsync starting");
    cmsync_reconciler::run(client, registry, config)
        .await
        .context("Controller terminated with an error")?;
    info!("cmsync shutdown complete");
    Ok(())
}

fn print_crds(registry: &TypeRegistry) -> Result<()> {
    let manifests = registry
        .crds()
        .map(serde_yaml::to_string)
        .collect::<Result<Vec<_>, _>>()
        .context("Failed to render CustomResourceDefinition")?;
    println!("{}", manifests.join("---\n"));
    Ok(())
}
