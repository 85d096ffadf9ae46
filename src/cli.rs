//! CLI command definitions using clap.

use clap::{Parser, Subcommand};

/// cmsync - ConfigMap sync controller
#[derive(Parser, Debug)]
#[command(name = "cmsync")]
#[command(version)]
#[command(about = "Keeps ConfigMaps copied from a source namespace into a destination namespace")]
#[command(
    long_about = "cmsync watches ConfigMapSync resources and converges each destination ConfigMap to the data of its source. Runtime settings are read from CMSYNC_* environment variables."
)]
pub struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true, default_value_t = false)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the controller until interrupted
    Run {
        /// Only watch declarations in this namespace (overrides CMSYNC_WATCH_NAMESPACE)
        #[arg(short, long)]
        namespace: Option<String>,
    },

    /// Print the CustomResourceDefinitions served by this controller as YAML
    Crd,
}
