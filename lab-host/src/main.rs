//! lab-host
//!
//! Plans and starts plugin graphs described by a TOML manifest:
//! - `plan`: print the activation order
//! - `start`: run auto-start (and optionally deferred restore), print a report

use anyhow::Result;
use clap::Parser;
use serde_json::json;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::info;

use lab_core::HostConfig;
use lab_plugins::PluginHost;

mod manifest;

use manifest::Manifest;

#[derive(Parser, Debug)]
#[command(name = "lab-host")]
#[command(about = "Dependency-resolving plugin host")]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Host configuration file (TOML); defaults to LAB_* environment variables
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Print the activation order for the given plugins
    Plan {
        /// Plugin manifest
        #[arg(long)]
        manifest: PathBuf,

        /// Plugins to plan for (default: every auto-start plugin)
        ids: Vec<String>,
    },
    /// Activate auto-start plugins and print the outcome
    Start {
        /// Plugin manifest
        #[arg(long)]
        manifest: PathBuf,

        /// Also activate deferred plugins once startup settles
        #[arg(long)]
        restore: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment from /etc/lab-host/environment (if exists)
    lab_core::config::load_environment();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("lab_host=info".parse()?)
                .add_directive("lab_plugins=info".parse()?)
                .add_directive("lab_core=info".parse()?),
        )
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => HostConfig::from_file(path)?,
        None => HostConfig::from_env(),
    };

    match args.command {
        Commands::Plan { manifest, ids } => {
            let manifest = Manifest::load(&manifest)?;
            let ids = if ids.is_empty() {
                manifest.auto_start_ids()
            } else {
                ids
            };
            let host = manifest.into_host(config)?;

            let plan = host.plan_for(&ids)?;
            println!("{}", serde_json::to_string_pretty(&json!({ "plan": plan }))?);
        }
        Commands::Start { manifest, restore } => {
            let host = Manifest::load(&manifest)?.into_host(config)?;
            info!("Loaded {} plugins from {:?}", host.list_plugins().len(), manifest);

            let report = host.start().await;
            let restored = if restore {
                Some(host.restore_deferred().await.summary())
            } else {
                None
            };

            let output = json!({
                "start": report.summary(),
                "restored": restored,
                "disabled": host.disabled_plugins(),
                "states": plugin_states(&host),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

fn plugin_states(host: &PluginHost) -> BTreeMap<String, String> {
    host.list_plugins()
        .into_iter()
        .filter_map(|id| {
            let state = host.plugin_state(&id)?;
            Some((id, state.to_string()))
        })
        .collect()
}
