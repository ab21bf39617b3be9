mod commands;
mod utils;

use clap::{Parser, Subcommand};
use colored::Colorize;
use lambdaflow_config::{ENV_FILE_ENV, MANIFEST_ENV, Project};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lflow")]
#[command(about = "Deploy a Python MCP server to AWS Lambda from lambdaflow.kdl", long_about = None)]
struct Cli {
    /// Manifest to use instead of searching the current directory
    #[arg(long, global = true, env = MANIFEST_ENV)]
    manifest: Option<PathBuf>,

    /// Environment file (default: .env next to the manifest)
    #[arg(long, global = true, env = ENV_FILE_ENV)]
    env_file: Option<PathBuf>,

    /// AWS region, overrides the manifest and AWS_REGION in the environment file
    #[arg(long, global = true)]
    region: Option<String>,

    /// AWS profile from the shared config files
    #[arg(long, global = true, env = "AWS_PROFILE")]
    profile: Option<String>,

    /// More log output (-v: debug, -vv: trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Package and deploy every declared resource
    Deploy {
        /// Publish a new layer version even if LAYER_ARN is already set
        #[arg(long)]
        publish_layer: bool,

        /// Accept an existing table whose key schema differs from the manifest
        #[arg(long)]
        allow_schema_drift: bool,
    },
    /// Show what deploy would change without changing anything
    Plan {
        /// Accept an existing table whose key schema differs from the manifest
        #[arg(long)]
        allow_schema_drift: bool,
    },
    /// Build the function and layer archives locally
    Package {
        /// Output directory
        #[arg(short, long, default_value = "dist")]
        out: PathBuf,

        /// Skip the layer archive
        #[arg(long)]
        no_layer: bool,
    },
    /// Publish a new layer version and record it in the environment file
    PublishLayer,
    /// Delete every item of the session table
    WipeTable {
        /// Confirm the deletion
        #[arg(short, long)]
        yes: bool,
    },
    /// Check the manifest and print the deployment steps
    Validate,
    /// Show version information
    Version,
}

/// Connection settings shared by every remote command
pub struct Target {
    pub region: Option<String>,
    pub profile: Option<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!();
        eprintln!("{} {}", "Error:".red().bold(), utils::describe_error(&e));
        std::process::exit(1);
    }
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    // Version does not need a manifest
    if matches!(cli.command, Commands::Version) {
        println!("lflow {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let mut project = Project::load(cli.manifest.as_deref(), cli.env_file.as_deref())?;
    let target = Target {
        region: project.region(cli.region.as_deref()).map(str::to_string),
        profile: cli.profile,
    };

    match cli.command {
        Commands::Deploy {
            publish_layer,
            allow_schema_drift,
        } => {
            commands::deploy::handle(&mut project, &target, publish_layer, allow_schema_drift)
                .await?;
        }
        Commands::Plan { allow_schema_drift } => {
            commands::plan::handle(&project, &target, allow_schema_drift).await?;
        }
        Commands::Package { out, no_layer } => {
            commands::package::handle(&project, &out, !no_layer).await?;
        }
        Commands::PublishLayer => {
            commands::publish_layer::handle(&mut project, &target).await?;
        }
        Commands::WipeTable { yes } => {
            commands::wipe_table::handle(&project, &target, yes).await?;
        }
        Commands::Validate => {
            commands::validate::handle(&project)?;
        }
        Commands::Version => unreachable!("Version is handled before loading the project"),
    }

    Ok(())
}
