use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "devsim")]
#[command(about = "Simulated MQTT v5.0 device fleet for broker load testing")]
#[command(version)]
#[command(
    long_about = "Spawns simulated sensors and actuators against an MQTT broker, either as a free-running fleet or as an escalating load-test campaign."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a mixed fleet of devices until interrupted
    Fleet(commands::fleet_cmd::FleetCommand),
    /// Run the escalating load-test campaign
    Campaign(commands::campaign_cmd::CampaignCommand),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.debug {
        tracing::Level::DEBUG
    } else if cli.verbose {
        tracing::Level::INFO
    } else {
        tracing::Level::WARN
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Fleet(cmd) => commands::fleet_cmd::execute(cmd).await,
        Commands::Campaign(cmd) => commands::campaign_cmd::execute(cmd).await,
    }
}
