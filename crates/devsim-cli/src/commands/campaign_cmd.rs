use super::{interrupted, SimulatorArgs};
use anyhow::{Context, Result};
use clap::Args;
use mqtt5_devsim::{
    Campaign, CampaignController, CampaignReport, MockNetwork, MqttTransportFactory,
    SimulatorConfig, TransportFactory,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Args)]
pub struct CampaignCommand {
    #[command(flatten)]
    pub sim: SimulatorArgs,

    /// Temperature sensors per run
    #[arg(long)]
    pub devices: Option<usize>,

    /// Length of each run in seconds
    #[arg(long)]
    pub run_duration: Option<u64>,

    /// Pause after the divider and between runs, in seconds
    #[arg(long)]
    pub settle: Option<u64>,

    /// Message counter value that ends the campaign
    #[arg(long)]
    pub target: Option<u64>,
}

fn resolve(cmd: &CampaignCommand) -> Result<SimulatorConfig> {
    let mut config = cmd.sim.resolve()?;
    if let Some(devices) = cmd.devices {
        config.campaign.device_count = devices;
    }
    if let Some(secs) = cmd.run_duration {
        config.campaign.run_duration_secs = secs;
    }
    if let Some(secs) = cmd.settle {
        config.campaign.settle_secs = secs;
    }
    if let Some(target) = cmd.target {
        config.campaign.message_target = target;
    }
    Ok(config)
}

pub async fn execute(cmd: CampaignCommand) -> Result<()> {
    let config = resolve(&cmd)?;
    let campaign_config = config.campaign_config();
    let campaign = Campaign::escalating(&campaign_config).context("Invalid campaign")?;

    info!(
        runs = campaign.len(),
        devices = campaign_config.device_count,
        broker = %config.endpoint().url(),
        "Starting campaign"
    );

    let report = if cmd.sim.dry_run {
        info!("Dry run, using in-memory transport");
        run_campaign(Arc::new(MockNetwork::new()), &config, campaign, campaign_config.settle).await
    } else {
        run_campaign(Arc::new(MqttTransportFactory), &config, campaign, campaign_config.settle)
            .await
    };

    print_summary(&report);
    Ok(())
}

async fn run_campaign<F: TransportFactory>(
    factory: Arc<F>,
    config: &SimulatorConfig,
    campaign: Campaign,
    settle: Duration,
) -> CampaignReport {
    let controller = CampaignController::new(
        factory,
        Arc::new(config.device_settings()),
        config.main_topic.clone(),
        campaign,
        settle,
    );
    controller.run(interrupted()).await
}

fn print_summary(report: &CampaignReport) {
    println!("{:>5} {:>8} {:>12} {:>10} {:>9}", "run", "devices", "interval", "published", "failed");
    for run in &report.runs {
        println!(
            "{:>5} {:>8} {:>12} {:>10} {:>9}",
            run.index + 1,
            run.config.device_count,
            format!("{:?}", run.config.publish_interval),
            run.published(),
            run.publish_failures(),
        );
    }
    if report.interrupted {
        println!("campaign interrupted after {} run(s)", report.runs.len());
    }
    println!("total published: {}", report.published());
}
