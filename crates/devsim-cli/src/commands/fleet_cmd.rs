use super::{interrupted, SimulatorArgs};
use anyhow::Result;
use clap::Args;
use mqtt5_devsim::{
    DeviceProfile, DeviceReport, DeviceSpec, MockNetwork, MqttTransportFactory, Runner,
    SimulatorConfig, TransportFactory,
};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Args)]
pub struct FleetCommand {
    #[command(flatten)]
    pub sim: SimulatorArgs,

    /// Device to spawn as PROFILE=ID (repeatable), e.g. door-actuator=d1.
    /// Without any, one device of every profile is spawned.
    #[arg(long = "device", short = 'd')]
    pub devices: Vec<DeviceArg>,

    /// Stop after this many seconds instead of waiting for Ctrl+C
    #[arg(long)]
    pub duration: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceArg {
    pub profile: DeviceProfile,
    pub id: String,
}

impl FromStr for DeviceArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (profile, id) = s
            .split_once('=')
            .ok_or_else(|| format!("expected PROFILE=ID, got '{s}'"))?;
        let id = id.trim();
        if id.is_empty() || id.contains(['/', '+', '#']) {
            return Err(format!("invalid device id '{id}'"));
        }
        Ok(Self {
            profile: profile.parse()?,
            id: id.to_string(),
        })
    }
}

fn default_fleet() -> Vec<DeviceArg> {
    DeviceProfile::ALL
        .into_iter()
        .filter(|p| *p != DeviceProfile::Divider)
        .map(|profile| DeviceArg {
            profile,
            id: format!("{profile}1"),
        })
        .collect()
}

fn build_specs(config: &SimulatorConfig, devices: Vec<DeviceArg>) -> Vec<DeviceSpec> {
    let devices = if devices.is_empty() {
        default_fleet()
    } else {
        devices
    };
    devices
        .into_iter()
        .map(|d| d.profile.spec(&config.main_topic, d.id))
        .collect()
}

pub async fn execute(cmd: FleetCommand) -> Result<()> {
    let config = cmd.sim.resolve()?;
    let specs = build_specs(&config, cmd.devices);
    let duration = cmd.duration.map(Duration::from_secs);

    let reports = if cmd.sim.dry_run {
        info!("Dry run, using in-memory transport");
        run_fleet(Arc::new(MockNetwork::new()), &config, specs, duration).await
    } else {
        run_fleet(Arc::new(MqttTransportFactory), &config, specs, duration).await
    };

    print_summary(&reports);
    Ok(())
}

async fn run_fleet<F: TransportFactory>(
    factory: Arc<F>,
    config: &SimulatorConfig,
    specs: Vec<DeviceSpec>,
    duration: Option<Duration>,
) -> Vec<DeviceReport> {
    let runner = Runner::new(factory, Arc::new(config.device_settings()));
    let handles: Vec<_> = specs.into_iter().map(|spec| runner.spawn(spec)).collect();
    info!(
        devices = handles.len(),
        broker = %config.endpoint().url(),
        "Fleet running"
    );

    match duration {
        Some(duration) => {
            tokio::select! {
                () = tokio::time::sleep(duration) => {}
                () = interrupted() => {}
            }
        }
        None => interrupted().await,
    }

    info!("Unsubscribing and disconnecting devices. This may take a while...");
    runner.shutdown(handles).await
}

fn print_summary(reports: &[DeviceReport]) {
    println!(
        "{:<24} {:>10} {:>9} {:>9} {:>9}",
        "device", "published", "failed", "commands", "rejected"
    );
    for report in reports {
        let note = report
            .connect_error
            .as_deref()
            .map(|e| format!("  ({e})"))
            .unwrap_or_default();
        println!(
            "{:<24} {:>10} {:>9} {:>9} {:>9}{note}",
            report.id,
            report.stats.published,
            report.stats.publish_failures,
            report.stats.commands_applied,
            report.stats.commands_rejected,
        );
    }
}
