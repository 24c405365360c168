//! Load-test campaign
//!
//! A campaign is an ordered list of runs with escalating publish rates. Each
//! run spawns one divider device, which publishes a single reading to mark the
//! run boundary on the broker side, then a fixed set of temperature sensors
//! publishing at the run's interval. When the run window closes the sensors
//! are stopped and drained before the next run starts. After the last run the
//! controller idles until the shutdown future resolves.

use crate::device::{DeviceReport, DeviceSettings};
use crate::error::{Result, SimError};
use crate::profile::DeviceProfile;
use crate::runner::Runner;
use crate::transport::TransportFactory;
use crate::types::IntervalPolicy;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

pub const DIVIDER_ID: &str = "DIVIDER";

/// Longest campaign [`Campaign::escalating`] will build
pub const MAX_RUNS: usize = 100_000;

/// One element of a campaign
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunConfig {
    pub device_count: usize,
    pub publish_interval: Duration,
    pub duration: Duration,
}

impl RunConfig {
    /// Messages the sensors of this run should publish if nothing fails
    #[must_use]
    pub fn expected_messages(&self) -> u64 {
        if self.publish_interval.is_zero() {
            return 0;
        }
        let per_device = self.duration.as_secs_f64() / self.publish_interval.as_secs_f64();
        // truncation is fine for a log estimate
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let per_device = per_device.floor() as u64;
        per_device * self.device_count as u64
    }
}

/// Parameters of an escalating campaign
#[derive(Debug, Clone, PartialEq)]
pub struct CampaignConfig {
    pub device_count: usize,
    /// Publishes per second per sensor in the first run
    pub initial_rate: u32,
    /// Added to the rate after every run
    pub rate_step: u32,
    /// Message counter at the start of the campaign
    pub message_floor: u64,
    /// The campaign ends once the counter reaches this value
    pub message_target: u64,
    /// Counter increment per run
    pub message_step: u64,
    pub run_duration: Duration,
    /// Pause after the divider and after every run
    pub settle: Duration,
}

impl Default for CampaignConfig {
    fn default() -> Self {
        Self {
            device_count: 10,
            initial_rate: 1,
            rate_step: 1,
            message_floor: 40,
            message_target: 10_000,
            message_step: 10,
            run_duration: Duration::from_secs(60),
            settle: Duration::from_secs(10),
        }
    }
}

/// Ordered sequence of runs, each heavier than the last
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Campaign {
    runs: Vec<RunConfig>,
}

impl Campaign {
    #[must_use]
    pub fn new(runs: Vec<RunConfig>) -> Self {
        Self { runs }
    }

    /// Expands a config into its runs
    ///
    /// # Errors
    ///
    /// Returns the same errors as [`Campaign::planned_runs`]
    pub fn escalating(config: &CampaignConfig) -> Result<Self> {
        let count = Self::planned_runs(config)?;
        let mut runs = Vec::with_capacity(count);
        let mut rate = config.initial_rate;
        for _ in 0..count {
            runs.push(RunConfig {
                device_count: config.device_count,
                publish_interval: Duration::from_secs_f64(1.0 / f64::from(rate)),
                duration: config.run_duration,
            });
            rate = rate.saturating_add(config.rate_step);
        }
        Ok(Self { runs })
    }

    /// Number of runs needed to move the counter from floor to target
    ///
    /// # Errors
    ///
    /// Returns [`SimError::Config`] for a zero step or rate, or when the
    /// campaign would exceed [`MAX_RUNS`]
    pub fn planned_runs(config: &CampaignConfig) -> Result<usize> {
        if config.message_step == 0 {
            return Err(SimError::Config("message_step must be positive".to_string()));
        }
        if config.initial_rate == 0 {
            return Err(SimError::Config("initial_rate must be positive".to_string()));
        }

        let span = config.message_target.saturating_sub(config.message_floor);
        let count = span.div_ceil(config.message_step);
        match usize::try_from(count) {
            Ok(count) if count <= MAX_RUNS => Ok(count),
            _ => Err(SimError::Config(format!(
                "campaign of {count} runs exceeds the limit of {MAX_RUNS}"
            ))),
        }
    }

    #[must_use]
    pub fn runs(&self) -> &[RunConfig] {
        &self.runs
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.runs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub index: usize,
    pub config: RunConfig,
    pub devices: Vec<DeviceReport>,
}

impl RunReport {
    #[must_use]
    pub fn published(&self) -> u64 {
        self.devices.iter().map(|d| d.stats.published).sum()
    }

    #[must_use]
    pub fn publish_failures(&self) -> u64 {
        self.devices.iter().map(|d| d.stats.publish_failures).sum()
    }

    #[must_use]
    pub fn unreachable(&self) -> usize {
        self.devices
            .iter()
            .filter(|d| d.connect_error.is_some())
            .count()
    }
}

#[derive(Debug, Clone, Default)]
pub struct CampaignReport {
    pub runs: Vec<RunReport>,
    /// True if the shutdown future fired before the last run completed
    pub interrupted: bool,
}

impl CampaignReport {
    #[must_use]
    pub fn published(&self) -> u64 {
        self.runs.iter().map(RunReport::published).sum()
    }
}

pub struct CampaignController<F: TransportFactory> {
    factory: Arc<F>,
    settings: Arc<DeviceSettings>,
    main_topic: String,
    campaign: Campaign,
    settle: Duration,
}

impl<F: TransportFactory> CampaignController<F> {
    pub fn new(
        factory: Arc<F>,
        settings: Arc<DeviceSettings>,
        main_topic: impl Into<String>,
        campaign: Campaign,
        settle: Duration,
    ) -> Self {
        Self {
            factory,
            settings,
            main_topic: main_topic.into(),
            campaign,
            settle,
        }
    }

    /// Drives every run, then idles until `shutdown` resolves
    ///
    /// If `shutdown` resolves mid-run, the current run is stopped and drained
    /// and the remaining runs are skipped.
    #[instrument(skip_all, fields(runs = self.campaign.len()))]
    pub async fn run<S>(&self, shutdown: S) -> CampaignReport
    where
        S: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut report = CampaignReport::default();

        for (index, config) in self.campaign.runs().iter().enumerate() {
            info!(
                run = index + 1,
                devices = config.device_count,
                interval = ?config.publish_interval,
                expected_messages = config.expected_messages(),
                "Starting evaluation run"
            );

            let runner = Runner::new(Arc::clone(&self.factory), Arc::clone(&self.settings));
            let mut handles =
                vec![runner.spawn(DeviceProfile::Divider.spec(&self.main_topic, DIVIDER_ID))];

            let mut interrupted = tokio::select! {
                () = tokio::time::sleep(self.settle) => false,
                () = &mut shutdown => true,
            };

            if !interrupted {
                for n in 1..=config.device_count {
                    let spec = DeviceProfile::TemperatureSensor
                        .spec(&self.main_topic, format!("temperature-sensor{n}"))
                        .with_interval(IntervalPolicy::Fixed(config.publish_interval));
                    handles.push(runner.spawn(spec));
                }

                interrupted = tokio::select! {
                    () = tokio::time::sleep(config.duration) => false,
                    () = &mut shutdown => true,
                };
            }

            let devices = runner.shutdown(handles).await;
            let run = RunReport {
                index,
                config: *config,
                devices,
            };
            info!(
                run = index + 1,
                published = run.published(),
                failures = run.publish_failures(),
                unreachable = run.unreachable(),
                "Evaluation run finished"
            );
            report.runs.push(run);

            if interrupted {
                warn!(run = index + 1, "Campaign interrupted");
                report.interrupted = true;
                return report;
            }

            let is_last = index + 1 == self.campaign.len();
            if !is_last {
                let interrupted = tokio::select! {
                    () = tokio::time::sleep(self.settle) => false,
                    () = &mut shutdown => true,
                };
                if interrupted {
                    warn!(run = index + 1, "Campaign interrupted");
                    report.interrupted = true;
                    return report;
                }
            }
        }

        info!(
            published = report.published(),
            "Campaign complete, idling until interrupted"
        );
        shutdown.await;
        info!("Unsubscribing and disconnecting clients");
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_campaign_matches_sweep() {
        let campaign = Campaign::escalating(&CampaignConfig::default()).unwrap();
        // 40 -> 10000 in steps of 10
        assert_eq!(campaign.len(), 996);

        let first = campaign.runs()[0];
        assert_eq!(first.device_count, 10);
        assert_eq!(first.publish_interval, Duration::from_secs(1));
        assert_eq!(first.duration, Duration::from_secs(60));
        assert_eq!(campaign.runs()[1].publish_interval, Duration::from_millis(500));
        assert_eq!(first.expected_messages(), 600);
    }

    #[test]
    fn test_runs_escalate() {
        let campaign = Campaign::escalating(&CampaignConfig {
            message_floor: 0,
            message_target: 50,
            ..CampaignConfig::default()
        })
        .unwrap();

        assert_eq!(campaign.len(), 5);
        for pair in campaign.runs().windows(2) {
            assert!(pair[1].publish_interval < pair[0].publish_interval);
            assert_eq!(pair[1].device_count, pair[0].device_count);
        }
    }

    #[test]
    fn test_target_already_reached_yields_no_runs() {
        let campaign = Campaign::escalating(&CampaignConfig {
            message_floor: 100,
            message_target: 100,
            ..CampaignConfig::default()
        })
        .unwrap();
        assert!(campaign.is_empty());
    }

    #[test]
    fn test_huge_step_does_not_overflow() {
        let campaign = Campaign::escalating(&CampaignConfig {
            message_floor: 0,
            message_target: u64::MAX,
            message_step: u64::MAX / 2 + 1,
            ..CampaignConfig::default()
        })
        .unwrap();
        assert_eq!(campaign.len(), 2);
    }

    #[test]
    fn test_oversized_campaign_rejected() {
        let config = CampaignConfig {
            message_target: 1_000_000_000_000,
            ..CampaignConfig::default()
        };
        assert!(matches!(
            Campaign::planned_runs(&config),
            Err(SimError::Config(_))
        ));
        assert!(Campaign::escalating(&config).is_err());

        let at_limit = CampaignConfig {
            message_floor: 0,
            message_target: MAX_RUNS as u64,
            message_step: 1,
            ..CampaignConfig::default()
        };
        assert_eq!(Campaign::planned_runs(&at_limit).unwrap(), MAX_RUNS);
    }

    #[test]
    fn test_invalid_configs_rejected() {
        for config in [
            CampaignConfig {
                message_step: 0,
                ..CampaignConfig::default()
            },
            CampaignConfig {
                initial_rate: 0,
                ..CampaignConfig::default()
            },
        ] {
            assert!(matches!(
                Campaign::escalating(&config),
                Err(SimError::Config(_))
            ));
        }
    }
}
