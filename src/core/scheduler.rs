use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{interval, interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::core::config::{AppConfig, ConfigError};
use crate::core::store::{ProviderReport, UsageStore};

const COMMAND_CAPACITY: usize = 16;

/// Requests from the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    RefreshNow,
    CredentialsChanged,
    Stop,
}

/// Produces the configuration for the next cycle.
pub type ConfigLoader = Arc<dyn Fn() -> Result<AppConfig, ConfigError> + Send + Sync>;

/// Loader reading the user's config file.
pub fn file_loader() -> ConfigLoader {
    Arc::new(AppConfig::load)
}

#[derive(Clone)]
pub struct SchedulerHandle {
    commands: mpsc::Sender<Command>,
    reports: watch::Receiver<Arc<Vec<ProviderReport>>>,
}

impl SchedulerHandle {
    /// Returns false once the scheduler has stopped.
    pub async fn send(&self, command: Command) -> bool {
        self.commands.send(command).await.is_ok()
    }

    pub async fn refresh_now(&self) -> bool {
        self.send(Command::RefreshNow).await
    }

    pub async fn credentials_changed(&self) -> bool {
        self.send(Command::CredentialsChanged).await
    }

    pub async fn stop(&self) -> bool {
        self.send(Command::Stop).await
    }

    /// Rows for the enabled providers, republished after every cycle.
    pub fn reports(&self) -> watch::Receiver<Arc<Vec<ProviderReport>>> {
        self.reports.clone()
    }
}

/// Single owner of the [`UsageStore`]: serializes periodic and manual
/// refreshes so no two cycles ever overlap.
pub struct Scheduler {
    store: UsageStore,
    load_config: ConfigLoader,
    config: AppConfig,
    commands: mpsc::Receiver<Command>,
    reports: watch::Sender<Arc<Vec<ProviderReport>>>,
}

fn ticker(period: Duration, first: Instant) -> Interval {
    let mut ticker = interval_at(first, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

impl Scheduler {
    pub fn new(store: UsageStore, load_config: ConfigLoader) -> (Self, SchedulerHandle) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (report_tx, report_rx) = watch::channel(Arc::new(Vec::new()));
        let scheduler = Self {
            store,
            load_config,
            config: AppConfig::default(),
            commands: command_rx,
            reports: report_tx,
        };
        let handle = SchedulerHandle {
            commands: command_tx,
            reports: report_rx,
        };
        (scheduler, handle)
    }

    /// Re-read configuration, keeping the previous one if it cannot be loaded.
    fn reload(&mut self) {
        match (self.load_config)() {
            Ok(config) => self.config = config,
            Err(e) => warn!(error = %e, "config reload failed, keeping previous settings"),
        }
    }

    fn publish(&self) {
        let rows = self.store.report(&self.config.enabled_providers());
        self.reports.send_replace(Arc::new(rows));
    }

    async fn refresh(&mut self) {
        self.store.refresh(&self.config).await;
        self.publish();
    }

    /// Run until `Stop` arrives or every handle is dropped. The first cycle
    /// starts immediately. Returns the store so callers can inspect the
    /// final state.
    pub async fn run(mut self) -> UsageStore {
        self.reload();
        let mut period = self.config.refresh_interval();
        let mut ticks = interval(period);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(interval_secs = period.as_secs(), "scheduler started");

        loop {
            tokio::select! {
                biased;
                _ = ticks.tick() => {
                    self.reload();
                    let latest = self.config.refresh_interval();
                    if latest != period {
                        info!(
                            from_secs = period.as_secs(),
                            to_secs = latest.as_secs(),
                            "refresh interval changed, rescheduling"
                        );
                        period = latest;
                        ticks = ticker(period, Instant::now() + period);
                        continue;
                    }
                    debug!("scheduled refresh");
                    self.refresh().await;
                }
                command = self.commands.recv() => match command {
                    Some(Command::RefreshNow) => {
                        debug!("manual refresh");
                        self.reload();
                        self.refresh().await;
                    }
                    Some(Command::CredentialsChanged) => {
                        self.reload();
                        self.store.credentials_changed(&self.config).await;
                        self.publish();
                    }
                    Some(Command::Stop) | None => break,
                },
            }
        }

        info!("scheduler stopped");
        self.store
    }
}
