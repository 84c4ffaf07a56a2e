use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, TimeZone, Utc};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::bans::BanService;
use crate::config::SchedulerConfig;
use crate::db::{DatabaseError, SchedulerStateStore};
use crate::numbering::NumberingAuthority;
use crate::platform::ChatPlatform;
use crate::reconcile::Reconciler;

pub const BAN_SWEEP_TASK: &str = "ban_sweep";
pub const NIGHTLY_TASK: &str = "nightly_maintenance";

/// Owns the periodic work: the ban-expiry sweep and the nightly
/// maintenance pass. Each task's enabled/paused intent is persisted so
/// an operator pause survives a restart; a task with no stored row is
/// enabled.
pub struct Scheduler {
    bans: Arc<BanService>,
    reconciler: Arc<Reconciler>,
    numbering: Arc<NumberingAuthority>,
    platform: Arc<dyn ChatPlatform>,
    state: Arc<dyn SchedulerStateStore>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(
        bans: Arc<BanService>,
        reconciler: Arc<Reconciler>,
        numbering: Arc<NumberingAuthority>,
        platform: Arc<dyn ChatPlatform>,
        state: Arc<dyn SchedulerStateStore>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            bans,
            reconciler,
            numbering,
            platform,
            state,
            config,
        }
    }

    pub async fn pause(&self, task: &str) -> Result<(), DatabaseError> {
        info!(task, "scheduler task paused");
        self.state.set(task, false).await
    }

    pub async fn resume(&self, task: &str) -> Result<(), DatabaseError> {
        info!(task, "scheduler task resumed");
        self.state.set(task, true).await
    }

    pub async fn is_enabled(&self, task: &str) -> Result<bool, DatabaseError> {
        Ok(self
            .state
            .get(task)
            .await?
            .map(|s| s.is_running)
            .unwrap_or(true))
    }

    /// Startup pass: one full reconciliation when configured, so drift
    /// accumulated while the process was down is repaired before live
    /// events build on it.
    pub async fn startup(&self) {
        if !self.config.reconcile_on_startup {
            return;
        }
        info!("startup reconciliation");
        match self.reconciler.full_scan().await {
            Ok(report) if !report.complete => {
                warn!(
                    failed = report.threads_failed,
                    "startup reconciliation did not complete"
                );
            }
            Ok(_) => {}
            Err(e) => error!(error = %e, "startup reconciliation failed"),
        }
    }

    /// One ban-sweep tick. Split out of the loop so it can run on
    /// demand.
    pub async fn sweep_tick(&self) -> Result<usize, DatabaseError> {
        if !self.is_enabled(BAN_SWEEP_TASK).await? {
            return Ok(0);
        }
        self.bans.sweep_expired().await
    }

    /// The nightly pass: reconcile the vote ledger, then repair the
    /// numbering sequence, then archive idle threads. Each stage's
    /// failure is logged and the next stage still runs.
    pub async fn run_maintenance(&self) {
        match self.reconciler.full_scan().await {
            Ok(report) if !report.complete => {
                warn!(
                    failed = report.threads_failed,
                    "maintenance reconciliation did not complete"
                );
            }
            Ok(_) => {}
            Err(e) => error!(error = %e, "maintenance reconciliation failed"),
        }

        match self.numbering.repair_gaps(self.platform.as_ref()).await {
            Ok(renumbered) if renumbered > 0 => {
                info!(renumbered, "maintenance renumbered threads");
            }
            Ok(_) => {}
            Err(e) => error!(error = %e, "maintenance gap repair failed"),
        }

        match self.reconciler.archive_idle_threads(&self.config).await {
            Ok(archived) if archived > 0 => info!(archived, "maintenance archived idle threads"),
            Ok(_) => {}
            Err(e) => error!(error = %e, "idle thread archival failed"),
        }
    }

    /// Spawns the two long-running loops. Dropping the handles aborts
    /// nothing; the caller aborts them on shutdown.
    pub fn spawn(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        vec![self.clone().spawn_ban_sweep(), self.clone().spawn_nightly()]
    }

    fn spawn_ban_sweep(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let period = Duration::from_secs(self.config.ban_sweep_interval_secs);
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match self.sweep_tick().await {
                    Ok(lifted) if lifted > 0 => info!(lifted, "ban sweep lifted expired bans"),
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "ban sweep failed"),
                }
            }
        })
    }

    fn spawn_nightly(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let wait = until_next_run(Utc::now(), self.config.nightly_hour);
                info!(wait_secs = wait.as_secs(), "nightly maintenance scheduled");
                tokio::time::sleep(wait).await;
                match self.is_enabled(NIGHTLY_TASK).await {
                    Ok(true) => self.run_maintenance().await,
                    Ok(false) => info!("nightly maintenance is paused, skipping"),
                    Err(e) => warn!(error = %e, "could not read nightly task state"),
                }
            }
        })
    }
}

/// Time until the next occurrence of `hour`:00 UTC, strictly in the
/// future so a run at exactly that hour waits a full day.
fn until_next_run(now: DateTime<Utc>, hour: u32) -> Duration {
    let today_run = Utc
        .with_ymd_and_hms(
            now.year(),
            now.month(),
            now.day(),
            hour,
            0,
            0,
        )
        .single()
        .unwrap_or(now);
    let next = if today_run > now {
        today_run
    } else {
        today_run + chrono::Duration::days(1)
    };
    (next - now).to_std().unwrap_or(Duration::ZERO)
}
