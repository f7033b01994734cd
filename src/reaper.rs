use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::configuration::Config;
use crate::container_management::runtime::ContainerRuntime;
use crate::registry::{ContainerKind, ContainerRecord, ContainerStatus, Registry};
use crate::teardown::Teardown;

#[derive(Debug, Clone)]
pub struct ReaperSettings {
    pub interval: Duration,
    /// How long a record may go without a successful runtime check.
    pub stale_after: chrono::Duration,
    /// Age past which an execution record can no longer belong to a live run.
    pub execution_max_age: chrono::Duration,
}

impl ReaperSettings {
    pub fn from_config(config: &Config) -> Self {
        let execution_secs = config
            .execution
            .timeout_secs
            .saturating_add(config.execution.install_timeout_secs)
            .saturating_add(config.reaper.execution_grace_secs);
        Self {
            interval: Duration::from_secs(config.reaper.interval_secs),
            stale_after: seconds(config.reaper.stale_after_secs),
            execution_max_age: seconds(execution_secs),
        }
    }
}

/// Seconds as a signed age, saturating instead of wrapping negative.
fn seconds(secs: u64) -> chrono::Duration {
    i64::try_from(secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .unwrap_or(chrono::Duration::MAX)
}

/// What one sweep did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub checked: usize,
    /// Past their expiry.
    pub expired: usize,
    /// Container gone or exited behind our back.
    pub vanished: usize,
    /// Not verifiable for too long, or leaked execution records.
    pub stale: usize,
    /// Records whose container or record removal failed. They are still dropped when possible.
    pub failed_cleanup: usize,
    /// Records already terminal when the sweep found them.
    pub purged_terminal: usize,
}

impl SweepReport {
    pub fn reaped(&self) -> usize {
        self.expired + self.vanished + self.stale + self.purged_terminal
    }
}

enum Verdict {
    Keep,
    Expired,
    Vanished,
    Stale,
    Purge,
}

/// Background reconciliation of the registry against the clock and the engine.
pub struct Reaper {
    registry: Arc<Registry>,
    runtime: Arc<dyn ContainerRuntime>,
    teardown: Teardown,
    settings: ReaperSettings,
}

impl Reaper {
    pub fn new(teardown: Teardown, settings: ReaperSettings) -> Self {
        Self {
            registry: teardown.registry.clone(),
            runtime: teardown.runtime.clone(),
            teardown,
            settings,
        }
    }

    pub async fn sweep(&self) -> SweepReport {
        self.sweep_at(Utc::now()).await
    }

    /// One pass over every record, judged against `now`.
    ///
    /// A failure on one record is logged and counted; the sweep goes on.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();

        for record in self.registry.list(None).await {
            report.checked += 1;
            let verdict = self.judge(&record, now).await;
            let next_status = match verdict {
                Verdict::Keep => continue,
                Verdict::Purge => {
                    report.purged_terminal += 1;
                    None
                }
                Verdict::Expired => {
                    report.expired += 1;
                    Some(ContainerStatus::Expired)
                }
                Verdict::Vanished => {
                    report.vanished += 1;
                    Some(ContainerStatus::Failed)
                }
                Verdict::Stale => {
                    report.stale += 1;
                    Some(ContainerStatus::Failed)
                }
            };

            let record = match next_status {
                Some(status) => match self.registry.set_status(&record.id, status).await {
                    Ok(updated) => {
                        info!("Reaping {} as {:?}", updated.id, status);
                        updated
                    }
                    Err(e) => {
                        // Raced with a stop or lost the record; still make sure nothing leaks.
                        debug!("Status update of {} skipped: {}", record.id, e);
                        record
                    }
                },
                None => record,
            };

            if !self.teardown.retire(&record).await {
                report.failed_cleanup += 1;
            }
        }

        if report.reaped() > 0 || report.failed_cleanup > 0 {
            info!(
                "Sweep done: {} checked, {} expired, {} vanished, {} stale, {} purged, {} cleanup failures",
                report.checked,
                report.expired,
                report.vanished,
                report.stale,
                report.purged_terminal,
                report.failed_cleanup
            );
        } else {
            debug!("Sweep done: {} checked, nothing to reap", report.checked);
        }
        report
    }

    async fn judge(&self, record: &ContainerRecord, now: DateTime<Utc>) -> Verdict {
        if record.status.is_terminal() {
            return Verdict::Purge;
        }

        if record.kind == ContainerKind::Execution {
            // Owned by an in-flight run until it is older than any run could be.
            return if now - record.created_at > self.settings.execution_max_age {
                warn!("Execution record {} outlived its run, reaping", record.id);
                Verdict::Stale
            } else {
                Verdict::Keep
            };
        }

        if record.is_expired_at(now) {
            return Verdict::Expired;
        }

        let Some(runtime_id) = &record.runtime_id else {
            // Still being created, unless it has been that way for too long.
            return if now - record.created_at > self.settings.stale_after {
                Verdict::Stale
            } else {
                Verdict::Keep
            };
        };

        match self.runtime.inspect(runtime_id).await {
            Ok(Some(state)) if state.has_exited() => {
                warn!(
                    "Container {} of {} exited (code {:?})",
                    runtime_id, record.id, state.exit_code
                );
                Verdict::Vanished
            }
            Ok(Some(_)) => {
                if let Err(e) = self
                    .registry
                    .update(&record.id, |r| r.last_checked_at = now)
                    .await
                {
                    debug!("Could not record check of {}: {}", record.id, e);
                }
                Verdict::Keep
            }
            Ok(None) => {
                warn!("Container {} of {} no longer exists", runtime_id, record.id);
                Verdict::Vanished
            }
            Err(e) => {
                if now - record.last_checked_at > self.settings.stale_after {
                    warn!(
                        "{} unverifiable since {}, reaping: {}",
                        record.id, record.last_checked_at, e
                    );
                    Verdict::Stale
                } else {
                    debug!("Could not inspect {} this sweep: {}", record.id, e);
                    Verdict::Keep
                }
            }
        }
    }

    /// Runs sweeps on the configured interval until the handle is shut down.
    pub fn spawn(self: Arc<Self>) -> ReaperHandle {
        let (shutdown, mut signal) = watch::channel(false);
        let interval = self.settings.interval;
        info!("Reaper running every {:?}", interval);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.sweep().await;
                    }
                    changed = signal.changed() => {
                        if changed.is_err() || *signal.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("Reaper stopped");
        });

        ReaperHandle { shutdown, task }
    }
}

pub struct ReaperHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ReaperHandle {
    /// Signals the loop and waits for the sweep in progress, if any, to finish.
    pub async fn shutdown(self) {
        if self.shutdown.send(true).is_err() {
            debug!("Reaper loop already gone");
        }
        if let Err(e) = self.task.await {
            warn!("Reaper task ended abnormally: {}", e);
        }
    }
}
