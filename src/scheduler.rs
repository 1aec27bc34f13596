//! Cron-driven fetch cycle scheduling
//!
//! Standard 5-field cron expressions are accepted and normalized to the
//! 6-field form the `cron` crate expects by prepending a seconds field.
//!
//! With [`OverlapPolicy::Skip`] a trigger that fires while the previous cycle
//! is still fetching is dropped and logged. [`OverlapPolicy::Concurrent`] starts
//! another cycle alongside it.

use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use cron::Schedule;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::OverlapPolicy;
use crate::cycle::{CycleReport, FetchCycle};
use crate::error::{Error, Result};

/// Normalize a 5-field cron expression to 6-field by prepending "0 " for seconds
pub fn normalize_cron(expr: &str) -> String {
    let trimmed = expr.trim();
    if trimmed.split_whitespace().count() == 5 {
        format!("0 {}", trimmed)
    } else {
        trimmed.to_string()
    }
}

/// Parse a 5- or 6-field cron expression
pub fn parse_schedule(expr: &str) -> Result<Schedule> {
    Schedule::from_str(&normalize_cron(expr)).map_err(|e| {
        Error::config(
            "CRON_SCHEDULE",
            format!("invalid cron expression '{}': {}", expr, e),
        )
    })
}

/// What happened to a trigger
#[derive(Debug)]
pub enum TriggerOutcome {
    /// A cycle was spawned
    Started(JoinHandle<CycleReport>),
    /// The previous cycle was still running and the trigger was dropped
    Skipped,
}

/// Fires fetch cycles on a cron cadence
pub struct FetchScheduler {
    schedule: Schedule,
    cycle: Arc<FetchCycle>,
    policy: OverlapPolicy,
    /// Set while a cycle started under [`OverlapPolicy::Skip`] is running
    running: Arc<AtomicBool>,
}

impl FetchScheduler {
    /// Create a scheduler for a cron expression
    ///
    /// # Errors
    /// Returns a configuration error if the expression does not parse
    pub fn new(cron_expr: &str, cycle: Arc<FetchCycle>, policy: OverlapPolicy) -> Result<Self> {
        Ok(Self {
            schedule: parse_schedule(cron_expr)?,
            cycle,
            policy,
            running: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Next time the schedule fires
    pub fn next_fire(&self) -> Option<DateTime<Utc>> {
        self.schedule.upcoming(Utc).next()
    }

    /// Whether a guarded cycle is currently running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start a cycle now, honoring the overlap policy
    pub fn trigger(&self) -> TriggerOutcome {
        let cycle = Arc::clone(&self.cycle);

        match self.policy {
            OverlapPolicy::Concurrent => {
                TriggerOutcome::Started(tokio::spawn(async move { cycle.run().await }))
            }
            OverlapPolicy::Skip => {
                if self
                    .running
                    .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                    .is_err()
                {
                    info!("previous fetch cycle still running, skipping trigger");
                    return TriggerOutcome::Skipped;
                }

                let guard = RunningGuard(Arc::clone(&self.running));
                TriggerOutcome::Started(tokio::spawn(async move {
                    let _guard = guard;
                    cycle.run().await
                }))
            }
        }
    }

    /// Run until `cancel` fires, triggering a cycle at every scheduled time
    pub async fn run(self, cancel: CancellationToken) {
        info!(policy = ?self.policy, "fetch scheduler started");

        loop {
            let Some(next) = self.next_fire() else {
                warn!("cron schedule has no upcoming fire times, scheduler stopping");
                break;
            };
            let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            debug!(next = %next, "waiting for next fetch cycle");

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }

            if let TriggerOutcome::Started(handle) = self.trigger() {
                // Cycle outcomes are logged by the cycle itself; only watch for panics
                tokio::spawn(async move {
                    if let Err(e) = handle.await {
                        warn!(error = %e, "fetch cycle task failed");
                    }
                });
            }
        }

        info!("fetch scheduler stopped");
    }
}

/// Clears the running flag when the cycle task ends, panics included
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}
