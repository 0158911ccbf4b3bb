//! Scheduler for the periodic processing poll.
//!
//! Supports:
//! - Cron expression parsing (5-field, evaluated in a configured timezone)
//! - Sleep/wake detection via time-jump polling
//! - Missed-run handling (runs if within grace period)
//!
//! The scheduler only emits trigger messages; the run loop in main drives
//! the actual batch. A manual `slotwise process` racing a scheduled run is
//! expected and absorbed by the processor's dedup guard.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::state::AppState;
use crate::types::{ExecutionTrigger, ScheduleEntry};

/// Grace period for missed runs (2 hours)
const MISSED_RUN_GRACE_PERIOD_SECS: i64 = 7200;

/// Time jump threshold to detect sleep/wake (5 minutes)
const TIME_JUMP_THRESHOLD_SECS: i64 = 300;

/// Poll interval for the scheduler loop (1 minute)
const POLL_INTERVAL_SECS: u64 = 60;

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("Invalid cron expression '{expr}': {message}")]
    InvalidCron { expr: String, message: String },
    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),
    #[error("No upcoming scheduled time")]
    NoUpcomingRun,
}

/// Message sent to trigger a processing batch
#[derive(Debug, Clone)]
pub struct SchedulerMessage {
    pub trigger: ExecutionTrigger,
}

/// Scheduler for the recurring processing batch
pub struct Scheduler {
    state: Arc<AppState>,
    sender: mpsc::Sender<SchedulerMessage>,
}

impl Scheduler {
    pub fn new(state: Arc<AppState>, sender: mpsc::Sender<SchedulerMessage>) -> Self {
        Self { state, sender }
    }

    /// Start the scheduler loop.
    ///
    /// Runs indefinitely, checking for a due run every minute and
    /// handling sleep/wake gaps.
    pub async fn run(&self) {
        let mut last_check = Utc::now();

        loop {
            tokio::time::sleep(Duration::from_secs(POLL_INTERVAL_SECS)).await;

            let now = Utc::now();

            // Detect sleep: time jumped more than 5 minutes
            let time_jump = (now - last_check).num_seconds();
            if time_jump > TIME_JUMP_THRESHOLD_SECS {
                log::info!(
                    "Detected system wake (time jumped {} seconds), checking for a missed run",
                    time_jump
                );
                self.check_missed_run(now).await;
            }

            self.check_and_run_due(now).await;

            last_check = now;
        }
    }

    /// Check whether the schedule is due right now
    async fn check_and_run_due(&self, now: DateTime<Utc>) {
        let Some(entry) = self.state.schedule() else {
            return;
        };
        if !entry.enabled {
            return;
        }

        match self.should_run_now(&entry, now) {
            Ok(true) => {
                self.trigger(ExecutionTrigger::Scheduled).await;
            }
            Ok(false) => {}
            Err(e) => log::warn!("Schedule check failed: {}", e),
        }
    }

    /// Check if the batch should run at the given time
    fn should_run_now(
        &self,
        entry: &ScheduleEntry,
        now: DateTime<Utc>,
    ) -> Result<bool, ScheduleError> {
        let schedule = parse_cron(&entry.cron)?;
        let tz: Tz = entry
            .timezone
            .parse()
            .map_err(|_| ScheduleError::InvalidTimezone(entry.timezone.clone()))?;

        let now_local = now.with_timezone(&tz);
        let last_run = self.state.get_last_scheduled_run();

        // Find the most recent scheduled time around now
        let mut scheduled_times = schedule.after(&(now_local - chrono::Duration::minutes(2)));

        if let Some(next_time) = scheduled_times.next() {
            let next_utc = next_time.with_timezone(&Utc);
            let diff = (now - next_utc).num_seconds().abs();

            // Within 2 minutes of the scheduled time (wide window so a
            // wake right after the boundary still counts)
            if diff < 120 {
                if let Some(last) = last_run {
                    if (last - next_utc).num_seconds().abs() < 60 {
                        return Ok(false); // Already ran this slot
                    }
                }
                return Ok(true);
            }
        }

        Ok(false)
    }

    /// Check for a run that was missed during sleep
    async fn check_missed_run(&self, now: DateTime<Utc>) {
        let Some(entry) = self.state.schedule() else {
            return;
        };
        if !entry.enabled {
            return;
        }

        match self.find_missed_run(&entry, now) {
            Ok(Some(_)) => {
                log::info!("Found missed processing run, running now");
                self.trigger(ExecutionTrigger::Missed).await;
            }
            Ok(None) => {}
            Err(e) => log::warn!("Missed-run check failed: {}", e),
        }
    }

    /// Find a missed run within the grace period
    fn find_missed_run(
        &self,
        entry: &ScheduleEntry,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, ScheduleError> {
        let schedule = parse_cron(&entry.cron)?;
        let tz: Tz = entry
            .timezone
            .parse()
            .map_err(|_| ScheduleError::InvalidTimezone(entry.timezone.clone()))?;

        let now_local = now.with_timezone(&tz);
        let grace_start = now_local - chrono::Duration::seconds(MISSED_RUN_GRACE_PERIOD_SECS);

        let last_run = self.state.get_last_scheduled_run();

        for scheduled in schedule.after(&grace_start) {
            let scheduled_utc = scheduled.with_timezone(&Utc);

            if scheduled_utc > now {
                break;
            }

            if let Some(last) = last_run {
                if last >= scheduled_utc {
                    continue; // Already ran
                }
            }

            return Ok(Some(scheduled_utc));
        }

        Ok(None)
    }

    /// Emit a trigger message
    async fn trigger(&self, trigger: ExecutionTrigger) {
        if self
            .sender
            .send(SchedulerMessage { trigger })
            .await
            .is_err()
        {
            log::error!("Failed to send scheduler message ({})", trigger);
        }
    }
}

/// Parse a cron expression
pub fn parse_cron(expr: &str) -> Result<Schedule, ScheduleError> {
    // The cron crate expects 6 fields (with seconds), but config uses the
    // 5-field format. Add "0" for seconds at the start.
    let full_expr = format!("0 {}", expr);

    full_expr
        .parse::<Schedule>()
        .map_err(|e| ScheduleError::InvalidCron {
            expr: expr.to_string(),
            message: e.to_string(),
        })
}

/// Get the next scheduled run time
pub fn get_next_run_time(entry: &ScheduleEntry) -> Result<DateTime<Utc>, ScheduleError> {
    let schedule = parse_cron(&entry.cron)?;
    let tz: Tz = entry
        .timezone
        .parse()
        .map_err(|_| ScheduleError::InvalidTimezone(entry.timezone.clone()))?;

    let next = schedule
        .upcoming(tz)
        .next()
        .ok_or(ScheduleError::NoUpcomingRun)?;

    Ok(next.with_timezone(&Utc))
}
