//! Daily scan clock plus an on-demand trigger channel, mirroring the
//! two ways spec'd scans start: the nightly sweep and `POST
//! /api/scans/trigger`.

use chrono::{Duration as ChronoDuration, Local, NaiveTime, Timelike};
use compliance_common::config::ScheduleConfig;
use compliance_common::domain::{ScanType, TriggerSource};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::Orchestrator;

pub struct ScanRequest {
    pub scan_type: ScanType,
    pub trigger: TriggerSource,
}

/// How long until the next `hour:minute` local wall-clock moment,
/// rolling over to tomorrow if that time has already passed today.
fn duration_until_next(hour: u32, minute: u32) -> std::time::Duration {
    let now = Local::now();
    let Some(target_time) = NaiveTime::from_hms_opt(hour, minute, 0) else {
        return std::time::Duration::from_secs(3600);
    };
    let mut target = now.date_naive().and_time(target_time);
    if target <= now.naive_local() {
        target += ChronoDuration::days(1);
    }
    (target - now.naive_local()).to_std().unwrap_or(std::time::Duration::from_secs(3600))
}

/// Spawns the background scheduler loop against an already-created
/// trigger channel (`Orchestrator::new` owns the sender half so the
/// HTTP trigger handler can reach it without waiting for this task to
/// start).
pub fn spawn(orchestrator: Arc<Orchestrator>, schedule: ScheduleConfig, mut rx: mpsc::Receiver<ScanRequest>) {
    tokio::spawn(async move {
        loop {
            let sleep_for = duration_until_next(schedule.hour % 24, schedule.minute % 60);
            tokio::select! {
                _ = tokio::time::sleep(sleep_for) => {
                    if let Err(e) = orchestrator.run_scan(ScanType::Full, TriggerSource::Scheduled).await {
                        tracing::error!(error = %e, "scheduled scan failed");
                    }
                }
                Some(request) = rx.recv() => {
                    if let Err(e) = orchestrator.run_scan(request.scan_type, request.trigger).await {
                        tracing::error!(error = %e, "on-demand scan failed");
                    }
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_until_next_rolls_over_when_past() {
        let now = Local::now();
        let past_hour = now.hour().checked_sub(1).unwrap_or(23);
        let waited = duration_until_next(past_hour, now.minute());
        assert!(waited.as_secs() > 23 * 3600 - 120);
    }
}
