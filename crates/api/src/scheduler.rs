//! Daily notification trigger.

use std::sync::Arc;

use chrono::{DateTime, Days, NaiveTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use ratewatch_infra::notifier::Notifier;

/// Next instant at `at` (UTC) strictly after `now`.
pub fn next_run(now: DateTime<Utc>, at: NaiveTime) -> DateTime<Utc> {
    let today = now.date_naive().and_time(at).and_utc();
    if today > now {
        today
    } else {
        // Adding one day to a UTC date cannot overflow in practice.
        today.checked_add_days(Days::new(1)).unwrap_or(today)
    }
}

/// Run the notifier every day at `at` until cancelled. Failures are logged
/// and the next day's run goes ahead as usual.
pub async fn run_daily(notifier: Arc<Notifier>, at: NaiveTime, cancel: CancellationToken) {
    loop {
        let now = Utc::now();
        let next = next_run(now, at);
        let wait = (next - now).to_std().unwrap_or_default();
        info!(next_run = %next, "notification run scheduled");

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(wait) => {}
        }

        match notifier.run().await {
            Ok(report) => info!(queued = report.queued, rate = report.rate, "scheduled notification run finished"),
            Err(err) => error!(error = %err, "scheduled notification run failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn later_today_when_time_not_reached() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 8, 15, 0).unwrap();
        assert_eq!(next_run(now, at(10, 0)), Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap());
    }

    #[test]
    fn tomorrow_when_time_passed_or_exact() {
        let now = Utc.with_ymd_and_hms(2024, 5, 31, 10, 0, 0).unwrap();
        assert_eq!(next_run(now, at(10, 0)), Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap());

        let late = Utc.with_ymd_and_hms(2024, 12, 31, 23, 59, 0).unwrap();
        assert_eq!(next_run(late, at(0, 30)), Utc.with_ymd_and_hms(2025, 1, 1, 0, 30, 0).unwrap());
    }
}
