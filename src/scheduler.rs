//! Periodic jobs on wall-clock boundaries.

use chrono::{Days, Local, NaiveDateTime, NaiveTime, Timelike};
use log::{debug, info};
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// At minute zero of every hour.
    Hourly,
    /// Once a day at `HH:00`.
    DailyAt(u32),
}

/// Time left from `now` until the next firing, always strictly positive.
pub fn duration_until_next(now: NaiveDateTime, schedule: Schedule) -> Duration {
    let today = now.date();
    let next = match schedule {
        Schedule::Hourly => {
            let hour_start = now
                .with_minute(0)
                .and_then(|t| t.with_second(0))
                .and_then(|t| t.with_nanosecond(0))
                .unwrap_or(now);
            hour_start + chrono::Duration::hours(1)
        }
        Schedule::DailyAt(hour) => {
            let at = NaiveTime::from_hms_opt(hour.min(23), 0, 0).unwrap_or(NaiveTime::MIN);
            let candidate = today.and_time(at);
            if candidate > now {
                candidate
            } else {
                today
                    .checked_add_days(Days::new(1))
                    .map(|d| d.and_time(at))
                    .unwrap_or(candidate + chrono::Duration::days(1))
            }
        }
    };
    (next - now)
        .to_std()
        .unwrap_or(Duration::from_secs(1))
        .max(Duration::from_millis(1))
}

/// Run `job` on every firing of `schedule` until `cancel` is triggered.
pub fn spawn<F, Fut>(
    name: &'static str,
    schedule: Schedule,
    cancel: CancellationToken,
    job: F,
) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        loop {
            let wait = duration_until_next(Local::now().naive_local(), schedule);
            debug!("[Scheduler] {} next run in {:?}", name, wait);
            tokio::select! {
                _ = tokio::time::sleep(wait) => {
                    info!("[Scheduler] Running {}", name);
                    job().await;
                }
                _ = cancel.cancelled() => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 14)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn test_hourly() {
        assert_eq!(
            duration_until_next(at(9, 15, 30), Schedule::Hourly),
            Duration::from_secs(44 * 60 + 30)
        );
        // Exactly on the hour fires at the next one.
        assert_eq!(
            duration_until_next(at(10, 0, 0), Schedule::Hourly),
            Duration::from_secs(3600)
        );
        assert_eq!(
            duration_until_next(at(23, 59, 59), Schedule::Hourly),
            Duration::from_secs(1)
        );
    }

    #[test]
    fn test_daily() {
        assert_eq!(
            duration_until_next(at(17, 0, 0), Schedule::DailyAt(18)),
            Duration::from_secs(3600)
        );
        assert_eq!(
            duration_until_next(at(18, 0, 0), Schedule::DailyAt(18)),
            Duration::from_secs(24 * 3600)
        );
        assert_eq!(
            duration_until_next(at(19, 30, 0), Schedule::DailyAt(18)),
            Duration::from_secs(22 * 3600 + 30 * 60)
        );
    }

    #[tokio::test]
    async fn test_cancel_stops_job_loop() {
        let runs = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();
        let counter = runs.clone();
        let handle = spawn("test", Schedule::DailyAt(3), cancel.clone(), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }
}
