use anyhow::Context;
use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

// IANA's Etc zones use the POSIX sign convention: Etc/GMT-14 is fourteen
// hours AHEAD of UTC (the first place Friday starts), Etc/GMT+12 is twelve
// hours behind (the last place Friday ends).
const EARLIEST_TZ: Tz = chrono_tz::Etc::GMTMinus14;
const LATEST_TZ: Tz = chrono_tz::Etc::GMTPlus12;

/// Background task that keeps an "is it Friday somewhere?" flag current.
///
/// Retweeting is enabled from the moment Friday starts in the earliest time
/// zone until Saturday arrives in the latest one, a window of roughly 50
/// hours each week. The task sleeps until the next boundary instead of
/// polling. Only this task ever writes the flag; everyone else reads it.
#[derive(Clone)]
pub struct FridayChecker {
    is_friday: Arc<AtomicBool>,
    started: Arc<AtomicBool>,
}

impl FridayChecker {
    pub fn new() -> Self {
        FridayChecker {
            is_friday: Arc::new(AtomicBool::new(false)),
            started: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_friday(&self) -> bool {
        self.is_friday.load(Ordering::Relaxed)
    }

    /// Spawn the checker loop. Safe to call on every stream reconnect; only
    /// the first call actually starts the task. If the loop ever errors it
    /// logs and dies without being restarted, leaving the flag in its last
    /// state.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        log::info!("Starting Friday checker");
        let flag = self.is_friday.clone();
        tokio::spawn(async move {
            if let Err(e) = run_checker(flag).await {
                log::error!("Friday checker terminated: {e}");
            }
        });
    }
}

impl Default for FridayChecker {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_checker(flag: Arc<AtomicBool>) -> anyhow::Result<()> {
    loop {
        let now = Utc::now();
        if is_friday_somewhere(now) {
            log::info!("It's friday somewhere, retweet enabled");
            flag.store(true, Ordering::Relaxed);

            let seconds = seconds_until_saturday_latest(now)?;
            log::info!("{seconds} seconds until Saturday in the latest timezone");
            sleep_seconds(seconds).await;
        } else {
            log::info!("It's not Friday anywhere, retweet disabled");
            flag.store(false, Ordering::Relaxed);

            let seconds = seconds_until_friday_earliest(now)?;
            log::info!("Sleeping for {seconds} seconds until next Friday");
            sleep_seconds(seconds).await;
        }
    }
}

async fn sleep_seconds(seconds: i64) {
    // Boundary math can land exactly on (or just past) the target instant;
    // a one second floor keeps the loop from spinning.
    let seconds = seconds.max(1) as u64;
    tokio::time::sleep(std::time::Duration::from_secs(seconds)).await;
}

fn is_friday_somewhere(now: DateTime<Utc>) -> bool {
    [EARLIEST_TZ, LATEST_TZ]
        .iter()
        .any(|tz| now.with_timezone(tz).weekday() == Weekday::Fri)
}

fn days_until_friday(weekday: Weekday) -> i64 {
    (4 - weekday.num_days_from_monday() as i64).rem_euclid(7)
}

/// Seconds from `now` until midnight Saturday in the latest time zone, the
/// instant Friday has finished everywhere.
fn seconds_until_saturday_latest(now: DateTime<Utc>) -> anyhow::Result<i64> {
    let local = now.with_timezone(&LATEST_TZ);
    let friday = local.date_naive() + Duration::days(days_until_friday(local.weekday()));
    let saturday = (friday + Duration::days(1)).and_time(NaiveTime::MIN);
    let saturday = LATEST_TZ
        .from_local_datetime(&saturday)
        .single()
        .context("no unambiguous Saturday midnight in the latest timezone")?;
    Ok((saturday - local).num_seconds())
}

/// Seconds from `now` until the next Friday midnight in the earliest time
/// zone, the instant Friday first exists anywhere.
fn seconds_until_friday_earliest(now: DateTime<Utc>) -> anyhow::Result<i64> {
    let local = now.with_timezone(&EARLIEST_TZ);
    let friday = local.date_naive() + Duration::days(days_until_friday(local.weekday()));
    let friday = friday.and_time(NaiveTime::MIN);
    let friday = EARLIEST_TZ
        .from_local_datetime(&friday)
        .single()
        .context("no unambiguous Friday midnight in the earliest timezone")?;
    Ok((friday - local).num_seconds())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn utc(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
        NaiveDate::from_ymd_opt(year, month, day)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
            .and_utc()
    }

    #[test]
    fn test_friday_in_earliest_zone_only() {
        // Thursday 12:00 UTC: 02:00 Friday at UTC+14, 00:00 Thursday at
        // UTC-12. Friday has started somewhere, so the window is open.
        let now = utc(2023, 6, 15, 12, 0);
        assert_eq!(now.weekday(), Weekday::Thu);
        assert!(is_friday_somewhere(now));
    }

    #[test]
    fn test_friday_in_latest_zone_only() {
        // Saturday 10:00 UTC: still Friday 22:00 at UTC-12, while UTC+14
        // already reached Sunday 00:00.
        let now = utc(2023, 6, 17, 10, 0);
        assert_eq!(now.weekday(), Weekday::Sat);
        assert!(is_friday_somewhere(now));
    }

    #[test]
    fn test_not_friday_anywhere() {
        // Wednesday noon UTC is Wednesday or Thursday in every zone.
        let now = utc(2023, 6, 14, 12, 0);
        assert!(!is_friday_somewhere(now));

        // Sunday noon UTC: Saturday at UTC-12, Monday is not yet reached
        // anywhere relevant, and no zone is still on Friday.
        let now = utc(2023, 6, 18, 12, 0);
        assert!(!is_friday_somewhere(now));
    }

    #[test]
    fn test_days_until_friday() {
        assert_eq!(days_until_friday(Weekday::Mon), 4);
        assert_eq!(days_until_friday(Weekday::Fri), 0);
        assert_eq!(days_until_friday(Weekday::Sat), 6);
        assert_eq!(days_until_friday(Weekday::Sun), 5);
    }

    #[test]
    fn test_seconds_until_saturday_latest() {
        // 12:00 UTC on Friday 2023-06-16 is exactly midnight Friday at
        // UTC-12, so a full day remains until Saturday there.
        let now = utc(2023, 6, 16, 12, 0);
        assert_eq!(seconds_until_saturday_latest(now).unwrap(), 86_400);
    }

    #[test]
    fn test_seconds_until_friday_earliest() {
        // 09:00 UTC on Thursday 2023-06-15 is 23:00 Thursday at UTC+14: one
        // hour until Friday begins there.
        let now = utc(2023, 6, 15, 9, 0);
        assert_eq!(seconds_until_friday_earliest(now).unwrap(), 3_600);
    }

    #[test]
    fn test_window_spans_about_fifty_hours() {
        // From Friday midnight in the earliest zone to Saturday midnight in
        // the latest zone is 24h plus the 26h offset between the two zones.
        let open = utc(2023, 6, 15, 10, 0); // Friday 00:00 at UTC+14
        assert!(is_friday_somewhere(open));
        assert_eq!(
            seconds_until_saturday_latest(open).unwrap(),
            50 * 3_600
        );
    }
}
