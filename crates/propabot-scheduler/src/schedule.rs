use chrono::{DateTime, Duration, LocalResult, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;

use propabot_core::ScheduleConfig;

use crate::error::{Result, SchedulerError};

/// Next UTC instant strictly after `after` at which `schedule` fires.
///
/// Local times that fall into a DST gap move forward one hour; ambiguous
/// local times resolve to the earlier instant.
pub fn next_fire_time(schedule: &ScheduleConfig, after: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let tz = schedule.tz()?;
    let today = after.with_timezone(&tz).date_naive();

    for offset in 0..=2 {
        let date = today + Duration::days(offset);
        if let Some(candidate) = slot_on(&tz, date, schedule.hour, schedule.minute) {
            if candidate > after {
                return Ok(candidate);
            }
        }
    }
    Err(SchedulerError::InvalidSchedule(format!(
        "no fire time for {schedule} after {after}"
    )))
}

/// The most recent slot at or before `now`, if `now` lies within `window`
/// after it. Yesterday's slot counts when the window spans local midnight.
pub fn catch_up_slot(
    schedule: &ScheduleConfig,
    now: DateTime<Utc>,
    window: Duration,
) -> Result<Option<DateTime<Utc>>> {
    let tz = schedule.tz()?;
    let today = now.with_timezone(&tz).date_naive();

    let latest = [today, today - Duration::days(1)]
        .into_iter()
        .filter_map(|date| slot_on(&tz, date, schedule.hour, schedule.minute))
        .filter(|slot| *slot <= now)
        .max();
    Ok(latest.filter(|slot| now - *slot <= window))
}

fn slot_on(tz: &Tz, date: NaiveDate, hour: u8, minute: u8) -> Option<DateTime<Utc>> {
    let naive = date.and_hms_opt(u32::from(hour), u32::from(minute), 0)?;
    let local = match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => dt,
        LocalResult::Ambiguous(earliest, _) => earliest,
        LocalResult::None => tz.from_local_datetime(&(naive + Duration::hours(1))).earliest()?,
    };
    Some(local.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    fn sched(hour: u8, minute: u8, tz: &str) -> ScheduleConfig {
        ScheduleConfig::new(hour, minute, tz).unwrap()
    }

    #[test]
    fn later_today() {
        let s = sched(12, 0, "UTC");
        assert_eq!(
            next_fire_time(&s, utc(2024, 5, 1, 9, 30)).unwrap(),
            utc(2024, 5, 1, 12, 0)
        );
    }

    #[test]
    fn exactly_at_slot_moves_to_tomorrow() {
        let s = sched(12, 0, "UTC");
        assert_eq!(
            next_fire_time(&s, utc(2024, 5, 1, 12, 0)).unwrap(),
            utc(2024, 5, 2, 12, 0)
        );
    }

    #[test]
    fn respects_timezone_offset() {
        // Jerusalem is UTC+3 in summer.
        let s = sched(12, 0, "Asia/Jerusalem");
        assert_eq!(
            next_fire_time(&s, utc(2024, 7, 1, 8, 0)).unwrap(),
            utc(2024, 7, 1, 9, 0)
        );
        assert_eq!(
            next_fire_time(&s, utc(2024, 7, 1, 9, 0)).unwrap(),
            utc(2024, 7, 2, 9, 0)
        );
    }

    #[test]
    fn local_date_differs_from_utc_date() {
        // 23:30 UTC on May 1 is already May 2 in Auckland (UTC+12).
        let s = sched(0, 0, "Pacific/Auckland");
        assert_eq!(
            next_fire_time(&s, utc(2024, 5, 1, 23, 30)).unwrap(),
            utc(2024, 5, 2, 12, 0)
        );
    }

    #[test]
    fn spring_forward_gap_shifts_one_hour() {
        // 02:30 does not exist in New York on 2024-03-10; it becomes 03:30 EDT.
        let s = sched(2, 30, "America/New_York");
        assert_eq!(
            next_fire_time(&s, utc(2024, 3, 10, 0, 0)).unwrap(),
            utc(2024, 3, 10, 7, 30)
        );
    }

    #[test]
    fn fall_back_ambiguity_takes_earliest() {
        // 01:30 happens twice in New York on 2024-11-03; the EDT one is 05:30 UTC.
        let s = sched(1, 30, "America/New_York");
        assert_eq!(
            next_fire_time(&s, utc(2024, 11, 3, 0, 0)).unwrap(),
            utc(2024, 11, 3, 5, 30)
        );
    }

    #[test]
    fn unknown_timezone_is_rejected() {
        let s = ScheduleConfig {
            hour: 1,
            minute: 0,
            timezone: "Mars/Olympus".into(),
        };
        assert!(matches!(
            next_fire_time(&s, utc(2024, 1, 1, 0, 0)),
            Err(SchedulerError::Config(_))
        ));
    }

    #[test]
    fn catch_up_window_bounds() {
        let s = sched(12, 0, "UTC");
        let window = Duration::minutes(5);
        assert_eq!(
            catch_up_slot(&s, utc(2024, 5, 1, 12, 3), window).unwrap(),
            Some(utc(2024, 5, 1, 12, 0))
        );
        assert_eq!(catch_up_slot(&s, utc(2024, 5, 1, 12, 6), window).unwrap(), None);
        assert_eq!(catch_up_slot(&s, utc(2024, 5, 1, 11, 59), window).unwrap(), None);
    }

    #[test]
    fn catch_up_spans_local_midnight() {
        let window = Duration::minutes(5);
        let s = sched(23, 58, "UTC");
        assert_eq!(
            catch_up_slot(&s, utc(2024, 5, 2, 0, 1), window).unwrap(),
            Some(utc(2024, 5, 1, 23, 58))
        );
        assert_eq!(catch_up_slot(&s, utc(2024, 5, 2, 0, 4), window).unwrap(), None);

        // Same in a zone ahead of UTC: 23:58 in Jerusalem (UTC+3) is 20:58 UTC.
        let s = sched(23, 58, "Asia/Jerusalem");
        assert_eq!(
            catch_up_slot(&s, utc(2024, 7, 1, 21, 1), window).unwrap(),
            Some(utc(2024, 7, 1, 20, 58))
        );
    }
}
