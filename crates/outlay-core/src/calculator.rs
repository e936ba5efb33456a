//! Next-occurrence calculation
//!
//! Pure calendar arithmetic over a validated [`RecurrencePattern`]. The result of
//! [`compute_next`] is always strictly after the reference date and never before
//! the pattern's start date. Month-based rules clamp to the last day of short
//! months ("the 31st" lands on Apr 30, Feb 28/29).

use chrono::{Datelike, Duration, NaiveDate, Weekday};

use crate::error::{Error, Result};
use crate::recurrence::{RecurrencePattern, Schedule, WeekOfMonth};

/// Number of days in a calendar month
pub fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|d| d.pred_opt())
        .map(|d| d.day())
        .unwrap_or(28)
}

/// `day` in the given month, clamped to the month's last day
pub fn clamped_date(year: i32, month: u32, day: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, day.min(days_in_month(year, month)))
}

/// The `week`-th `weekday` of a month; `Last` picks the latest one in the month
pub fn weekday_in_month(
    year: i32,
    month: u32,
    week: WeekOfMonth,
    weekday: Weekday,
) -> Option<NaiveDate> {
    match week {
        WeekOfMonth::Last => {
            let last = NaiveDate::from_ymd_opt(year, month, days_in_month(year, month))?;
            let back = (7 + last.weekday().num_days_from_sunday()
                - weekday.num_days_from_sunday())
                % 7;
            last.checked_sub_signed(Duration::days(i64::from(back)))
        }
        week => NaiveDate::from_weekday_of_month_opt(year, month, weekday, week.number() as u8),
    }
}

/// Months counted from year 0, so month cycles can be stepped with plain arithmetic
fn month_index(date: NaiveDate) -> i64 {
    i64::from(date.year()) * 12 + i64::from(date.month0())
}

fn split_month_index(index: i64) -> Option<(i32, u32)> {
    let year = i32::try_from(index.div_euclid(12)).ok()?;
    let month = u32::try_from(index.rem_euclid(12)).ok()? + 1;
    Some((year, month))
}

/// Earliest date strictly after `floor` produced by a month-cycle rule
///
/// Candidate months are those whose index is congruent to `phase` modulo `step`;
/// each candidate month yields exactly one date via `resolve`.
fn next_in_month_cycle<F>(floor: NaiveDate, step: i64, phase: i64, resolve: F) -> Option<NaiveDate>
where
    F: Fn(i32, u32) -> Option<NaiveDate>,
{
    let mut index = month_index(floor);
    index += (phase - index).rem_euclid(step);

    // The candidate in floor's own month may already be past; the next one cannot be
    for _ in 0..2 {
        let (year, month) = split_month_index(index)?;
        let candidate = resolve(year, month)?;
        if candidate > floor {
            return Some(candidate);
        }
        index += step;
    }
    None
}

/// Compute the next occurrence date strictly after `after`
///
/// Fails with [`Error::InvalidPattern`] when the pattern does not validate and
/// with [`Error::OutOfRange`] when the next date would fall after `end_date`.
pub fn compute_next(pattern: &RecurrencePattern, after: NaiveDate) -> Result<NaiveDate> {
    pattern.validate().map_err(Error::InvalidPattern)?;

    // Occurrences never precede start_date: anything strictly after the day
    // before the start is allowed
    let floor = match pattern.start_date.pred_opt() {
        Some(before_start) => after.max(before_start),
        None => after,
    };

    let next = match pattern.schedule {
        Schedule::Daily { .. } => floor.succ_opt(),
        Schedule::Weekly { day_of_week } => floor.succ_opt().and_then(|first| {
            let ahead = (7 + day_of_week.num_days_from_sunday()
                - first.weekday().num_days_from_sunday())
                % 7;
            first.checked_add_signed(Duration::days(i64::from(ahead)))
        }),
        Schedule::MonthlyByDay { day_of_month } => {
            next_in_month_cycle(floor, 1, 0, |y, m| clamped_date(y, m, day_of_month))
        }
        Schedule::MonthlyByWeekday {
            week_of_month,
            day_of_week,
        } => next_in_month_cycle(floor, 1, 0, |y, m| {
            weekday_in_month(y, m, week_of_month, day_of_week)
        }),
        Schedule::Quarterly { day_of_month } => {
            // Quarters run from the start date's month
            let phase = month_index(pattern.start_date).rem_euclid(3);
            next_in_month_cycle(floor, 3, phase, |y, m| clamped_date(y, m, day_of_month))
        }
        Schedule::Yearly {
            month_of_year,
            day_of_month,
        } => next_in_month_cycle(floor, 12, i64::from(month_of_year) - 1, |y, m| {
            clamped_date(y, m, day_of_month)
        }),
    }
    .ok_or_else(|| Error::InvalidData(format!("No representable date after {}", after)))?;

    if let Some(end_date) = pattern.end_date {
        if next > end_date {
            return Err(Error::OutOfRange {
                date: next,
                end_date,
            });
        }
    }

    Ok(next)
}

/// First occurrence on or after `date`
pub fn first_on_or_after(pattern: &RecurrencePattern, date: NaiveDate) -> Result<NaiveDate> {
    match date.pred_opt() {
        Some(before) => compute_next(pattern, before),
        None => Err(Error::InvalidData(format!("No date before {}", date))),
    }
}

/// Up to `count` upcoming occurrence dates strictly after `after`
///
/// Stops early when the pattern's end date is reached.
pub fn upcoming(pattern: &RecurrencePattern, after: NaiveDate, count: usize) -> Result<Vec<NaiveDate>> {
    let mut dates = Vec::with_capacity(count);
    let mut cursor = after;

    while dates.len() < count {
        match compute_next(pattern, cursor) {
            Ok(next) => {
                dates.push(next);
                cursor = next;
            }
            Err(e) if e.is_out_of_range() => break,
            Err(e) => return Err(e),
        }
    }

    Ok(dates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recurrence::{validate, Frequency, MonthlyRecurrenceType, PatternFields};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn monthly_on(day_of_month: u32, start: NaiveDate) -> RecurrencePattern {
        RecurrencePattern::new(start, Schedule::MonthlyByDay { day_of_month })
    }

    #[test]
    fn test_days_in_month() {
        assert_eq!(days_in_month(2024, 2), 29);
        assert_eq!(days_in_month(2023, 2), 28);
        assert_eq!(days_in_month(2024, 4), 30);
        assert_eq!(days_in_month(2024, 12), 31);
        assert_eq!(days_in_month(1900, 2), 28);
        assert_eq!(days_in_month(2000, 2), 29);
    }

    #[test]
    fn test_daily_is_one_day_apart() {
        let pattern = RecurrencePattern::new(date(2024, 1, 1), Schedule::Daily { time_of_day: None });
        let dates = upcoming(&pattern, date(2024, 2, 27), 5).unwrap();
        assert_eq!(
            dates,
            vec![
                date(2024, 2, 28),
                date(2024, 2, 29),
                date(2024, 3, 1),
                date(2024, 3, 2),
                date(2024, 3, 3)
            ]
        );
        for pair in dates.windows(2) {
            assert_eq!(pair[1] - pair[0], Duration::days(1));
        }
    }

    #[test]
    fn test_daily_before_start_returns_start() {
        let pattern = RecurrencePattern::new(date(2024, 6, 10), Schedule::Daily { time_of_day: None });
        assert_eq!(compute_next(&pattern, date(2024, 1, 1)).unwrap(), date(2024, 6, 10));
    }

    #[test]
    fn test_weekly_is_seven_days_apart() {
        for day in 0..7u32 {
            let weekday = crate::recurrence::weekday_from_index(day).unwrap();
            let pattern = RecurrencePattern::new(
                date(2024, 1, 3),
                Schedule::Weekly { day_of_week: weekday },
            );
            let dates = upcoming(&pattern, date(2024, 1, 3), 10).unwrap();
            assert_eq!(dates[0].weekday(), weekday);
            for pair in dates.windows(2) {
                assert_eq!(pair[1] - pair[0], Duration::days(7));
            }
        }
    }

    #[test]
    fn test_weekly_same_weekday_moves_a_full_week() {
        // 2024-01-05 is a Friday
        let pattern = RecurrencePattern::new(
            date(2024, 1, 5),
            Schedule::Weekly {
                day_of_week: Weekday::Fri,
            },
        );
        assert_eq!(compute_next(&pattern, date(2024, 1, 5)).unwrap(), date(2024, 1, 12));
        assert_eq!(compute_next(&pattern, date(2024, 1, 6)).unwrap(), date(2024, 1, 12));
    }

    #[test]
    fn test_monthly_day_31_clamps_to_30_day_month() {
        let pattern = monthly_on(31, date(2024, 1, 31));
        assert_eq!(compute_next(&pattern, date(2024, 3, 31)).unwrap(), date(2024, 4, 30));
        // And recovers to 31 the month after
        assert_eq!(compute_next(&pattern, date(2024, 4, 30)).unwrap(), date(2024, 5, 31));
    }

    #[test]
    fn test_monthly_clamps_february() {
        let pattern = monthly_on(30, date(2023, 1, 30));
        assert_eq!(compute_next(&pattern, date(2023, 1, 30)).unwrap(), date(2023, 2, 28));
        assert_eq!(compute_next(&pattern, date(2024, 1, 30)).unwrap(), date(2024, 2, 29));
    }

    #[test]
    fn test_monthly_same_month_when_still_ahead() {
        let pattern = monthly_on(15, date(2024, 1, 1));
        assert_eq!(compute_next(&pattern, date(2024, 3, 9)).unwrap(), date(2024, 3, 15));
        assert_eq!(compute_next(&pattern, date(2024, 3, 15)).unwrap(), date(2024, 4, 15));
    }

    #[test]
    fn test_monthly_last_monday_of_february_2024() {
        let fields = PatternFields {
            frequency: Some(Frequency::Monthly),
            monthly_recurrence_type: Some(MonthlyRecurrenceType::DayOfWeek),
            week_of_month: Some(5),
            day_of_week: Some(1),
            start_date: Some(date(2024, 1, 1)),
            ..Default::default()
        };
        let pattern = validate(&fields).unwrap();

        // January's last Monday, then February's
        assert_eq!(compute_next(&pattern, date(2023, 12, 31)).unwrap(), date(2024, 1, 29));
        assert_eq!(compute_next(&pattern, date(2024, 1, 29)).unwrap(), date(2024, 2, 26));
    }

    #[test]
    fn test_monthly_last_weekday_can_be_fifth() {
        // April 2024 has five Tuesdays; the last is the 30th
        let pattern = RecurrencePattern::new(
            date(2024, 1, 1),
            Schedule::MonthlyByWeekday {
                week_of_month: WeekOfMonth::Last,
                day_of_week: Weekday::Tue,
            },
        );
        assert_eq!(compute_next(&pattern, date(2024, 3, 31)).unwrap(), date(2024, 4, 30));
    }

    #[test]
    fn test_monthly_nth_weekday() {
        // Second Wednesday
        let pattern = RecurrencePattern::new(
            date(2024, 1, 1),
            Schedule::MonthlyByWeekday {
                week_of_month: WeekOfMonth::Second,
                day_of_week: Weekday::Wed,
            },
        );
        let dates = upcoming(&pattern, date(2023, 12, 31), 3).unwrap();
        assert_eq!(dates, vec![date(2024, 1, 10), date(2024, 2, 14), date(2024, 3, 13)]);
    }

    #[test]
    fn test_quarterly_anchored_on_start_month() {
        let pattern = RecurrencePattern::new(
            date(2024, 2, 10),
            Schedule::Quarterly { day_of_month: 31 },
        );
        let dates = upcoming(&pattern, date(2024, 1, 1), 4).unwrap();
        assert_eq!(
            dates,
            vec![
                date(2024, 2, 29),
                date(2024, 5, 31),
                date(2024, 8, 31),
                date(2024, 11, 30)
            ]
        );
    }

    #[test]
    fn test_yearly_clamps_leap_day() {
        let pattern = RecurrencePattern::new(
            date(2024, 1, 1),
            Schedule::Yearly {
                month_of_year: 2,
                day_of_month: 29,
            },
        );
        let dates = upcoming(&pattern, date(2024, 1, 1), 5).unwrap();
        assert_eq!(
            dates,
            vec![
                date(2024, 2, 29),
                date(2025, 2, 28),
                date(2026, 2, 28),
                date(2027, 2, 28),
                date(2028, 2, 29)
            ]
        );
    }

    #[test]
    fn test_yearly_after_this_years_date() {
        let pattern = RecurrencePattern::new(
            date(2020, 1, 1),
            Schedule::Yearly {
                month_of_year: 7,
                day_of_month: 4,
            },
        );
        assert_eq!(compute_next(&pattern, date(2024, 7, 4)).unwrap(), date(2025, 7, 4));
        assert_eq!(compute_next(&pattern, date(2024, 7, 3)).unwrap(), date(2024, 7, 4));
    }

    #[test]
    fn test_end_date_is_out_of_range() {
        let pattern = RecurrencePattern::new(
            date(2024, 1, 1),
            Schedule::Weekly {
                day_of_week: Weekday::Mon,
            },
        )
        .with_end_date(date(2024, 1, 20));

        assert_eq!(compute_next(&pattern, date(2024, 1, 1)).unwrap(), date(2024, 1, 8));
        let err = compute_next(&pattern, date(2024, 1, 15)).unwrap_err();
        assert!(err.is_out_of_range());

        let dates = upcoming(&pattern, date(2023, 12, 31), 10).unwrap();
        assert_eq!(dates, vec![date(2024, 1, 1), date(2024, 1, 8), date(2024, 1, 15)]);
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let pattern = monthly_on(0, date(2024, 1, 1));
        assert!(matches!(
            compute_next(&pattern, date(2024, 1, 1)),
            Err(Error::InvalidPattern(_))
        ));
    }

    #[test]
    fn test_next_is_always_strictly_later() {
        let schedules = [
            Schedule::Daily { time_of_day: None },
            Schedule::Weekly {
                day_of_week: Weekday::Sun,
            },
            Schedule::MonthlyByDay { day_of_month: 31 },
            Schedule::MonthlyByWeekday {
                week_of_month: WeekOfMonth::Last,
                day_of_week: Weekday::Sat,
            },
            Schedule::Quarterly { day_of_month: 1 },
            Schedule::Yearly {
                month_of_year: 12,
                day_of_month: 31,
            },
        ];

        for schedule in schedules {
            let pattern = RecurrencePattern::new(date(2023, 11, 1), schedule);
            let mut day = date(2023, 11, 1);
            while day < date(2025, 3, 1) {
                let next = compute_next(&pattern, day).unwrap();
                assert!(next > day, "{:?}: {} !> {}", schedule, next, day);
                day = day.succ_opt().unwrap();
            }
        }
    }

    #[test]
    fn test_first_on_or_after_includes_the_date_itself() {
        let pattern = RecurrencePattern::new(
            date(2024, 1, 5),
            Schedule::Weekly {
                day_of_week: Weekday::Fri,
            },
        );
        assert_eq!(first_on_or_after(&pattern, date(2024, 3, 1)).unwrap(), date(2024, 3, 1));
    }
}
