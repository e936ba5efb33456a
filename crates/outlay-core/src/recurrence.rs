//! Recurrence patterns and their validation
//!
//! A pattern reaches the engine in its flat form ([`PatternFields`]) - the shape
//! the expense form submits and the shape stored in the `expenses` table. The
//! validator turns it into a [`RecurrencePattern`] whose [`Schedule`] carries only
//! the fields its frequency uses.

use chrono::{NaiveDate, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How often a recurring expense repeats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Quarterly,
    Yearly,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Quarterly => "quarterly",
            Self::Yearly => "yearly",
        }
    }
}

impl std::str::FromStr for Frequency {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            "quarterly" => Ok(Self::Quarterly),
            "yearly" | "annual" | "annually" => Ok(Self::Yearly),
            _ => Err(format!("Unknown frequency: {}", s)),
        }
    }
}

impl std::fmt::Display for Frequency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which monthly rule applies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonthlyRecurrenceType {
    /// Same day number every month ("the 15th")
    DayOfMonth,
    /// Weekday within a week of the month ("the last Friday")
    DayOfWeek,
}

impl MonthlyRecurrenceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DayOfMonth => "day_of_month",
            Self::DayOfWeek => "day_of_week",
        }
    }
}

impl std::str::FromStr for MonthlyRecurrenceType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "day_of_month" => Ok(Self::DayOfMonth),
            "day_of_week" => Ok(Self::DayOfWeek),
            _ => Err(format!("Unknown monthly recurrence type: {}", s)),
        }
    }
}

/// Which week of the month a weekday-based monthly rule lands on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeekOfMonth {
    First,
    Second,
    Third,
    Fourth,
    /// The latest matching weekday in the month (4th or 5th)
    Last,
}

impl WeekOfMonth {
    /// Build from the 1-5 form number (5 = last)
    pub fn from_number(n: u32) -> Option<Self> {
        match n {
            1 => Some(Self::First),
            2 => Some(Self::Second),
            3 => Some(Self::Third),
            4 => Some(Self::Fourth),
            5 => Some(Self::Last),
            _ => None,
        }
    }

    pub fn number(&self) -> u32 {
        match self {
            Self::First => 1,
            Self::Second => 2,
            Self::Third => 3,
            Self::Fourth => 4,
            Self::Last => 5,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::First => "first",
            Self::Second => "second",
            Self::Third => "third",
            Self::Fourth => "fourth",
            Self::Last => "last",
        }
    }
}

/// Convert a Sunday-based index (Sunday = 0) into a weekday
pub fn weekday_from_index(index: u32) -> Option<Weekday> {
    match index {
        0 => Some(Weekday::Sun),
        1 => Some(Weekday::Mon),
        2 => Some(Weekday::Tue),
        3 => Some(Weekday::Wed),
        4 => Some(Weekday::Thu),
        5 => Some(Weekday::Fri),
        6 => Some(Weekday::Sat),
        _ => None,
    }
}

/// The flat, form-shaped representation of a recurrence pattern
///
/// Every field is optional here so that missing and out-of-range values can be
/// reported together by [`validate`]. Numeric fields are kept signed so negative
/// input is reported instead of failing deserialization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternFields {
    pub frequency: Option<Frequency>,
    pub start_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_of_day: Option<NaiveTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub day_of_week: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub day_of_month: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub week_of_month: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub month_of_year: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub monthly_recurrence_type: Option<MonthlyRecurrenceType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reminder_days: Option<i64>,
}

/// A single problem found while validating a pattern
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationError {
    #[error("{field} is required for {context} patterns")]
    MissingField {
        field: &'static str,
        context: &'static str,
    },

    #[error("{field} must be between {min} and {max} (got {value})")]
    FieldOutOfRange {
        field: &'static str,
        value: i64,
        min: i64,
        max: i64,
    },

    #[error("end_date {end_date} must be after start_date {start_date}")]
    EndNotAfterStart {
        start_date: NaiveDate,
        end_date: NaiveDate,
    },

    #[error("month {month_of_year} never has a day {day_of_month}")]
    ImpossibleDate {
        month_of_year: u32,
        day_of_month: u32,
    },
}

/// When, within the calendar, an expense recurs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    Daily {
        /// Carried for display; not used in date arithmetic
        time_of_day: Option<NaiveTime>,
    },
    Weekly {
        day_of_week: Weekday,
    },
    MonthlyByDay {
        day_of_month: u32,
    },
    MonthlyByWeekday {
        week_of_month: WeekOfMonth,
        day_of_week: Weekday,
    },
    Quarterly {
        day_of_month: u32,
    },
    Yearly {
        month_of_year: u32,
        day_of_month: u32,
    },
}

impl Schedule {
    pub fn frequency(&self) -> Frequency {
        match self {
            Self::Daily { .. } => Frequency::Daily,
            Self::Weekly { .. } => Frequency::Weekly,
            Self::MonthlyByDay { .. } | Self::MonthlyByWeekday { .. } => Frequency::Monthly,
            Self::Quarterly { .. } => Frequency::Quarterly,
            Self::Yearly { .. } => Frequency::Yearly,
        }
    }
}

/// A validated recurrence pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "PatternFields", into = "PatternFields")]
pub struct RecurrencePattern {
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    /// Advisory only
    pub reminder_days: Option<u32>,
    pub schedule: Schedule,
}

impl RecurrencePattern {
    pub fn new(start_date: NaiveDate, schedule: Schedule) -> Self {
        Self {
            start_date,
            end_date: None,
            reminder_days: None,
            schedule,
        }
    }

    pub fn with_end_date(mut self, end_date: NaiveDate) -> Self {
        self.end_date = Some(end_date);
        self
    }

    pub fn frequency(&self) -> Frequency {
        self.schedule.frequency()
    }

    /// Flatten back into the stored/form representation
    pub fn to_fields(&self) -> PatternFields {
        let mut fields = PatternFields {
            frequency: Some(self.frequency()),
            start_date: Some(self.start_date),
            end_date: self.end_date,
            reminder_days: self.reminder_days.map(i64::from),
            ..Default::default()
        };

        match self.schedule {
            Schedule::Daily { time_of_day } => fields.time_of_day = time_of_day,
            Schedule::Weekly { day_of_week } => {
                fields.day_of_week = Some(day_of_week.num_days_from_sunday().into());
            }
            Schedule::MonthlyByDay { day_of_month } => {
                fields.monthly_recurrence_type = Some(MonthlyRecurrenceType::DayOfMonth);
                fields.day_of_month = Some(day_of_month.into());
            }
            Schedule::MonthlyByWeekday {
                week_of_month,
                day_of_week,
            } => {
                fields.monthly_recurrence_type = Some(MonthlyRecurrenceType::DayOfWeek);
                fields.week_of_month = Some(week_of_month.number().into());
                fields.day_of_week = Some(day_of_week.num_days_from_sunday().into());
            }
            Schedule::Quarterly { day_of_month } => {
                fields.day_of_month = Some(day_of_month.into());
            }
            Schedule::Yearly {
                month_of_year,
                day_of_month,
            } => {
                fields.month_of_year = Some(month_of_year.into());
                fields.day_of_month = Some(day_of_month.into());
            }
        }

        fields
    }

    /// Re-check a typed pattern
    ///
    /// The enum rules out missing fields, but numeric fields and the date range
    /// can still be wrong when a pattern is built directly.
    pub fn validate(&self) -> std::result::Result<(), Vec<ValidationError>> {
        validate(&self.to_fields()).map(|_| ())
    }

    /// Human-readable description, e.g. "monthly on the last Monday"
    pub fn describe(&self) -> String {
        let rule = match self.schedule {
            Schedule::Daily {
                time_of_day: Some(t),
            } => format!("daily at {}", t.format("%H:%M")),
            Schedule::Daily { time_of_day: None } => "daily".to_string(),
            Schedule::Weekly { day_of_week } => format!("weekly on {}", weekday_name(day_of_week)),
            Schedule::MonthlyByDay { day_of_month } => {
                format!("monthly on day {}", day_of_month)
            }
            Schedule::MonthlyByWeekday {
                week_of_month,
                day_of_week,
            } => format!(
                "monthly on the {} {}",
                week_of_month.label(),
                weekday_name(day_of_week)
            ),
            Schedule::Quarterly { day_of_month } => {
                format!("quarterly on day {}", day_of_month)
            }
            Schedule::Yearly {
                month_of_year,
                day_of_month,
            } => format!("yearly on {}/{}", month_of_year, day_of_month),
        };

        match self.end_date {
            Some(end) => format!("{} from {} until {}", rule, self.start_date, end),
            None => format!("{} from {}", rule, self.start_date),
        }
    }
}

impl TryFrom<PatternFields> for RecurrencePattern {
    type Error = crate::error::Error;

    fn try_from(fields: PatternFields) -> std::result::Result<Self, Self::Error> {
        validate(&fields).map_err(crate::error::Error::InvalidPattern)
    }
}

impl From<RecurrencePattern> for PatternFields {
    fn from(pattern: RecurrencePattern) -> Self {
        pattern.to_fields()
    }
}

fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

/// Longest a month can ever be (February counts 29)
const MAX_MONTH_DAYS: [u32; 12] = [31, 29, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];

/// Range-check an optional numeric field, recording a problem when out of range
fn ranged(
    value: Option<i64>,
    field: &'static str,
    min: i64,
    max: i64,
    errors: &mut Vec<ValidationError>,
) -> Option<u32> {
    let value = value?;
    if value < min || value > max {
        errors.push(ValidationError::FieldOutOfRange {
            field,
            value,
            min,
            max,
        });
        return None;
    }
    u32::try_from(value).ok()
}

/// Record a missing-field problem when the raw value is absent
fn required<T>(
    raw_present: bool,
    parsed: Option<T>,
    field: &'static str,
    context: &'static str,
    errors: &mut Vec<ValidationError>,
) -> Option<T> {
    if !raw_present {
        errors.push(ValidationError::MissingField { field, context });
    }
    parsed
}

/// Validate a flat pattern, collecting every problem
///
/// Runs before generation and before a pattern is persisted.
pub fn validate(
    fields: &PatternFields,
) -> std::result::Result<RecurrencePattern, Vec<ValidationError>> {
    let mut errors = Vec::new();

    if fields.frequency.is_none() {
        errors.push(ValidationError::MissingField {
            field: "frequency",
            context: "all",
        });
    }
    if fields.start_date.is_none() {
        errors.push(ValidationError::MissingField {
            field: "start_date",
            context: "all",
        });
    }

    let day_of_week = ranged(fields.day_of_week, "day_of_week", 0, 6, &mut errors)
        .and_then(weekday_from_index);
    let day_of_month = ranged(fields.day_of_month, "day_of_month", 1, 31, &mut errors);
    let week_of_month = ranged(fields.week_of_month, "week_of_month", 1, 5, &mut errors)
        .and_then(WeekOfMonth::from_number);
    let month_of_year = ranged(fields.month_of_year, "month_of_year", 1, 12, &mut errors);
    let reminder_days = ranged(
        fields.reminder_days,
        "reminder_days",
        0,
        i64::from(u32::MAX),
        &mut errors,
    );

    if let (Some(start_date), Some(end_date)) = (fields.start_date, fields.end_date) {
        if end_date <= start_date {
            errors.push(ValidationError::EndNotAfterStart {
                start_date,
                end_date,
            });
        }
    }

    let has_dow = fields.day_of_week.is_some();
    let has_dom = fields.day_of_month.is_some();

    let schedule = match fields.frequency {
        None => None,
        Some(Frequency::Daily) => Some(Schedule::Daily {
            time_of_day: fields.time_of_day,
        }),
        Some(Frequency::Weekly) => {
            required(has_dow, day_of_week, "day_of_week", "weekly", &mut errors)
                .map(|day_of_week| Schedule::Weekly { day_of_week })
        }
        Some(Frequency::Monthly) => match fields.monthly_recurrence_type {
            None => {
                errors.push(ValidationError::MissingField {
                    field: "monthly_recurrence_type",
                    context: "monthly",
                });
                None
            }
            Some(MonthlyRecurrenceType::DayOfMonth) => required(
                has_dom,
                day_of_month,
                "day_of_month",
                "monthly day_of_month",
                &mut errors,
            )
            .map(|day_of_month| Schedule::MonthlyByDay { day_of_month }),
            Some(MonthlyRecurrenceType::DayOfWeek) => {
                let week = required(
                    fields.week_of_month.is_some(),
                    week_of_month,
                    "week_of_month",
                    "monthly day_of_week",
                    &mut errors,
                );
                let day = required(
                    has_dow,
                    day_of_week,
                    "day_of_week",
                    "monthly day_of_week",
                    &mut errors,
                );
                match (week, day) {
                    (Some(week_of_month), Some(day_of_week)) => Some(Schedule::MonthlyByWeekday {
                        week_of_month,
                        day_of_week,
                    }),
                    _ => None,
                }
            }
        },
        Some(Frequency::Quarterly) => {
            required(has_dom, day_of_month, "day_of_month", "quarterly", &mut errors)
                .map(|day_of_month| Schedule::Quarterly { day_of_month })
        }
        Some(Frequency::Yearly) => {
            let month = required(
                fields.month_of_year.is_some(),
                month_of_year,
                "month_of_year",
                "yearly",
                &mut errors,
            );
            let day = required(has_dom, day_of_month, "day_of_month", "yearly", &mut errors);
            match (month, day) {
                (Some(month_of_year), Some(day_of_month)) => {
                    // Feb 29 passes; clamping handles non-leap years
                    if day_of_month > MAX_MONTH_DAYS[(month_of_year - 1) as usize] {
                        errors.push(ValidationError::ImpossibleDate {
                            month_of_year,
                            day_of_month,
                        });
                        None
                    } else {
                        Some(Schedule::Yearly {
                            month_of_year,
                            day_of_month,
                        })
                    }
                }
                _ => None,
            }
        }
    };

    match (schedule, fields.start_date) {
        (Some(schedule), Some(start_date)) if errors.is_empty() => Ok(RecurrencePattern {
            start_date,
            end_date: fields.end_date,
            reminder_days,
            schedule,
        }),
        _ => Err(errors),
    }
}
