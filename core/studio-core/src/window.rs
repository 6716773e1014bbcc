//! Time windows for each trigger kind, computed in studio local time.

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, TimeZone, Utc};

use crate::types::ReminderKind;

/// Half-open `[start, end)` range in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start && instant < self.end
    }
}

pub fn local_date(now: DateTime<Utc>, offset: FixedOffset) -> NaiveDate {
    now.with_timezone(&offset).date_naive()
}

/// Local midnight of `date`, expressed in UTC.
pub fn local_midnight(date: NaiveDate, offset: FixedOffset) -> DateTime<Utc> {
    let naive = date.and_hms_opt(0, 0, 0).unwrap_or_default();
    match offset.from_local_datetime(&naive).single() {
        Some(local) => local.with_timezone(&Utc),
        None => {
            let shift = Duration::seconds(i64::from(offset.local_minus_utc()));
            Utc.from_utc_datetime(&(naive - shift))
        }
    }
}

pub fn start_of_day(now: DateTime<Utc>, offset: FixedOffset) -> DateTime<Utc> {
    local_midnight(local_date(now, offset), offset)
}

/// The Monday strictly after today's local date.
pub fn upcoming_monday(now: DateTime<Utc>, offset: FixedOffset) -> NaiveDate {
    let today = local_date(now, offset);
    let days_ahead = 7 - i64::from(today.weekday().num_days_from_monday());
    today + Duration::days(days_ahead)
}

/// The window a trigger looks at when invoked at `now`.
pub fn window_for(kind: ReminderKind, now: DateTime<Utc>, offset: FixedOffset) -> TimeWindow {
    let today = start_of_day(now, offset);
    match kind {
        ReminderKind::Tomorrow | ReminderKind::EveningDigest => TimeWindow {
            start: today + Duration::days(1),
            end: today + Duration::days(2),
        },
        ReminderKind::NextHour => TimeWindow {
            start: now,
            end: now + Duration::hours(1),
        },
        ReminderKind::Weekly => {
            let monday = local_midnight(upcoming_monday(now, offset), offset);
            TimeWindow {
                start: monday,
                end: monday + Duration::days(7),
            }
        }
        ReminderKind::MorningDigest => TimeWindow {
            start: today,
            end: today + Duration::days(1),
        },
    }
}
