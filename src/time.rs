use chrono::{Datelike, Duration, Months, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

/// A point in civil time, second resolution. There is no timezone: all
/// instants of a pipeline live in the same (implicit) local calendar.
pub type Instant = NaiveDateTime;

/// Seconds since the Unix epoch. Only used for interpolation arithmetic,
/// never for calendar math.
pub fn to_seconds(t: Instant) -> i64 {
    t.and_utc().timestamp()
}

const SECONDS_PER_DAY: i64 = 86_400;
const SECONDS_PER_HOUR: i64 = 3_600;

/// A duration that can be added to an [`Instant`]. Seconds through weeks are
/// uniform; months and years follow the civil calendar (adding one month to
/// January 31 lands on February 28/29).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CalendarDuration {
    Seconds(i64),
    Minutes(i64),
    Hours(i64),
    Days(i64),
    Weeks(i64),
    Months(u32),
    Years(u32),
}

impl CalendarDuration {
    /// Add this duration to an instant. `None` on calendar overflow.
    pub fn add_to(self, t: Instant) -> Option<Instant> {
        match self {
            CalendarDuration::Seconds(n) => t.checked_add_signed(Duration::seconds(n)),
            CalendarDuration::Minutes(n) => t.checked_add_signed(Duration::minutes(n)),
            CalendarDuration::Hours(n) => t.checked_add_signed(Duration::hours(n)),
            CalendarDuration::Days(n) => t.checked_add_signed(Duration::days(n)),
            CalendarDuration::Weeks(n) => t.checked_add_signed(Duration::weeks(n)),
            CalendarDuration::Months(n) => t.checked_add_months(Months::new(n)),
            CalendarDuration::Years(n) => t.checked_add_months(Months::new(n.checked_mul(12)?)),
        }
    }

    /// Scale by `k`. Refresh instants are computed as `start + k·period`,
    /// scaling before the addition, so that month-end clamping never
    /// compounds across iterations.
    pub fn scaled(self, k: u32) -> Option<CalendarDuration> {
        let k_i = i64::from(k);
        Some(match self {
            CalendarDuration::Seconds(n) => CalendarDuration::Seconds(n.checked_mul(k_i)?),
            CalendarDuration::Minutes(n) => CalendarDuration::Minutes(n.checked_mul(k_i)?),
            CalendarDuration::Hours(n) => CalendarDuration::Hours(n.checked_mul(k_i)?),
            CalendarDuration::Days(n) => CalendarDuration::Days(n.checked_mul(k_i)?),
            CalendarDuration::Weeks(n) => CalendarDuration::Weeks(n.checked_mul(k_i)?),
            CalendarDuration::Months(n) => CalendarDuration::Months(n.checked_mul(k)?),
            CalendarDuration::Years(n) => CalendarDuration::Years(n.checked_mul(k)?),
        })
    }

    /// True when adding the duration moves an instant forward.
    pub fn is_positive(&self) -> bool {
        match *self {
            CalendarDuration::Seconds(n)
            | CalendarDuration::Minutes(n)
            | CalendarDuration::Hours(n)
            | CalendarDuration::Days(n)
            | CalendarDuration::Weeks(n) => n > 0,
            CalendarDuration::Months(n) | CalendarDuration::Years(n) => n > 0,
        }
    }
}

/// Whole 86 400 s days elapsed from `from` to `to` (floor; negative when
/// `to` precedes `from`).
pub fn days_between(from: Instant, to: Instant) -> i64 {
    (to_seconds(to) - to_seconds(from)).div_euclid(SECONDS_PER_DAY)
}

/// Whole 7-day weeks elapsed from `from` to `to`.
pub fn weeks_between(from: Instant, to: Instant) -> i64 {
    days_between(from, to).div_euclid(7)
}

/// Whole 3 600 s hours elapsed from `from` to `to`.
pub fn hours_between(from: Instant, to: Instant) -> i64 {
    (to_seconds(to) - to_seconds(from)).div_euclid(SECONDS_PER_HOUR)
}

/// Whole civil months elapsed from `from` to `to`: the count only ticks
/// once the day-of-month (and time of day) of `from` is reached again.
pub fn months_between(from: Instant, to: Instant) -> i64 {
    if to < from {
        return -months_between(to, from);
    }
    let mut months =
        i64::from(to.year() - from.year()) * 12 + i64::from(to.month()) - i64::from(from.month());
    if (to.day(), to.num_seconds_from_midnight()) < (from.day(), from.num_seconds_from_midnight())
    {
        months -= 1;
    }
    months
}

/// Whole civil years elapsed from `from` to `to`.
pub fn years_between(from: Instant, to: Instant) -> i64 {
    months_between(from, to).div_euclid(12)
}
