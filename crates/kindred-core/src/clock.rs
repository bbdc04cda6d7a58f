//! Time source and local-day arithmetic.

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Offset, Utc};
use std::sync::Mutex;

/// Wall-clock time source.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Clock backed by the system time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = at;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Maps instants onto the local calendar day used for sequencing and caps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayBoundary {
    offset: FixedOffset,
}

impl DayBoundary {
    /// Day boundary at UTC midnight.
    pub fn utc() -> Self {
        Self {
            offset: Utc.fix(),
        }
    }

    /// Day boundary shifted by `minutes` east of UTC.
    ///
    /// Offsets outside +/- 24h fall back to UTC.
    pub fn with_offset_minutes(minutes: i32) -> Self {
        match FixedOffset::east_opt(minutes.saturating_mul(60)) {
            Some(offset) => Self { offset },
            None => Self::utc(),
        }
    }

    /// Local calendar date of `at`.
    pub fn date_of(&self, at: DateTime<Utc>) -> NaiveDate {
        at.with_timezone(&self.offset).date_naive()
    }

    /// First instant of the local day after `at`.
    pub fn next_rollover(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        let tomorrow = self.date_of(at) + Duration::days(1);
        let local_midnight = tomorrow.and_hms_opt(0, 0, 0).unwrap_or_default();
        DateTime::<Utc>::from_naive_utc_and_offset(local_midnight, Utc)
            - Duration::seconds(i64::from(self.offset.local_minus_utc()))
    }
}

impl Default for DayBoundary {
    fn default() -> Self {
        Self::utc()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_manual_clock_advances() {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        clock.advance(Duration::minutes(30));
        assert_eq!(clock.now(), start + Duration::minutes(30));
        clock.set(start);
        assert_eq!(clock.now(), start);
    }

    #[test]
    fn test_date_of_respects_offset() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 23, 30, 0).unwrap();
        assert_eq!(DayBoundary::utc().date_of(at), NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());

        // UTC+2: 23:30 UTC is already 01:30 the next day
        let east = DayBoundary::with_offset_minutes(120);
        assert_eq!(east.date_of(at), NaiveDate::from_ymd_opt(2024, 3, 2).unwrap());

        // UTC-5: 03:00 UTC is still the previous evening
        let west = DayBoundary::with_offset_minutes(-300);
        let early = Utc.with_ymd_and_hms(2024, 3, 2, 3, 0, 0).unwrap();
        assert_eq!(west.date_of(early), NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
    }

    #[test]
    fn test_next_rollover() {
        let east = DayBoundary::with_offset_minutes(120);
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        // Local midnight of March 2nd at UTC+2 is 22:00 UTC on March 1st
        assert_eq!(east.next_rollover(at), Utc.with_ymd_and_hms(2024, 3, 1, 22, 0, 0).unwrap());
    }

    #[test]
    fn test_out_of_range_offset_falls_back_to_utc() {
        assert_eq!(DayBoundary::with_offset_minutes(100_000), DayBoundary::utc());
    }
}
