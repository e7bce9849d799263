//! Injectable time source.
//!
//! Timestamps are stamped from [`Clock::now`]; calendar logic (overdue windows, reminders,
//! auto-closing old appointments) uses the caregiver's local day from [`Clock::today`].

use std::sync::Mutex;

use chrono::{DateTime, Duration, FixedOffset, Local, NaiveDate, NaiveTime, Offset, TimeZone, Utc};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Offset of the caregiver's local calendar from UTC.
    fn utc_offset(&self) -> FixedOffset;

    fn today(&self) -> NaiveDate {
        self.now().with_timezone(&self.utc_offset()).date_naive()
    }

    /// Local midnight of `today`, expressed in UTC.
    fn start_of_today(&self) -> DateTime<Utc> {
        let local_midnight = self.today().and_time(NaiveTime::MIN);
        let offset = Duration::seconds(i64::from(self.utc_offset().local_minus_utc()));
        Utc.from_utc_datetime(&(local_midnight - offset))
    }
}

/// Wall clock in the device's local time zone.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn utc_offset(&self) -> FixedOffset {
        *Local::now().offset()
    }
}

/// Manually driven clock for tests and replays.
#[derive(Debug)]
pub struct TestClock {
    now: Mutex<DateTime<Utc>>,
    offset: FixedOffset,
}

impl TestClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self::with_offset(now, Utc.fix())
    }

    pub fn with_offset(now: DateTime<Utc>, offset: FixedOffset) -> Self {
        Self {
            now: Mutex::new(now),
            offset,
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        match self.now.lock() {
            Ok(mut guard) => *guard = now,
            Err(poisoned) => *poisoned.into_inner() = now,
        }
    }

    pub fn advance(&self, by: Duration) {
        let next = self.now() + by;
        self.set(next);
    }
}

impl Clock for TestClock {
    fn now(&self) -> DateTime<Utc> {
        match self.now.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn utc_offset(&self) -> FixedOffset {
        self.offset
    }
}
