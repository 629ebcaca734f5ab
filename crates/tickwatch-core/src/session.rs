//! Market-session classification and polling cadence.
//!
//! Pure functions of a timestamp: nothing here is stored or mutated. Times
//! are evaluated in US Eastern exchange-local time, with the US daylight
//! saving rule (second Sunday of March through first Sunday of November)
//! computed internally so the clock stays free of a timezone database.

use std::time::Duration;

use time::{Date, Month, OffsetDateTime, UtcOffset, Weekday};

use crate::{Symbol, UtcDateTime};

/// Exchange-local session bands, minutes since midnight.
const PRE_MARKET_START_MIN: u16 = 4 * 60; // 04:00
const OPEN_START_MIN: u16 = 9 * 60 + 30; // 09:30
const OPEN_END_MIN: u16 = 16 * 60; // 16:00
const AFTER_HOURS_END_MIN: u16 = 20 * 60; // 20:00

/// Polling slows by this factor outside continuous trading.
const OFF_PEAK_MULTIPLIER: u32 = 3;

/// Session phase of the exchange at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketSession {
    PreMarket,
    Open,
    AfterHours,
    Closed,
}

/// Session clock for US equities hours.
///
/// Every band check is `>= start && < end`, so adjacent sessions neither
/// overlap nor leave a gap at the 04:00 / 09:30 / 16:00 / 20:00 boundaries.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExchangeCalendar;

impl ExchangeCalendar {
    pub const fn us_equities() -> Self {
        Self
    }

    /// Classify `t` into a session phase. Saturdays and Sundays are
    /// [`MarketSession::Closed`] regardless of time of day.
    pub fn session(&self, t: UtcDateTime) -> MarketSession {
        let local = t.into_inner().to_offset(eastern_offset(t.into_inner()));

        match local.weekday() {
            Weekday::Saturday | Weekday::Sunday => MarketSession::Closed,
            _ => {
                let minute = u16::from(local.hour()) * 60 + u16::from(local.minute());
                if minute >= PRE_MARKET_START_MIN && minute < OPEN_START_MIN {
                    MarketSession::PreMarket
                } else if minute >= OPEN_START_MIN && minute < OPEN_END_MIN {
                    MarketSession::Open
                } else if minute >= OPEN_END_MIN && minute < AFTER_HOURS_END_MIN {
                    MarketSession::AfterHours
                } else {
                    MarketSession::Closed
                }
            }
        }
    }

    pub fn is_open(&self, t: UtcDateTime) -> bool {
        self.session(t) == MarketSession::Open
    }

    pub fn is_pre_market(&self, t: UtcDateTime) -> bool {
        self.session(t) == MarketSession::PreMarket
    }

    pub fn is_after_hours(&self, t: UtcDateTime) -> bool {
        self.session(t) == MarketSession::AfterHours
    }

    /// Recommended polling interval for `symbols` at instant `t`.
    ///
    /// Round-the-clock symbols always poll at `baseline`. Otherwise the
    /// interval is `baseline` while the market is open, stretched during
    /// pre/after hours, and `None` when fully closed — callers must not
    /// schedule a timer on `None`.
    pub fn polling_interval_at(
        &self,
        t: UtcDateTime,
        symbols: &[Symbol],
        baseline: Duration,
    ) -> Option<Duration> {
        if symbols.iter().any(Symbol::is_round_the_clock) {
            return Some(baseline);
        }

        match self.session(t) {
            MarketSession::Open => Some(baseline),
            MarketSession::PreMarket | MarketSession::AfterHours => {
                Some(baseline * OFF_PEAK_MULTIPLIER)
            }
            MarketSession::Closed => None,
        }
    }

    /// [`Self::polling_interval_at`] evaluated now.
    pub fn polling_interval(&self, symbols: &[Symbol], baseline: Duration) -> Option<Duration> {
        self.polling_interval_at(UtcDateTime::now(), symbols, baseline)
    }
}

/// US Eastern offset for an instant: UTC-4 between 02:00 EST on the second
/// Sunday of March and 02:00 EDT on the first Sunday of November, UTC-5
/// otherwise.
fn eastern_offset(t: OffsetDateTime) -> UtcOffset {
    let standard = UtcOffset::from_hms(-5, 0, 0).expect("static offset");
    let year = t.to_offset(standard).year();

    let dst_start = nth_weekday(year, Month::March, Weekday::Sunday, 2)
        .with_hms(7, 0, 0)
        .expect("07:00 is a valid time")
        .assume_utc(); // 02:00 EST
    let dst_end = nth_weekday(year, Month::November, Weekday::Sunday, 1)
        .with_hms(6, 0, 0)
        .expect("06:00 is a valid time")
        .assume_utc(); // 02:00 EDT

    if t >= dst_start && t < dst_end {
        UtcOffset::from_hms(-4, 0, 0).expect("static offset")
    } else {
        standard
    }
}

fn nth_weekday(year: i32, month: Month, weekday: Weekday, n: u8) -> Date {
    let mut date = Date::from_calendar_date(year, month, 1).expect("first of month is valid");
    while date.weekday() != weekday {
        date = date.next_day().expect("month has a first weekday");
    }
    date + time::Duration::days(7 * i64::from(n - 1))
}
