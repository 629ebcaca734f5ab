//! Behavior-driven tests for the exchange session clock
//!
//! These tests verify HOW the system classifies instants into trading
//! sessions and derives polling cadence, across session boundaries, DST
//! transitions, weekends, and round-the-clock assets.

use std::time::Duration;

use tickwatch_core::{ExchangeCalendar, MarketSession, Symbol, UtcDateTime};

fn at(rfc3339: &str) -> UtcDateTime {
    UtcDateTime::parse(rfc3339).expect("valid test instant")
}

fn sym(s: &str) -> Symbol {
    Symbol::parse(s).expect("valid test symbol")
}

// =============================================================================
// Session Clock: Boundary Classification
// =============================================================================

#[test]
fn when_clock_hits_0930_eastern_market_flips_from_premarket_to_open() {
    // Given: A summer trading day (2025-06-03 is a Tuesday, EDT = UTC-4)
    let calendar = ExchangeCalendar::us_equities();

    // When/Then: One second before the bell is still pre-market
    assert_eq!(
        calendar.session(at("2025-06-03T13:29:59Z")),
        MarketSession::PreMarket
    );
    // And: The opening minute itself is Open (half-open band)
    assert_eq!(
        calendar.session(at("2025-06-03T13:30:00Z")),
        MarketSession::Open
    );
    assert!(calendar.is_open(at("2025-06-03T13:30:00Z")));
}

#[test]
fn when_clock_hits_1600_eastern_market_flips_from_open_to_after_hours() {
    let calendar = ExchangeCalendar::us_equities();

    assert_eq!(
        calendar.session(at("2025-06-03T19:59:59Z")),
        MarketSession::Open
    );
    assert_eq!(
        calendar.session(at("2025-06-03T20:00:00Z")),
        MarketSession::AfterHours
    );
    assert!(calendar.is_after_hours(at("2025-06-03T20:00:00Z")));
}

#[test]
fn when_clock_passes_2000_eastern_market_is_closed_until_0400() {
    let calendar = ExchangeCalendar::us_equities();

    // 20:00 ET ends the extended session
    assert_eq!(
        calendar.session(at("2025-06-04T00:00:00Z")),
        MarketSession::Closed
    );
    // 03:59 ET is still overnight
    assert_eq!(
        calendar.session(at("2025-06-03T07:59:59Z")),
        MarketSession::Closed
    );
    // 04:00 ET starts pre-market
    assert_eq!(
        calendar.session(at("2025-06-03T08:00:00Z")),
        MarketSession::PreMarket
    );
    assert!(calendar.is_pre_market(at("2025-06-03T08:00:00Z")));
}

// =============================================================================
// Session Clock: DST Transitions
// =============================================================================

#[test]
fn when_dst_is_not_in_effect_the_bell_shifts_to_1430_utc() {
    // Given: A winter trading day (2025-01-15 is a Wednesday, EST = UTC-5)
    let calendar = ExchangeCalendar::us_equities();

    assert_eq!(
        calendar.session(at("2025-01-15T14:29:59Z")),
        MarketSession::PreMarket
    );
    assert_eq!(
        calendar.session(at("2025-01-15T14:30:00Z")),
        MarketSession::Open
    );
    // 13:30Z, the summer bell, is still pre-market in January
    assert_eq!(
        calendar.session(at("2025-01-15T13:30:00Z")),
        MarketSession::PreMarket
    );
}

#[test]
fn when_dst_starts_and_ends_the_offset_switches_on_the_right_sundays() {
    // 2025: DST runs from March 9 (2nd Sunday) to November 2 (1st Sunday)
    let calendar = ExchangeCalendar::us_equities();

    // Friday March 7: still EST, bell at 14:30Z
    assert_eq!(
        calendar.session(at("2025-03-07T13:30:00Z")),
        MarketSession::PreMarket
    );
    assert_eq!(
        calendar.session(at("2025-03-07T14:30:00Z")),
        MarketSession::Open
    );

    // Monday March 10: EDT, bell at 13:30Z
    assert_eq!(
        calendar.session(at("2025-03-10T13:30:00Z")),
        MarketSession::Open
    );

    // Monday November 3: back to EST
    assert_eq!(
        calendar.session(at("2025-11-03T13:30:00Z")),
        MarketSession::PreMarket
    );
    assert_eq!(
        calendar.session(at("2025-11-03T14:30:00Z")),
        MarketSession::Open
    );
}

// =============================================================================
// Session Clock: Weekends
// =============================================================================

#[test]
fn when_it_is_the_weekend_every_hour_is_closed() {
    let calendar = ExchangeCalendar::us_equities();

    // 2025-06-07 is a Saturday; mid-morning ET would otherwise be Open
    assert_eq!(
        calendar.session(at("2025-06-07T14:30:00Z")),
        MarketSession::Closed
    );
    // Sunday evening ET would otherwise be after-hours
    assert_eq!(
        calendar.session(at("2025-06-08T21:00:00Z")),
        MarketSession::Closed
    );
    assert!(!calendar.is_open(at("2025-06-07T14:30:00Z")));
}

// =============================================================================
// Polling Cadence
// =============================================================================

#[test]
fn when_market_is_open_equities_poll_at_the_baseline() {
    let calendar = ExchangeCalendar::us_equities();
    let baseline = Duration::from_secs(10);

    let interval =
        calendar.polling_interval_at(at("2025-06-03T15:00:00Z"), &[sym("AAPL")], baseline);
    assert_eq!(interval, Some(baseline));
}

#[test]
fn when_market_is_in_extended_hours_polling_stretches_threefold() {
    let calendar = ExchangeCalendar::us_equities();
    let baseline = Duration::from_secs(10);

    // Pre-market
    let interval =
        calendar.polling_interval_at(at("2025-06-03T12:00:00Z"), &[sym("AAPL")], baseline);
    assert_eq!(interval, Some(Duration::from_secs(30)));

    // After-hours
    let interval =
        calendar.polling_interval_at(at("2025-06-03T21:00:00Z"), &[sym("AAPL")], baseline);
    assert_eq!(interval, Some(Duration::from_secs(30)));
}

#[test]
fn when_market_is_closed_equities_do_not_poll_at_all() {
    let calendar = ExchangeCalendar::us_equities();

    let interval = calendar.polling_interval_at(
        at("2025-06-07T14:30:00Z"), // Saturday
        &[sym("AAPL"), sym("MSFT")],
        Duration::from_secs(10),
    );
    assert_eq!(interval, None, "no timer should be scheduled on None");
}

#[test]
fn when_any_symbol_trades_round_the_clock_polling_never_pauses() {
    let calendar = ExchangeCalendar::us_equities();
    let baseline = Duration::from_secs(10);
    let weekend = at("2025-06-07T14:30:00Z");

    // A crypto pair keeps the whole watch list on the baseline cadence
    for always_on in [sym("X:BTCUSD"), sym("ETH-USD"), sym("SOL-USDT")] {
        let interval =
            calendar.polling_interval_at(weekend, &[sym("AAPL"), always_on], baseline);
        assert_eq!(interval, Some(baseline));
    }

    // Plain equities alone still pause on the weekend
    assert_eq!(
        calendar.polling_interval_at(weekend, &[sym("AAPL")], baseline),
        None
    );
}
