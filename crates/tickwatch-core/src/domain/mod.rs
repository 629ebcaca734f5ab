//! Canonical domain types for tickwatch.
//!
//! Strongly-typed, validated-at-construction foundations the rest of the
//! crate builds on:
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Symbol`] | Validated market ticker, with 24/7-pair recognition |
//! | [`UtcDateTime`] | RFC3339 UTC timestamp with epoch-ms accessors |

mod symbol;
mod timestamp;

pub use symbol::Symbol;
pub use timestamp::UtcDateTime;
