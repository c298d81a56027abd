// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of mffr-tracker.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz


//! Price normalization and the per-slot price cache.

pub mod cache;
pub mod frr;

pub use cache::{DEFAULT_MIN_REFETCH_SECS, PriceCache};
pub use frr::{DEFAULT_FRR_URL, FeedError, FeedRecord, FrrPriceFeed};

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone};
use serde_json::Value;

/// Prices above this magnitude are quoted per MWh and get scaled down
pub const MWH_PRICE_THRESHOLD: f64 = 5.0;

/// Bring a raw price to EUR per kWh.
///
/// Values with `|v| > 5` are taken to be EUR/MWh and divided by 1000.
/// Non-finite values yield `None`.
pub fn normalize_price(raw: f64) -> Option<f64> {
    if !raw.is_finite() {
        return None;
    }
    if raw.abs() > MWH_PRICE_THRESHOLD {
        Some(raw / 1000.0)
    } else {
        Some(raw)
    }
}

/// Parse a textual price and normalize it
pub fn parse_price(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().and_then(normalize_price)
}

/// Read a price out of a JSON value, accepting numbers and numeric strings
pub fn price_from_json(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().and_then(normalize_price),
        Value::String(s) => parse_price(s),
        _ => None,
    }
}

/// Parse a feed timestamp.
///
/// Accepts RFC 3339 as well as a space instead of `T` and offsets without a
/// colon (`+0300`). Timestamps without any offset are read in `tz`.
pub fn parse_feed_timestamp<Tz: TimeZone>(raw: &str, tz: &Tz) -> Option<DateTime<FixedOffset>> {
    let raw = raw.trim();
    if raw.is_empty() || !raw.is_ascii() {
        return None;
    }
    let mut text = raw.replacen(' ', "T", 1);

    let len = text.len();
    if len > 5 {
        let bytes = text.as_bytes();
        let sign = bytes[len - 5];
        let digits = bytes[len - 4..].iter().all(u8::is_ascii_digit);
        if (sign == b'+' || sign == b'-') && digits && bytes[len - 6].is_ascii_digit() {
            text.insert(len - 2, ':');
        }
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(&text) {
        return Some(parsed);
    }

    let naive = NaiveDateTime::parse_from_str(&text, "%Y-%m-%dT%H:%M:%S%.f").ok()?;
    tz.from_local_datetime(&naive)
        .earliest()
        .map(|local| local.fixed_offset())
}
