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


//! Read-only view of the tracker state, emitted once per tick for the
//! presentation layer. Field names match the dashboard attributes.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;

use crate::pricing::PriceOrigin;
use crate::signal::{Direction, Signal};
use crate::slot::Slot;

/// Round to a fixed number of decimal places for display
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// One finalized slot as shown in the recent-slots list
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlotView {
    pub timeslot: DateTime<Tz>,
    pub signal: Direction,
    pub energy_kwh: f64,
    pub profit: Option<f64>,
    pub was_backup: bool,
    pub cancelled: bool,
    pub baseline_w: Option<f64>,
    pub mffr_price: Option<f64>,
    pub nordpool_price: Option<f64>,
}

impl From<&Slot> for SlotView {
    fn from(slot: &Slot) -> Self {
        Self {
            timeslot: slot.start,
            signal: slot.direction,
            energy_kwh: round_to(slot.energy_kwh, 6),
            profit: slot.profit.map(|p| round_to(p, 4)),
            was_backup: slot.was_backup,
            cancelled: slot.cancelled,
            baseline_w: slot.baseline_w.map(|w| round_to(w, 2)),
            mffr_price: slot.balancing_price,
            nordpool_price: slot.reference_price,
        }
    }
}

/// Snapshot of one polling tick
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub signal: Signal,
    /// Market-driven battery power (W), baseline removed when enabled
    pub mffr_power_w: f64,
    pub slot_energy_kwh: f64,
    pub slot_profit: Option<f64>,
    pub today_profit: f64,
    pub up_count: u32,
    pub down_count: u32,
    pub week_profit: f64,
    pub month_profit: f64,
    pub year_profit: f64,
    pub all_time_profit: f64,
    pub slot_start: DateTime<Tz>,
    pub slot_end: DateTime<Tz>,
    /// Chosen reference price for the current slot
    pub nordpool_price: Option<f64>,
    pub mffr_price: Option<f64>,
    pub nps_source_active: PriceOrigin,
    pub price_cache_hit: bool,
    pub last_price_fetch: Option<DateTime<Utc>>,
    /// A late price completed at least one finalized slot this tick
    pub backfilled: bool,
    pub was_backup: bool,
    pub cancelled: bool,
    pub baseline_w: Option<f64>,
    pub duration_minutes: f64,
    pub recent_slots: Vec<SlotView>,
}
