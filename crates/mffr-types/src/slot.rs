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


use chrono::{DateTime, Duration, TimeZone, Timelike};
use chrono_tz::Tz;
use serde::Serialize;

use crate::pricing::SlotPrices;
use crate::signal::Direction;

/// Length of one accounting slot
pub const SLOT_MINUTES: i64 = 15;

/// Start of the quarter-hour containing `ts` (:00, :15, :30 or :45, zero seconds)
pub fn quarter_start<T: TimeZone>(ts: &DateTime<T>) -> DateTime<T> {
    let into_quarter = i64::from((ts.minute() % 15) * 60 + ts.second());
    ts.clone()
        - Duration::seconds(into_quarter)
        - Duration::nanoseconds(i64::from(ts.nanosecond()))
}

/// One 15-minute accounting interval of balancing-market activity
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Slot {
    /// Quarter-hour aligned start
    pub start: DateTime<Tz>,
    /// Always `start + 15 min`
    pub end: DateTime<Tz>,
    pub direction: Direction,
    pub energy_kwh: f64,
    pub duration_s: f64,
    /// Slot did not start on the quarter-hour boundary
    pub was_backup: bool,
    pub cancelled: bool,
    /// Idle-power estimate captured once for this slot
    pub baseline_w: Option<f64>,
    pub balancing_price: Option<f64>,
    pub reference_price: Option<f64>,
    /// Signed currency amount, set once both prices are known
    pub profit: Option<f64>,
}

impl Slot {
    /// Open a slot on the quarter-hour grid cell containing `now`
    pub fn open(now: &DateTime<Tz>, direction: Direction, was_backup: bool) -> Self {
        let start = quarter_start(now);
        let end = start + Duration::minutes(SLOT_MINUTES);
        Self {
            start,
            end,
            direction,
            energy_kwh: 0.0,
            duration_s: 0.0,
            was_backup,
            cancelled: false,
            baseline_w: None,
            balancing_price: None,
            reference_price: None,
            profit: None,
        }
    }

    pub fn is_settled(&self) -> bool {
        self.profit.is_some()
    }

    /// Fill whichever prices are still missing, never overwriting known ones
    pub fn fill_missing_prices(&mut self, prices: SlotPrices) {
        if self.balancing_price.is_none() {
            self.balancing_price = prices.balancing;
        }
        if self.reference_price.is_none() {
            self.reference_price = prices.reference;
        }
    }

    /// Profit this slot would earn with its current prices and energy.
    ///
    /// UP sells balancing energy against the reference price, DOWN buys it:
    /// `(balancing - reference) * energy * (1 - fee)` and the mirror image.
    /// `None` until both prices are known and some energy was delivered.
    pub fn compute_profit(&self, fee_fraction: f64) -> Option<f64> {
        let balancing = self.balancing_price?;
        let reference = self.reference_price?;
        if self.energy_kwh <= 0.0 {
            return None;
        }
        let spread = match self.direction {
            Direction::Up => balancing - reference,
            Direction::Down => reference - balancing,
        };
        Some(spread * self.energy_kwh * (1.0 - fee_fraction))
    }

    /// Compute and store the profit if it is not set yet.
    ///
    /// Returns the amount only when it was settled by this call, so callers can add
    /// it to running totals without ever counting a slot twice.
    pub fn settle(&mut self, fee_fraction: f64) -> Option<f64> {
        if self.is_settled() {
            return None;
        }
        let profit = self.compute_profit(fee_fraction)?;
        self.profit = Some(profit);
        Some(profit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::Europe::Tallinn;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Tz> {
        Tallinn.with_ymd_and_hms(2025, 6, 3, h, m, s).unwrap()
    }

    #[test]
    fn test_quarter_start_alignment() {
        assert_eq!(quarter_start(&at(10, 0, 0)), at(10, 0, 0));
        assert_eq!(quarter_start(&at(10, 14, 59)), at(10, 0, 0));
        assert_eq!(quarter_start(&at(10, 15, 0)), at(10, 15, 0));
        assert_eq!(quarter_start(&at(10, 44, 7)), at(10, 30, 0));
        assert_eq!(quarter_start(&at(23, 59, 59)), at(23, 45, 0));
    }

    #[test]
    fn test_open_spans_exactly_one_quarter() {
        let slot = Slot::open(&at(8, 37, 12), Direction::Up, true);
        assert_eq!(slot.start, at(8, 30, 0));
        assert_eq!(slot.end, at(8, 45, 0));
        assert_eq!(slot.end - slot.start, Duration::minutes(15));
        assert!(slot.profit.is_none());
    }

    #[test]
    fn test_profit_up_and_down() {
        let mut slot = Slot::open(&at(12, 0, 0), Direction::Up, false);
        slot.energy_kwh = 0.25;
        slot.balancing_price = Some(0.10);
        slot.reference_price = Some(0.08);
        let up = slot.compute_profit(0.2).unwrap();
        assert!((up - 0.004).abs() < 1e-12);

        slot.direction = Direction::Down;
        let down = slot.compute_profit(0.2).unwrap();
        assert!((down + 0.004).abs() < 1e-12);
    }

    #[test]
    fn test_profit_requires_prices_and_energy() {
        let mut slot = Slot::open(&at(12, 0, 0), Direction::Up, false);
        slot.balancing_price = Some(0.10);
        slot.reference_price = Some(0.08);
        assert_eq!(slot.compute_profit(0.0), None);

        slot.energy_kwh = 0.1;
        slot.reference_price = None;
        assert_eq!(slot.compute_profit(0.0), None);
    }

    #[test]
    fn test_settle_only_once() {
        let mut slot = Slot::open(&at(12, 0, 0), Direction::Up, false);
        slot.energy_kwh = 1.0;
        slot.balancing_price = Some(0.30);
        slot.reference_price = Some(0.10);

        assert!(slot.settle(0.0).is_some());
        let settled = slot.profit;

        slot.balancing_price = Some(0.90);
        assert_eq!(slot.settle(0.0), None);
        assert_eq!(slot.profit, settled);
    }

    #[test]
    fn test_fill_missing_prices_keeps_known() {
        let mut slot = Slot::open(&at(12, 0, 0), Direction::Down, false);
        slot.reference_price = Some(0.05);
        slot.fill_missing_prices(SlotPrices {
            balancing: Some(0.02),
            reference: Some(0.07),
        });
        assert_eq!(slot.balancing_price, Some(0.02));
        assert_eq!(slot.reference_price, Some(0.05));
    }
}
