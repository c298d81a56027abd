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


use std::collections::VecDeque;

use chrono::{DateTime, Datelike, NaiveDate};
use chrono_tz::Tz;
use mffr_types::{Direction, ReferencePriceSource, Slot, SlotPrices};
use tracing::info;

use crate::pricing::PriceCache;

/// Number of finalized slots kept for display and backfill
pub const RECENT_SLOTS_CAPACITY: usize = 48;

/// Profit totals per calendar period plus per-day activation counters.
///
/// A key of `None` means the period has not been seen yet; the first roll
/// adopts the current period without resetting anything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PeriodTotals {
    pub today: f64,
    pub week: f64,
    pub month: f64,
    pub year: f64,
    pub all_time: f64,
    pub up_count: u32,
    pub down_count: u32,
    pub day_key: Option<NaiveDate>,
    /// ISO (year, week)
    pub week_key: Option<(i32, u32)>,
    /// (year, month)
    pub month_key: Option<(i32, u32)>,
    pub year_key: Option<i32>,
}

/// Adopt `current` as the stored key. True if a different key was replaced.
fn roll_key<K: PartialEq + Copy>(stored: &mut Option<K>, current: K) -> bool {
    let changed = stored.is_some_and(|key| key != current);
    *stored = Some(current);
    changed
}

impl PeriodTotals {
    /// Reset every period whose key no longer matches `now`.
    ///
    /// Returns true if anything was reset; the caller should persist then.
    pub fn roll(&mut self, now: &DateTime<Tz>) -> bool {
        let mut reset = false;

        if roll_key(&mut self.day_key, now.date_naive()) {
            info!(
                "📅 New day {}: resetting daily profit {:.4} and counters ({} up / {} down)",
                now.date_naive(),
                self.today,
                self.up_count,
                self.down_count
            );
            self.today = 0.0;
            self.up_count = 0;
            self.down_count = 0;
            reset = true;
        }

        let iso = now.iso_week();
        if roll_key(&mut self.week_key, (iso.year(), iso.week())) {
            info!("📅 New ISO week {}-W{:02}", iso.year(), iso.week());
            self.week = 0.0;
            reset = true;
        }

        if roll_key(&mut self.month_key, (now.year(), now.month())) {
            info!("📅 New month {}-{:02}", now.year(), now.month());
            self.month = 0.0;
            reset = true;
        }

        if roll_key(&mut self.year_key, now.year()) {
            info!("📅 New year {}", now.year());
            self.year = 0.0;
            reset = true;
        }

        reset
    }

    /// Credit a profit to every period
    pub fn add_profit(&mut self, profit: f64) {
        self.today += profit;
        self.week += profit;
        self.month += profit;
        self.year += profit;
        self.all_time += profit;
    }

    pub fn count_activation(&mut self, direction: Direction) {
        match direction {
            Direction::Up => self.up_count += 1,
            Direction::Down => self.down_count += 1,
        }
    }
}

/// Settles finalized slots into the period totals and keeps the recent history
#[derive(Debug, Clone)]
pub struct ProfitAggregator {
    totals: PeriodTotals,
    /// Newest first
    recent: VecDeque<Slot>,
    capacity: usize,
    fee_fraction: f64,
}

impl ProfitAggregator {
    /// `fee_percent` is the operator's cut, 0-100
    pub fn new(fee_percent: f64) -> Self {
        Self {
            totals: PeriodTotals::default(),
            recent: VecDeque::with_capacity(RECENT_SLOTS_CAPACITY),
            capacity: RECENT_SLOTS_CAPACITY,
            fee_fraction: fee_percent / 100.0,
        }
    }

    pub fn totals(&self) -> &PeriodTotals {
        &self.totals
    }

    pub fn restore(&mut self, totals: PeriodTotals) {
        self.totals = totals;
    }

    /// Finalized slots, newest first
    pub fn recent(&self) -> &VecDeque<Slot> {
        &self.recent
    }

    pub fn fee_fraction(&self) -> f64 {
        self.fee_fraction
    }

    pub fn roll_periods(&mut self, now: &DateTime<Tz>) -> bool {
        self.totals.roll(now)
    }

    /// Account a slot that was just finalized
    pub fn settle(&mut self, mut slot: Slot) {
        let profit = slot.settle(self.fee_fraction);
        if let Some(profit) = profit {
            self.totals.add_profit(profit);
        }
        self.totals.count_activation(slot.direction);

        info!(
            "✅ {} slot {} finalized: {:.4} kWh, profit {}{}",
            slot.direction,
            slot.start.format("%H:%M"),
            slot.energy_kwh,
            profit.map_or_else(|| "pending".to_string(), |p| format!("{p:.4}")),
            if slot.cancelled { " (cancelled)" } else { "" }
        );

        self.recent.push_front(slot);
        self.recent.truncate(self.capacity);
    }

    /// Complete recent slots whose prices were missing at finalization.
    ///
    /// The reference price is re-selected from the cache alone; host sensor
    /// values are never substituted for past slots. Returns true if any slot
    /// got a profit.
    pub fn backfill(&mut self, prices: &PriceCache, source: ReferencePriceSource) -> bool {
        let mut backfilled = false;

        for slot in self.recent.iter_mut() {
            if slot.is_settled() || slot.energy_kwh <= 0.0 {
                continue;
            }
            let cached = prices.lookup(&slot.start);
            let (reference, _) = source.select(cached.reference, None);
            slot.fill_missing_prices(SlotPrices {
                balancing: cached.balancing,
                reference,
            });

            if let Some(profit) = slot.settle(self.fee_fraction) {
                self.totals.add_profit(profit);
                backfilled = true;
                info!(
                    "🔁 Backfilled {} slot {}: profit {:.4}",
                    slot.direction,
                    slot.start.format("%Y-%m-%d %H:%M"),
                    profit
                );
            }
        }

        backfilled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pricing::FeedRecord;
    use chrono::{TimeZone, Utc};
    use chrono_tz::Europe::Tallinn;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Tz> {
        Tallinn.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    fn finished_slot(start: DateTime<Tz>, direction: Direction, energy_kwh: f64) -> Slot {
        let mut slot = Slot::open(&start, direction, false);
        slot.energy_kwh = energy_kwh;
        slot.duration_s = 900.0;
        slot
    }

    #[test]
    fn test_first_roll_adopts_without_reset() {
        let mut totals = PeriodTotals {
            today: 1.0,
            ..Default::default()
        };
        assert!(!totals.roll(&at(2025, 6, 3, 12, 0)));
        assert_eq!(totals.today, 1.0);
        assert_eq!(totals.day_key, Some(NaiveDate::from_ymd_opt(2025, 6, 3).unwrap()));
        assert_eq!(totals.month_key, Some((2025, 6)));
    }

    #[test]
    fn test_day_rollover_resets_daily_only() {
        let mut totals = PeriodTotals::default();
        totals.roll(&at(2025, 6, 3, 23, 59));
        totals.add_profit(0.5);
        totals.count_activation(Direction::Up);

        assert!(totals.roll(&at(2025, 6, 4, 0, 0)));
        assert_eq!(totals.today, 0.0);
        assert_eq!(totals.up_count, 0);
        assert_eq!(totals.week, 0.5);
        assert_eq!(totals.month, 0.5);
        assert_eq!(totals.all_time, 0.5);

        assert!(!totals.roll(&at(2025, 6, 4, 0, 15)));
    }

    #[test]
    fn test_year_end_keeps_iso_week() {
        // 2025-12-31 and 2026-01-01 both fall in ISO week 2026-W01
        let mut totals = PeriodTotals::default();
        totals.roll(&at(2025, 12, 31, 23, 45));
        totals.add_profit(1.25);

        assert!(totals.roll(&at(2026, 1, 1, 0, 0)));
        assert_eq!(totals.week, 1.25);
        assert_eq!(totals.month, 0.0);
        assert_eq!(totals.year, 0.0);
        assert_eq!(totals.all_time, 1.25);
        assert_eq!(totals.week_key, Some((2026, 1)));
    }

    #[test]
    fn test_settle_counts_and_keeps_history_bounded() {
        let mut aggregator = ProfitAggregator::new(20.0);
        let start = at(2025, 6, 3, 0, 0);

        for i in 0..50 {
            let mut slot = finished_slot(start + chrono::Duration::minutes(15 * i), Direction::Down, 0.1);
            slot.balancing_price = Some(0.05);
            slot.reference_price = Some(0.1);
            aggregator.settle(slot);
        }

        assert_eq!(aggregator.recent().len(), RECENT_SLOTS_CAPACITY);
        assert_eq!(aggregator.totals().down_count, 50);
        assert!((aggregator.totals().all_time - 50.0 * 0.004).abs() < 1e-9);
        assert_eq!(
            aggregator.recent().front().unwrap().start,
            start + chrono::Duration::minutes(15 * 49)
        );
    }

    #[test]
    fn test_settle_without_prices_leaves_profit_pending() {
        let mut aggregator = ProfitAggregator::new(20.0);
        aggregator.settle(finished_slot(at(2025, 6, 3, 12, 0), Direction::Up, 0.25));

        assert_eq!(aggregator.recent()[0].profit, None);
        assert_eq!(aggregator.totals().up_count, 1);
        assert_eq!(aggregator.totals().all_time, 0.0);
    }

    #[test]
    fn test_backfill_is_idempotent() {
        let slot_start = at(2025, 6, 3, 12, 0);
        let mut aggregator = ProfitAggregator::new(20.0);
        aggregator.settle(finished_slot(slot_start, Direction::Up, 0.25));

        let mut cache = PriceCache::default();
        assert!(!aggregator.backfill(&cache, ReferencePriceSource::Api));

        cache.merge([FeedRecord {
            start: slot_start.with_timezone(&Utc),
            balancing_price: 0.1,
            reference_price: Some(0.08),
        }]);
        assert!(aggregator.backfill(&cache, ReferencePriceSource::Api));
        let profit = aggregator.recent()[0].profit.unwrap();
        assert!((profit - 0.004).abs() < 1e-12);

        cache.merge([FeedRecord {
            start: slot_start.with_timezone(&Utc),
            balancing_price: 0.5,
            reference_price: Some(0.01),
        }]);
        assert!(!aggregator.backfill(&cache, ReferencePriceSource::Api));
        assert_eq!(aggregator.recent()[0].profit, Some(profit));
        assert!((aggregator.totals().all_time - 0.004).abs() < 1e-12);
    }

    #[test]
    fn test_backfill_in_ha_mode_needs_stored_reference() {
        let slot_start = at(2025, 6, 3, 12, 0);
        let mut aggregator = ProfitAggregator::new(0.0);
        aggregator.settle(finished_slot(slot_start, Direction::Up, 0.25));

        let mut cache = PriceCache::default();
        cache.merge([FeedRecord {
            start: slot_start.with_timezone(&Utc),
            balancing_price: 0.1,
            reference_price: Some(0.08),
        }]);

        assert!(!aggregator.backfill(&cache, ReferencePriceSource::Ha));
        assert_eq!(aggregator.recent()[0].balancing_price, Some(0.1));
        assert_eq!(aggregator.recent()[0].reference_price, None);
    }

    #[test]
    fn test_backfill_skips_zero_energy_slots() {
        let slot_start = at(2025, 6, 3, 12, 0);
        let mut aggregator = ProfitAggregator::new(0.0);
        aggregator.settle(finished_slot(slot_start, Direction::Up, 0.0));

        let mut cache = PriceCache::default();
        cache.merge([FeedRecord {
            start: slot_start.with_timezone(&Utc),
            balancing_price: 0.1,
            reference_price: Some(0.08),
        }]);
        assert!(!aggregator.backfill(&cache, ReferencePriceSource::Api));
        assert_eq!(aggregator.recent()[0].profit, None);
    }
}
