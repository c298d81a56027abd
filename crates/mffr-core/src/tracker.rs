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

use chrono::{DateTime, Duration};
use chrono_tz::Tz;
use mffr_types::{
    ReferencePriceSource, SLOT_MINUTES, Signal, Slot, SlotPrices, SlotView, Snapshot,
    quarter_start, round_to,
};
use tracing::debug;

use crate::aggregator::{PeriodTotals, ProfitAggregator};
use crate::baseline::BaselineEstimator;
use crate::persistence::StoredTotals;
use crate::pricing::{DEFAULT_MIN_REFETCH_SECS, PriceCache, normalize_price};
use crate::slots::{CancellationPolicy, SlotMachine, SlotStep};

/// Tracking behaviour knobs
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerConfig {
    /// Operator fee in percent, deducted from every profit
    pub fee_percent: f64,
    /// Subtract the idle baseline from battery power
    pub baseline_enabled: bool,
    pub reference_source: ReferencePriceSource,
    pub cancellation: CancellationPolicy,
    /// Minimum spacing between price feed requests
    pub min_refetch: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            fee_percent: 20.0,
            baseline_enabled: true,
            reference_source: ReferencePriceSource::default(),
            cancellation: CancellationPolicy::default(),
            min_refetch: Duration::seconds(DEFAULT_MIN_REFETCH_SECS),
        }
    }
}

/// Raw sensor values read for one tick. `None` means unavailable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickInputs {
    pub battery_mode: Option<String>,
    pub battery_power_w: Option<f64>,
    /// Host reference price, not yet normalized
    pub reference_price: Option<f64>,
    pub grid_power_w: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct TickOutcome {
    pub snapshot: Snapshot,
    /// Totals to persist, present when anything worth saving changed
    pub save: Option<StoredTotals>,
}

/// All tracking state for one site. Pure: time and sensor values come in
/// through [`Tracker::tick`], prices through the cache.
#[derive(Debug, Clone)]
pub struct Tracker {
    config: TrackerConfig,
    prices: PriceCache,
    baseline: BaselineEstimator,
    slots: SlotMachine,
    aggregator: ProfitAggregator,
    last_tick: Option<DateTime<Tz>>,
}

impl Tracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            prices: PriceCache::new(config.min_refetch),
            baseline: BaselineEstimator::new(),
            slots: SlotMachine::new(config.cancellation),
            aggregator: ProfitAggregator::new(config.fee_percent),
            last_tick: None,
            config,
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Replace the period totals, typically with the restored ones at startup
    pub fn restore(&mut self, totals: PeriodTotals) {
        self.aggregator.restore(totals);
    }

    pub fn prices(&self) -> &PriceCache {
        &self.prices
    }

    pub fn prices_mut(&mut self) -> &mut PriceCache {
        &mut self.prices
    }

    pub fn totals(&self) -> &PeriodTotals {
        self.aggregator.totals()
    }

    pub fn active_slot(&self) -> Option<&Slot> {
        self.slots.active()
    }

    /// Finalized slots, newest first
    pub fn recent_slots(&self) -> &VecDeque<Slot> {
        self.aggregator.recent()
    }

    pub fn baseline(&self) -> &BaselineEstimator {
        &self.baseline
    }

    /// Run one polling cycle at `now`
    pub fn tick(&mut self, now: DateTime<Tz>, inputs: &TickInputs) -> TickOutcome {
        let mut save = self.aggregator.roll_periods(&now);

        let elapsed_s = self.last_tick.map_or(0.0, |last| {
            (now - last).num_milliseconds().max(0) as f64 / 1000.0
        });
        self.last_tick = Some(now);

        let signal = inputs
            .battery_mode
            .as_deref()
            .map(Signal::from_mode)
            .unwrap_or_default();
        let battery_w = inputs.battery_power_w.filter(|w| w.is_finite());

        let baseline_w = if self.config.baseline_enabled {
            if let Some(w) = battery_w {
                self.baseline.observe(signal, w);
            }
            if let Some(finalized) = self.baseline.finalize_if_due(&now) {
                self.slots.attach_baseline(finalized);
            }
            Some(self.baseline.current_w())
        } else {
            None
        };

        // Absent power reads as NaN: no energy is credited and the
        // low-power accumulator starts over
        let market_power_w = battery_w.map_or(f64::NAN, |w| (w - baseline_w.unwrap_or(0.0)).abs());

        let cached = self.prices.lookup(&now);
        let host_reference = inputs.reference_price.and_then(normalize_price);
        let (reference, origin) = self
            .config
            .reference_source
            .select(cached.reference, host_reference);

        debug!(
            "⏱️ Tick {}: signal={} battery={:?} W market={:.1} W baseline={:?} balancing={:?} reference={:?} ({}) grid={:?} W",
            now.format("%H:%M:%S"),
            signal,
            battery_w,
            market_power_w,
            baseline_w,
            cached.balancing,
            reference,
            origin,
            inputs.grid_power_w
        );

        let finished = self.slots.advance(&SlotStep {
            now,
            signal,
            elapsed_s,
            market_power_w,
            baseline_w,
            prices: SlotPrices {
                balancing: cached.balancing,
                reference,
            },
        });

        let mut cancelled = false;
        for slot in finished {
            cancelled |= slot.cancelled;
            self.aggregator.settle(slot);
            save = true;
        }

        let backfilled = self
            .aggregator
            .backfill(&self.prices, self.config.reference_source);
        save |= backfilled;

        let totals = self.aggregator.totals();
        let active = self.slots.active();
        let slot_start = quarter_start(&now);

        let snapshot = Snapshot {
            signal,
            mffr_power_w: if market_power_w.is_finite() {
                round_to(market_power_w, 2)
            } else {
                0.0
            },
            slot_energy_kwh: active.map_or(0.0, |slot| round_to(slot.energy_kwh, 6)),
            slot_profit: active
                .and_then(|slot| slot.compute_profit(self.aggregator.fee_fraction()))
                .map(|profit| round_to(profit, 4)),
            today_profit: round_to(totals.today, 4),
            up_count: totals.up_count,
            down_count: totals.down_count,
            week_profit: round_to(totals.week, 4),
            month_profit: round_to(totals.month, 4),
            year_profit: round_to(totals.year, 4),
            all_time_profit: round_to(totals.all_time, 4),
            slot_start,
            slot_end: slot_start + Duration::minutes(SLOT_MINUTES),
            nordpool_price: reference,
            mffr_price: cached.balancing,
            nps_source_active: origin,
            price_cache_hit: !cached.is_empty(),
            last_price_fetch: self.prices.last_fetch(),
            backfilled,
            was_backup: active.is_some_and(|slot| slot.was_backup),
            cancelled,
            baseline_w: baseline_w.map(|w| round_to(w, 2)),
            duration_minutes: active.map_or(0.0, |slot| round_to(slot.duration_s / 60.0, 2)),
            recent_slots: self.aggregator.recent().iter().map(SlotView::from).collect(),
        };

        TickOutcome {
            snapshot,
            save: save.then(|| StoredTotals::from(totals)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pricing::FeedRecord;
    use chrono::{TimeZone, Utc};
    use chrono_tz::Europe::Tallinn;
    use mffr_types::PriceOrigin;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Tz> {
        Tallinn.with_ymd_and_hms(2025, 6, 3, h, m, s).unwrap()
    }

    fn inputs(mode: &str, power_w: f64, reference: f64) -> TickInputs {
        TickInputs {
            battery_mode: Some(mode.to_string()),
            battery_power_w: Some(power_w),
            reference_price: Some(reference),
            grid_power_w: None,
        }
    }

    #[test]
    fn test_first_tick_adopts_periods_without_save() {
        let mut tracker = Tracker::new(TrackerConfig::default());
        let outcome = tracker.tick(at(12, 3, 0), &inputs("Self Use", 150.0, 80.0));

        assert!(outcome.save.is_none());
        assert_eq!(outcome.snapshot.signal, Signal::Idle);
        assert_eq!(outcome.snapshot.slot_start, at(12, 0, 0));
        assert_eq!(outcome.snapshot.slot_end, at(12, 15, 0));
        assert_eq!(outcome.snapshot.nordpool_price, Some(0.08));
        assert_eq!(outcome.snapshot.nps_source_active, PriceOrigin::Ha);
        assert!(!outcome.snapshot.price_cache_hit);
    }

    #[test]
    fn test_baseline_is_subtracted_from_market_power() {
        let mut tracker = Tracker::new(TrackerConfig::default());
        tracker.tick(at(12, 0, 0), &inputs("Self Use", 200.0, 0.08));
        tracker.tick(at(12, 0, 10), &inputs("Self Use", 400.0, 0.08));

        let outcome = tracker.tick(at(12, 0, 20), &inputs("Fusebox Sell", -2700.0, 0.08));
        assert_eq!(outcome.snapshot.signal, Signal::Up);
        assert_eq!(outcome.snapshot.baseline_w, Some(300.0));
        assert_eq!(outcome.snapshot.mffr_power_w, 3000.0);
        assert_eq!(tracker.active_slot().unwrap().baseline_w, Some(300.0));
    }

    #[test]
    fn test_baseline_disabled_uses_raw_magnitude() {
        let mut tracker = Tracker::new(TrackerConfig {
            baseline_enabled: false,
            ..Default::default()
        });
        let outcome = tracker.tick(at(12, 0, 0), &inputs("Fusebox Buy", -2500.0, 0.08));

        assert_eq!(outcome.snapshot.mffr_power_w, 2500.0);
        assert_eq!(outcome.snapshot.baseline_w, None);
        assert_eq!(tracker.active_slot().unwrap().baseline_w, None);
    }

    #[test]
    fn test_api_source_prefers_feed_reference() {
        let mut tracker = Tracker::new(TrackerConfig {
            reference_source: ReferencePriceSource::Api,
            ..Default::default()
        });
        tracker.prices_mut().merge([FeedRecord {
            start: at(12, 0, 0).with_timezone(&Utc),
            balancing_price: 0.12,
            reference_price: Some(0.06),
        }]);

        let outcome = tracker.tick(at(12, 5, 0), &inputs("idle", 0.0, 0.08));
        assert_eq!(outcome.snapshot.nordpool_price, Some(0.06));
        assert_eq!(outcome.snapshot.mffr_price, Some(0.12));
        assert_eq!(outcome.snapshot.nps_source_active, PriceOrigin::Api);
        assert!(outcome.snapshot.price_cache_hit);
    }

    #[test]
    fn test_missing_power_credits_no_energy() {
        let mut tracker = Tracker::new(TrackerConfig::default());
        tracker.tick(at(12, 0, 0), &inputs("sell", 1000.0, 0.08));
        tracker.tick(
            at(12, 0, 10),
            &TickInputs {
                battery_mode: Some("sell".to_string()),
                ..Default::default()
            },
        );

        let slot = tracker.active_slot().unwrap();
        assert_eq!(slot.energy_kwh, 0.0);
        assert_eq!(slot.duration_s, 0.0);
    }

    #[test]
    fn test_missing_mode_reads_as_idle() {
        let mut tracker = Tracker::new(TrackerConfig::default());
        tracker.tick(at(12, 0, 0), &inputs("sell", 1000.0, 0.08));
        let outcome = tracker.tick(at(12, 0, 10), &TickInputs::default());

        assert_eq!(outcome.snapshot.signal, Signal::Idle);
        assert!(outcome.snapshot.cancelled);
        assert!(outcome.save.is_some());
        assert!(tracker.active_slot().is_none());
    }
}
