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


use chrono::{DateTime, Timelike};
use chrono_tz::Tz;
use mffr_types::{Direction, Signal, Slot, SlotPrices};
use tracing::{debug, info};

/// Market power at or below this counts as "not delivering"
pub const DEFAULT_LOW_POWER_THRESHOLD_W: f64 = 100.0;
/// Continuous low-power time after which an active slot is cancelled
pub const DEFAULT_CANCEL_GRACE_SECS: f64 = 60.0;
/// Ticks this close after a quarter boundary still count as a clean start
pub const BOUNDARY_TOLERANCE_SECS: u32 = 10;

/// When a slot that stopped delivering power gets cancelled
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CancellationPolicy {
    pub low_power_threshold_w: f64,
    pub grace_secs: f64,
}

impl Default for CancellationPolicy {
    fn default() -> Self {
        Self {
            low_power_threshold_w: DEFAULT_LOW_POWER_THRESHOLD_W,
            grace_secs: DEFAULT_CANCEL_GRACE_SECS,
        }
    }
}

/// Everything the state machine needs from one tick
#[derive(Debug, Clone)]
pub struct SlotStep {
    pub now: DateTime<Tz>,
    pub signal: Signal,
    /// Seconds since the previous tick
    pub elapsed_s: f64,
    /// Market-driven power, always >= 0
    pub market_power_w: f64,
    /// Baseline to attach to the slot, `None` when baseline tracking is off
    pub baseline_w: Option<f64>,
    /// Balancing price and chosen reference price of the current slot
    pub prices: SlotPrices,
}

/// True when `now` is within the first seconds of a quarter-hour
pub fn starts_on_boundary(now: &DateTime<Tz>) -> bool {
    now.minute() % 15 == 0 && now.second() < BOUNDARY_TOLERANCE_SECS
}

/// Open/close logic for accounting slots. At most one slot is open at a time.
#[derive(Debug, Clone, Default)]
pub struct SlotMachine {
    active: Option<Slot>,
    low_power_s: f64,
    policy: CancellationPolicy,
}

impl SlotMachine {
    pub fn new(policy: CancellationPolicy) -> Self {
        Self {
            active: None,
            low_power_s: 0.0,
            policy,
        }
    }

    pub fn active(&self) -> Option<&Slot> {
        self.active.as_ref()
    }

    pub fn policy(&self) -> &CancellationPolicy {
        &self.policy
    }

    /// Seconds of continuous low power on the active slot
    pub fn low_power_secs(&self) -> f64 {
        self.low_power_s
    }

    /// Give the active slot a baseline if it has none yet
    pub fn attach_baseline(&mut self, baseline_w: f64) {
        if let Some(slot) = self.active.as_mut()
            && slot.baseline_w.is_none()
        {
            slot.baseline_w = Some(baseline_w);
        }
    }

    /// Apply one tick. Returns the slots finalized by it, oldest first.
    ///
    /// The interval since the previous tick is credited to whichever slot is
    /// open after the tick, including one opened by it.
    pub fn advance(&mut self, step: &SlotStep) -> Vec<Slot> {
        let mut finished = Vec::new();

        match step.signal.direction() {
            Some(direction) => {
                match self.active.as_ref().map(|slot| slot.direction) {
                    None => self.open(&step.now, direction, !starts_on_boundary(&step.now)),
                    Some(open) if open != direction => {
                        finished.extend(self.close(false));
                        self.open(&step.now, direction, true);
                    }
                    Some(_) => {}
                }

                self.extend(step);

                if self.low_power_expired(step.market_power_w, step.elapsed_s) {
                    info!(
                        "🛑 Slot cancelled after {:.0}s below {:.0} W",
                        self.low_power_s, self.policy.low_power_threshold_w
                    );
                    finished.extend(self.close(true));
                }
            }
            None => finished.extend(self.close(true)),
        }

        if self
            .active
            .as_ref()
            .is_some_and(|slot| step.now >= slot.end)
        {
            finished.extend(self.close(false));
        }

        finished
    }

    fn open(&mut self, now: &DateTime<Tz>, direction: Direction, was_backup: bool) {
        let slot = Slot::open(now, direction, was_backup);
        info!(
            "▶️ {} slot opened for {}{}",
            direction,
            slot.start.format("%H:%M"),
            if was_backup { " (backup)" } else { "" }
        );
        self.active = Some(slot);
        self.low_power_s = 0.0;
    }

    fn close(&mut self, cancelled: bool) -> Option<Slot> {
        self.low_power_s = 0.0;
        let mut slot = self.active.take()?;
        slot.cancelled = cancelled;
        debug!(
            "{} slot {} closed with {:.4} kWh over {:.0}s{}",
            slot.direction,
            slot.start.format("%H:%M"),
            slot.energy_kwh,
            slot.duration_s,
            if cancelled { " (cancelled)" } else { "" }
        );
        Some(slot)
    }

    fn extend(&mut self, step: &SlotStep) {
        let Some(slot) = self.active.as_mut() else {
            return;
        };
        slot.fill_missing_prices(step.prices);
        if slot.baseline_w.is_none() {
            slot.baseline_w = step.baseline_w;
        }
        if step.elapsed_s > 0.0 && step.market_power_w.is_finite() {
            slot.energy_kwh += step.market_power_w * step.elapsed_s / 3_600_000.0;
            slot.duration_s += step.elapsed_s;
        }
    }

    fn low_power_expired(&mut self, market_power_w: f64, elapsed_s: f64) -> bool {
        if self.active.is_none() {
            return false;
        }
        if !market_power_w.is_finite() || !elapsed_s.is_finite() {
            self.low_power_s = 0.0;
            return false;
        }
        if market_power_w <= self.policy.low_power_threshold_w {
            self.low_power_s += elapsed_s;
        } else {
            self.low_power_s = 0.0;
        }
        self.low_power_s >= self.policy.grace_secs
    }
}
