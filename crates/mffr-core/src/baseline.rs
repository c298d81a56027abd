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


use chrono::{DateTime, TimeZone, Timelike, Utc};
use mffr_types::{Signal, quarter_start};
use tracing::debug;

/// Seconds before the end of a quarter in which the estimate is finalized
pub const FINALIZE_WINDOW_SECS: u32 = 10;

/// Running estimate of battery power while no market signal is active.
///
/// Samples are taken on IDLE ticks only. Near the end of every quarter the
/// running average becomes the new baseline, carrying the previous one over
/// when the quarter had no idle samples.
#[derive(Debug, Clone, Default)]
pub struct BaselineEstimator {
    sum_w: f64,
    samples: u32,
    last_w: f64,
    finalized_for: Option<DateTime<Utc>>,
}

impl BaselineEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a battery power sample. Ignored unless `signal` is idle.
    pub fn observe(&mut self, signal: Signal, battery_w: f64) {
        if !signal.is_idle() || !battery_w.is_finite() {
            return;
        }
        self.sum_w += battery_w;
        self.samples += 1;
    }

    /// Baseline to subtract right now: the running average, or the last
    /// finalized value when there are no samples yet
    pub fn current_w(&self) -> f64 {
        if self.samples > 0 {
            self.sum_w / f64::from(self.samples)
        } else {
            self.last_w
        }
    }

    pub fn last_w(&self) -> f64 {
        self.last_w
    }

    pub fn sample_count(&self) -> u32 {
        self.samples
    }

    /// True during the last seconds of a quarter-hour (minute 14, 29, 44 or 59)
    pub fn in_finalize_window<T: TimeZone>(now: &DateTime<T>) -> bool {
        now.minute() % 15 == 14 && now.second() >= 60 - FINALIZE_WINDOW_SECS
    }

    /// Finalize the quarter's estimate if `now` is in the finalize window.
    ///
    /// Happens at most once per quarter. Returns the new baseline when it was
    /// finalized by this call.
    pub fn finalize_if_due<T: TimeZone>(&mut self, now: &DateTime<T>) -> Option<f64> {
        if !Self::in_finalize_window(now) {
            return None;
        }
        let quarter = quarter_start(now).with_timezone(&Utc);
        if self.finalized_for == Some(quarter) {
            return None;
        }

        let baseline = self.current_w();
        debug!(
            "Baseline finalized at {:.1} W from {} idle samples",
            baseline, self.samples
        );
        self.last_w = baseline;
        self.sum_w = 0.0;
        self.samples = 0;
        self.finalized_for = Some(quarter);
        Some(baseline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::Europe::Tallinn;
    use chrono_tz::Tz;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Tz> {
        Tallinn.with_ymd_and_hms(2025, 6, 3, h, m, s).unwrap()
    }

    #[test]
    fn test_observe_only_idle_samples() {
        let mut baseline = BaselineEstimator::new();
        baseline.observe(Signal::Idle, 200.0);
        baseline.observe(Signal::Up, 5000.0);
        baseline.observe(Signal::Idle, 400.0);
        baseline.observe(Signal::Idle, f64::NAN);

        assert_eq!(baseline.sample_count(), 2);
        assert_eq!(baseline.current_w(), 300.0);
    }

    #[test]
    fn test_finalize_window() {
        assert!(!BaselineEstimator::in_finalize_window(&at(12, 14, 49)));
        assert!(BaselineEstimator::in_finalize_window(&at(12, 14, 50)));
        assert!(BaselineEstimator::in_finalize_window(&at(12, 59, 59)));
        assert!(!BaselineEstimator::in_finalize_window(&at(12, 15, 0)));
        assert!(!BaselineEstimator::in_finalize_window(&at(12, 13, 55)));
    }

    #[test]
    fn test_finalize_once_per_quarter() {
        let mut baseline = BaselineEstimator::new();
        baseline.observe(Signal::Idle, -150.0);

        assert_eq!(baseline.finalize_if_due(&at(12, 14, 50)), Some(-150.0));
        assert_eq!(baseline.finalize_if_due(&at(12, 14, 55)), None);
        assert_eq!(baseline.sample_count(), 0);
        assert_eq!(baseline.current_w(), -150.0);
    }

    #[test]
    fn test_finalize_without_samples_carries_previous() {
        let mut baseline = BaselineEstimator::new();
        baseline.observe(Signal::Idle, 250.0);
        baseline.finalize_if_due(&at(12, 14, 50));

        baseline.observe(Signal::Down, 3000.0);
        assert_eq!(baseline.finalize_if_due(&at(12, 29, 52)), Some(250.0));
        assert_eq!(baseline.last_w(), 250.0);
    }

    #[test]
    fn test_outside_window_does_nothing() {
        let mut baseline = BaselineEstimator::new();
        baseline.observe(Signal::Idle, 100.0);
        assert_eq!(baseline.finalize_if_due(&at(12, 5, 0)), None);
        assert_eq!(baseline.sample_count(), 1);
    }
}
