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


pub mod aggregator;
pub mod baseline;
pub mod driver;
pub mod persistence;
pub mod pricing;
pub mod slots;
pub mod tracker;
pub mod traits;

pub use aggregator::{PeriodTotals, ProfitAggregator, RECENT_SLOTS_CAPACITY};
pub use baseline::BaselineEstimator;
pub use driver::{SensorEntities, UpdateDriver};
pub use persistence::{DEFAULT_STATE_PATH, JsonFileStore, SaveQueue, StoredTotals, load_totals};
pub use pricing::{
    DEFAULT_FRR_URL, FeedError, FeedRecord, FrrPriceFeed, PriceCache, normalize_price,
    parse_price,
};
pub use slots::{CancellationPolicy, SlotMachine, SlotStep};
pub use tracker::{TickInputs, TickOutcome, Tracker, TrackerConfig};
pub use traits::{PriceFeed, SensorSource, StateStore};

pub use mffr_types::{
    Direction, PriceOrigin, ReferencePriceSource, SLOT_MINUTES, Signal, Slot, SlotPrices,
    SlotView, Snapshot, quarter_start, round_to,
};
