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


pub mod pricing;
pub mod signal;
pub mod slot;
pub mod snapshot;

// Re-export common types for convenience
pub use pricing::{PriceOrigin, ReferencePriceSource, SlotPrices};
pub use signal::{Direction, Signal};
pub use slot::{SLOT_MINUTES, Slot, quarter_start};
pub use snapshot::{Snapshot, SlotView, round_to};
