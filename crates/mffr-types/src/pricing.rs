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


use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Balancing and reference price known for one quarter-hour slot.
///
/// Both values are in currency per kWh, already normalized.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SlotPrices {
    pub balancing: Option<f64>,
    pub reference: Option<f64>,
}

impl SlotPrices {
    pub fn is_empty(&self) -> bool {
        self.balancing.is_none() && self.reference.is_none()
    }

    /// Merge a newer record into this one, keeping fields the newer record omits
    pub fn merge(&mut self, newer: SlotPrices) {
        if newer.balancing.is_some() {
            self.balancing = newer.balancing;
        }
        if newer.reference.is_some() {
            self.reference = newer.reference;
        }
    }
}

/// Where the reference (spot) price of a slot comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferencePriceSource {
    /// Always use the price reported by the host sensor
    #[default]
    Ha,
    /// Prefer the feed's reference price, fall back to the host sensor
    Api,
    /// Same fallback behaviour as `Api`
    Auto,
}

/// Which source actually supplied the reference price
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceOrigin {
    #[default]
    Ha,
    Api,
}

impl ReferencePriceSource {
    pub fn to_config_value(&self) -> &'static str {
        match self {
            Self::Ha => "ha",
            Self::Api => "api",
            Self::Auto => "auto",
        }
    }

    pub fn all() -> &'static [ReferencePriceSource] {
        &[Self::Ha, Self::Api, Self::Auto]
    }

    /// Pick the reference price for a slot.
    ///
    /// `feed` is the feed's reference price for the slot, `host` the value of the
    /// host reference sensor. Both must already be normalized.
    pub fn select(&self, feed: Option<f64>, host: Option<f64>) -> (Option<f64>, PriceOrigin) {
        match (self, feed) {
            (Self::Ha, _) => (host, PriceOrigin::Ha),
            (Self::Api | Self::Auto, Some(price)) => (Some(price), PriceOrigin::Api),
            (Self::Api | Self::Auto, None) => (host, PriceOrigin::Ha),
        }
    }
}

impl fmt::Display for ReferencePriceSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_config_value())
    }
}

impl FromStr for ReferencePriceSource {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "ha" => Ok(Self::Ha),
            "api" => Ok(Self::Api),
            "auto" => Ok(Self::Auto),
            _ => Err(anyhow::anyhow!(
                "Unknown reference price source: '{}'. Supported sources: {}",
                s,
                Self::all()
                    .iter()
                    .map(|s| s.to_config_value())
                    .collect::<Vec<_>>()
                    .join(", ")
            )),
        }
    }
}

impl fmt::Display for PriceOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ha => f.write_str("ha"),
            Self::Api => f.write_str("api"),
        }
    }
}
