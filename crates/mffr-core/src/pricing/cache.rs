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


use std::collections::HashMap;

use chrono::{DateTime, Duration, TimeZone, Utc};
use mffr_types::{SlotPrices, quarter_start};
use tracing::{debug, error, info, warn};

use super::frr::{FeedError, FeedRecord};
use crate::traits::PriceFeed;

/// Minimum spacing between feed requests
pub const DEFAULT_MIN_REFETCH_SECS: i64 = 60;

/// Slot prices keyed by the UTC instant of each slot start.
///
/// Entries are only added or overwritten, never evicted.
#[derive(Debug, Clone)]
pub struct PriceCache {
    entries: HashMap<DateTime<Utc>, SlotPrices>,
    last_fetch: Option<DateTime<Utc>>,
    min_refetch: Duration,
}

impl Default for PriceCache {
    fn default() -> Self {
        Self::new(Duration::seconds(DEFAULT_MIN_REFETCH_SECS))
    }
}

impl PriceCache {
    pub fn new(min_refetch: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            last_fetch: None,
            min_refetch,
        }
    }

    fn key<T: TimeZone>(ts: &DateTime<T>) -> DateTime<Utc> {
        quarter_start(ts).with_timezone(&Utc)
    }

    /// Prices of the slot containing `ts`, empty when nothing is cached
    pub fn lookup<T: TimeZone>(&self, ts: &DateTime<T>) -> SlotPrices {
        self.entries.get(&Self::key(ts)).copied().unwrap_or_default()
    }

    pub fn contains<T: TimeZone>(&self, ts: &DateTime<T>) -> bool {
        self.entries.contains_key(&Self::key(ts))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Time of the last fetch attempt, successful or not
    pub fn last_fetch(&self) -> Option<DateTime<Utc>> {
        self.last_fetch
    }

    /// A fetch is due when the current slot is not cached and the last attempt
    /// is at least `min_refetch` old
    pub fn needs_fetch<T: TimeZone>(&self, now: &DateTime<T>) -> bool {
        if self.contains(now) {
            return false;
        }
        let now = now.with_timezone(&Utc);
        self.last_fetch
            .is_none_or(|last| now - last >= self.min_refetch)
    }

    /// Insert feed records, merging with what is already cached. Returns the
    /// number of records applied.
    pub fn merge(&mut self, records: impl IntoIterator<Item = FeedRecord>) -> usize {
        let mut applied = 0;
        for record in records {
            let prices = SlotPrices {
                balancing: Some(record.balancing_price),
                reference: record.reference_price,
            };
            self.entries
                .entry(Self::key(&record.start))
                .or_default()
                .merge(prices);
            applied += 1;
        }
        applied
    }

    /// Fetch from `feed` if due.
    ///
    /// Never fails: errors are logged and the cache keeps its old contents. The
    /// attempt time is recorded either way so a failing feed is not hammered.
    /// Returns true if a fetch was attempted.
    pub async fn refresh<T: TimeZone>(&mut self, now: &DateTime<T>, feed: &dyn PriceFeed) -> bool {
        if !self.needs_fetch(now) {
            return false;
        }

        match feed.fetch().await {
            Ok(records) => {
                let applied = self.merge(records);
                info!(
                    "💶 Fetched {} slot prices from {} ({} cached)",
                    applied,
                    feed.name(),
                    self.entries.len()
                );
            }
            Err(FeedError::Certificate {
                verification_enabled: true,
                message,
            }) => {
                error!(
                    "❌ {} certificate was rejected. Set `feed.verify_tls = false` to skip verification: {}",
                    feed.name(),
                    message
                );
            }
            Err(FeedError::Certificate {
                verification_enabled: false,
                message,
            }) => {
                error!(
                    "❌ {} TLS handshake failed with verification disabled: {}",
                    feed.name(),
                    message
                );
            }
            Err(e) => {
                warn!("⚠️ Failed to fetch prices from {}: {}", feed.name(), e);
            }
        }

        self.last_fetch = Some(now.with_timezone(&Utc));
        debug!("Next price fetch allowed after {}", self.min_refetch);
        true
    }
}
