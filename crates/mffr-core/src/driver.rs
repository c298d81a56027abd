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


use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use mffr_types::Snapshot;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::persistence::{SaveQueue, load_totals};
use crate::tracker::{TickInputs, Tracker};
use crate::traits::{PriceFeed, SensorSource, StateStore};

/// Entity ids of the sensors the tracker reads
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorEntities {
    pub battery_mode: String,
    pub battery_power: String,
    pub reference_price: String,
    pub grid_power: Option<String>,
}

/// Runs the polling cycle: read sensors, refresh prices, tick, persist.
///
/// Owns the tracker, so cycles are strictly sequential.
pub struct UpdateDriver {
    tracker: Tracker,
    timezone: Tz,
    entities: SensorEntities,
    sensors: Arc<dyn SensorSource>,
    feed: Arc<dyn PriceFeed>,
    store: Arc<dyn StateStore>,
    saves: SaveQueue,
}

impl UpdateDriver {
    /// Must be called inside a tokio runtime; spawns the state writer.
    pub fn new(
        tracker: Tracker,
        timezone: Tz,
        entities: SensorEntities,
        sensors: Arc<dyn SensorSource>,
        feed: Arc<dyn PriceFeed>,
        store: Arc<dyn StateStore>,
    ) -> Self {
        let saves = SaveQueue::spawn(Arc::clone(&store));
        Self {
            tracker,
            timezone,
            entities,
            sensors,
            feed,
            store,
            saves,
        }
    }

    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    /// Load persisted totals into the tracker
    pub async fn restore_state(&mut self, now: DateTime<Utc>) {
        let local = now.with_timezone(&self.timezone);
        let totals = load_totals(self.store.as_ref(), &local).await;
        self.tracker.restore(totals);
    }

    async fn read(&self, entity_id: &str) -> Option<String> {
        match self.sensors.read_state(entity_id).await {
            Ok(state) => state,
            Err(e) => {
                warn!(
                    "⚠️ Failed to read {} from {}: {:#}",
                    entity_id,
                    self.sensors.name(),
                    e
                );
                None
            }
        }
    }

    async fn read_number(&self, entity_id: &str) -> Option<f64> {
        let raw = self.read(entity_id).await?;
        match raw.trim().parse::<f64>() {
            Ok(value) => Some(value),
            Err(_) => {
                debug!("Non-numeric state '{}' for {}", raw, entity_id);
                None
            }
        }
    }

    /// Read all configured sensors for one tick
    pub async fn read_inputs(&self) -> TickInputs {
        let grid_power_w = match &self.entities.grid_power {
            Some(entity_id) => self.read_number(entity_id).await,
            None => None,
        };

        TickInputs {
            battery_mode: self.read(&self.entities.battery_mode).await,
            battery_power_w: self.read_number(&self.entities.battery_power).await,
            reference_price: self.read_number(&self.entities.reference_price).await,
            grid_power_w,
        }
    }

    /// Run one full cycle at `now`. Returns the snapshot and whether a save
    /// was queued; the save itself is not awaited.
    pub async fn run_once(&mut self, now: DateTime<Utc>) -> (Snapshot, bool) {
        let local = now.with_timezone(&self.timezone);
        let inputs = self.read_inputs().await;

        self.tracker
            .prices_mut()
            .refresh(&local, self.feed.as_ref())
            .await;

        let outcome = self.tracker.tick(local, &inputs);
        let queued = outcome.save.is_some();
        if let Some(totals) = outcome.save {
            self.saves.enqueue(totals);
        }
        (outcome.snapshot, queued)
    }

    /// Wait for queued saves to finish
    pub async fn close(self) {
        self.saves.close().await;
    }

    /// Poll forever at `interval`, publishing each snapshot on `snapshots`
    pub async fn run(mut self, interval: StdDuration, snapshots: watch::Sender<Option<Snapshot>>) {
        info!(
            "🔄 Tracking every {}s (sensors: {}, prices: {}, store: {})",
            interval.as_secs(),
            self.sensors.name(),
            self.feed.name(),
            self.store.name()
        );

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let (snapshot, _) = self.run_once(Utc::now()).await;
            snapshots.send_replace(Some(snapshot));
        }
    }
}
