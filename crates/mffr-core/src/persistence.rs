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


//! Persistence of period totals.
//!
//! Totals are stored as one JSON blob. On restore, each period's total is
//! only taken over when its stored key still matches the current period.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Datelike, NaiveDate};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::aggregator::PeriodTotals;
use crate::traits::StateStore;

/// Default path for the state file, relative for portability
pub const DEFAULT_STATE_PATH: &str = "./data/mffr_state.json";

/// On-disk form of [`PeriodTotals`]. Missing fields read as zero / absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoredTotals {
    pub today_date: Option<NaiveDate>,
    pub today_profit: f64,
    pub up_count: u32,
    pub down_count: u32,
    pub week_key: Option<(i32, u32)>,
    pub week_profit: f64,
    pub month_key: Option<(i32, u32)>,
    pub month_profit: f64,
    pub year_key: Option<i32>,
    pub year_profit: f64,
    pub all_profit: f64,
}

impl From<&PeriodTotals> for StoredTotals {
    fn from(totals: &PeriodTotals) -> Self {
        Self {
            today_date: totals.day_key,
            today_profit: totals.today,
            up_count: totals.up_count,
            down_count: totals.down_count,
            week_key: totals.week_key,
            week_profit: totals.week,
            month_key: totals.month_key,
            month_profit: totals.month,
            year_key: totals.year_key,
            year_profit: totals.year,
            all_profit: totals.all_time,
        }
    }
}

impl StoredTotals {
    /// Decode a stored blob. Anything undecodable restores nothing.
    pub fn from_blob(blob: Value) -> Option<Self> {
        match serde_json::from_value(blob) {
            Ok(stored) => Some(stored),
            Err(e) => {
                warn!("⚠️ Ignoring unreadable stored totals: {}", e);
                None
            }
        }
    }

    pub fn to_blob(&self) -> Result<Value> {
        serde_json::to_value(self).context("Failed to serialize period totals")
    }

    /// Rebuild totals for `now`, dropping every period that has moved on.
    ///
    /// The all-time total is always kept. Stale periods come back with no key,
    /// so the next roll adopts the current period without another reset.
    pub fn restore(&self, now: &DateTime<Tz>) -> PeriodTotals {
        let mut totals = PeriodTotals {
            all_time: self.all_profit,
            ..Default::default()
        };

        if self.today_date == Some(now.date_naive()) {
            totals.day_key = self.today_date;
            totals.today = self.today_profit;
            totals.up_count = self.up_count;
            totals.down_count = self.down_count;
        }

        let iso = now.iso_week();
        if self.week_key == Some((iso.year(), iso.week())) {
            totals.week_key = self.week_key;
            totals.week = self.week_profit;
        }

        if self.month_key == Some((now.year(), now.month())) {
            totals.month_key = self.month_key;
            totals.month = self.month_profit;
        }

        if self.year_key == Some(now.year()) {
            totals.year_key = self.year_key;
            totals.year = self.year_profit;
        }

        totals
    }
}

/// Load and restore totals from `store`. Never fails; problems are logged and
/// an empty set of totals is returned.
pub async fn load_totals(store: &dyn StateStore, now: &DateTime<Tz>) -> PeriodTotals {
    match store.load().await {
        Ok(Some(blob)) => {
            let Some(stored) = StoredTotals::from_blob(blob) else {
                return PeriodTotals::default();
            };
            let totals = stored.restore(now);
            info!(
                "📂 Restored totals from {}: today {:.4}, week {:.4}, month {:.4}, year {:.4}, all-time {:.4}",
                store.name(),
                totals.today,
                totals.week,
                totals.month,
                totals.year,
                totals.all_time
            );
            totals
        }
        Ok(None) => {
            info!("No stored totals in {}, starting from zero", store.name());
            PeriodTotals::default()
        }
        Err(e) => {
            warn!("⚠️ Failed to load totals from {}: {:#}", store.name(), e);
            PeriodTotals::default()
        }
    }
}

/// State store backed by a single JSON file
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Default for JsonFileStore {
    fn default() -> Self {
        Self::new(DEFAULT_STATE_PATH)
    }
}

#[async_trait]
impl StateStore for JsonFileStore {
    async fn load(&self) -> Result<Option<Value>> {
        if !tokio::fs::try_exists(&self.path).await.unwrap_or(false) {
            return Ok(None);
        }

        let contents = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read state from {}", self.path.display()))?;

        let blob = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse state from {}", self.path.display()))?;

        Ok(Some(blob))
    }

    /// Atomic write (temp file + rename)
    async fn save(&self, blob: Value) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }

        let json = serde_json::to_string_pretty(&blob).context("Failed to serialize state")?;

        let temp_path = self.path.with_extension("tmp");
        tokio::fs::write(&temp_path, &json)
            .await
            .with_context(|| format!("Failed to write temp file {}", temp_path.display()))?;
        tokio::fs::rename(&temp_path, &self.path)
            .await
            .with_context(|| format!("Failed to rename temp file to {}", self.path.display()))?;

        Ok(())
    }

    fn name(&self) -> &str {
        "state file"
    }
}

/// Single background writer for totals.
///
/// Saves run one at a time in request order; blobs queued behind a running
/// save collapse to the newest, so an older blob never lands last.
#[derive(Debug)]
pub struct SaveQueue {
    sender: mpsc::UnboundedSender<StoredTotals>,
    writer: JoinHandle<()>,
}

impl SaveQueue {
    /// Spawn the writer task. Must be called inside a tokio runtime.
    pub fn spawn(store: Arc<dyn StateStore>) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<StoredTotals>();
        let writer = tokio::spawn(async move {
            while let Some(mut totals) = receiver.recv().await {
                while let Ok(newer) = receiver.try_recv() {
                    totals = newer;
                }
                write_totals(store.as_ref(), &totals).await;
            }
        });
        Self { sender, writer }
    }

    /// Queue a save without waiting for it
    pub fn enqueue(&self, totals: StoredTotals) {
        if self.sender.send(totals).is_err() {
            warn!("⚠️ State writer stopped, totals not saved");
        }
    }

    /// Stop accepting saves and wait until the queued ones are written
    pub async fn close(self) {
        drop(self.sender);
        if let Err(e) = self.writer.await {
            error!("❌ State writer task failed: {}", e);
        }
    }
}

async fn write_totals(store: &dyn StateStore, totals: &StoredTotals) {
    let blob = match totals.to_blob() {
        Ok(blob) => blob,
        Err(e) => {
            error!("❌ {:#}", e);
            return;
        }
    };
    match store.save(blob).await {
        Ok(()) => debug!("💾 Totals saved to {}", store.name()),
        Err(e) => warn!("⚠️ Failed to save totals to {}: {:#}", store.name(), e),
    }
}
