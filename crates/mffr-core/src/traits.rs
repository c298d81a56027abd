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
use async_trait::async_trait;
use serde_json::Value;

use crate::pricing::{FeedError, FeedRecord};

// ============= External Collaborator Traits =============

/// Generic source of raw sensor states.
/// Business logic uses this trait, never knows about HA REST details
#[async_trait]
pub trait SensorSource: Send + Sync {
    /// Read the raw state string of an entity.
    ///
    /// `Ok(None)` means the host reports the entity as unknown or unavailable.
    async fn read_state(&self, entity_id: &str) -> Result<Option<String>>;

    /// Check if the sensor source is reachable
    async fn health_check(&self) -> Result<bool>;

    /// Get data source name for logging
    fn name(&self) -> &str;
}

/// Remote feed of balancing (and optionally reference) prices per slot
#[async_trait]
pub trait PriceFeed: Send + Sync {
    /// Fetch every slot the feed currently publishes
    async fn fetch(&self) -> Result<Vec<FeedRecord>, FeedError>;

    /// Get feed name for logging
    fn name(&self) -> &str;
}

/// Key-value store holding the aggregate state as one opaque blob
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Load the stored blob, `None` if nothing was saved yet
    async fn load(&self) -> Result<Option<Value>>;

    /// Replace the stored blob
    async fn save(&self, blob: Value) -> Result<()>;

    /// Get store name for logging
    fn name(&self) -> &str;
}
