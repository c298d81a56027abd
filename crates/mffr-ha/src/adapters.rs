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


use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use crate::client::HomeAssistantClient;
use mffr_core::SensorSource;

/// Home Assistant adapter implementing SensorSource
pub struct HaSensorAdapter {
    client: Arc<HomeAssistantClient>,
}

impl HaSensorAdapter {
    pub fn new(client: Arc<HomeAssistantClient>) -> Self {
        Self { client }
    }

    /// Get reference to the underlying HA client
    pub fn client(&self) -> &Arc<HomeAssistantClient> {
        &self.client
    }
}

#[async_trait]
impl SensorSource for HaSensorAdapter {
    async fn read_state(&self, entity_id: &str) -> Result<Option<String>> {
        let state = self
            .client
            .get_state(entity_id)
            .await
            .with_context(|| format!("Failed to read entity: {}", entity_id))?;

        if state.is_unavailable() {
            debug!("📊 [ADAPTER] {} is '{}'", entity_id, state.state);
            return Ok(None);
        }
        Ok(Some(state.state))
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(self.client.ping().await?)
    }

    fn name(&self) -> &str {
        "Home Assistant"
    }
}
