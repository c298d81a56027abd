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
use chrono_tz::Tz;
use mffr_core::{
    CancellationPolicy, DEFAULT_FRR_URL, DEFAULT_STATE_PATH, ReferencePriceSource,
    SensorEntities, TrackerConfig,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// HA add-on options file
const ADDON_OPTIONS_PATH: &str = "/data/options.json";

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Sensor entity ids
    pub entities: EntitiesConfig,

    /// Slot tracking and profit settings
    #[serde(default)]
    pub tracking: TrackingConfig,

    /// Balancing price feed
    #[serde(default)]
    pub feed: FeedConfig,

    /// System configuration
    #[serde(default)]
    pub system: SystemConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitiesConfig {
    /// Battery mode selector; "sell" / "buy" in its state mean UP / DOWN
    pub battery_mode: String,

    /// Battery power sensor (W)
    pub battery_power: String,

    /// Reference spot price sensor
    pub reference_price: String,

    /// Grid power sensor (W), logged only
    #[serde(default)]
    pub grid_power: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingConfig {
    #[serde(default = "default_scan_interval_secs")]
    pub scan_interval_secs: u64,

    /// Operator fee deducted from every profit (%)
    #[serde(default = "default_fee_percent")]
    pub fee_percent: f64,

    #[serde(default = "default_true")]
    pub baseline_enabled: bool,

    #[serde(default)]
    pub reference_source: ReferencePriceSource,

    #[serde(default = "default_low_power_threshold_w")]
    pub low_power_threshold_w: f64,

    #[serde(default = "default_cancel_grace_secs")]
    pub cancel_grace_secs: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    #[serde(default = "default_feed_url")]
    pub url: String,

    /// Verify the feed's TLS certificate
    #[serde(default)]
    pub verify_tls: bool,

    #[serde(default = "default_feed_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_min_refetch_secs")]
    pub min_refetch_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    /// Home Assistant base URL (optional, defaults to supervisor)
    #[serde(default)]
    pub ha_base_url: Option<String>,

    /// Home Assistant token (optional, uses SUPERVISOR_TOKEN if not set)
    #[serde(default)]
    pub ha_token: Option<String>,

    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// IANA timezone; fetched from HA when absent
    #[serde(default)]
    pub timezone: Option<String>,

    #[serde(default = "default_state_path")]
    pub state_path: String,
}

fn default_scan_interval_secs() -> u64 {
    10
}

fn default_fee_percent() -> f64 {
    20.0
}

fn default_true() -> bool {
    true
}

fn default_low_power_threshold_w() -> f64 {
    mffr_core::slots::DEFAULT_LOW_POWER_THRESHOLD_W
}

fn default_cancel_grace_secs() -> f64 {
    mffr_core::slots::DEFAULT_CANCEL_GRACE_SECS
}

fn default_feed_url() -> String {
    DEFAULT_FRR_URL.to_string()
}

fn default_feed_timeout_secs() -> u64 {
    10
}

fn default_min_refetch_secs() -> u64 {
    60
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_state_path() -> String {
    DEFAULT_STATE_PATH.to_string()
}

impl Default for EntitiesConfig {
    fn default() -> Self {
        Self {
            battery_mode: "select.battery_mode".to_string(),
            battery_power: "sensor.battery_power".to_string(),
            reference_price: "sensor.nordpool_price".to_string(),
            grid_power: None,
        }
    }
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            scan_interval_secs: default_scan_interval_secs(),
            fee_percent: default_fee_percent(),
            baseline_enabled: true,
            reference_source: ReferencePriceSource::default(),
            low_power_threshold_w: default_low_power_threshold_w(),
            cancel_grace_secs: default_cancel_grace_secs(),
        }
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            url: default_feed_url(),
            verify_tls: false,
            timeout_secs: default_feed_timeout_secs(),
            min_refetch_secs: default_min_refetch_secs(),
        }
    }
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            ha_base_url: None,
            ha_token: None,
            log_level: default_log_level(),
            timezone: None,
            state_path: default_state_path(),
        }
    }
}

impl AppConfig {
    /// Load configuration from HA addon options or config file
    pub fn load() -> Result<Self> {
        for path in [ADDON_OPTIONS_PATH, "config.toml", "config.json"] {
            if Path::new(path).exists() {
                let config = Self::from_file(path)?;
                info!("✅ Loaded configuration from {}", path);
                config.validate()?;
                return Ok(config);
            }
        }

        warn!("No configuration file found, using defaults with environment overrides");
        let config = Self::from_env();
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML or JSON file, chosen by extension
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;

        if path.extension().is_some_and(|ext| ext == "toml") {
            toml::from_str(&contents).with_context(|| format!("Failed to parse {}", path.display()))
        } else {
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse {}", path.display()))
        }
    }

    /// Load from environment variables (development/testing)
    fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("HA_BASE_URL") {
            config.system.ha_base_url = Some(url);
        }
        if let Ok(token) = std::env::var("HA_TOKEN") {
            config.system.ha_token = Some(token);
        }

        if let Ok(interval) = std::env::var("MFFR_SCAN_INTERVAL_SECS")
            && let Ok(secs) = interval.parse::<u64>()
        {
            config.tracking.scan_interval_secs = secs;
        }

        if let Ok(verify) = std::env::var("MFFR_VERIFY_TLS")
            && let Ok(enabled) = verify.parse::<bool>()
        {
            config.feed.verify_tls = enabled;
        }

        if let Ok(timezone) = std::env::var("MFFR_TIMEZONE") {
            config.system.timezone = Some(timezone);
        }

        config
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let entities = [
            ("battery_mode", &self.entities.battery_mode),
            ("battery_power", &self.entities.battery_power),
            ("reference_price", &self.entities.reference_price),
        ];
        for (name, entity_id) in entities {
            if entity_id.trim().is_empty() {
                anyhow::bail!("entities.{} cannot be empty", name);
            }
        }

        if !(5..=60).contains(&self.tracking.scan_interval_secs) {
            anyhow::bail!(
                "scan_interval_secs must be between 5 and 60 seconds (got {})",
                self.tracking.scan_interval_secs
            );
        }

        if !(0.0..=100.0).contains(&self.tracking.fee_percent) {
            anyhow::bail!(
                "fee_percent must be between 0 and 100 (got {})",
                self.tracking.fee_percent
            );
        }

        if !self.tracking.low_power_threshold_w.is_finite()
            || self.tracking.low_power_threshold_w <= 0.0
        {
            anyhow::bail!("low_power_threshold_w must be positive");
        }
        if !self.tracking.cancel_grace_secs.is_finite() || self.tracking.cancel_grace_secs <= 0.0 {
            anyhow::bail!("cancel_grace_secs must be positive");
        }
        if self.tracking.cancel_grace_secs < self.tracking.scan_interval_secs as f64 {
            warn!(
                "cancel_grace_secs ({}) is shorter than the scan interval ({}s); one low reading will cancel a slot",
                self.tracking.cancel_grace_secs, self.tracking.scan_interval_secs
            );
        }

        if self.feed.url.trim().is_empty() {
            anyhow::bail!("feed.url cannot be empty");
        }
        if self.feed.timeout_secs == 0 {
            anyhow::bail!("feed.timeout_secs must be at least 1 second");
        }
        if self.feed.min_refetch_secs < 10 {
            warn!(
                "feed.min_refetch_secs is very low ({}s), the feed may rate-limit us",
                self.feed.min_refetch_secs
            );
        }

        self.timezone()?;

        Ok(())
    }

    /// Configured timezone, if any
    pub fn timezone(&self) -> Result<Option<Tz>> {
        self.system
            .timezone
            .as_deref()
            .map(|name| {
                name.parse::<Tz>()
                    .map_err(|e| anyhow::anyhow!("Invalid timezone '{}': {}", name, e))
            })
            .transpose()
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.tracking.scan_interval_secs)
    }

    pub fn feed_timeout(&self) -> Duration {
        Duration::from_secs(self.feed.timeout_secs)
    }

    pub fn tracker_config(&self) -> TrackerConfig {
        TrackerConfig {
            fee_percent: self.tracking.fee_percent,
            baseline_enabled: self.tracking.baseline_enabled,
            reference_source: self.tracking.reference_source,
            cancellation: CancellationPolicy {
                low_power_threshold_w: self.tracking.low_power_threshold_w,
                grace_secs: self.tracking.cancel_grace_secs,
            },
            min_refetch: chrono::Duration::seconds(self.feed.min_refetch_secs as i64),
        }
    }

    pub fn sensor_entities(&self) -> SensorEntities {
        SensorEntities {
            battery_mode: self.entities.battery_mode.clone(),
            battery_power: self.entities.battery_power.clone(),
            reference_price: self.entities.reference_price.clone(),
            grid_power: self
                .entities
                .grid_power
                .clone()
                .filter(|id| !id.trim().is_empty()),
        }
    }
}
