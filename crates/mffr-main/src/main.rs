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


mod config;

use anyhow::{Context, Result};
use chrono::Utc;
use chrono_tz::Tz;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use tracing_subscriber::FmtSubscriber;

use config::AppConfig;
use mffr_core::{FrrPriceFeed, JsonFileStore, SensorSource, Snapshot, Tracker, UpdateDriver};
use mffr_ha::{HaSensorAdapter, HomeAssistantClient};

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() -> Result<()> {
    // Handle command line arguments
    let args: Vec<String> = std::env::args().collect();
    if args.len() > 1 {
        match args[1].as_str() {
            "--help" | "-h" => {
                println!("mFRR slot tracker");
                println!("Version: {}", VERSION);
                println!();
                println!("Usage: mffr-tracker [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -h, --help    Print this help message");
                println!("  -v, --version Print version");
                return Ok(());
            }
            "--version" | "-v" => {
                println!("{}", VERSION);
                return Ok(());
            }
            _ => {}
        }
    }

    let config = AppConfig::load()?;

    // Respects RUST_LOG, falls back to the configured level
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.system.log_level)),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Setting default subscriber failed")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")?;

    runtime.block_on(run(config))
}

async fn run(config: AppConfig) -> Result<()> {
    info!("🚀 Starting mFRR slot tracker v{}", VERSION);
    info!("📋 Configuration Summary:");
    info!("   Battery mode: {}", config.entities.battery_mode);
    info!("   Battery power: {}", config.entities.battery_power);
    info!("   Reference price: {}", config.entities.reference_price);
    if let Some(grid) = &config.entities.grid_power {
        info!("   Grid power: {}", grid);
    }
    info!(
        "   Scan interval: {}s, fee {}%, baseline {}",
        config.tracking.scan_interval_secs,
        config.tracking.fee_percent,
        if config.tracking.baseline_enabled { "on" } else { "off" }
    );
    info!("   Reference source: {}", config.tracking.reference_source);
    info!("   Price feed: {}", config.feed.url);
    info!("   State file: {}", config.system.state_path);

    let ha_client = if std::env::var("SUPERVISOR_TOKEN").is_ok() {
        info!("🏠 Initializing HA client using Supervisor API...");
        Arc::new(HomeAssistantClient::from_supervisor()?)
    } else {
        info!("🏠 Initializing HA client from configuration...");
        Arc::new(HomeAssistantClient::from_config(
            config.system.ha_base_url.clone(),
            config.system.ha_token.clone(),
        )?)
    };

    let timezone = resolve_timezone(&config, &ha_client).await?;

    if !config.feed.verify_tls {
        warn!(
            "⚠️ TLS certificate verification for the price feed is disabled. Enable it once tihend.energy presents a trusted certificate"
        );
    }
    let feed = FrrPriceFeed::new(
        config.feed.url.clone(),
        config.feed.verify_tls,
        config.feed_timeout(),
    )?
    .with_timezone(timezone);

    let sensors = HaSensorAdapter::new(ha_client);
    if !sensors.health_check().await.unwrap_or(false) {
        warn!("⚠️ Home Assistant API is not reachable yet, sensor reads will be retried every tick");
    }

    let store = JsonFileStore::new(&config.system.state_path);

    let mut driver = UpdateDriver::new(
        Tracker::new(config.tracker_config()),
        timezone,
        config.sensor_entities(),
        Arc::new(sensors),
        Arc::new(feed),
        Arc::new(store),
    );
    driver.restore_state(Utc::now()).await;

    let (snapshot_tx, snapshot_rx) = watch::channel(None);
    tokio::spawn(log_snapshots(snapshot_rx));

    info!("✅ Starting main loop...");
    tokio::select! {
        _ = driver.run(config.scan_interval(), snapshot_tx) => {}
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for shutdown signal")?;
            info!("👋 Shutting down");
        }
    }

    Ok(())
}

/// Use the configured zone, else the one HA reports, else UTC
async fn resolve_timezone(config: &AppConfig, ha_client: &HomeAssistantClient) -> Result<Tz> {
    if let Some(timezone) = config.timezone()? {
        info!("🌍 Using configured timezone: {}", timezone);
        return Ok(timezone);
    }

    match ha_client.get_timezone().await {
        Ok(name) => match name.parse::<Tz>() {
            Ok(timezone) => Ok(timezone),
            Err(e) => {
                warn!("⚠️ Unknown HA timezone '{}' ({}), using UTC", name, e);
                Ok(Tz::UTC)
            }
        },
        Err(e) => {
            warn!("⚠️ Failed to fetch timezone from HA ({}), using UTC", e);
            Ok(Tz::UTC)
        }
    }
}

/// Log each published snapshot; finalized slots are already logged by the core
async fn log_snapshots(mut snapshots: watch::Receiver<Option<Snapshot>>) {
    while snapshots.changed().await.is_ok() {
        let Some(snapshot) = snapshots.borrow_and_update().clone() else {
            continue;
        };
        debug!(
            "📊 {} {:.0} W | slot {:.4} kWh | today {:.4} ({} up / {} down) | all-time {:.4}",
            snapshot.signal,
            snapshot.mffr_power_w,
            snapshot.slot_energy_kwh,
            snapshot.today_profit,
            snapshot.up_count,
            snapshot.down_count,
            snapshot.all_time_profit
        );
        if snapshot.backfilled {
            info!("🔁 Late prices completed earlier slots");
        }
        if !snapshot.price_cache_hit {
            debug!("No balancing price known for the current slot yet");
        }
    }
}
