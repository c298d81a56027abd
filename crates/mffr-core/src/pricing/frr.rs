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


use std::error::Error as StdError;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use super::{parse_feed_timestamp, price_from_json};
use crate::traits::PriceFeed;

/// Public FRR price feed
pub const DEFAULT_FRR_URL: &str = "https://tihend.energy/api/v1/frr";

/// Errors raised while fetching the FRR feed
#[derive(Error, Debug)]
pub enum FeedError {
    #[error("certificate validation failed (verification enabled: {verification_enabled}): {message}")]
    Certificate {
        verification_enabled: bool,
        message: String,
    },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("feed returned HTTP {0}")]
    Status(u16),

    #[error("malformed feed response: {0}")]
    Malformed(String),

    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

/// One priced slot as published by the feed. Prices are in EUR/kWh.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedRecord {
    pub start: DateTime<Utc>,
    pub balancing_price: f64,
    pub reference_price: Option<f64>,
}

/// HTTP client for the FRR balancing price feed
pub struct FrrPriceFeed {
    client: Client,
    url: String,
    verify_tls: bool,
    timezone: Tz,
}

impl FrrPriceFeed {
    pub fn new(url: impl Into<String>, verify_tls: bool, timeout: Duration) -> Result<Self, FeedError> {
        let client = Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(!verify_tls)
            .build()
            .map_err(|e| FeedError::Client(e.to_string()))?;

        Ok(Self {
            client,
            url: url.into(),
            verify_tls,
            timezone: Tz::UTC,
        })
    }

    /// Zone used for feed timestamps that carry no offset
    pub fn with_timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn verify_tls(&self) -> bool {
        self.verify_tls
    }

    /// Extract priced slots from a feed body of the form
    /// `{"data": [{"start", "mfrr_price", "nps_price"}, ...]}`.
    ///
    /// Items without a parseable start or balancing price are skipped.
    pub fn parse_body(body: &Value, timezone: &Tz) -> Result<Vec<FeedRecord>, FeedError> {
        let items = body
            .get("data")
            .and_then(Value::as_array)
            .ok_or_else(|| FeedError::Malformed("missing `data` array".to_string()))?;

        let mut records = Vec::with_capacity(items.len());
        for item in items {
            let Some(start) = item
                .get("start")
                .and_then(Value::as_str)
                .and_then(|raw| parse_feed_timestamp(raw, timezone))
            else {
                continue;
            };
            let Some(balancing_price) = item.get("mfrr_price").and_then(price_from_json) else {
                continue;
            };
            records.push(FeedRecord {
                start: start.with_timezone(&Utc),
                balancing_price,
                reference_price: item.get("nps_price").and_then(price_from_json),
            });
        }

        debug!("Parsed {} of {} FRR feed items", records.len(), items.len());
        Ok(records)
    }

    fn classify(&self, err: reqwest::Error) -> FeedError {
        if is_certificate_error(&err) {
            FeedError::Certificate {
                verification_enabled: self.verify_tls,
                message: err.to_string(),
            }
        } else {
            FeedError::Http(err)
        }
    }
}

/// Walk the source chain looking for a TLS certificate failure
fn is_certificate_error(err: &reqwest::Error) -> bool {
    let mut source: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(e) = source {
        if e.to_string().to_lowercase().contains("certificate") {
            return true;
        }
        source = e.source();
    }
    false
}

#[async_trait]
impl PriceFeed for FrrPriceFeed {
    async fn fetch(&self) -> Result<Vec<FeedRecord>, FeedError> {
        debug!("Fetching FRR prices from {}", self.url);

        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(FeedError::Status(status.as_u16()));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| FeedError::Malformed(e.to_string()))?;

        Self::parse_body(&body, &self.timezone)
    }

    fn name(&self) -> &str {
        "FRR price feed"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono_tz::Europe::Tallinn;
    use serde_json::json;

    fn feed_for(server: &mockito::Server) -> FrrPriceFeed {
        FrrPriceFeed::new(
            format!("{}/api/v1/frr", server.url()),
            true,
            Duration::from_secs(5),
        )
        .unwrap()
        .with_timezone(Tallinn)
    }

    #[test]
    fn test_parse_body_skips_incomplete_items() {
        let body = json!({
            "data": [
                {"start": "2025-06-03 12:00:00+0300", "mfrr_price": 120.5, "nps_price": 48.3},
                {"start": "2025-06-03T12:15:00+03:00", "mfrr_price": 0.09},
                {"start": "2025-06-03T12:30:00+03:00", "mfrr_price": null, "nps_price": 40.0},
                {"mfrr_price": 99.0},
                {"start": "not a time", "mfrr_price": 99.0}
            ]
        });

        let records = FrrPriceFeed::parse_body(&body, &Tallinn).unwrap();
        assert_eq!(records.len(), 2);

        assert_eq!(records[0].start, Utc.with_ymd_and_hms(2025, 6, 3, 9, 0, 0).unwrap());
        assert!((records[0].balancing_price - 0.1205).abs() < 1e-12);
        assert!((records[0].reference_price.unwrap() - 0.0483).abs() < 1e-12);

        assert_eq!(records[1].balancing_price, 0.09);
        assert_eq!(records[1].reference_price, None);
    }

    #[test]
    fn test_parse_body_requires_data_array() {
        let result = FrrPriceFeed::parse_body(&json!({"items": []}), &Tallinn);
        assert!(matches!(result, Err(FeedError::Malformed(_))));

        let result = FrrPriceFeed::parse_body(&json!({"data": "nope"}), &Tallinn);
        assert!(matches!(result, Err(FeedError::Malformed(_))));
    }

    #[tokio::test]
    async fn test_fetch_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v1/frr")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"data":[{"start":"2025-06-03T12:00:00+03:00","mfrr_price":100.0,"nps_price":80.0}]}"#,
            )
            .create_async()
            .await;

        let records = feed_for(&server).fetch().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].balancing_price, 0.1);
        assert_eq!(records[0].reference_price, Some(0.08));

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_non_ok_status() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/v1/frr")
            .with_status(503)
            .create_async()
            .await;

        let result = feed_for(&server).fetch().await;
        assert!(matches!(result, Err(FeedError::Status(503))));
    }

    #[tokio::test]
    async fn test_fetch_invalid_json() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/v1/frr")
            .with_status(200)
            .with_body("<html>maintenance</html>")
            .create_async()
            .await;

        let result = feed_for(&server).fetch().await;
        assert!(matches!(result, Err(FeedError::Malformed(_))));
    }

    #[tokio::test]
    async fn test_fetch_connection_refused_is_http_error() {
        let feed = FrrPriceFeed::new("http://127.0.0.1:9/api/v1/frr", false, Duration::from_secs(2))
            .unwrap();

        let result = feed.fetch().await;
        assert!(matches!(result, Err(FeedError::Http(_))));
    }
}
