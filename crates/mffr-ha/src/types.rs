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


use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Entity state as returned by `/api/states/{entity_id}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HaEntityState {
    pub entity_id: String,
    pub state: String,
    #[serde(default)]
    pub attributes: Value,
    #[serde(default)]
    pub last_changed: String,
    #[serde(default)]
    pub last_updated: String,
}

impl HaEntityState {
    /// HA reports missing data with these placeholder states
    pub fn is_unavailable(&self) -> bool {
        matches!(self.state.as_str(), "unknown" | "unavailable" | "")
    }

    /// `unit_of_measurement` attribute, if any
    pub fn unit(&self) -> Option<&str> {
        self.attributes
            .get("unit_of_measurement")
            .and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deserialize_minimal_state() {
        let state: HaEntityState = serde_json::from_value(json!({
            "entity_id": "sensor.battery_power",
            "state": "unavailable"
        }))
        .unwrap();

        assert!(state.is_unavailable());
        assert_eq!(state.unit(), None);
    }

    #[test]
    fn test_unit_attribute() {
        let state: HaEntityState = serde_json::from_value(json!({
            "entity_id": "sensor.nordpool",
            "state": "48.3",
            "attributes": {"unit_of_measurement": "EUR/MWh"}
        }))
        .unwrap();

        assert!(!state.is_unavailable());
        assert_eq!(state.unit(), Some("EUR/MWh"));
    }
}
