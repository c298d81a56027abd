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

// ============= Market Direction =============

/// Direction of a balancing activation.
///
/// A slot always carries one of these; the idle state never reaches a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    /// Discharging to the grid (selling)
    Up,
    /// Charging from the grid (buying)
    Down,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Up => "UP",
            Self::Down => "DOWN",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============= Classified Signal =============

/// Per-tick classification of the battery mode selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Signal {
    Up,
    Down,
    #[default]
    Idle,
}

impl Signal {
    /// Classify a textual battery mode.
    ///
    /// Any mode containing "sell" means UP, "buy" means DOWN, everything else
    /// (including an unavailable selector) is IDLE. Matching is case-insensitive
    /// so "Fusebox Sell" and "kratt sell" both classify as UP.
    pub fn from_mode(mode: &str) -> Self {
        let mode = mode.to_lowercase();
        if mode.contains("sell") {
            Self::Up
        } else if mode.contains("buy") {
            Self::Down
        } else {
            Self::Idle
        }
    }

    /// Active direction, `None` while idle
    pub fn direction(&self) -> Option<Direction> {
        match self {
            Self::Up => Some(Direction::Up),
            Self::Down => Some(Direction::Down),
            Self::Idle => None,
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Up => "UP",
            Self::Down => "DOWN",
            Self::Idle => "IDLE",
        }
    }
}

impl From<Direction> for Signal {
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::Up => Self::Up,
            Direction::Down => Self::Down,
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Signal {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_uppercase().as_str() {
            "UP" => Ok(Self::Up),
            "DOWN" => Ok(Self::Down),
            "IDLE" => Ok(Self::Idle),
            _ => Err(anyhow::anyhow!(
                "Unknown signal: '{}'. Expected one of: UP, DOWN, IDLE",
                s
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_classification() {
        assert_eq!(Signal::from_mode("Fusebox Sell"), Signal::Up);
        assert_eq!(Signal::from_mode("kratt buy"), Signal::Down);
        assert_eq!(Signal::from_mode("Self Use Mode"), Signal::Idle);
        assert_eq!(Signal::from_mode(""), Signal::Idle);
        assert_eq!(Signal::from_mode("SELL"), Signal::Up);
    }

    #[test]
    fn test_signal_direction() {
        assert_eq!(Signal::Up.direction(), Some(Direction::Up));
        assert_eq!(Signal::Down.direction(), Some(Direction::Down));
        assert_eq!(Signal::Idle.direction(), None);
    }

    #[test]
    fn test_signal_from_str() {
        assert_eq!("up".parse::<Signal>().unwrap(), Signal::Up);
        assert_eq!("IDLE".parse::<Signal>().unwrap(), Signal::Idle);
        assert!("sideways".parse::<Signal>().is_err());
    }

    #[test]
    fn test_serde_uppercase() {
        assert_eq!(serde_json::to_string(&Signal::Down).unwrap(), "\"DOWN\"");
        assert_eq!(serde_json::to_string(&Direction::Up).unwrap(), "\"UP\"");
    }
}
