// qotsim: Physical-Layer Simulation of Optical Networks with Quality-of-Transmission Estimation
// Copyright (C) 2024-2025 Roland Schmid <roschmi@ethz.ch> and Tibor Schneider <sctibor@ethz.ch>
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//! Simulation-wide parameters. Every network owns one [`SimConfig`], which can be loaded from a
//! JSON file. Missing fields take their default value.
use std::{fs, path::Path};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{signal::ChannelId, units::GHZ, units::THZ};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read the configuration file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed configuration: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SimConfig {
    pub grid: ChannelGrid,
    pub balancing: BalancingConfig,
    /// Periodic monitor override of the QoT estimate. Disabled when `None`.
    pub monitor_policy: Option<MonitorPolicy>,
    /// Upper bound on link traversals per link and propagation run.
    pub max_hops: usize,
    pub roadm_insertion_loss_db: f64,
    pub receiver_threshold_db: f64,
    pub default_launch_power_dbm: f64,
    /// Enable Raman cross-talk on newly created links.
    pub srs_effect: bool,
    pub gain_ripple: RippleConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            grid: ChannelGrid::default(),
            balancing: BalancingConfig::default(),
            monitor_policy: None,
            max_hops: 25,
            roadm_insertion_loss_db: 17.0,
            receiver_threshold_db: 20.0,
            default_launch_power_dbm: 0.0,
            srs_effect: false,
            gain_ripple: RippleConfig::Flat,
        }
    }
}

impl SimConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(&fs::read_to_string(path)?)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.grid.num_channels == 0 {
            Err(ConfigError::Invalid("the grid needs at least one channel".into()))?
        }
        if self.balancing.max_iterations == 0 {
            Err(ConfigError::Invalid("balancing needs at least one iteration".into()))?
        }
        if let Some(MonitorPolicy { unit: 0 }) = self.monitor_policy {
            Err(ConfigError::Invalid("the monitor unit must be positive".into()))?
        }
        Ok(())
    }
}

/// Fixed WDM grid. Channel indices are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ChannelGrid {
    pub num_channels: usize,
    pub start_hz: f64,
    pub spacing_hz: f64,
}

impl Default for ChannelGrid {
    fn default() -> Self {
        Self {
            num_channels: 90,
            start_hz: 191.3 * THZ,
            spacing_hz: 50.0 * GHZ,
        }
    }
}

impl ChannelGrid {
    pub fn frequency(&self, index: ChannelId) -> f64 {
        self.start_hz + self.spacing_hz * (index as f64 - 1.0)
    }

    pub fn contains(&self, index: ChannelId) -> bool {
        (1..=self.num_channels).contains(&index)
    }

    pub fn channels(&self) -> impl Iterator<Item = ChannelId> {
        1..=self.num_channels
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct BalancingConfig {
    pub max_iterations: usize,
    pub tolerance_db: f64,
}

impl Default for BalancingConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            tolerance_db: 1e-3,
        }
    }
}

/// Every `unit`-th span of a link, the QoT estimate takes over the simulated NLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct MonitorPolicy {
    pub unit: usize,
}

impl MonitorPolicy {
    pub fn samples(&self, span_number: usize) -> bool {
        self.unit > 0 && span_number % self.unit == 0
    }
}

/// Ripple profile given to amplifiers created by the network factory.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub enum RippleConfig {
    Flat,
    Seeded { seed: u64, sigma_db: f64 },
}
