//! Utility module for serde of types.

pub mod tuple_map;

use serde::{Deserialize, Serialize};

/// Metadata stored next to the monitor logs of a single simulation run
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RunMetadata {
    /// Human-readable formatted timestamp when the run was started
    pub execution_timestamp: String,
    /// Filename-compatible name of the simulated topology
    pub topology: String,
    /// Launch power of every transceiver in \[dBm\]
    pub launch_power_dbm: f64,
    /// Number of channels transmitted end-to-end
    pub num_channels: usize,
    /// Whether Raman cross-talk was enabled on the links
    #[serde(default)]
    pub srs_effect: bool,
    /// Sampling unit of the monitor override, if any
    #[serde(default)]
    pub monitor_unit: Option<usize>,
    /// Names of the monitor logs written for this run
    #[serde(default)]
    pub monitor_logs: Vec<String>,
}
