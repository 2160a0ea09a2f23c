//! Module defining the on-disk monitor log format and its CSV flattening.
//!
//! A monitor log is a JSON document of the shape
//!
//! ```json
//! {"tests": [{"osnr_load_3": [..]}, {"gosnr_load_3": [..]}]}
//! ```
//!
//! with one entry per metric and channel load, and one file per monitoring point.
use std::{collections::BTreeMap, fs, path::Path};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("Cannot access the monitor log: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed monitor log: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Cannot write the CSV export: {0}")]
    Csv(#[from] csv::Error),
}

/// Metric series stored in a monitor log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    Osnr,
    Gosnr,
    OsnrQot,
    GosnrQot,
}

impl Metric {
    pub const ALL: [Metric; 4] = [Self::Osnr, Self::Gosnr, Self::OsnrQot, Self::GosnrQot];

    fn prefix(&self) -> &'static str {
        match self {
            Self::Osnr => "osnr",
            Self::Gosnr => "gosnr",
            Self::OsnrQot => "osnr_qot",
            Self::GosnrQot => "gosnr_qot",
        }
    }

    /// Key of the series for the given channel load, e.g. `gosnr_load_12`.
    pub fn key(&self, load: usize) -> String {
        format!("{}_load_{load}", self.prefix())
    }

    /// Parse a series key back into its metric and load.
    pub fn parse_key(key: &str) -> Option<(Metric, usize)> {
        let (prefix, load) = key.rsplit_once("_load_")?;
        let load = load.parse().ok()?;
        Self::ALL
            .into_iter()
            .find(|m| m.prefix() == prefix)
            .map(|m| (m, load))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct MonitorLog {
    pub tests: Vec<BTreeMap<String, Vec<f64>>>,
}

impl MonitorLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one series. The load is inferred from the number of values.
    pub fn push(&mut self, metric: Metric, values: Vec<f64>) {
        let key = metric.key(values.len());
        self.tests.push(BTreeMap::from([(key, values)]));
    }

    /// Append the OSNR and gOSNR series measured with the current channel load.
    pub fn push_load(&mut self, osnr: Vec<f64>, gosnr: Vec<f64>) {
        self.push(Metric::Osnr, osnr);
        self.push(Metric::Gosnr, gosnr);
    }

    pub fn push_load_qot(&mut self, osnr: Vec<f64>, gosnr: Vec<f64>) {
        self.push(Metric::OsnrQot, osnr);
        self.push(Metric::GosnrQot, gosnr);
    }

    /// Get the first series stored for `metric` at the given load.
    pub fn series(&self, metric: Metric, load: usize) -> Option<&Vec<f64>> {
        let key = metric.key(load);
        self.tests.iter().find_map(|entry| entry.get(&key))
    }

    pub fn read(path: impl AsRef<Path>) -> Result<Self, RecordError> {
        Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
    }

    pub fn write(&self, path: impl AsRef<Path>) -> Result<(), RecordError> {
        Ok(fs::write(path, serde_json::to_string(self)?)?)
    }

    /// Flatten the log into one row per value.
    pub fn rows<'a>(&'a self, monitor: &'a str) -> impl Iterator<Item = MonitorRecord> + 'a {
        self.tests
            .iter()
            .flat_map(|entry| entry.iter())
            .filter_map(|(key, values)| Metric::parse_key(key).map(|(m, load)| (m, load, values)))
            .flat_map(move |(metric, load, values)| {
                values
                    .iter()
                    .enumerate()
                    .map(move |(position, value)| MonitorRecord {
                        monitor: monitor.to_string(),
                        metric: metric.prefix().to_string(),
                        load,
                        position,
                        value_db: *value,
                    })
            })
    }
}

/// One value of a monitor log, as exported to CSV.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct MonitorRecord {
    pub monitor: String,
    pub metric: String,
    pub load: usize,
    pub position: usize,
    pub value_db: f64,
}

/// Write all rows of the given logs into a single CSV file.
pub fn export_csv<'a>(
    logs: impl IntoIterator<Item = (&'a str, &'a MonitorLog)>,
    path: impl AsRef<Path>,
) -> Result<usize, RecordError> {
    let mut writer = csv::Writer::from_path(path)?;
    let mut num_rows = 0;
    for (monitor, log) in logs {
        for row in log.rows(monitor) {
            writer.serialize(row)?;
            num_rows += 1;
        }
    }
    writer.flush()?;
    Ok(num_rows)
}
