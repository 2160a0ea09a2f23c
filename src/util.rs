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
//! Helpers shared by the binaries.
use std::{
    fs,
    path::{Path, PathBuf},
};

use qotsim_utils::{
    records::{MonitorLog, RecordError},
    serde::RunMetadata,
};

use crate::network::{Network, NetworkError};

/// Initialize logging from `log4rs.yml`, or through `pretty_env_logger` if that file cannot be
/// loaded.
pub fn init_logging() {
    if let Err(e) = log4rs::init_file("log4rs.yml", Default::default()) {
        pretty_env_logger::init();
        log::warn!("cannot load log4rs.yml ({e}), logging to stderr");
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Record(#[from] RecordError),
    #[error(transparent)]
    Network(#[from] NetworkError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Append the current OSNR and gOSNR lists of every monitor to its log, creating the log when
/// missing.
pub fn record_monitors(net: &Network, logs: &mut Vec<(String, MonitorLog)>) -> Result<(), NetworkError> {
    for monitor in net.monitors() {
        let view = net.monitor(&monitor.name)?;
        if view.channels().is_empty() {
            continue;
        }
        let idx = match logs.iter().position(|(name, _)| *name == monitor.name) {
            Some(idx) => idx,
            None => {
                logs.push((monitor.name.clone(), MonitorLog::new()));
                logs.len() - 1
            }
        };
        let values = |list: Vec<(usize, f64)>| list.into_iter().map(|(_, v)| v).collect::<Vec<_>>();
        let log = &mut logs[idx].1;
        log.push_load(values(view.get_list_osnr()), values(view.get_list_gosnr()));
        log.push_load_qot(
            values(view.get_list_osnr_qot()),
            values(view.get_list_gosnr_qot()),
        );
    }
    Ok(())
}

/// Write one JSON file per monitor log and the run metadata to `dir`. Returns the written files.
pub fn write_monitor_logs(
    dir: impl AsRef<Path>,
    logs: &[(String, MonitorLog)],
    mut metadata: RunMetadata,
) -> Result<Vec<PathBuf>, ExportError> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir)?;
    let mut written = Vec::new();
    for (name, log) in logs {
        let path = dir.join(format!("{name}.json"));
        log.write(&path)?;
        metadata.monitor_logs.push(path.display().to_string());
        written.push(path);
    }
    let path = dir.join("metadata.json");
    fs::write(&path, serde_json::to_string_pretty(&metadata)?)?;
    log::info!("wrote {} monitor logs to {}", logs.len(), dir.display());
    written.push(path);
    Ok(written)
}
