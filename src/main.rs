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
use std::{error::Error, path::PathBuf};

use clap::Parser;
use itertools::Itertools;

use qotsim::{
    monitor::{MonitorMode, MonitorTarget},
    prelude::*,
    util,
};
use qotsim_utils::serde::RunMetadata;

#[derive(Parser, Debug)]
#[command(about, long_about = None)]
struct Args {
    /// Topology to simulate, `linear` or `ring`.
    #[arg(short, long, default_value = "linear")]
    topology: String,
    /// Number of ROADMs.
    #[arg(short, long, default_value_t = 3)]
    roadms: usize,
    /// Number of spans between two neighboring ROADMs.
    #[arg(short, long, default_value_t = 4)]
    spans: usize,
    /// Length of every span.
    #[arg(long = "span-length-km", default_value_t = 80.0)]
    span_length_km: f64,
    /// Number of channels transmitted from the first to the last terminal, one at a time.
    #[arg(short, long, default_value_t = 10)]
    channels: usize,
    /// Launch power of every transceiver.
    #[arg(short = 'p', long = "launch-power-dbm")]
    launch_power_dbm: Option<f64>,
    /// Enable Raman cross-talk on all links.
    #[arg(long)]
    srs: bool,
    /// Correct the QoT estimate from the simulation every this many spans.
    #[arg(short, long = "monitor-unit")]
    monitor_unit: Option<usize>,
    /// Simulation configuration (JSON).
    #[arg(long)]
    config: Option<PathBuf>,
    /// Directory to write the monitor logs to.
    #[arg(short, long = "output-dir", default_value = "./results/")]
    output_dir: PathBuf,
}

fn main() -> Result<(), Box<dyn Error>> {
    util::init_logging();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => SimConfig::from_file(path)?,
        None => SimConfig::default(),
    };
    if let Some(p) = args.launch_power_dbm {
        config.default_launch_power_dbm = p;
    }
    if let Some(unit) = args.monitor_unit {
        config.monitor_policy = Some(qotsim::config::MonitorPolicy { unit });
    }
    config.srs_effect |= args.srs;
    config.validate()?;

    let topo = match args.topology.as_str() {
        "linear" => Topology::Linear(args.roadms),
        "ring" => Topology::Ring(args.roadms),
        other => Err(format!("Unknown topology {other}"))?,
    };
    let layout = SpanLayout::new()
        .span_length_km(args.span_length_km)
        .spans_per_link(args.spans);
    let mut net = topo.build_network(&layout, &config)?;

    // observe the output of every amplifier between the first two ROADMs
    let amps = net
        .link_by_name("r0-r1")
        .map(|l| l.amplifiers().map(|a| a.name.clone()).collect_vec())
        .unwrap_or_default();
    for amp in amps {
        net.add_monitor(
            format!("{amp}-monitor"),
            MonitorTarget::Amplifier(amp),
            MonitorMode::Out,
        )?;
    }

    let src = net.node_id("lt0")?;
    let dst = net.node_id(&format!("lt{}", args.roadms - 1))?;
    // one wavelength per load
    let bit_rate = net.line_terminal(src)?.transceiver(0)?.gross_bit_rate();
    let mut logs = Vec::new();
    for i in 0..args.channels {
        let traffic = net.transmit(src, dst, bit_rate, None, None)?;
        log::debug!("load {}: started transmission {traffic}", i + 1);
        util::record_monitors(&net, &mut logs)?;
    }

    for report in net.line_terminal(dst)?.last_reports() {
        log::info!(
            "channel {}: OSNR {:.2} dB, gOSNR {:.2} dB (QoT {:.2} dB) -> {}",
            report.channel,
            report.osnr,
            report.gosnr,
            report.gosnr_qot,
            if report.success { "ok" } else { "failed" }
        );
    }

    let timestamp = qotsim_utils::other::get_timestamp();
    let metadata = RunMetadata {
        execution_timestamp: timestamp.clone(),
        topology: topo.fmt(),
        launch_power_dbm: config.default_launch_power_dbm,
        num_channels: args.channels,
        srs_effect: config.srs_effect,
        monitor_unit: config.monitor_policy.map(|p| p.unit),
        monitor_logs: Vec::new(),
    };
    let dir = args.output_dir.join(format!("{}_{timestamp}", topo.fmt()));
    util::write_monitor_logs(&dir, &logs, metadata)?;
    Ok(())
}
