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
//! Sweep the launch power and compare the simulated gOSNR with the QoT estimate at the receiver.
use std::{error::Error, path::PathBuf};

use clap::Parser;
use indicatif::{ParallelProgressIterator, ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::Serialize;
use statrs::statistics::Statistics;

use qotsim::{config::MonitorPolicy, prelude::*, util};

#[derive(Parser, Debug)]
#[command(about, long_about = None)]
struct Args {
    /// Lowest launch power.
    #[arg(long, default_value_t = -6.0, allow_negative_numbers = true)]
    from_dbm: f64,
    /// Highest launch power.
    #[arg(long, default_value_t = 6.0, allow_negative_numbers = true)]
    to_dbm: f64,
    #[arg(long, default_value_t = 1.0)]
    step_db: f64,
    #[arg(short, long, default_value_t = 3)]
    roadms: usize,
    #[arg(short, long, default_value_t = 6)]
    spans: usize,
    #[arg(long = "span-length-km", default_value_t = 80.0)]
    span_length_km: f64,
    #[arg(short, long, default_value_t = 8)]
    channels: usize,
    #[arg(long)]
    srs: bool,
    #[arg(short, long = "monitor-unit")]
    monitor_unit: Option<usize>,
    #[arg(long)]
    config: Option<PathBuf>,
    /// Directory to write the CSV file to.
    #[arg(short, long = "output-dir", default_value = "./results/")]
    output_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
struct SweepRecord {
    launch_power_dbm: f64,
    channel: ChannelId,
    osnr: f64,
    gosnr: f64,
    osnr_qot: f64,
    gosnr_qot: f64,
    /// QoT estimate minus simulation \[dB\]
    error_db: f64,
}

fn run(
    topo: Topology,
    layout: &SpanLayout,
    mut config: SimConfig,
    launch_power_dbm: f64,
    channels: usize,
    dst: &str,
) -> Result<Vec<SweepRecord>, String> {
    config.default_launch_power_dbm = launch_power_dbm;
    let mut net = topo
        .build_network(layout, &config)
        .map_err(|e| e.to_string())?;
    let src = net.node_id("lt0").map_err(|e| e.to_string())?;
    let dst = net.node_id(dst).map_err(|e| e.to_string())?;
    let bit_rate = net
        .line_terminal(src)
        .map_err(|e| e.to_string())?
        .transceiver(0)
        .map_err(|e| e.to_string())?
        .gross_bit_rate();
    for _ in 0..channels {
        net.transmit(src, dst, bit_rate, None, None)
            .map_err(|e| e.to_string())?;
    }
    let lt = net.line_terminal(dst).map_err(|e| e.to_string())?;
    Ok(lt
        .last_reports()
        .into_iter()
        .map(|r| SweepRecord {
            launch_power_dbm,
            channel: r.channel,
            osnr: r.osnr,
            gosnr: r.gosnr,
            osnr_qot: r.osnr_qot,
            gosnr_qot: r.gosnr_qot,
            error_db: r.gosnr_qot - r.gosnr,
        })
        .collect())
}

fn main() -> Result<(), Box<dyn Error>> {
    util::init_logging();
    let args = Args::parse();
    if args.step_db <= 0.0 || args.to_dbm < args.from_dbm {
        Err("The sweep needs a positive step and from <= to")?
    }

    let mut config = match &args.config {
        Some(path) => SimConfig::from_file(path)?,
        None => SimConfig::default(),
    };
    config.srs_effect |= args.srs;
    if let Some(unit) = args.monitor_unit {
        config.monitor_policy = Some(MonitorPolicy { unit });
    }
    let topo = Topology::Linear(args.roadms);
    let dst = format!("lt{}", args.roadms.saturating_sub(1));
    let layout = SpanLayout::new()
        .span_length_km(args.span_length_km)
        .spans_per_link(args.spans);

    let num_steps = ((args.to_dbm - args.from_dbm) / args.step_db).round() as usize + 1;
    let powers: Vec<f64> = (0..num_steps)
        .map(|i| args.from_dbm + i as f64 * args.step_db)
        .collect();
    log::info!(
        "Sweeping {} launch powers on {} with {} channels",
        powers.len(),
        topo.fmt(),
        args.channels
    );

    let pb = ProgressBar::new(powers.len() as u64).with_style(
        ProgressStyle::with_template("[{bar:80}] {pos:>4}/{len:4}, elapsed: {elapsed}, eta: {eta}")?
            .progress_chars("##-"),
    );
    let records = powers
        .into_par_iter()
        .progress_with(pb)
        .map(|p| run(topo, &layout, config.clone(), p, args.channels, &dst))
        .collect::<Result<Vec<_>, String>>()?
        .into_iter()
        .flatten()
        .collect::<Vec<_>>();

    let errors = records
        .iter()
        .map(|r| r.error_db)
        .filter(|e| e.is_finite())
        .collect::<Vec<_>>();
    if !errors.is_empty() {
        log::info!(
            "QoT estimation error: mean {:.3} dB, std-dev {:.3} dB over {} samples",
            errors.iter().mean(),
            errors.iter().std_dev(),
            errors.len()
        );
    }

    std::fs::create_dir_all(&args.output_dir)?;
    let timestamp = chrono::Local::now().format("%Y-%m-%d_%H:%M:%S");
    let path = args
        .output_dir
        .join(format!("power_sweep_{}_{timestamp}.csv", topo.fmt()));
    let mut csv = csv::WriterBuilder::new().has_headers(true).from_path(&path)?;
    for record in records.iter() {
        csv.serialize(record)?;
    }
    csv.flush()?;
    log::info!("wrote {} records to {}", records.len(), path.display());
    Ok(())
}
