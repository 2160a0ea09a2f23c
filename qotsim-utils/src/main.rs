use std::{fs, path::PathBuf};

use clap::Parser;
use itertools::Itertools;

use qotsim_utils::records::{export_csv, MonitorLog};

#[derive(Parser, Debug)]
#[command(author, version, about)] // get author/version information from Cargo.toml
/// Collect all monitor logs of a run directory into a single CSV file.
struct Args {
    /// Directory containing the `*.json` monitor logs
    run_dir: PathBuf,
    /// Output file, defaults to `<run_dir>/monitors.csv`
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init();
    let args = Args::parse();

    let logs = fs::read_dir(&args.run_dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
        .sorted()
        .filter_map(|path| {
            let name = path.file_stem()?.to_string_lossy().to_string();
            match MonitorLog::read(&path) {
                Ok(log) => Some((name, log)),
                Err(e) => {
                    log::debug!("skipping {path:?}: {e}");
                    None
                }
            }
        })
        .collect_vec();

    let output = args
        .output
        .unwrap_or_else(|| args.run_dir.join("monitors.csv"));
    let num_rows = export_csv(logs.iter().map(|(n, l)| (n.as_str(), l)), &output)?;
    log::info!(
        "wrote {num_rows} values of {} monitor logs to {output:?}",
        logs.len()
    );

    Ok(())
}
