use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use log::error;

use stationd::config::Settings;
use stationd::lifecycle;

/// Continuous seismic acquisition daemon.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the TOML configuration file. Created with built-in defaults if missing.
    #[arg(short, long, default_value = "station.toml")]
    config: PathBuf,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let settings = match Settings::load_or_create(&args.config) {
        Ok(settings) => settings,
        Err(e) => {
            error!("startup failed: {e}");
            return ExitCode::FAILURE;
        }
    };

    match lifecycle::run(settings) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("startup failed: {e}");
            ExitCode::FAILURE
        }
    }
}
