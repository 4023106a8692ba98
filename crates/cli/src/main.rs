//! `memory-validation` entry point.

use clap::Parser;
use memory_validation_cli::{logging, run, Cli};
use std::process::ExitCode;
use tracing::{error, warn};

const EXIT_INTERRUPTED: u8 = 130;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    logging::init(cli.log_format, cli.verbose);

    tokio::select! {
        outcome = run(&cli) => match outcome {
            Ok(report) if report.has_failures() => ExitCode::FAILURE,
            Ok(_) => ExitCode::SUCCESS,
            Err(err) => {
                error!(error = ?err, "Validation run failed");
                eprintln!("Error: {err:#}");
                ExitCode::FAILURE
            }
        },
        _ = tokio::signal::ctrl_c() => {
            warn!("Validation interrupted");
            eprintln!("\nValidation interrupted by user");
            ExitCode::from(EXIT_INTERRUPTED)
        }
    }
}
