//! Worker bootstrap: executes one vessel work unit and exits.
//!
//! Console output of the unit goes to stdout; diagnostics go to stderr and
//! are filtered with `VESSEL_WORKER_LOG` (default `warn`).

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;
use vessel::launcher::protocol::exit_code;
use vessel::units::standard_registry;
use vessel::worker::{WorkerArgs, run_worker};

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_env("VESSEL_WORKER_LOG")
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let args = match WorkerArgs::try_parse() {
        Ok(args) => args,
        Err(err) => {
            let _ = err.print();
            let code = if err.use_stderr() {
                exit_code::BAD_ARGUMENTS
            } else {
                exit_code::SUCCESS
            };
            return ExitCode::from(code as u8);
        }
    };

    let code = run_worker(&standard_registry(), args);
    ExitCode::from(code as u8)
}
