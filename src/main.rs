//! uring-ack: a single-threaded io_uring TCP server
//!
//! Every client gets exactly one acknowledgment:
//! - read once (up to the buffer size)
//! - reply with `ack\0`
//! - close
//!
//! All socket I/O goes through one submission/completion ring driven by a
//! single thread. Configuration via CLI arguments or TOML file.

mod config;
mod listener;
#[cfg(target_os = "linux")]
mod probe;
mod runtime;

use config::Config;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    // Load configuration
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    if config.probe {
        return run_probe();
    }

    info!(
        listen = %config.listen,
        ring_depth = config.ring_depth,
        sqpoll = config.sqpoll,
        fixed_slots = config.fixed_slots,
        buffer_size = config.buffer_size,
        "Starting uring-ack server"
    );

    match runtime::run(&config) {
        Ok(never) => match never {},
        Err(e) => {
            error!(error = %e, "Server terminated");
            ExitCode::FAILURE
        }
    }
}

/// Print opcode support for this kernel.
#[cfg(target_os = "linux")]
fn run_probe() -> ExitCode {
    match probe::probe() {
        Ok(results) => {
            print!("{}", probe::report(&results));
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Opcode probe failed");
            ExitCode::FAILURE
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn run_probe() -> ExitCode {
    error!("Opcode probe requires Linux");
    ExitCode::FAILURE
}
