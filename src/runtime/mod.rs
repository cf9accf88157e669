//! Completion-based runtime.
//!
//! - `Ring`: the submission/completion queue contract (`ring`)
//! - `UringRing`: io_uring implementation (Linux only)
//! - `ContextTable`: per-operation state for completion correlation
//! - `Server`: the single-threaded dispatcher

mod buffer;
mod context;
pub mod error;
mod event_loop;
#[cfg(test)]
mod mock;
mod ring;
#[cfg(target_os = "linux")]
mod uring;

pub use error::Error;
pub use event_loop::Server;

use crate::config::Config;
use std::convert::Infallible;
use std::net::TcpListener;
use tracing::info;

/// Bind the configured address and serve until a fatal error.
pub fn run(config: &Config) -> Result<Infallible, Error> {
    let listener = crate::listener::create(config.listen, config.backlog).map_err(|source| {
        Error::Bind {
            addr: config.listen,
            source,
        }
    })?;
    info!(address = %config.listen, "Listening");
    serve(listener, config)
}

/// Serve connections from an already bound listener.
#[cfg(target_os = "linux")]
pub fn serve(listener: TcpListener, config: &Config) -> Result<Infallible, Error> {
    use std::os::unix::io::AsRawFd;

    let ring = uring::UringRing::setup(&uring::RingSettings::from(config))?;
    let server = Server::new(
        ring,
        listener.as_raw_fd(),
        config.fixed_slots,
        config.buffer_size,
    );
    // `listener` stays alive for as long as the loop runs.
    let result = server.run();
    drop(listener);
    result
}

#[cfg(not(target_os = "linux"))]
pub fn serve(_listener: TcpListener, _config: &Config) -> Result<Infallible, Error> {
    Err(Error::RingSetup {
        stage: "initialize",
        source: std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "Unsupported platform: io_uring requires Linux",
        ),
    })
}
