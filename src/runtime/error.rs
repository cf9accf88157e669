//! Fatal error taxonomy for the event loop.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use thiserror::Error;

/// The kind of operation a context tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Accept,
    Read,
    Write,
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpKind::Accept => f.write_str("accept"),
            OpKind::Read => f.write_str("read"),
            OpKind::Write => f.write_str("write"),
        }
    }
}

/// Errors that stop the server.
#[derive(Debug, Error)]
pub enum Error {
    /// The listening socket could not be created.
    #[error("failed to listen on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    /// Ring initialization or registration failed.
    #[error("ring setup failed ({stage}): {source}")]
    RingSetup {
        stage: &'static str,
        #[source]
        source: io::Error,
    },
    /// The kernel took a different number of operations than were prepared.
    #[error("submitted {actual} of {expected} prepared operations")]
    SubmitMismatch { expected: usize, actual: usize },
    /// No room left in the submission queue.
    #[error("submission queue full")]
    SubmissionQueueFull,
    /// More operations in flight than the context table was sized for.
    #[error("context table full ({capacity} operations in flight)")]
    ContextTableFull { capacity: usize },
    /// An operation completed with a negative result.
    #[error("{op} failed on slot {slot:?}: {source}")]
    Completion {
        op: OpKind,
        slot: Option<u32>,
        #[source]
        source: io::Error,
    },
    /// An accepted connection could not be moved into its fixed slot.
    #[error("failed to install connection into slot {slot}: {source}")]
    Install {
        slot: u32,
        #[source]
        source: io::Error,
    },
    /// A fixed file slot could not be released.
    #[error("failed to close slot {slot}: {source}")]
    Close {
        slot: u32,
        #[source]
        source: io::Error,
    },
    /// Waiting on or submitting to the ring failed.
    #[error("ring I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Build a completion error from a negative CQE result.
    pub fn completion(op: OpKind, slot: Option<u32>, result: i32) -> Self {
        Error::Completion {
            op,
            slot,
            source: io::Error::from_raw_os_error(-result),
        }
    }
}
