//! Connection context tracking for completion correlation.
//!
//! Every submitted operation carries a token (io_uring `user_data`) naming
//! a context in this table. The context owns whatever the operation needs
//! to stay alive until its completion arrives, most importantly the buffer
//! the kernel reads into or writes from.

use crate::runtime::buffer::Buffer;
use crate::runtime::error::OpKind;
use crate::runtime::ring::Sqe;
use slab::Slab;
use std::os::unix::io::RawFd;

/// State attached to one in-flight operation.
#[derive(Debug)]
pub enum Context {
    /// The persistent multishot accept on the listening socket.
    Accept {
        /// Listening socket file descriptor.
        listener: RawFd,
    },
    /// A read from a connection into `buf`.
    Read {
        /// Fixed file slot of the connection.
        slot: u32,
        buf: Buffer,
    },
    /// A write of `buf` to a connection.
    Write {
        /// Fixed file slot of the connection.
        slot: u32,
        buf: Buffer,
    },
}

impl Context {
    pub fn kind(&self) -> OpKind {
        match self {
            Context::Accept { .. } => OpKind::Accept,
            Context::Read { .. } => OpKind::Read,
            Context::Write { .. } => OpKind::Write,
        }
    }

    /// Prepare the operation this context describes.
    ///
    /// The returned entry has no token attached yet.
    pub fn prepare(&mut self) -> Sqe {
        match self {
            Context::Accept { listener } => Sqe::accept_multi(*listener),
            Context::Read { slot, buf } => Sqe::read(*slot, buf),
            Context::Write { slot, buf } => Sqe::write(*slot, buf),
        }
    }

    /// Hand back the buffer, if this context owns one.
    pub fn into_buffer(self) -> Option<Buffer> {
        match self {
            Context::Accept { .. } => None,
            Context::Read { buf, .. } | Context::Write { buf, .. } => Some(buf),
        }
    }
}

/// Returned by [`ContextTable::insert`] when the table is at capacity.
#[derive(Debug)]
pub struct TableFull(pub Context);

/// Slab of in-flight contexts with O(1) lookup by token.
pub struct ContextTable {
    contexts: Slab<Context>,
    capacity: usize,
}

impl ContextTable {
    /// Create a table holding at most `capacity` contexts.
    pub fn new(capacity: usize) -> Self {
        Self {
            contexts: Slab::with_capacity(capacity),
            capacity,
        }
    }

    /// Store a context and return its token.
    ///
    /// The context is handed back if the table is full.
    pub fn insert(&mut self, context: Context) -> Result<u64, TableFull> {
        if self.contexts.len() >= self.capacity {
            return Err(TableFull(context));
        }
        Ok(self.contexts.insert(context) as u64)
    }

    /// Look up a context without removing it.
    #[cfg(test)]
    pub fn get(&self, token: u64) -> Option<&Context> {
        usize::try_from(token)
            .ok()
            .and_then(|idx| self.contexts.get(idx))
    }

    /// Remove a context, ending its lifetime.
    ///
    /// Returns `None` if the token is unknown or already removed.
    pub fn remove(&mut self, token: u64) -> Option<Context> {
        let idx = usize::try_from(token).ok()?;
        self.contexts.try_remove(idx)
    }

    /// Number of contexts in flight.
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    /// Maximum number of contexts.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
