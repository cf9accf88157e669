//! Submission/completion ring contract.
//!
//! The event loop talks to the kernel only through [`Ring`]. Operations are
//! described as [`Sqe`] values, prepared first and tagged with a context
//! token second, mirroring how io_uring clears `user_data` when an entry is
//! prepared. Results come back as [`Completion`] records that must be
//! acknowledged exactly once.

use std::io;
use std::os::unix::io::RawFd;

use crate::runtime::buffer::Buffer;

/// An operation ready to be placed on the submission queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    /// Repeating accept on the listener; each completion result is the
    /// descriptor of a new connection.
    AcceptMulti { listener: RawFd },
    /// One-shot read from a fixed file slot.
    Read { slot: u32, ptr: *mut u8, len: u32 },
    /// One-shot write to a fixed file slot.
    Write { slot: u32, ptr: *const u8, len: u32 },
}

/// A prepared submission queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sqe {
    op: Op,
    user_data: u64,
}

impl Sqe {
    /// Prepare a multishot accept on `listener`.
    pub fn accept_multi(listener: RawFd) -> Self {
        Self::new(Op::AcceptMulti { listener })
    }

    /// Prepare a read filling the whole capacity of `buf`.
    pub fn read(slot: u32, buf: &mut Buffer) -> Self {
        Self::new(Op::Read {
            slot,
            ptr: buf.as_mut_ptr(),
            len: buf.capacity() as u32,
        })
    }

    /// Prepare a write of the valid bytes of `buf`.
    pub fn write(slot: u32, buf: &Buffer) -> Self {
        Self::new(Op::Write {
            slot,
            ptr: buf.as_ptr(),
            len: buf.len() as u32,
        })
    }

    fn new(op: Op) -> Self {
        Self { op, user_data: 0 }
    }

    /// Attach the context token. Must come after the prepare call.
    pub fn attach(mut self, token: u64) -> Self {
        self.user_data = token;
        self
    }

    pub fn op(&self) -> &Op {
        &self.op
    }

    pub fn user_data(&self) -> u64 {
        self.user_data
    }
}

/// A result retrieved from the completion queue.
///
/// Not `Clone`: [`Ring::acknowledge`] consumes it, so it cannot be read
/// after the slot is released.
#[derive(Debug, PartialEq, Eq)]
pub struct Completion {
    user_data: u64,
    result: i32,
    more: bool,
}

impl Completion {
    pub fn new(user_data: u64, result: i32, more: bool) -> Self {
        Self {
            user_data,
            result,
            more,
        }
    }

    /// Token of the context attached at submission.
    pub fn user_data(&self) -> u64 {
        self.user_data
    }

    /// Operation result; negative values are `-errno`.
    pub fn result(&self) -> i32 {
        self.result
    }

    /// Whether a multishot operation will produce further completions.
    pub fn more(&self) -> bool {
        self.more
    }
}

/// Returned by [`Ring::push`] when the submission queue has no room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("submission queue full")]
pub struct QueueFull;

/// A kernel-mediated submission/completion queue pair.
pub trait Ring {
    /// Queue a prepared operation without submitting it.
    ///
    /// # Safety
    /// Any buffer `sqe` points into must stay alive and must not be accessed
    /// until the completion carrying the same token has been retrieved.
    unsafe fn push(&mut self, sqe: &Sqe) -> Result<(), QueueFull>;

    /// Flush queued operations to the kernel, returning how many were taken.
    fn submit(&mut self) -> io::Result<usize>;

    /// Block until a completion is available and return it.
    fn wait_for_completion(&mut self) -> io::Result<Completion>;

    /// Release a completion retrieved by `wait_for_completion`.
    fn acknowledge(&mut self, completion: Completion);

    /// Move an accepted descriptor into fixed file `slot`.
    ///
    /// Takes ownership of `fd`: once installed, the table holds the only
    /// reference, and on failure the descriptor is closed.
    fn install_fixed(&mut self, slot: u32, fd: RawFd) -> io::Result<()>;

    /// Remove a connection from the fixed file table, closing it.
    fn close_fixed(&mut self, slot: u32) -> io::Result<()>;
}
