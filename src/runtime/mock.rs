//! Scripted in-memory ring for driving the event loop in tests.

use crate::runtime::ring::{Completion, Op, QueueFull, Ring, Sqe};
use std::collections::VecDeque;
use std::io;
use std::os::unix::io::RawFd;

/// A [`Ring`] whose completions are fed by the test.
///
/// Records every prepared and submitted entry, every installed and closed
/// slot, and how many completions were handed out and acknowledged.
pub struct MockRing {
    queued: Vec<Sqe>,
    submitted: Vec<Sqe>,
    completions: VecDeque<Completion>,
    installed: Vec<(u32, RawFd)>,
    closed: Vec<u32>,
    sq_capacity: usize,
    /// Entries `submit` will pretend the kernel refused.
    pub submit_shortfall: usize,
    waits: usize,
    acks: usize,
}

impl MockRing {
    pub fn new() -> Self {
        Self {
            queued: Vec::new(),
            submitted: Vec::new(),
            completions: VecDeque::new(),
            installed: Vec::new(),
            closed: Vec::new(),
            sq_capacity: usize::MAX,
            submit_shortfall: 0,
            waits: 0,
            acks: 0,
        }
    }

    /// Limit how many entries may be queued between submits.
    pub fn with_sq_capacity(mut self, capacity: usize) -> Self {
        self.sq_capacity = capacity;
        self
    }

    /// Queue a completion for the entry carrying `user_data`.
    pub fn complete(&mut self, user_data: u64, result: i32, more: bool) {
        self.completions
            .push_back(Completion::new(user_data, result, more));
    }

    /// Complete a read as if the peer sent `data`.
    pub fn deliver(&mut self, sqe: &Sqe, data: &[u8]) {
        match *sqe.op() {
            Op::Read { ptr, len, .. } => {
                assert!(data.len() <= len as usize, "payload larger than read");
                // SAFETY: the event loop keeps the read buffer alive and
                // untouched until this completion is processed.
                unsafe { std::ptr::copy_nonoverlapping(data.as_ptr(), ptr, data.len()) };
                self.complete(sqe.user_data(), data.len() as i32, false);
            }
            ref op => panic!("deliver on non-read entry {op:?}"),
        }
    }

    /// Bytes a submitted write entry points at.
    pub fn written(sqe: &Sqe) -> Vec<u8> {
        match *sqe.op() {
            // SAFETY: only called while the write is still in flight.
            Op::Write { ptr, len, .. } => unsafe {
                std::slice::from_raw_parts(ptr, len as usize).to_vec()
            },
            ref op => panic!("not a write entry {op:?}"),
        }
    }

    /// Drain the submitted log.
    pub fn take_submitted(&mut self) -> Vec<Sqe> {
        std::mem::take(&mut self.submitted)
    }

    /// `(slot, descriptor)` pairs in installation order.
    pub fn installed(&self) -> &[(u32, RawFd)] {
        &self.installed
    }

    pub fn closed(&self) -> &[u32] {
        &self.closed
    }

    pub fn waits(&self) -> usize {
        self.waits
    }

    pub fn acks(&self) -> usize {
        self.acks
    }

    pub fn pending(&self) -> usize {
        self.completions.len()
    }
}

impl Ring for MockRing {
    unsafe fn push(&mut self, sqe: &Sqe) -> Result<(), QueueFull> {
        if self.queued.len() >= self.sq_capacity {
            return Err(QueueFull);
        }
        self.queued.push(*sqe);
        Ok(())
    }

    fn submit(&mut self) -> io::Result<usize> {
        let taken = self.queued.len().saturating_sub(self.submit_shortfall);
        self.submitted.extend(self.queued.drain(..));
        Ok(taken)
    }

    fn wait_for_completion(&mut self) -> io::Result<Completion> {
        let completion = self.completions.pop_front().ok_or_else(|| {
            io::Error::new(io::ErrorKind::WouldBlock, "no scripted completion")
        })?;
        self.waits += 1;
        Ok(completion)
    }

    fn acknowledge(&mut self, _completion: Completion) {
        self.acks += 1;
    }

    fn install_fixed(&mut self, slot: u32, fd: RawFd) -> io::Result<()> {
        self.installed.push((slot, fd));
        Ok(())
    }

    fn close_fixed(&mut self, slot: u32) -> io::Result<()> {
        self.closed.push(slot);
        Ok(())
    }
}
