//! Completion-driven event loop.
//!
//! One thread, one ring. A single multishot accept feeds new connections;
//! each connection is moved into a fixed file slot and then runs read,
//! acknowledge, close with exactly one operation in flight at a time.
//! Connections accepted while every slot is busy wait, in arrival order, for
//! the next slot to free up. Completions may arrive in any order, so every
//! decision is made from the context attached at submission.
//!
//! A client that connects and never sends keeps its read outstanding
//! indefinitely; there is no idle eviction.

use crate::runtime::buffer::{Buffer, BufferPool};
use crate::runtime::context::{Context, ContextTable, TableFull};
use crate::runtime::error::{Error, OpKind};
use crate::runtime::ring::{Completion, Ring, Sqe};
use std::collections::VecDeque;
use std::convert::Infallible;
use std::os::unix::io::RawFd;
use tracing::{debug, warn};

/// Payload sent to every client after its first read.
pub const ACK: &[u8] = b"ack\0";

/// Event counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    /// Connections handed over by the accept.
    pub accepted: u64,
    /// Connections that had to wait for a free slot.
    pub waited: u64,
    /// Connections dropped for lack of a buffer.
    pub rejected: u64,
    /// Acknowledgments fully written.
    pub acknowledged: u64,
    /// Connections the peer closed before sending anything.
    pub peer_closed: u64,
    /// Bytes read across all connections.
    pub bytes_received: u64,
}

/// Dispatcher state: the ring plus every context it has in flight.
pub struct Server<R: Ring> {
    ring: R,
    listener: RawFd,
    contexts: ContextTable,
    buffers: BufferPool,
    /// Unoccupied fixed file slots.
    free_slots: Vec<u32>,
    /// Accepted descriptors waiting for a slot, oldest first.
    waiting: VecDeque<RawFd>,
    /// Token of the long-lived accept context, once armed.
    accept_token: Option<u64>,
    /// The accept ended on the descriptor limit and waits for a close.
    accept_paused: bool,
    /// Entries pushed since the last submit.
    prepared: usize,
    stats: Stats,
}

impl<R: Ring> Server<R> {
    /// Create a server for `listener` holding at most `fixed_slots`
    /// connections, each reading up to `buffer_size` bytes.
    pub fn new(ring: R, listener: RawFd, fixed_slots: u32, buffer_size: usize) -> Self {
        let slots = fixed_slots as usize;
        Self {
            ring,
            listener,
            // One operation per connection plus the accept.
            contexts: ContextTable::new(slots + 1),
            // A connection releases its read buffer before taking a write buffer.
            buffers: BufferPool::new(slots, buffer_size),
            // Lowest slot on top.
            free_slots: (0..fixed_slots).rev().collect(),
            waiting: VecDeque::new(),
            accept_token: None,
            accept_paused: false,
            prepared: 0,
            stats: Stats::default(),
        }
    }

    /// Arm the accept, then dispatch completions until a fatal error.
    pub fn run(mut self) -> Result<Infallible, Error> {
        self.start()?;
        loop {
            if let Err(e) = self.turn() {
                debug!(stats = ?self.stats(), "Event loop stopped");
                return Err(e);
            }
        }
    }

    /// Submit the persistent multishot accept.
    pub fn start(&mut self) -> Result<(), Error> {
        let token = self.begin(Context::Accept {
            listener: self.listener,
        })?;
        self.accept_token = Some(token);
        self.flush()
    }

    /// Wait for one completion, handle it, and submit the follow-up.
    pub fn turn(&mut self) -> Result<(), Error> {
        let completion = self.ring.wait_for_completion()?;
        let outcome = self.dispatch(&completion);
        self.ring.acknowledge(completion);
        outcome?;
        self.admit_waiting()?;
        self.flush()
    }

    pub fn stats(&self) -> Stats {
        self.stats
    }

    fn dispatch(&mut self, completion: &Completion) -> Result<(), Error> {
        let token = completion.user_data();

        if self.accept_token == Some(token) {
            return self.on_accept(token, completion.result(), completion.more());
        }

        match self.contexts.remove(token) {
            Some(Context::Read { slot, buf }) => self.on_read(slot, buf, completion.result()),
            Some(Context::Write { slot, buf }) => self.on_write(slot, buf, completion.result()),
            Some(context @ Context::Accept { .. }) => {
                // Only one accept is ever armed.
                warn!(token, kind = %context.kind(), "Stray context");
                self.release(context);
                Ok(())
            }
            None => {
                warn!(token, "Completion for unknown context");
                Ok(())
            }
        }
    }

    fn on_accept(&mut self, token: u64, result: i32, more: bool) -> Result<(), Error> {
        if result == -libc::EMFILE || result == -libc::ENFILE {
            // The connection stays in the listen backlog.
            if more {
                warn!(token, "Descriptor limit reached");
            } else {
                warn!(token, "Descriptor limit reached, accept paused");
                self.accept_paused = true;
            }
            return Ok(());
        }

        if !more {
            // The kernel ended the multishot; arm it again under the same context.
            debug!(token, "Re-arming multishot accept");
            self.rearm_accept(token)?;
        }
        if result < 0 {
            return Err(Error::completion(OpKind::Accept, None, result));
        }

        self.stats.accepted += 1;
        self.waiting.push_back(result);
        if self.waiting.len() > self.free_slots.len() {
            self.stats.waited += 1;
            debug!(
                fd = result,
                waiting = self.waiting.len(),
                "All fixed slots busy, connection waiting"
            );
        }
        Ok(())
    }

    fn on_read(&mut self, slot: u32, mut buf: Buffer, result: i32) -> Result<(), Error> {
        if result > 0 {
            buf.set_len(result as usize);
            self.stats.bytes_received += buf.len() as u64;
            debug!(slot, len = buf.len(), payload = %buf.text(), "Received");
        }
        self.buffers.free(buf);

        if result < 0 {
            self.close(slot)?;
            return Err(Error::completion(OpKind::Read, Some(slot), result));
        }
        if result == 0 {
            self.stats.peer_closed += 1;
            debug!(slot, "Connection closed by peer");
            return self.close(slot);
        }

        let Some(mut reply) = self.buffers.alloc() else {
            self.stats.rejected += 1;
            warn!(slot, "Buffer pool exhausted, closing connection");
            return self.close(slot);
        };
        reply.fill(ACK);
        self.begin(Context::Write { slot, buf: reply }).map(drop)
    }

    fn on_write(&mut self, slot: u32, buf: Buffer, result: i32) -> Result<(), Error> {
        self.buffers.free(buf);

        if result < 0 {
            self.close(slot)?;
            return Err(Error::completion(OpKind::Write, Some(slot), result));
        }

        self.stats.acknowledged += 1;
        debug!(
            slot,
            written = result,
            acknowledged = self.stats.acknowledged,
            "Acknowledged"
        );
        self.close(slot)
    }

    /// Move waiting connections into free slots, oldest first.
    fn admit_waiting(&mut self) -> Result<(), Error> {
        while let Some(&slot) = self.free_slots.last() {
            let Some(fd) = self.waiting.pop_front() else {
                break;
            };
            self.free_slots.pop();
            self.admit(slot, fd)?;
        }
        Ok(())
    }

    /// Install `fd` into `slot` and start its read.
    fn admit(&mut self, slot: u32, fd: RawFd) -> Result<(), Error> {
        if let Err(source) = self.ring.install_fixed(slot, fd) {
            self.free_slots.push(slot);
            return Err(Error::Install { slot, source });
        }
        debug!(slot, fd, accepted = self.stats.accepted, "Accepted connection");

        let Some(buf) = self.buffers.alloc() else {
            self.stats.rejected += 1;
            warn!(slot, "Buffer pool exhausted, closing connection");
            return self.close(slot);
        };
        self.begin(Context::Read { slot, buf }).map(drop)
    }

    /// Prepare the context's operation, store the context, attach its token
    /// and queue the entry. The context's buffer is released on failure.
    fn begin(&mut self, mut context: Context) -> Result<u64, Error> {
        let sqe = context.prepare();
        let token = match self.contexts.insert(context) {
            Ok(token) => token,
            Err(TableFull(context)) => {
                self.release(context);
                return Err(Error::ContextTableFull {
                    capacity: self.contexts.capacity(),
                });
            }
        };

        if let Err(e) = self.push(sqe.attach(token)) {
            if let Some(context) = self.contexts.remove(token) {
                self.release(context);
            }
            return Err(e);
        }
        Ok(token)
    }

    fn rearm_accept(&mut self, token: u64) -> Result<(), Error> {
        self.push(Sqe::accept_multi(self.listener).attach(token))
    }

    fn push(&mut self, sqe: Sqe) -> Result<(), Error> {
        // SAFETY: every buffer an entry points into is owned by a context in
        // `self.contexts` and is released only after the matching
        // completion has been retrieved.
        unsafe { self.ring.push(&sqe) }.map_err(|_| Error::SubmissionQueueFull)?;
        self.prepared += 1;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), Error> {
        if self.prepared == 0 {
            return Ok(());
        }
        let expected = std::mem::take(&mut self.prepared);
        let actual = self.ring.submit()?;
        if actual != expected {
            return Err(Error::SubmitMismatch { expected, actual });
        }
        Ok(())
    }

    fn release(&mut self, context: Context) {
        if let Some(buf) = context.into_buffer() {
            self.buffers.free(buf);
        }
    }

    /// Clear `slot` and return it to the free list. A paused accept resumes.
    fn close(&mut self, slot: u32) -> Result<(), Error> {
        self.ring
            .close_fixed(slot)
            .map_err(|source| Error::Close { slot, source })?;
        self.free_slots.push(slot);
        debug!(slot, "Connection closed");

        if self.accept_paused {
            if let Some(token) = self.accept_token {
                self.accept_paused = false;
                debug!(token, "Resuming accept");
                self.rearm_accept(token)?;
            }
        }
        Ok(())
    }

    #[cfg(test)]
    pub fn ring_mut(&mut self) -> &mut R {
        &mut self.ring
    }

    #[cfg(test)]
    pub fn in_flight(&self) -> usize {
        self.contexts.len()
    }

    #[cfg(test)]
    pub fn buffers(&self) -> &BufferPool {
        &self.buffers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::mock::MockRing;
    use crate::runtime::ring::Op;

    const LISTENER: RawFd = 3;
    /// First descriptor the scripted accept hands out.
    const FD: RawFd = 100;

    fn server(slots: u32) -> Server<MockRing> {
        let mut server = Server::new(MockRing::new(), LISTENER, slots, 1024);
        server.start().unwrap();
        server
    }

    fn accept_token(server: &mut Server<MockRing>) -> u64 {
        server.accept_token.unwrap()
    }

    /// Run every scripted completion through the dispatcher.
    fn pump(server: &mut Server<MockRing>) {
        while server.ring_mut().pending() > 0 {
            server.turn().unwrap();
        }
    }

    /// Accept `fd` and return the read it triggers.
    fn connect(server: &mut Server<MockRing>, fd: RawFd) -> Sqe {
        let token = accept_token(server);
        server.ring_mut().complete(token, fd, true);
        pump(server);
        let submitted = server.ring_mut().take_submitted();
        assert_eq!(submitted.len(), 1);
        submitted[0]
    }

    fn slot_of(sqe: &Sqe) -> u32 {
        match *sqe.op() {
            Op::Read { slot, .. } | Op::Write { slot, .. } => slot,
            ref op => panic!("no slot on {op:?}"),
        }
    }

    fn assert_no_leaks(server: &Server<MockRing>) {
        // Only the accept context survives.
        assert_eq!(server.in_flight(), 1);
        assert!(server.waiting.is_empty());
        assert_eq!(server.buffers().outstanding(), 0);
        assert_eq!(server.buffers().allocations(), server.buffers().releases());
    }

    #[test]
    fn test_start_submits_multishot_accept() {
        let mut server = server(8);
        let submitted = server.ring_mut().take_submitted();
        assert_eq!(submitted.len(), 1);
        assert_eq!(*submitted[0].op(), Op::AcceptMulti { listener: LISTENER });
        assert_eq!(Some(submitted[0].user_data()), server.accept_token);
    }

    #[test]
    fn test_hello_is_acknowledged_then_closed() {
        let mut server = server(8);
        server.ring_mut().take_submitted();

        let read = connect(&mut server, FD);
        assert!(matches!(*read.op(), Op::Read { slot: 0, len: 1024, .. }));
        assert_eq!(server.ring_mut().installed(), &[(0, FD)]);

        server.ring_mut().deliver(&read, b"hello");
        pump(&mut server);

        let submitted = server.ring_mut().take_submitted();
        assert_eq!(submitted.len(), 1);
        let write = submitted[0];
        assert!(matches!(*write.op(), Op::Write { slot: 0, len: 4, .. }));
        assert_eq!(MockRing::written(&write), b"ack\0");
        assert!(server.ring_mut().closed().is_empty());

        server.ring_mut().complete(write.user_data(), 4, false);
        pump(&mut server);

        assert_eq!(server.ring_mut().closed(), &[0]);
        assert!(server.ring_mut().take_submitted().is_empty());
        assert_no_leaks(&server);

        let stats = server.stats();
        assert_eq!(stats.accepted, 1);
        assert_eq!(stats.waited, 0);
        assert_eq!(stats.acknowledged, 1);
        assert_eq!(stats.bytes_received, 5);
    }

    #[test]
    fn test_zero_read_tears_down_without_write() {
        let mut server = server(8);
        server.ring_mut().take_submitted();

        let read = connect(&mut server, FD);
        server.ring_mut().complete(read.user_data(), 0, false);
        pump(&mut server);

        assert!(server.ring_mut().take_submitted().is_empty());
        assert_eq!(server.ring_mut().closed(), &[slot_of(&read)]);
        assert_eq!(server.stats().peer_closed, 1);
        assert_no_leaks(&server);
    }

    #[test]
    fn test_negative_read_is_fatal() {
        let mut server = server(8);
        server.ring_mut().take_submitted();

        let read = connect(&mut server, FD);
        server
            .ring_mut()
            .complete(read.user_data(), -libc::ECONNRESET, false);

        let err = server.turn().unwrap_err();
        assert!(matches!(
            err,
            Error::Completion {
                op: OpKind::Read,
                slot: Some(0),
                ..
            }
        ));
        // The failing completion is still acknowledged and nothing leaks.
        assert_eq!(server.ring_mut().acks(), server.ring_mut().waits());
        assert_no_leaks(&server);
    }

    #[test]
    fn test_negative_write_is_fatal() {
        let mut server = server(8);
        server.ring_mut().take_submitted();

        let read = connect(&mut server, FD);
        server.ring_mut().deliver(&read, b"x");
        pump(&mut server);
        let write = server.ring_mut().take_submitted()[0];

        server
            .ring_mut()
            .complete(write.user_data(), -libc::EPIPE, false);
        let err = server.turn().unwrap_err();
        assert!(matches!(err, Error::Completion { op: OpKind::Write, .. }));
        assert_no_leaks(&server);
    }

    #[test]
    fn test_negative_accept_is_fatal() {
        let mut server = server(8);
        let token = accept_token(&mut server);
        server.ring_mut().complete(token, -libc::EINVAL, true);
        assert!(matches!(
            server.turn(),
            Err(Error::Completion {
                op: OpKind::Accept,
                slot: None,
                ..
            })
        ));
    }

    #[test]
    fn test_accept_persists_across_connections() {
        let mut server = server(16);
        server.ring_mut().take_submitted();
        let token = accept_token(&mut server);

        for i in 0..10 {
            server.ring_mut().complete(token, FD + i, true);
        }
        pump(&mut server);

        let submitted = server.ring_mut().take_submitted();
        assert_eq!(submitted.len(), 10);
        let slots: Vec<u32> = submitted.iter().map(slot_of).collect();
        assert_eq!(slots, (0..10).collect::<Vec<u32>>());
        assert_eq!(server.stats().accepted, 10);
    }

    #[test]
    fn test_terminated_multishot_is_rearmed() {
        let mut server = server(8);
        server.ring_mut().take_submitted();
        let token = accept_token(&mut server);

        server.ring_mut().complete(token, FD, false);
        pump(&mut server);

        let submitted = server.ring_mut().take_submitted();
        assert_eq!(submitted.len(), 2);
        assert_eq!(*submitted[0].op(), Op::AcceptMulti { listener: LISTENER });
        assert_eq!(submitted[0].user_data(), token);
        assert!(matches!(submitted[1].op(), Op::Read { slot: 0, .. }));
    }

    #[test]
    fn test_connections_wait_for_free_slot() {
        let mut server = server(2);
        server.ring_mut().take_submitted();
        let token = accept_token(&mut server);

        for i in 0..4 {
            server.ring_mut().complete(token, FD + i, true);
        }
        pump(&mut server);

        // Two connections fit; the other two wait in arrival order.
        let reads = server.ring_mut().take_submitted();
        assert_eq!(reads.len(), 2);
        assert_eq!(server.ring_mut().installed(), &[(0, FD), (1, FD + 1)]);
        assert_eq!(server.stats().waited, 2);
        assert_eq!(server.waiting.len(), 2);

        // Finishing the first connection hands its slot to the oldest waiter.
        server.ring_mut().complete(reads[0].user_data(), 0, false);
        pump(&mut server);
        let next = server.ring_mut().take_submitted();
        assert_eq!(next.len(), 1);
        assert_eq!(slot_of(&next[0]), 0);
        assert_eq!(server.ring_mut().installed().last(), Some(&(0, FD + 2)));

        // Serve the rest; the last waiter gets a slot along the way.
        let mut open = vec![reads[1], next[0]];
        while let Some(read) = open.pop() {
            server.ring_mut().deliver(&read, b"z");
            pump(&mut server);
            for sqe in server.ring_mut().take_submitted() {
                match sqe.op() {
                    Op::Write { .. } => server.ring_mut().complete(sqe.user_data(), 4, false),
                    _ => open.push(sqe),
                }
            }
            pump(&mut server);
            open.extend(server.ring_mut().take_submitted());
        }

        assert_eq!(server.ring_mut().installed().len(), 4);
        assert_eq!(server.stats().acknowledged, 3);
        assert_eq!(server.stats().peer_closed, 1);
        assert_eq!(server.free_slots.len(), 2);
        assert_no_leaks(&server);
    }

    #[test]
    fn test_descriptor_limit_pauses_accept_until_close() {
        let mut server = server(8);
        server.ring_mut().take_submitted();
        let token = accept_token(&mut server);
        let read = connect(&mut server, FD);

        // Still armed: nothing to resubmit.
        server.ring_mut().complete(token, -libc::EMFILE, true);
        pump(&mut server);
        assert!(server.ring_mut().take_submitted().is_empty());

        // Ended: the accept stays down until a descriptor is freed.
        server.ring_mut().complete(token, -libc::EMFILE, false);
        pump(&mut server);
        assert!(server.ring_mut().take_submitted().is_empty());
        assert!(server.accept_paused);

        // A close brings it back under the same context.
        server.ring_mut().complete(read.user_data(), 0, false);
        pump(&mut server);
        let submitted = server.ring_mut().take_submitted();
        assert_eq!(submitted.len(), 1);
        assert_eq!(*submitted[0].op(), Op::AcceptMulti { listener: LISTENER });
        assert_eq!(submitted[0].user_data(), token);
        assert!(!server.accept_paused);
        assert_eq!(server.stats().accepted, 1);
        assert_no_leaks(&server);
    }

    #[test]
    fn test_unknown_completion_is_ignored() {
        let mut server = server(8);
        server.ring_mut().complete(999, 5, false);
        server.turn().unwrap();
        assert_eq!(server.ring_mut().acks(), 1);
        assert_no_leaks(&server);
    }

    #[test]
    fn test_stale_completion_is_ignored() {
        let mut server = server(8);
        server.ring_mut().take_submitted();

        let read = connect(&mut server, FD);
        server.ring_mut().complete(read.user_data(), 0, false);
        pump(&mut server);

        // A duplicate for an already released context must not be acted on.
        server.ring_mut().complete(read.user_data(), 3, false);
        pump(&mut server);
        assert!(server.ring_mut().take_submitted().is_empty());
        assert_eq!(server.ring_mut().closed(), &[0]);
        assert_no_leaks(&server);
    }

    #[test]
    fn test_submit_mismatch_is_fatal() {
        let mut server = Server::new(MockRing::new(), LISTENER, 8, 1024);
        server.ring_mut().submit_shortfall = 1;
        assert!(matches!(
            server.start(),
            Err(Error::SubmitMismatch {
                expected: 1,
                actual: 0
            })
        ));
    }

    #[test]
    fn test_full_submission_queue_releases_buffer() {
        let mut server = Server::new(MockRing::new().with_sq_capacity(1), LISTENER, 8, 1024);
        server.start().unwrap();
        let token = accept_token(&mut server);

        // Terminated multishot: the re-arm takes the only queue entry and the
        // read for the new connection cannot be queued.
        server.ring_mut().complete(token, FD, false);
        assert!(matches!(server.turn(), Err(Error::SubmissionQueueFull)));
        assert_eq!(server.buffers().outstanding(), 0);
        assert_eq!(server.in_flight(), 1);
    }

    #[test]
    fn test_out_of_order_completions_keep_connections_apart() {
        const CLIENTS: u32 = 50;
        let mut server = server(CLIENTS);
        server.ring_mut().take_submitted();
        let token = accept_token(&mut server);

        for i in 0..CLIENTS {
            server.ring_mut().complete(token, FD + i as RawFd, true);
        }
        pump(&mut server);
        let reads = server.ring_mut().take_submitted();
        assert_eq!(reads.len(), CLIENTS as usize);

        // Each client sends a nonce of its own length; deliver in reverse order.
        for read in reads.iter().rev() {
            let slot = slot_of(read);
            let nonce = vec![b'a' + (slot % 26) as u8; slot as usize + 1];
            server.ring_mut().deliver(read, &nonce);
        }
        pump(&mut server);

        let writes = server.ring_mut().take_submitted();
        assert_eq!(writes.len(), CLIENTS as usize);
        // Reads completed in reverse, so writes were issued in reverse.
        for (i, write) in writes.iter().enumerate() {
            let expected_slot = CLIENTS - 1 - i as u32;
            assert!(matches!(*write.op(), Op::Write { slot, .. } if slot == expected_slot));
            assert_eq!(MockRing::written(write), ACK);
        }
        let expected_bytes: u64 = (1..=CLIENTS as u64).sum();
        assert_eq!(server.stats().bytes_received, expected_bytes);

        // Finish the writes interleaved: evens first, then odds.
        let (evens, odds): (Vec<&Sqe>, Vec<&Sqe>) =
            writes.iter().partition(|w| w.user_data() % 2 == 0);
        for write in evens.into_iter().chain(odds) {
            server
                .ring_mut()
                .complete(write.user_data(), ACK.len() as i32, false);
        }
        pump(&mut server);

        let mut closed = server.ring_mut().closed().to_vec();
        closed.sort_unstable();
        assert_eq!(closed, (0..CLIENTS).collect::<Vec<_>>());
        assert_eq!(server.stats().acknowledged, CLIENTS as u64);
        assert_eq!(server.ring_mut().acks(), server.ring_mut().waits());
        assert_no_leaks(&server);
    }

    #[test]
    fn test_burst_larger_than_slot_table_is_fully_served() {
        const SLOTS: u32 = 8;
        const CLIENTS: i32 = 50;
        let mut server = server(SLOTS);
        server.ring_mut().take_submitted();
        let token = accept_token(&mut server);

        // Every client lands at once, as when the kernel drains the backlog.
        for i in 0..CLIENTS {
            server.ring_mut().complete(token, FD + i, true);
        }
        pump(&mut server);

        let mut pending = server.ring_mut().take_submitted();
        while !pending.is_empty() {
            for sqe in pending {
                match sqe.op() {
                    Op::Read { .. } => server.ring_mut().deliver(&sqe, b"!"),
                    Op::Write { .. } => server.ring_mut().complete(sqe.user_data(), 4, false),
                    op => panic!("unexpected {op:?}"),
                }
            }
            pump(&mut server);
            pending = server.ring_mut().take_submitted();
        }

        let stats = server.stats();
        assert_eq!(stats.accepted, CLIENTS as u64);
        assert_eq!(stats.acknowledged, CLIENTS as u64);
        assert_eq!(stats.waited, (CLIENTS as u32 - SLOTS) as u64);

        // Admission follows arrival order and covers every client.
        let fds: Vec<RawFd> = server
            .ring_mut()
            .installed()
            .iter()
            .map(|&(_, fd)| fd)
            .collect();
        assert_eq!(fds, (FD..FD + CLIENTS).collect::<Vec<_>>());
        assert_no_leaks(&server);
    }

    #[test]
    fn test_stress_has_no_leaks() {
        const SLOTS: u32 = 8;
        const ROUNDS: u32 = 250;
        let mut server = server(SLOTS);
        server.ring_mut().take_submitted();
        let token = accept_token(&mut server);

        for round in 0..ROUNDS {
            for i in 0..SLOTS {
                server.ring_mut().complete(token, FD + i as RawFd, true);
            }
            pump(&mut server);

            // Mix of requests and early hang-ups.
            for read in server.ring_mut().take_submitted() {
                if read.user_data() % 3 == round as u64 % 3 {
                    server.ring_mut().complete(read.user_data(), 0, false);
                } else {
                    server.ring_mut().deliver(&read, b"ping");
                }
            }
            pump(&mut server);

            for write in server.ring_mut().take_submitted() {
                server.ring_mut().complete(write.user_data(), 4, false);
            }
            pump(&mut server);
        }

        let stats = server.stats();
        assert_eq!(stats.accepted, (SLOTS * ROUNDS) as u64);
        assert_eq!(stats.acknowledged + stats.peer_closed, stats.accepted);
        assert_eq!(
            server.ring_mut().closed().len(),
            (SLOTS * ROUNDS) as usize
        );
        assert_eq!(server.ring_mut().acks(), server.ring_mut().waits());
        assert_no_leaks(&server);
    }
}
