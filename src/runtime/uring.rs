//! io_uring-backed ring for Linux.
//!
//! Accepted connections are moved into a sparse fixed file table, so reads
//! and writes reference connections by slot instead of by descriptor.

use crate::config::Config;
use crate::runtime::error::Error;
use crate::runtime::ring::{Completion, Op, QueueFull, Ring, Sqe};
use io_uring::{cqueue, opcode, squeue, types, IoUring};
use std::collections::VecDeque;
use std::io;
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use tracing::{debug, info};

/// `IORING_REGISTER_RING_FDS` from the kernel uapi.
const IORING_REGISTER_RING_FDS: libc::c_long = 20;

/// Mirror of `struct io_uring_rsrc_update`.
#[repr(C)]
struct RsrcUpdate {
    offset: u32,
    resv: u32,
    data: u64,
}

/// Ring construction parameters.
#[derive(Debug, Clone, Copy)]
pub struct RingSettings {
    /// Submission queue entries.
    pub depth: u32,
    /// Idle milliseconds before the SQ polling thread parks; `None` disables it.
    pub sqpoll_idle_ms: Option<u32>,
    /// Register the ring descriptor with itself.
    pub register_ring_fd: bool,
    /// Size of the sparse fixed file table.
    pub fixed_slots: u32,
}

impl From<&Config> for RingSettings {
    fn from(config: &Config) -> Self {
        Self {
            depth: config.ring_depth,
            sqpoll_idle_ms: config.sqpoll.then_some(config.sqpoll_idle_ms),
            register_ring_fd: config.register_ring_fd,
            fixed_slots: config.fixed_slots,
        }
    }
}

/// [`Ring`] implementation over a real io_uring instance.
pub struct UringRing {
    ring: IoUring,
    sqpoll: bool,
    /// Entries pushed since the last submit.
    pushed: usize,
    /// Entries the kernel consumed while making room for a push.
    consumed_early: usize,
    /// Completions copied out of the kernel queue, not yet handed out.
    backlog: VecDeque<Completion>,
    /// Set between handing out a completion and its acknowledgment.
    unacknowledged: bool,
}

impl UringRing {
    /// Create and register a ring, mapping each failing step to a setup error.
    pub fn setup(settings: &RingSettings) -> Result<Self, Error> {
        let ring = Self::initialize(settings.depth, settings.sqpoll_idle_ms).map_err(|source| {
            Error::RingSetup {
                stage: "initialize",
                source,
            }
        })?;

        if settings.register_ring_fd {
            ring.register_self().map_err(|source| Error::RingSetup {
                stage: "register ring fd",
                source,
            })?;
        }

        ring.register_fixed_slots(settings.fixed_slots)
            .map_err(|source| Error::RingSetup {
                stage: "register fixed slots",
                source,
            })?;

        info!(
            depth = settings.depth,
            sqpoll_idle_ms = ?settings.sqpoll_idle_ms,
            register_ring_fd = settings.register_ring_fd,
            fixed_slots = settings.fixed_slots,
            "Ring ready"
        );

        Ok(ring)
    }

    /// Allocate a ring with `depth` submission entries.
    pub fn initialize(depth: u32, sqpoll_idle_ms: Option<u32>) -> io::Result<Self> {
        let mut builder = IoUring::builder();
        if let Some(idle) = sqpoll_idle_ms {
            builder.setup_sqpoll(idle);
        }
        let ring = builder.build(depth)?;

        Ok(Self {
            ring,
            sqpoll: sqpoll_idle_ms.is_some(),
            pushed: 0,
            consumed_early: 0,
            backlog: VecDeque::new(),
            unacknowledged: false,
        })
    }

    /// Register the ring descriptor with itself.
    ///
    /// `io-uring` always enters through the plain descriptor, so the
    /// registered index goes unused; this only confirms at startup that the
    /// kernel supports ring descriptor registration.
    pub fn register_self(&self) -> io::Result<()> {
        let fd = self.ring.as_raw_fd();
        let mut update = RsrcUpdate {
            // Let the kernel pick the registered index.
            offset: u32::MAX,
            resv: 0,
            data: fd as u64,
        };

        // SAFETY: `update` is a valid io_uring_rsrc_update for the duration
        // of the call and the count matches the single entry passed.
        let ret = unsafe {
            libc::syscall(
                libc::SYS_io_uring_register,
                fd as libc::c_long,
                IORING_REGISTER_RING_FDS,
                &mut update as *mut RsrcUpdate,
                1 as libc::c_long,
            )
        };

        match ret {
            1 => Ok(()),
            r if r < 0 => Err(io::Error::last_os_error()),
            r => Err(io::Error::other(format!(
                "registered {r} ring descriptors, expected 1"
            ))),
        }
    }

    /// Reserve `count` empty fixed file slots for accepted connections.
    pub fn register_fixed_slots(&self, count: u32) -> io::Result<()> {
        self.ring.submitter().register_files_sparse(count)
    }

    fn entry(sqe: &Sqe) -> squeue::Entry {
        let entry = match *sqe.op() {
            Op::AcceptMulti { listener } => opcode::AcceptMulti::new(types::Fd(listener))
                .flags(libc::SOCK_CLOEXEC)
                .build(),
            Op::Read { slot, ptr, len } => {
                opcode::Read::new(types::Fixed(slot), ptr, len).build()
            }
            Op::Write { slot, ptr, len } => {
                opcode::Write::new(types::Fixed(slot), ptr, len).build()
            }
        };
        entry.user_data(sqe.user_data())
    }

    fn enter(&mut self) -> io::Result<usize> {
        loop {
            match self.ring.submit() {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Hand queued entries to the kernel so the submission queue has room.
    fn make_room(&mut self) -> io::Result<()> {
        let consumed = self.enter()?;
        self.consumed_early += consumed;
        if self.sqpoll {
            // The polling thread takes entries on its own schedule.
            self.ring.submitter().squeue_wait()?;
        }
        Ok(())
    }

    fn drain(&mut self) {
        let backlog = &mut self.backlog;
        backlog.extend(self.ring.completion().map(|cqe| {
            Completion::new(cqe.user_data(), cqe.result(), cqueue::more(cqe.flags()))
        }));
    }
}

impl Ring for UringRing {
    unsafe fn push(&mut self, sqe: &Sqe) -> Result<(), QueueFull> {
        let entry = Self::entry(sqe);
        // SAFETY: forwarded from the caller's contract on buffer lifetime.
        if unsafe { self.ring.submission().push(&entry) }.is_err() {
            if let Err(e) = self.make_room() {
                debug!(error = %e, "Failed to drain submission queue");
                return Err(QueueFull);
            }
            // SAFETY: as above.
            unsafe { self.ring.submission().push(&entry) }.map_err(|_| QueueFull)?;
        }
        self.pushed += 1;
        Ok(())
    }

    fn submit(&mut self) -> io::Result<usize> {
        let pushed = std::mem::take(&mut self.pushed);
        let early = std::mem::take(&mut self.consumed_early);
        let consumed = self.enter()?;
        // With SQ polling the kernel thread may already have taken some
        // entries, so only the flushed count is meaningful.
        Ok(if self.sqpoll { pushed } else { early + consumed })
    }

    fn wait_for_completion(&mut self) -> io::Result<Completion> {
        debug_assert!(!self.unacknowledged, "previous completion not acknowledged");
        loop {
            if let Some(completion) = self.backlog.pop_front() {
                self.unacknowledged = true;
                return Ok(completion);
            }
            self.drain();
            if !self.backlog.is_empty() {
                continue;
            }
            match self.ring.submit_and_wait(1) {
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
            self.drain();
        }
    }

    fn acknowledge(&mut self, _completion: Completion) {
        // The entry was copied out of the kernel queue on retrieval; this
        // closes the pairing and drops the record.
        debug_assert!(self.unacknowledged, "acknowledged twice");
        self.unacknowledged = false;
    }

    fn install_fixed(&mut self, slot: u32, fd: RawFd) -> io::Result<()> {
        // SAFETY: the accept completion handed us sole ownership of `fd`.
        let fd = unsafe { OwnedFd::from_raw_fd(fd) };
        // The table keeps its own reference; ours is closed on drop.
        self.ring
            .submitter()
            .register_files_update(slot, &[fd.as_raw_fd()])?;
        Ok(())
    }

    fn close_fixed(&mut self, slot: u32) -> io::Result<()> {
        self.ring.submitter().register_files_update(slot, &[-1])?;
        Ok(())
    }
}
