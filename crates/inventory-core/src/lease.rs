//! Write lease
//!
//! SQLite allows one writer at a time. The lease is the token that says who
//! that writer is. A transaction holds it from `begin` until commit or end;
//! an autocommit mutation holds it for a single call.
//!
//! Unlike a mutex guard, the lease is a plain value that can be inspected
//! (`holder`) and released from any thread by id.

use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{Error, Result};

/// What the lease was taken for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseScope {
    /// Explicit transaction, held across caller-controlled calls
    Transaction,
    /// Single implicit mutation
    Autocommit,
}

/// The current holder of the write lease
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseInfo {
    pub id: u64,
    pub scope: LeaseScope,
    pub holder: ThreadId,
    pub acquired_at: Instant,
}

impl LeaseInfo {
    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }
}

/// Exclusive write lease with blocking, optionally bounded, acquisition
#[derive(Debug, Default)]
pub struct WriteLease {
    slot: Mutex<Option<LeaseInfo>>,
    released: Condvar,
    next_id: AtomicU64,
}

impl WriteLease {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until the lease is free, then take it
    ///
    /// Fails with `LeaseHeld` when the calling thread already holds it (a
    /// nested acquisition would wait forever) and with `LeaseTimeout` when
    /// `timeout` elapses first.
    pub fn acquire(&self, scope: LeaseScope, timeout: Option<Duration>) -> Result<LeaseInfo> {
        let me = thread::current().id();
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut slot = self.slot.lock();

        while let Some(current) = *slot {
            if current.holder == me {
                return Err(Error::LeaseHeld { lease: current.id });
            }
            match deadline {
                Some(deadline) => {
                    if self.released.wait_until(&mut slot, deadline).timed_out()
                        && slot.is_some()
                    {
                        return Err(Error::LeaseTimeout(timeout.unwrap_or_default()));
                    }
                }
                None => self.released.wait(&mut slot),
            }
        }

        let lease = LeaseInfo {
            id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
            scope,
            holder: me,
            acquired_at: Instant::now(),
        };
        *slot = Some(lease);
        tracing::trace!(lease = lease.id, ?scope, "write lease acquired");
        Ok(lease)
    }

    /// Release the lease if `id` still holds it
    pub fn release(&self, id: u64) -> bool {
        let mut slot = self.slot.lock();
        match *slot {
            Some(current) if current.id == id => {
                *slot = None;
                drop(slot);
                self.released.notify_one();
                tracing::trace!(lease = id, "write lease released");
                true
            }
            _ => false,
        }
    }

    /// Current holder, if any
    pub fn holder(&self) -> Option<LeaseInfo> {
        *self.slot.lock()
    }
}
