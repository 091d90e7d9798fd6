//! Per-thread pending signal queue
//!
//! Standard signals (1-31) coalesce: raising one that is already pending
//! keeps the first siginfo and drops the new one. Real-time signals queue
//! one entry per raise, up to [`RT_QUEUE_LIMIT`]. A synchronous slot holds
//! the signal produced by the trap being handled right now (or a forced
//! signal) and is always delivered first.
//!
//! Other threads never touch the queue directly. They push into the
//! lock-free inbox through a [`SignalSender`]; the owning thread drains the
//! inbox at its next trap boundary.

use std::collections::VecDeque;
use std::sync::Arc;

use crossbeam_queue::SegQueue;

use super::constants::*;
use super::types::{AltStack, PendingSignal};
use crate::syscall::errno::{EAGAIN, EINVAL};

/// Maximum queued real-time signals per thread
pub const RT_QUEUE_LIMIT: usize = 64;

/// Handle for raising signals on a thread from anywhere
#[derive(Clone)]
pub struct SignalSender {
    inbox: Arc<SegQueue<PendingSignal>>,
}

impl SignalSender {
    /// Queue `signal` for the target thread
    ///
    /// Invalid signal numbers are rejected here; everything else is
    /// validated again when the owning thread drains its inbox.
    pub fn send(&self, signal: PendingSignal) -> Result<(), u64> {
        if !is_valid_signal(signal.signo) {
            return Err(EINVAL);
        }
        self.inbox.push(signal);
        Ok(())
    }
}

/// Pending signals, blocked mask and alternate stack of one guest thread
pub struct SignalQueue {
    /// Bitmap of pending standard signals
    pending: u64,
    /// First siginfo for each pending standard signal, indexed by signo - 1
    info: [Option<PendingSignal>; (SIGRTMIN - 1) as usize],
    realtime: VecDeque<PendingSignal>,
    sync: Option<PendingSignal>,
    blocked: u64,
    /// Alternate signal stack
    pub alt_stack: AltStack,
    inbox: Arc<SegQueue<PendingSignal>>,
}

impl Default for SignalQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalQueue {
    pub fn new() -> Self {
        SignalQueue {
            pending: 0,
            info: [None; (SIGRTMIN - 1) as usize],
            realtime: VecDeque::new(),
            sync: None,
            blocked: 0,
            alt_stack: AltStack::default(),
            inbox: Arc::new(SegQueue::new()),
        }
    }

    /// A handle other threads use to raise signals here
    pub fn sender(&self) -> SignalSender {
        SignalSender {
            inbox: Arc::clone(&self.inbox),
        }
    }

    /// Mark a signal pending
    ///
    /// # Returns
    /// * `Err(EINVAL)` for an invalid signal number
    /// * `Err(EAGAIN)` if the real-time queue is full
    pub fn raise(&mut self, signal: PendingSignal) -> Result<(), u64> {
        let sig = signal.signo;
        if !is_valid_signal(sig) {
            return Err(EINVAL);
        }
        if is_realtime(sig) {
            if self.realtime.len() >= RT_QUEUE_LIMIT {
                log::warn!(
                    "signal queue: real-time queue full, dropping signal {}",
                    sig
                );
                return Err(EAGAIN);
            }
            self.realtime.push_back(signal);
            return Ok(());
        }
        if self.pending & sig_mask(sig) == 0 {
            self.pending |= sig_mask(sig);
            self.info[(sig - 1) as usize] = Some(signal);
        }
        Ok(())
    }

    /// Put `signal` in the synchronous slot, delivered ahead of anything else
    pub fn set_sync(&mut self, signal: PendingSignal) {
        if let Some(prev) = self.sync.replace(signal) {
            log::debug!(
                "signal queue: synchronous {} replaced by {}",
                signal_name(prev.signo),
                signal_name(signal.signo)
            );
        }
    }

    /// Move everything other threads sent into the queue
    pub fn drain_inbox(&mut self) {
        while let Some(signal) = self.inbox.pop() {
            if let Err(errno) = self.raise(signal) {
                log::warn!(
                    "signal queue: dropped {} from inbox (errno {})",
                    signal_name(signal.signo),
                    errno
                );
            }
        }
    }

    /// Remove and return the next signal to deliver
    ///
    /// Order: the synchronous slot, then the lowest-numbered unblocked
    /// standard signal, then the lowest-numbered unblocked real-time signal
    /// (first raised first).
    pub fn next_deliverable(&mut self) -> Option<PendingSignal> {
        if let Some(signal) = self.sync.take() {
            return Some(signal);
        }

        let ready = self.pending & !self.blocked;
        if ready != 0 {
            let sig = ready.trailing_zeros() + 1;
            self.pending &= !sig_mask(sig);
            return self.info[(sig - 1) as usize]
                .take()
                .or(Some(PendingSignal::kernel(sig)));
        }

        let idx = self
            .realtime
            .iter()
            .enumerate()
            .filter(|(_, s)| !self.is_blocked(s.signo))
            .min_by_key(|(i, s)| (s.signo, *i))
            .map(|(i, _)| i)?;
        self.realtime.remove(idx)
    }

    /// True if [`next_deliverable`](Self::next_deliverable) would return something
    pub fn has_deliverable(&self) -> bool {
        self.sync.is_some()
            || self.pending & !self.blocked != 0
            || self.realtime.iter().any(|s| !self.is_blocked(s.signo))
    }

    #[inline]
    fn is_blocked(&self, sig: u32) -> bool {
        self.blocked & sig_mask(sig) != 0
    }

    /// Drop every pending instance of `sig`
    pub fn discard(&mut self, sig: u32) {
        if !is_valid_signal(sig) {
            return;
        }
        if is_realtime(sig) {
            self.realtime.retain(|s| s.signo != sig);
        } else {
            self.pending &= !sig_mask(sig);
            self.info[(sig - 1) as usize] = None;
        }
    }

    /// Set of all pending signals (synchronous slot excluded)
    pub fn pending_set(&self) -> u64 {
        self.realtime
            .iter()
            .fold(self.pending, |set, s| set | sig_mask(s.signo))
    }

    /// Pending signals that are currently blocked (rt_sigpending)
    pub fn blocked_pending(&self) -> u64 {
        self.pending_set() & self.blocked
    }

    #[inline]
    pub fn blocked(&self) -> u64 {
        self.blocked
    }

    /// Replace the blocked mask; SIGKILL and SIGSTOP are never blocked
    pub fn set_blocked(&mut self, mask: u64) {
        self.blocked = mask & !UNCATCHABLE_SIGNALS;
    }

    pub fn block(&mut self, mask: u64) {
        self.set_blocked(self.blocked | mask);
    }

    pub fn unblock(&mut self, mask: u64) {
        self.set_blocked(self.blocked & !mask);
    }
}
