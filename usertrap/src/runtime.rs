//! Process-wide and per-thread runtime state
//!
//! [`SharedRuntime`] is shared by every guest thread of one process: the
//! sigaction table, the exclusive section for emulated atomics and the
//! trampoline address. [`GuestThread`] is owned by exactly one host thread.

use conquer_once::spin::OnceCell;
use spin::RwLock;

use crate::arch_impl::traits::ArchitectureProfile;
use crate::atomic::ExclusiveSection;
use crate::memory::GuestMemory;
use crate::signal::queue::{SignalQueue, SignalSender};
use crate::signal::trampoline::{self, TrampolineError};
use crate::signal::types::{SignalAction, SignalActions};

/// State shared by all guest threads of a process
pub struct SharedRuntime {
    pid: i32,
    actions: RwLock<SignalActions>,
    exclusive: ExclusiveSection,
    trampoline: OnceCell<u64>,
}

impl SharedRuntime {
    pub fn new(pid: i32) -> Self {
        SharedRuntime {
            pid,
            actions: RwLock::new(SignalActions::default()),
            exclusive: ExclusiveSection::new(),
            trampoline: OnceCell::uninit(),
        }
    }

    #[inline]
    pub fn pid(&self) -> i32 {
        self.pid
    }

    /// Current disposition of `sig`
    pub fn action(&self, sig: u32) -> SignalAction {
        self.actions.read().get(sig)
    }

    /// Install `action` for `sig`, returning the previous one
    pub fn set_action(&self, sig: u32, action: SignalAction) -> SignalAction {
        let mut actions = self.actions.write();
        let old = actions.get(sig);
        actions.set(sig, action);
        old
    }

    /// Reset `sig` to SIG_DFL
    pub fn reset_action(&self, sig: u32) {
        self.actions.write().reset(sig);
    }

    /// The section every emulated atomic runs under
    #[inline]
    pub fn exclusive(&self) -> &ExclusiveSection {
        &self.exclusive
    }

    /// Write the profile's trampoline at `addr` and remember the address
    pub fn install_trampoline<P: ArchitectureProfile>(
        &self,
        memory: &dyn GuestMemory,
        addr: u64,
        profile: &P,
    ) -> Result<u64, TrampolineError> {
        trampoline::install(&self.trampoline, memory, addr, profile.trampoline())
    }

    /// Address of the installed trampoline, if any
    #[inline]
    pub fn trampoline(&self) -> Option<u64> {
        self.trampoline.get().copied()
    }
}

/// One guest thread: its registers and its signal state
pub struct GuestThread<R> {
    pub tid: i32,
    pub regs: R,
    pub signals: SignalQueue,
}

impl<R> GuestThread<R> {
    pub fn new(tid: i32, regs: R) -> Self {
        GuestThread {
            tid,
            regs,
            signals: SignalQueue::new(),
        }
    }

    /// Handle for raising signals on this thread from other threads
    pub fn sender(&self) -> SignalSender {
        self.signals.sender()
    }
}
