//! Trap dispatch loop
//!
//! The execution engine runs guest code until something traps. Each trap is
//! classified by the profile and routed to the syscall bridge, the signal
//! deliverer or the atomic emulator. Pending signals are delivered after
//! every dispatched trap, so signal handlers only ever start at a trap
//! boundary.

use core::fmt;

use crate::arch_impl::traits::{ArchitectureProfile, RegisterFile, TrapClass};
use crate::atomic::execute_atomic_step;
use crate::memory::GuestMemory;
use crate::runtime::{GuestThread, SharedRuntime};
use crate::signal::constants::{ILL_ILLOPN, SIGILL};
use crate::signal::types::PendingSignal;
use crate::signal::{SignalDeliverer, SignalExit};
use crate::syscall::{HostSyscalls, SyscallBridge, SyscallResult};

/// One exit from the execution engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrapEvent {
    /// Engine exception code; meaning is profile-specific
    pub code: u32,
    /// Faulting data or instruction address, for aborts
    pub fault_address: Option<u64>,
    /// Extra payload: syndrome for aborts, instruction word for atomics
    pub aux: u64,
}

impl TrapEvent {
    pub const fn new(code: u32) -> Self {
        TrapEvent {
            code,
            fault_address: None,
            aux: 0,
        }
    }
}

/// Instruction-level guest CPU
pub trait ExecutionEngine {
    type Regs;

    /// Run guest code until the next trap
    fn run(&mut self, regs: &mut Self::Regs) -> TrapEvent;
}

/// A trap with no defined handling
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FatalTrap {
    pub code: u32,
    pub aux: u64,
    pub pc: u64,
    /// Full register dump at the time of the trap
    pub dump: String,
}

impl fmt::Display for FatalTrap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "unhandled trap {:#x} (aux {:#x}) at pc {:#x}",
            self.code, self.aux, self.pc
        )?;
        write!(f, "{}", self.dump)
    }
}

/// What the dispatcher decided for one trap
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Resume the guest
    Continue,
    /// exit / exit_group
    Exit(i32),
    /// A signal's default action killed the thread
    Terminated { signo: u32, core_dumped: bool },
    /// A signal's default action stopped the thread
    Stopped(u32),
    /// Unknown trap; the thread must not continue
    Fatal(FatalTrap),
}

/// Why [`TrapDispatcher::run`] returned
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThreadExit {
    Exited(i32),
    Signaled { signo: u32, core_dumped: bool },
    Stopped(u32),
    Fatal(FatalTrap),
}

/// Per-thread trap dispatcher
pub struct TrapDispatcher<'a, P: ArchitectureProfile, H> {
    profile: &'a P,
    runtime: &'a SharedRuntime,
    memory: &'a dyn GuestMemory,
    host: H,
}

impl<'a, P: ArchitectureProfile, H: HostSyscalls> TrapDispatcher<'a, P, H> {
    pub fn new(
        profile: &'a P,
        runtime: &'a SharedRuntime,
        memory: &'a dyn GuestMemory,
        host: H,
    ) -> Self {
        TrapDispatcher {
            profile,
            runtime,
            memory,
            host,
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    fn deliverer(&self) -> SignalDeliverer<'a, P> {
        SignalDeliverer::new(self.profile, self.runtime, self.memory)
    }

    /// Handle one trap, then deliver pending signals
    pub fn dispatch(&mut self, trap: &TrapEvent, thread: &mut GuestThread<P::Regs>) -> Action {
        let deliverer = self.deliverer();

        match self.profile.classify(trap, &thread.regs) {
            TrapClass::Interrupt => {}
            TrapClass::Syscall => {
                let bridge = SyscallBridge::new(self.profile, self.runtime, self.memory);
                if let SyscallResult::Exit(code) = bridge.handle(thread, &mut self.host) {
                    log::debug!("thread {} exited with status {}", thread.tid, code);
                    return Action::Exit(code);
                }
            }
            TrapClass::Fault(signal) | TrapClass::Breakpoint(signal) => {
                log::debug!(
                    "thread {}: trap {:#x} raised signal {} code {} addr {:#x}",
                    thread.tid,
                    trap.code,
                    signal.signo,
                    signal.code,
                    signal.addr
                );
                deliverer.raise_sync(thread, signal);
            }
            TrapClass::Atomic => match self.profile.decode_atomic(trap, &thread.regs) {
                Some(op) => {
                    let section = self.runtime.exclusive();
                    let result = execute_atomic_step(&op, &mut thread.regs, self.memory, section);
                    if let Err(signal) = result {
                        deliverer.raise_sync(thread, signal);
                    }
                }
                None => {
                    let pc = thread.regs.pc();
                    log::debug!(
                        "thread {}: undecodable atomic {:#x} at {:#x}",
                        thread.tid,
                        trap.aux,
                        pc
                    );
                    deliverer.raise_sync(thread, PendingSignal::fault(SIGILL, ILL_ILLOPN, pc));
                }
            },
            TrapClass::Unknown => return self.fatal(trap, thread),
        }

        match deliverer.deliver_pending(thread) {
            None => Action::Continue,
            Some(SignalExit::Terminated { signo, core_dumped }) => {
                Action::Terminated { signo, core_dumped }
            }
            Some(SignalExit::Stopped(signo)) => Action::Stopped(signo),
        }
    }

    fn fatal(&self, trap: &TrapEvent, thread: &GuestThread<P::Regs>) -> Action {
        let fatal = FatalTrap {
            code: trap.code,
            aux: trap.aux,
            pc: thread.regs.pc(),
            dump: thread.regs.dump(),
        };
        log::error!("{} thread {}: {}", self.profile.name(), thread.tid, fatal);
        Action::Fatal(fatal)
    }

    /// Run the thread until it exits, dies, stops or hits a fatal trap
    pub fn run<E>(&mut self, engine: &mut E, thread: &mut GuestThread<P::Regs>) -> ThreadExit
    where
        E: ExecutionEngine<Regs = P::Regs>,
    {
        loop {
            let trap = engine.run(&mut thread.regs);
            match self.dispatch(&trap, thread) {
                Action::Continue => {}
                Action::Exit(code) => return ThreadExit::Exited(code),
                Action::Terminated { signo, core_dumped } => {
                    return ThreadExit::Signaled { signo, core_dumped }
                }
                Action::Stopped(signo) => return ThreadExit::Stopped(signo),
                Action::Fatal(fatal) => return ThreadExit::Fatal(fatal),
            }
        }
    }
}
