//! Signal delivery to the guest
//!
//! This module builds signal frames in guest memory, redirects the thread
//! into its handler and tears the frame down again on rt_sigreturn. The
//! ISA-specific byte layout comes from the [`ArchitectureProfile`]; stack
//! selection, return-address choice, blocked-mask bookkeeping and the
//! default actions are the same for every profile.

use core::fmt;

use super::constants::*;
use super::frame::{align_down, FrameError};
use super::types::*;
use crate::arch_impl::traits::{
    ArchitectureProfile, FrameContext, FrameLayout, HandlerCall, HandlerEntry, RegisterFile,
};
use crate::memory::userptr::read_word;
use crate::memory::{Access, GuestMemory, MemFault};
use crate::runtime::{GuestThread, SharedRuntime};
use crate::syscall::SyscallResult;

/// How signal processing ended the thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalExit {
    /// Default action terminated the thread
    Terminated { signo: u32, core_dumped: bool },
    /// Default action stopped the thread
    Stopped(u32),
}

/// Why a handler frame could not be set up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    /// The frame would not fit below the selected stack top
    StackOverflow { top: u64, size: u64 },
    /// The frame range is not writable
    Stack(MemFault),
    /// No SA_RESTORER and no trampoline installed
    NoTrampoline,
    /// The handler's function descriptor could not be read
    Descriptor { addr: u64 },
    Frame(FrameError),
}

impl fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryError::StackOverflow { top, size } => {
                write!(f, "{:#x}-byte frame does not fit below {:#x}", size, top)
            }
            DeliveryError::Stack(fault) => write!(f, "signal stack not writable: {}", fault),
            DeliveryError::NoTrampoline => write!(f, "no restorer and no trampoline installed"),
            DeliveryError::Descriptor { addr } => {
                write!(f, "unreadable function descriptor at {:#x}", addr)
            }
            DeliveryError::Frame(err) => write!(f, "{}", err),
        }
    }
}

impl From<FrameError> for DeliveryError {
    fn from(err: FrameError) -> Self {
        DeliveryError::Frame(err)
    }
}

/// Builds and tears down signal frames for one profile
pub struct SignalDeliverer<'a, P: ArchitectureProfile> {
    profile: &'a P,
    runtime: &'a SharedRuntime,
    memory: &'a dyn GuestMemory,
}

impl<'a, P: ArchitectureProfile> SignalDeliverer<'a, P> {
    pub fn new(profile: &'a P, runtime: &'a SharedRuntime, memory: &'a dyn GuestMemory) -> Self {
        SignalDeliverer {
            profile,
            runtime,
            memory,
        }
    }

    /// Deliver pending signals to a thread
    ///
    /// Called at every trap boundary. Drains the cross-thread inbox, then
    /// handles deliverable signals until none is left, so several handler
    /// frames may stack up before the guest runs again.
    ///
    /// # Returns
    /// * `Some(exit)` if a default action terminated or stopped the thread
    /// * `None` if the thread keeps running
    pub fn deliver_pending(&self, thread: &mut GuestThread<P::Regs>) -> Option<SignalExit> {
        thread.signals.drain_inbox();

        while let Some(signal) = thread.signals.next_deliverable() {
            let sig = signal.signo;
            let action = self.runtime.action(sig);

            log::debug!(
                "Delivering signal {} ({}) to thread {}, handler={:#x}",
                sig,
                signal_name(sig),
                thread.tid,
                action.handler
            );

            if !is_catchable(sig) || action.is_default() {
                if let Some(exit) = self.default_action(thread, sig) {
                    return Some(exit);
                }
                continue;
            }
            if action.is_ignore() {
                log::debug!("Signal {} ignored by thread {}", sig, thread.tid);
                continue;
            }

            if let Err(err) = self.deliver(&signal, &action, thread) {
                log::warn!(
                    "thread {}: cannot deliver {} to handler {:#x}: {}; forcing default action",
                    thread.tid,
                    signal_name(sig),
                    action.handler,
                    err
                );
                let signal = PendingSignal {
                    syndrome: None,
                    ..signal
                };
                self.force_default(thread, signal);
            }
        }
        None
    }

    fn default_action(&self, thread: &GuestThread<P::Regs>, sig: u32) -> Option<SignalExit> {
        match default_action(sig) {
            SignalDefaultAction::Terminate => {
                log::info!(
                    "Process {} thread {} terminated by signal {} ({})",
                    self.runtime.pid(),
                    thread.tid,
                    sig,
                    signal_name(sig)
                );
                Some(SignalExit::Terminated {
                    signo: sig,
                    core_dumped: false,
                })
            }
            SignalDefaultAction::CoreDump => {
                log::info!(
                    "Process {} thread {} killed (core dumped) by signal {} ({})",
                    self.runtime.pid(),
                    thread.tid,
                    sig,
                    signal_name(sig)
                );
                Some(SignalExit::Terminated {
                    signo: sig,
                    core_dumped: true,
                })
            }
            SignalDefaultAction::Stop => {
                log::info!(
                    "Thread {} stopped by signal {} ({})",
                    thread.tid,
                    sig,
                    signal_name(sig)
                );
                Some(SignalExit::Stopped(sig))
            }
            SignalDefaultAction::Continue | SignalDefaultAction::Ignore => {
                log::debug!(
                    "Signal {} ({}) ignored (default) by thread {}",
                    sig,
                    signal_name(sig),
                    thread.tid
                );
                None
            }
        }
    }

    /// Make `signal` take its default action at the next delivery
    ///
    /// Resets the disposition to SIG_DFL, unblocks the signal and puts it
    /// in the thread's synchronous slot.
    pub fn force_default(&self, thread: &mut GuestThread<P::Regs>, signal: PendingSignal) {
        self.runtime.reset_action(signal.signo);
        thread.signals.unblock(sig_mask(signal.signo));
        thread.signals.set_sync(signal);
    }

    /// Queue a synchronous signal raised by the current trap
    ///
    /// A fault that is blocked or ignored cannot be deferred; it takes its
    /// default action instead.
    pub fn raise_sync(&self, thread: &mut GuestThread<P::Regs>, signal: PendingSignal) {
        let action = self.runtime.action(signal.signo);
        if thread.signals.blocked() & sig_mask(signal.signo) != 0 || action.is_ignore() {
            log::debug!(
                "thread {}: synchronous {} blocked or ignored, forcing default",
                thread.tid,
                signal_name(signal.signo)
            );
            self.force_default(thread, signal);
        } else {
            thread.signals.set_sync(signal);
        }
    }

    /// Set up a handler frame for `signal` and redirect the thread into it
    ///
    /// On error nothing in the thread or in guest memory has changed.
    pub fn deliver(
        &self,
        signal: &PendingSignal,
        action: &SignalAction,
        thread: &mut GuestThread<P::Regs>,
    ) -> Result<(), DeliveryError> {
        let abi = self.profile.signal_abi();
        let sp = thread.regs.sp();
        let alt = thread.signals.alt_stack;

        let top = if action.flags & SA_ONSTACK != 0 && alt.is_enabled() && !alt.contains(sp) {
            alt.top()
        } else {
            sp.wrapping_sub(abi.red_zone)
        };

        let layout = self.profile.frame_layout(&thread.regs, signal);
        let size = layout.size();
        let frame_addr = top
            .checked_sub(size)
            .map(|addr| align_down(addr, abi.frame_align))
            .ok_or(DeliveryError::StackOverflow { top, size })?;

        self.memory
            .check(frame_addr, size, Access::Write)
            .map_err(DeliveryError::Stack)?;

        let return_addr = action
            .restorer()
            .or_else(|| self.runtime.trampoline())
            .ok_or(DeliveryError::NoTrampoline)?;

        let (handler_pc, global_pointer) = match abi.handler_call {
            HandlerCall::Direct => (action.handler, None),
            HandlerCall::FunctionDescriptor { word_size } => {
                let addr = action.handler;
                let entry = read_word(self.memory, addr, word_size)
                    .map_err(|_| DeliveryError::Descriptor { addr })?;
                let gp = read_word(self.memory, addr + word_size as u64, word_size)
                    .map_err(|_| DeliveryError::Descriptor { addr })?;
                (entry, Some(gp))
            }
        };

        let siginfo = action.flags & SA_SIGINFO != 0;
        let ctx = FrameContext {
            regs: &thread.regs,
            signal,
            frame_addr,
            saved_mask: thread.signals.blocked(),
            alt_stack: alt.to_stack_t(sp),
            return_addr,
            siginfo,
        };
        let mut buf = vec![0u8; size as usize];
        self.profile.write_frame(&mut buf, &layout, &ctx)?;
        self.memory
            .write(frame_addr, &buf)
            .map_err(DeliveryError::Stack)?;

        let entry = HandlerEntry {
            handler_pc,
            global_pointer,
            return_addr,
            frame_addr,
            signo: signal.signo,
            siginfo,
        };
        self.profile
            .enter_handler(&mut thread.regs, &entry, &layout);

        let mut block = action.mask;
        if action.flags & SA_NODEFER == 0 {
            block |= sig_mask(signal.signo);
        }
        thread.signals.block(block);

        if action.flags & SA_RESETHAND != 0 {
            self.runtime.reset_action(signal.signo);
        }

        log::debug!(
            "Signal {} delivered to handler at {:#x}, SP={:#x}->{:#x}, return={:#x}",
            signal.signo,
            handler_pc,
            sp,
            frame_addr,
            return_addr
        );
        Ok(())
    }

    /// rt_sigreturn: validate the frame at SP and restore from it
    ///
    /// A rejected frame leaves the registers untouched and forces SIGSEGV.
    /// The register file is replaced in one assignment only after every
    /// check has passed.
    pub fn sigreturn(&self, thread: &mut GuestThread<P::Regs>) -> SyscallResult {
        match self.profile.restore_frame(&thread.regs, self.memory) {
            Ok(restored) => {
                thread.regs = restored.regs;
                thread.signals.set_blocked(restored.blocked);
                let sp = thread.regs.sp();
                let min = self.profile.signal_abi().min_sigstksz;
                let saved = &restored.alt_stack;
                if let Err(errno) = thread.signals.alt_stack.reconfigure(saved, sp, min) {
                    log::debug!(
                        "thread {}: saved altstack not restored (errno {})",
                        thread.tid,
                        errno
                    );
                }
                log::debug!(
                    "thread {}: sigreturn to pc={:#x} sp={:#x}",
                    thread.tid,
                    thread.regs.pc(),
                    sp
                );
            }
            Err(err) => {
                log::warn!(
                    "thread {}: bad signal frame at {:#x}: {}",
                    thread.tid,
                    self.profile.sigreturn_frame(&thread.regs),
                    err
                );
                self.force_default(thread, PendingSignal::kernel(SIGSEGV));
            }
        }
        SyscallResult::SigreturnCompleted
    }
}
