//! Syscall request extraction and result write-back

use super::errno::{EFAULT, ENOSYS};
use super::signal::{sys_sigaction, sys_sigaltstack, sys_sigpending, sys_sigprocmask};
use super::{HostSyscalls, SyscallRequest, SyscallResult};
use crate::arch_impl::traits::{ArchitectureProfile, ErrorConvention, RegisterFile};
use crate::memory::userptr::read_word;
use crate::memory::GuestMemory;
use crate::runtime::{GuestThread, SharedRuntime};
use crate::signal::SignalDeliverer;

/// Moves syscalls between guest registers and the host boundary
pub struct SyscallBridge<'a, P: ArchitectureProfile> {
    profile: &'a P,
    runtime: &'a SharedRuntime,
    memory: &'a dyn GuestMemory,
}

impl<'a, P: ArchitectureProfile> SyscallBridge<'a, P> {
    pub fn new(profile: &'a P, runtime: &'a SharedRuntime, memory: &'a dyn GuestMemory) -> Self {
        SyscallBridge {
            profile,
            runtime,
            memory,
        }
    }

    /// Read the syscall number and arguments
    ///
    /// Arguments past the register set are read from the caller's stack;
    /// an unreadable slot fails the whole request with EFAULT.
    pub fn extract_args(&self, regs: &P::Regs) -> Result<SyscallRequest, u64> {
        let abi = self.profile.syscall_abi();
        let mut request = SyscallRequest::new(regs.gpr(abi.number_reg));

        for (slot, &reg) in request.args.iter_mut().zip(abi.arg_regs) {
            *slot = regs.gpr(reg);
        }

        if let Some(spill) = abi.stack_args {
            let first = abi.arg_regs.len();
            let base = regs.sp().wrapping_add(spill.sp_offset);
            for i in 0..spill.count {
                let Some(slot) = request.args.get_mut(first + i) else {
                    break;
                };
                let addr = base.wrapping_add((i * spill.word_size) as u64);
                *slot = read_word(self.memory, addr, spill.word_size).map_err(|_| EFAULT)?;
            }
        }

        Ok(request)
    }

    /// Service the syscall the thread just trapped on
    ///
    /// The result has already been written back to the registers when this
    /// returns.
    pub fn handle<H: HostSyscalls>(
        &self,
        thread: &mut GuestThread<P::Regs>,
        host: &mut H,
    ) -> SyscallResult {
        let abi = self.profile.syscall_abi();
        let nr = thread.regs.gpr(abi.number_reg);

        let result = if !abi.in_range(nr) {
            log::debug!("thread {}: syscall {} out of range", thread.tid, nr);
            SyscallResult::Err(ENOSYS)
        } else {
            match self.extract_args(&thread.regs) {
                Ok(request) => self.invoke(&request, thread, host),
                Err(errno) => {
                    log::debug!("thread {}: syscall {} arguments unreadable", thread.tid, nr);
                    SyscallResult::Err(errno)
                }
            }
        };

        self.write_back(result, &mut thread.regs);
        result
    }

    fn invoke<H: HostSyscalls>(
        &self,
        request: &SyscallRequest,
        thread: &mut GuestThread<P::Regs>,
        host: &mut H,
    ) -> SyscallResult {
        let calls = &self.profile.syscall_abi().signal_calls;
        let nr = Some(request.number);
        let a = |i| request.arg(i);

        if nr == calls.rt_sigreturn {
            SignalDeliverer::new(self.profile, self.runtime, self.memory).sigreturn(thread)
        } else if nr == calls.rt_sigaction {
            sys_sigaction(
                self.runtime,
                self.memory,
                &mut thread.signals,
                a(0),
                a(1),
                a(2),
                a(3),
            )
        } else if nr == calls.rt_sigprocmask {
            sys_sigprocmask(self.memory, &mut thread.signals, a(0), a(1), a(2), a(3))
        } else if nr == calls.rt_sigpending {
            sys_sigpending(self.memory, &thread.signals, a(0), a(1))
        } else if nr == calls.sigaltstack {
            let sp = thread.regs.sp();
            let min = self.profile.signal_abi().min_sigstksz;
            sys_sigaltstack(self.memory, &mut thread.signals, a(0), a(1), sp, min)
        } else {
            host.invoke(request)
        }
    }

    /// Encode `result` into the registers per the profile's convention
    ///
    /// `Restart` rewinds the PC onto the syscall instruction;
    /// `SigreturnCompleted` and `Exit` touch nothing.
    pub fn write_back(&self, result: SyscallResult, regs: &mut P::Regs) {
        let abi = self.profile.syscall_abi();
        let (value, failed) = match result {
            SyscallResult::Restart => {
                regs.set_pc(regs.pc().wrapping_sub(abi.instruction_length));
                return;
            }
            SyscallResult::SigreturnCompleted | SyscallResult::Exit(_) => return,
            SyscallResult::Ok(value) => (value, false),
            SyscallResult::Err(errno) => (errno, true),
        };

        match abi.errors {
            ErrorConvention::NegatedReturn => {
                let encoded = if failed { value.wrapping_neg() } else { value };
                regs.set_gpr(abi.return_reg, encoded);
            }
            ErrorConvention::FlagRegister { reg } => {
                regs.set_gpr(abi.return_reg, value);
                regs.set_gpr(reg, failed as u64);
            }
        }
    }
}
