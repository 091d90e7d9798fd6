//! ARM64 trap classification.
//!
//! Maps engine trap codes, and for aborts the ESR syndrome, onto the
//! guest-visible signal Linux would raise.

use super::constants::*;
use super::context::Aarch64Regs;
use crate::arch_impl::traits::TrapClass;
use crate::dispatch::TrapEvent;
use crate::signal::constants::*;
use crate::signal::types::PendingSignal;

/// Exception classes (ESR_ELx.EC)
mod exception_class {
    pub const INSTRUCTION_ABORT_LOWER: u32 = 0b100000;
    pub const INSTRUCTION_ABORT_SAME: u32 = 0b100001;
    pub const PC_ALIGNMENT: u32 = 0b100010;
    pub const DATA_ABORT_LOWER: u32 = 0b100100;
    pub const DATA_ABORT_SAME: u32 = 0b100101;
}

/// Classify one trap.
pub fn classify(trap: &TrapEvent, regs: &Aarch64Regs) -> TrapClass {
    match trap.code {
        EXCP_SWI => TrapClass::Syscall,
        EXCP_INTERRUPT | EXCP_YIELD => TrapClass::Interrupt,
        EXCP_ATOMIC => TrapClass::Atomic,
        EXCP_UDEF => TrapClass::Fault(PendingSignal::fault(SIGILL, ILL_ILLOPN, regs.pc)),
        EXCP_BKPT | EXCP_DEBUG => {
            TrapClass::Breakpoint(PendingSignal::fault(SIGTRAP, TRAP_BRKPT, regs.pc))
        }
        EXCP_PREFETCH_ABORT | EXCP_DATA_ABORT => {
            classify_abort(trap.aux, trap.fault_address.unwrap_or(0))
        }
        _ => TrapClass::Unknown,
    }
}

/// Map an abort syndrome to a fault signal.
///
/// Only the fault-status bands Linux reports to user space are mapped;
/// anything else (external aborts, TLB conflicts, ...) has no defined
/// signal and is left for the dispatcher to treat as fatal.
pub fn classify_abort(esr: u64, addr: u64) -> TrapClass {
    let ec = ((esr >> 26) & 0x3F) as u32; // Exception Class
    let fsc = (esr & 0x3F) as u32; // Fault Status Code

    let (signo, code) = match ec {
        exception_class::INSTRUCTION_ABORT_LOWER
        | exception_class::INSTRUCTION_ABORT_SAME
        | exception_class::DATA_ABORT_LOWER
        | exception_class::DATA_ABORT_SAME => match fsc {
            // Translation fault, levels 0-3
            0x04..=0x07 => (SIGSEGV, SEGV_MAPERR),
            // Access flag fault, levels 1-3
            0x09..=0x0b => (SIGSEGV, SEGV_ACCERR),
            // Permission fault, levels 1-3
            0x0d..=0x0f => (SIGSEGV, SEGV_ACCERR),
            // Synchronous tag check fault
            0x11 => (SIGSEGV, SEGV_MTESERR),
            // Alignment fault
            0x21 => (SIGBUS, BUS_ADRALN),
            _ => return TrapClass::Unknown,
        },
        exception_class::PC_ALIGNMENT => (SIGBUS, BUS_ADRALN),
        _ => return TrapClass::Unknown,
    };
    TrapClass::Fault(PendingSignal::fault_with_syndrome(signo, code, addr, esr))
}
