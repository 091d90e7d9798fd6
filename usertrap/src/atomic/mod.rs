//! Emulation of guest read-modify-write instructions
//!
//! The execution engine hands atomics it cannot perform natively back to the
//! runtime as an atomic trap. The profile decodes the instruction into an
//! [`AtomicOp`]; [`execute_atomic_step`] performs it against guest memory
//! under the process-wide [`ExclusiveSection`].

pub mod exclusive;

pub use exclusive::{ExclusiveGuard, ExclusiveSection};

use crate::arch_impl::traits::RegisterFile;
use crate::memory::{Access, GuestMemory, MemFault};
use crate::signal::constants::{BUS_ADRALN, SIGBUS, SIGSEGV};
use crate::signal::types::PendingSignal;

/// Read-modify-write operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtomicKind {
    Add,
    /// `old & !operand`
    Clear,
    Xor,
    /// `old | operand`
    Set,
    SMax,
    SMin,
    UMax,
    UMin,
    Swap,
    /// Store `operand` only if memory holds `expected`
    CompareSwap { expected: u64 },
}

/// A decoded atomic instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtomicOp {
    /// Guest virtual address of the operand
    pub addr: u64,
    /// Access size in bytes: 1, 2, 4 or 8
    pub width: u8,
    pub kind: AtomicKind,
    pub operand: u64,
    /// Register receiving the old memory value, if any
    pub dest: Option<usize>,
    /// Instruction length, for advancing the PC
    pub len: u64,
}

impl AtomicOp {
    fn mask(&self) -> u64 {
        match self.width {
            8 => u64::MAX,
            w => (1u64 << (u32::from(w) * 8)) - 1,
        }
    }

    fn sign_extend(&self, value: u64) -> i64 {
        let shift = 64 - u32::from(self.width) * 8;
        ((value << shift) as i64) >> shift
    }

    /// Value to store given the old memory value, or None if nothing is stored
    pub fn apply(&self, old: u64) -> Option<u64> {
        let mask = self.mask();
        let old = old & mask;
        let operand = self.operand & mask;
        let new = match self.kind {
            AtomicKind::Add => old.wrapping_add(operand),
            AtomicKind::Clear => old & !operand,
            AtomicKind::Xor => old ^ operand,
            AtomicKind::Set => old | operand,
            AtomicKind::SMax => self.sign_extend(old).max(self.sign_extend(operand)) as u64,
            AtomicKind::SMin => self.sign_extend(old).min(self.sign_extend(operand)) as u64,
            AtomicKind::UMax => old.max(operand),
            AtomicKind::UMin => old.min(operand),
            AtomicKind::Swap => operand,
            AtomicKind::CompareSwap { expected } => {
                if old != expected & mask {
                    return None;
                }
                operand
            }
        };
        Some(new & mask)
    }
}

fn access_fault(fault: MemFault) -> PendingSignal {
    PendingSignal::fault(SIGSEGV, fault.segv_code(), fault.addr)
}

/// Perform one emulated atomic and advance the PC past it
///
/// On failure the guest state is untouched and the signal to raise is
/// returned: SIGBUS/BUS_ADRALN for a misaligned address (detected before
/// entering the section), SIGSEGV with MAPERR or ACCERR if the target is not
/// readable and writable.
pub fn execute_atomic_step<R: RegisterFile>(
    op: &AtomicOp,
    regs: &mut R,
    memory: &dyn GuestMemory,
    section: &ExclusiveSection,
) -> Result<(), PendingSignal> {
    let width = u64::from(op.width);
    if !matches!(op.width, 1 | 2 | 4 | 8) || op.addr % width != 0 {
        return Err(PendingSignal::fault(SIGBUS, BUS_ADRALN, op.addr));
    }

    let old = {
        let _guard = section.enter();

        memory
            .check(op.addr, width, Access::ReadWrite)
            .map_err(access_fault)?;

        let mut word = [0u8; 8];
        memory
            .read(op.addr, &mut word[..op.width as usize])
            .map_err(access_fault)?;
        let old = u64::from_le_bytes(word);

        if let Some(new) = op.apply(old) {
            memory
                .write(op.addr, &new.to_le_bytes()[..op.width as usize])
                .map_err(access_fault)?;
        }
        old
    };

    if let Some(dest) = op.dest {
        regs.set_gpr(dest, old);
    }
    regs.set_pc(regs.pc().wrapping_add(op.len));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(kind: AtomicKind, width: u8, operand: u64) -> AtomicOp {
        AtomicOp {
            addr: 0,
            width,
            kind,
            operand,
            dest: None,
            len: 4,
        }
    }

    #[test]
    fn test_add_wraps_at_width() {
        assert_eq!(op(AtomicKind::Add, 1, 1).apply(0xff), Some(0));
        assert_eq!(op(AtomicKind::Add, 4, 2).apply(0xffff_ffff), Some(1));
    }

    #[test]
    fn test_signed_compare_uses_width() {
        // 0x80 is -128 as a byte
        assert_eq!(op(AtomicKind::SMax, 1, 0x01).apply(0x80), Some(0x01));
        assert_eq!(op(AtomicKind::UMax, 1, 0x01).apply(0x80), Some(0x80));
        assert_eq!(op(AtomicKind::SMin, 2, 0x7fff).apply(0x8000), Some(0x8000));
    }

    #[test]
    fn test_bit_ops() {
        assert_eq!(op(AtomicKind::Clear, 8, 0b0110).apply(0b1111), Some(0b1001));
        assert_eq!(op(AtomicKind::Set, 8, 0b0110).apply(0b1000), Some(0b1110));
        assert_eq!(op(AtomicKind::Xor, 8, 0b0110).apply(0b1100), Some(0b1010));
    }

    #[test]
    fn test_compare_swap() {
        let cas = op(AtomicKind::CompareSwap { expected: 5 }, 4, 9);
        assert_eq!(cas.apply(5), Some(9));
        assert_eq!(cas.apply(6), None);
    }
}
