//! ARMv8.1 LSE atomic instruction decoding.
//!
//! Covers the LD<op> family, SWP and CAS at all four sizes. Pair and
//! ordered-load variants (CASP, LDAPR) are not decoded.

use super::constants::INSN_LEN;
use super::context::Aarch64Regs;
use crate::atomic::{AtomicKind, AtomicOp};

const LDOP_MASK: u32 = 0x3F20_0C00;
const LDOP_BITS: u32 = 0x3820_0000;
const CAS_MASK: u32 = 0x3FA0_7C00;
const CAS_BITS: u32 = 0x08A0_7C00;

/// Register 31 as a data operand is XZR.
fn data_reg(regs: &Aarch64Regs, r: usize) -> u64 {
    if r == 31 {
        0
    } else {
        regs.x[r]
    }
}

/// Register 31 as a base address is SP.
fn base_reg(regs: &Aarch64Regs, r: usize) -> u64 {
    if r == 31 {
        regs.sp
    } else {
        regs.x[r]
    }
}

/// Decode `insn` against the current registers.
pub fn decode(insn: u32, regs: &Aarch64Regs) -> Option<AtomicOp> {
    let width = 1u8 << (insn >> 30);
    let rs = ((insn >> 16) & 0x1F) as usize;
    let rn = ((insn >> 5) & 0x1F) as usize;
    let rt = (insn & 0x1F) as usize;

    if insn & LDOP_MASK == LDOP_BITS {
        let o3 = (insn >> 15) & 1;
        let opc = (insn >> 12) & 7;
        let kind = match (o3, opc) {
            (0, 0b000) => AtomicKind::Add,
            (0, 0b001) => AtomicKind::Clear,
            (0, 0b010) => AtomicKind::Xor,
            (0, 0b011) => AtomicKind::Set,
            (0, 0b100) => AtomicKind::SMax,
            (0, 0b101) => AtomicKind::SMin,
            (0, 0b110) => AtomicKind::UMax,
            (0, 0b111) => AtomicKind::UMin,
            (1, 0b000) => AtomicKind::Swap,
            _ => return None,
        };
        return Some(AtomicOp {
            addr: base_reg(regs, rn),
            width,
            kind,
            operand: data_reg(regs, rs),
            dest: (rt != 31).then_some(rt),
            len: INSN_LEN,
        });
    }

    if insn & CAS_MASK == CAS_BITS {
        return Some(AtomicOp {
            addr: base_reg(regs, rn),
            width,
            kind: AtomicKind::CompareSwap {
                expected: data_reg(regs, rs),
            },
            operand: data_reg(regs, rt),
            dest: (rs != 31).then_some(rs),
            len: INSN_LEN,
        });
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn regs() -> Aarch64Regs {
        let mut regs = Aarch64Regs::new(16, 0);
        regs.x[1] = 5;
        regs.x[2] = 0x1000;
        regs.x[3] = 9;
        regs.sp = 0x8000;
        regs
    }

    #[test]
    fn test_decode_ldaddal_x() {
        // ldaddal x1, x0, [x2]
        let op = decode(0xF8E1_0040, &regs()).unwrap();
        assert_eq!(op.kind, AtomicKind::Add);
        assert_eq!(op.width, 8);
        assert_eq!(op.addr, 0x1000);
        assert_eq!(op.operand, 5);
        assert_eq!(op.dest, Some(0));
    }

    #[test]
    fn test_decode_swpb_and_stclr() {
        // swpb w1, w0, [x2]
        let op = decode(0x3821_8040, &regs()).unwrap();
        assert_eq!((op.kind, op.width), (AtomicKind::Swap, 1));
        // stclr w1, [sp]  (ldclr w1, wzr, [sp])
        let op = decode(0xB821_13FF, &regs()).unwrap();
        let expected = (AtomicKind::Clear, 4, 0x8000, None);
        assert_eq!((op.kind, op.width, op.addr, op.dest), expected);
    }

    #[test]
    fn test_decode_casal() {
        // casal x1, x3, [x2]
        let op = decode(0xC8E1_FC43, &regs()).unwrap();
        assert_eq!(op.kind, AtomicKind::CompareSwap { expected: 5 });
        assert_eq!(op.operand, 9);
        assert_eq!(op.dest, Some(1));
        assert_eq!(op.width, 8);
    }

    #[test]
    fn test_non_atomic_rejected() {
        // add x0, x1, x2
        assert_eq!(decode(0x8B02_0020, &regs()), None);
        // ldapr x0, [x2] (o3=1, opc=100)
        assert_eq!(decode(0xF8BF_C040, &regs()), None);
    }
}
