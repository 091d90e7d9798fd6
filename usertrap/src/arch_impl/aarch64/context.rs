//! ARM64 guest register file.
//!
//! Condition flags are kept as four separate bits, the way an execution
//! engine tracks them, and packed into a PSTATE word only when a signal
//! frame is written. SVE, SME and FPSIMD state share storage: V<n> is the
//! low 128 bits of Z<n>.

use core::fmt::Write;

use super::constants::*;
use crate::arch_impl::traits::RegisterFile;

/// Complete user-visible AArch64 CPU state of one guest thread.
#[derive(Clone, PartialEq, Eq)]
pub struct Aarch64Regs {
    /// General-purpose registers x0..x30.
    pub x: [u64; 31],
    pub sp: u64,
    pub pc: u64,
    pub n: bool,
    pub z: bool,
    pub c: bool,
    pub v: bool,
    /// PSTATE.BTYPE (0..=3).
    pub btype: u8,
    /// Streaming mode control (SM, ZA).
    pub svcr: u64,
    pub fpsr: u32,
    pub fpcr: u32,
    pub tpidr2: u64,
    /// Current vector length in bytes.
    vl: usize,
    /// 32 Z registers of `vl` bytes each.
    zregs: Vec<u8>,
    /// 16 predicate registers of `vl / 8` bytes each.
    pregs: Vec<u8>,
    ffr: Vec<u8>,
    /// Streaming vector length in bytes (0 without SME).
    svl: usize,
    /// ZA array, `svl * svl` bytes.
    za: Vec<u8>,
}

impl Aarch64Regs {
    /// Zeroed register file with vector storage for `vl` and `svl` bytes.
    pub fn new(vl: usize, svl: usize) -> Self {
        let vl = vl.max(VQ_BYTES);
        Aarch64Regs {
            x: [0; 31],
            sp: 0,
            pc: 0,
            n: false,
            z: false,
            c: false,
            v: false,
            btype: 0,
            svcr: 0,
            fpsr: 0,
            fpcr: 0,
            tpidr2: 0,
            vl,
            zregs: vec![0; 32 * vl],
            pregs: vec![0; 16 * (vl / 8)],
            ffr: vec![0; vl / 8],
            svl,
            za: vec![0; svl * svl],
        }
    }

    /// PSTATE as saved in sigcontext: NZCV and BTYPE.
    pub fn pstate(&self) -> u64 {
        let mut pstate = 0;
        if self.n {
            pstate |= PSTATE_N;
        }
        if self.z {
            pstate |= PSTATE_Z;
        }
        if self.c {
            pstate |= PSTATE_C;
        }
        if self.v {
            pstate |= PSTATE_V;
        }
        pstate | (u64::from(self.btype & 3) << PSTATE_BTYPE_SHIFT)
    }

    /// Unpack a saved PSTATE; every other bit is discarded.
    pub fn set_pstate(&mut self, pstate: u64) {
        self.n = pstate & PSTATE_N != 0;
        self.z = pstate & PSTATE_Z != 0;
        self.c = pstate & PSTATE_C != 0;
        self.v = pstate & PSTATE_V != 0;
        self.btype = ((pstate & PSTATE_BTYPE_MASK) >> PSTATE_BTYPE_SHIFT) as u8;
    }

    #[inline]
    pub fn streaming(&self) -> bool {
        self.svcr & SVCR_SM != 0
    }

    #[inline]
    pub fn za_enabled(&self) -> bool {
        self.svcr & SVCR_ZA != 0
    }

    /// Live vector length in bytes.
    #[inline]
    pub fn vl(&self) -> usize {
        self.vl
    }

    /// Streaming vector length in bytes.
    #[inline]
    pub fn svl(&self) -> usize {
        self.svl
    }

    /// Resize Z/P/FFR storage to `vl` bytes, zeroing all vector state.
    ///
    /// This is what a change of streaming mode does to the register file.
    pub fn reset_vectors(&mut self, vl: usize) {
        let vl = vl.max(VQ_BYTES);
        self.vl = vl;
        self.zregs = vec![0; 32 * vl];
        self.pregs = vec![0; 16 * (vl / 8)];
        self.ffr = vec![0; vl / 8];
    }

    /// V<n>, the low 128 bits of Z<n>.
    pub fn vreg(&self, n: usize) -> u128 {
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&self.zreg(n)[..16]);
        u128::from_le_bytes(bytes)
    }

    /// Write V<n>; the upper part of Z<n> is zeroed as an A64 write would.
    pub fn set_vreg(&mut self, n: usize, value: u128) {
        let z = self.zreg_mut(n);
        z.fill(0);
        z[..16].copy_from_slice(&value.to_le_bytes());
    }

    pub fn zreg(&self, n: usize) -> &[u8] {
        &self.zregs[n * self.vl..(n + 1) * self.vl]
    }

    pub fn zreg_mut(&mut self, n: usize) -> &mut [u8] {
        let vl = self.vl;
        &mut self.zregs[n * vl..(n + 1) * vl]
    }

    /// All 32 Z registers back to back.
    pub fn zregs(&self) -> &[u8] {
        &self.zregs
    }

    pub fn zregs_mut(&mut self) -> &mut [u8] {
        &mut self.zregs
    }

    /// All 16 predicate registers back to back.
    pub fn pregs(&self) -> &[u8] {
        &self.pregs
    }

    pub fn pregs_mut(&mut self) -> &mut [u8] {
        &mut self.pregs
    }

    pub fn ffr(&self) -> &[u8] {
        &self.ffr
    }

    pub fn ffr_mut(&mut self) -> &mut [u8] {
        &mut self.ffr
    }

    pub fn za(&self) -> &[u8] {
        &self.za
    }

    pub fn za_mut(&mut self) -> &mut [u8] {
        &mut self.za
    }
}

impl core::fmt::Debug for Aarch64Regs {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Aarch64Regs")
            .field("pc", &format_args!("{:#x}", self.pc))
            .field("sp", &format_args!("{:#x}", self.sp))
            .field("pstate", &format_args!("{:#x}", self.pstate()))
            .field("svcr", &self.svcr)
            .field("vl", &self.vl)
            .field("svl", &self.svl)
            .finish_non_exhaustive()
    }
}

impl RegisterFile for Aarch64Regs {
    fn pc(&self) -> u64 {
        self.pc
    }

    fn set_pc(&mut self, pc: u64) {
        self.pc = pc;
    }

    fn sp(&self) -> u64 {
        self.sp
    }

    fn set_sp(&mut self, sp: u64) {
        self.sp = sp;
    }

    fn gpr(&self, index: usize) -> u64 {
        self.x.get(index).copied().unwrap_or(0)
    }

    fn set_gpr(&mut self, index: usize, value: u64) {
        if let Some(reg) = self.x.get_mut(index) {
            *reg = value;
        }
    }

    fn dump(&self) -> String {
        let mut out = String::new();
        for (i, pair) in self.x.chunks(2).enumerate() {
            let _ = match pair {
                [a, b] => {
                    let (lo, hi) = (2 * i, 2 * i + 1);
                    writeln!(out, "  x{:<2} = {:#018x}  x{:<2} = {:#018x}", lo, a, hi, b)
                }
                [a] => writeln!(out, "  x{:<2} = {:#018x}", 2 * i, a),
                _ => Ok(()),
            };
        }
        let _ = writeln!(out, "  sp  = {:#018x}  pc  = {:#018x}", self.sp, self.pc);
        let _ = writeln!(
            out,
            "  pstate = {:#010x} (N={} Z={} C={} V={} BTYPE={})",
            self.pstate(),
            self.n as u8,
            self.z as u8,
            self.c as u8,
            self.v as u8,
            self.btype
        );
        let _ = writeln!(
            out,
            "  fpsr = {:#010x}  fpcr = {:#010x}  svcr = {:#x}  tpidr2 = {:#x}",
            self.fpsr, self.fpcr, self.svcr, self.tpidr2
        );
        for i in 0..32 {
            let _ = writeln!(out, "  v{:<2} = {:#034x}", i, self.vreg(i));
        }
        let _ = write!(out, "  vl = {}  svl = {}", self.vl, self.svl);
        out
    }
}
