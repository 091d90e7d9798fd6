//! Shared fixtures for the integration tests.
//!
//! `ToyProfile` is a small 32-register guest ISA in the style of MIPS o32:
//! syscall arguments spill onto the stack, failure is reported in a flag
//! register, and handler addresses point at function descriptors. It
//! exercises the parts of the runtime the AArch64 profile never touches.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::fmt::Write;

use usertrap::arch_impl::traits::{
    ErrorConvention, FrameContext, FrameLayout, HandlerCall, HandlerEntry, RestoredFrame,
    SignalAbi, SignalSyscalls, StackSpill, SyscallAbi,
};
use usertrap::atomic::{AtomicKind, AtomicOp};
use usertrap::memory::{PROT_EXEC, PROT_READ, PROT_WRITE};
use usertrap::signal::constants::*;
use usertrap::signal::frame::{FrameError, FrameReader, FrameWriter};
use usertrap::signal::types::{StackT, SIGINFO_SIZE};
use usertrap::{
    ArchitectureProfile, ExecutionEngine, FlatGuestMemory, GuestMemory, PendingSignal,
    RegisterFile, SyscallRequest, SyscallResult, TrapClass, TrapEvent,
};

pub const CODE_BASE: u64 = 0x0040_0000;
pub const TRAMPOLINE_PAGE: u64 = 0x0050_0000;
pub const DATA_BASE: u64 = 0x0060_0000;
pub const ALT_STACK_BASE: u64 = 0x0070_0000;
pub const ALT_STACK_SIZE: u64 = 0x8000;
pub const STACK_BASE: u64 = 0x7fff_0000;
pub const STACK_SIZE: u64 = 0x10000;
pub const STACK_TOP: u64 = STACK_BASE + STACK_SIZE;

/// Guest address space shared by all tests
pub fn guest_memory() -> FlatGuestMemory {
    let mem = FlatGuestMemory::new();
    let rw = PROT_READ | PROT_WRITE;
    mem.map(CODE_BASE, 0x1000, PROT_READ | PROT_EXEC).unwrap();
    mem.map(TRAMPOLINE_PAGE, 0x1000, rw | PROT_EXEC).unwrap();
    mem.map(DATA_BASE, 0x1000, rw).unwrap();
    mem.map(ALT_STACK_BASE, ALT_STACK_SIZE, rw).unwrap();
    mem.map(STACK_BASE, STACK_SIZE, rw).unwrap();
    mem
}

// ============================================================================
// Scripted engine and recording host
// ============================================================================

type Step<R> = Box<dyn FnMut(&mut R) -> TrapEvent>;

/// Engine that replays a fixed list of steps, one per `run`
pub struct ScriptedEngine<R> {
    steps: VecDeque<Step<R>>,
    pub executed: usize,
}

impl<R> ScriptedEngine<R> {
    pub fn new() -> Self {
        ScriptedEngine {
            steps: VecDeque::new(),
            executed: 0,
        }
    }

    pub fn step(mut self, f: impl FnMut(&mut R) -> TrapEvent + 'static) -> Self {
        self.steps.push_back(Box::new(f));
        self
    }
}

impl<R> ExecutionEngine for ScriptedEngine<R> {
    type Regs = R;

    fn run(&mut self, regs: &mut R) -> TrapEvent {
        let mut step = self.steps.pop_front().expect("engine script exhausted");
        self.executed += 1;
        step(regs)
    }
}

/// Host that records every request and replays canned results
pub struct RecordingHost {
    pub exit_nr: u64,
    pub requests: Vec<SyscallRequest>,
    pub responses: VecDeque<SyscallResult>,
}

impl RecordingHost {
    pub fn new(exit_nr: u64) -> Self {
        RecordingHost {
            exit_nr,
            requests: Vec::new(),
            responses: VecDeque::new(),
        }
    }

    pub fn respond(mut self, result: SyscallResult) -> Self {
        self.responses.push_back(result);
        self
    }
}

impl usertrap::HostSyscalls for RecordingHost {
    fn invoke(&mut self, request: &SyscallRequest) -> SyscallResult {
        self.requests.push(*request);
        if request.number == self.exit_nr {
            return SyscallResult::Exit(request.arg(0) as i32);
        }
        self.responses.pop_front().unwrap_or(SyscallResult::Ok(0))
    }
}

// ============================================================================
// Toy profile
// ============================================================================

pub const TOY_TRAP_SYSCALL: u32 = 1;
pub const TOY_TRAP_FAULT: u32 = 2;
pub const TOY_TRAP_BREAK: u32 = 3;
pub const TOY_TRAP_ATOMIC: u32 = 4;
pub const TOY_TRAP_INTERRUPT: u32 = 5;

/// Toy atomic encoding: `0x01bb_ssdd` adds r[ss] to the word at r[bb]
pub const TOY_OP_AMOADD: u64 = 0x01;

pub const TOY_NR_EXIT: u64 = 4001;
pub const TOY_NR_WRITE: u64 = 4004;
pub const TOY_NR_SIGRETURN: u64 = 4193;
pub const TOY_NR_SIGACTION: u64 = 4194;
pub const TOY_NR_SIGPROCMASK: u64 = 4195;
pub const TOY_NR_SIGPENDING: u64 = 4196;
pub const TOY_NR_SIGALTSTACK: u64 = 4206;

pub const REG_V0: usize = 2;
pub const REG_A0: usize = 4;
pub const REG_A1: usize = 5;
pub const REG_A2: usize = 6;
pub const REG_A3: usize = 7;
pub const REG_T9: usize = 25;
pub const REG_GP: usize = 28;
pub const REG_SP: usize = 29;
pub const REG_RA: usize = 31;

pub const TOY_RED_ZONE: u64 = 32;
pub const TOY_FRAME_MAGIC: u64 = 0x544f_5946_524d;

const TOY_ARG_REGS: [usize; 4] = [REG_A0, REG_A1, REG_A2, REG_A3];

// Frame layout
pub const TOY_REGS_OFFSET: usize = SIGINFO_SIZE;
pub const TOY_PC_OFFSET: usize = TOY_REGS_OFFSET + 32 * 8;
pub const TOY_MASK_OFFSET: usize = TOY_PC_OFFSET + 8;
pub const TOY_STACK_OFFSET: usize = TOY_MASK_OFFSET + 8;
pub const TOY_MAGIC_OFFSET: usize = TOY_STACK_OFFSET + StackT::GUEST_SIZE;
pub const TOY_FRAME_SIZE: usize = TOY_MAGIC_OFFSET + 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToyRegs {
    pub r: [u64; 32],
    pub pc: u64,
}

impl ToyRegs {
    pub fn new() -> Self {
        ToyRegs { r: [0; 32], pc: 0 }
    }
}

impl RegisterFile for ToyRegs {
    fn pc(&self) -> u64 {
        self.pc
    }

    fn set_pc(&mut self, pc: u64) {
        self.pc = pc;
    }

    fn sp(&self) -> u64 {
        self.r[REG_SP]
    }

    fn set_sp(&mut self, sp: u64) {
        self.r[REG_SP] = sp;
    }

    fn gpr(&self, index: usize) -> u64 {
        match index {
            1..=31 => self.r[index],
            _ => 0,
        }
    }

    fn set_gpr(&mut self, index: usize, value: u64) {
        if (1..=31).contains(&index) {
            self.r[index] = value;
        }
    }

    fn dump(&self) -> String {
        let mut out = String::new();
        for (i, value) in self.r.iter().enumerate() {
            let _ = writeln!(out, "r{:<2} = {:#018x}", i, value);
        }
        let _ = write!(out, "pc  = {:#018x}", self.pc);
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToyLayout;

impl FrameLayout for ToyLayout {
    fn size(&self) -> u64 {
        TOY_FRAME_SIZE as u64
    }
}

pub struct ToyProfile {
    syscall_abi: SyscallAbi,
    signal_abi: SignalAbi,
}

impl ToyProfile {
    pub fn new() -> Self {
        ToyProfile {
            syscall_abi: SyscallAbi {
                number_reg: REG_V0,
                arg_regs: &TOY_ARG_REGS,
                stack_args: Some(StackSpill {
                    sp_offset: 16,
                    count: 4,
                    word_size: 4,
                }),
                return_reg: REG_V0,
                errors: ErrorConvention::FlagRegister { reg: REG_A3 },
                instruction_length: 4,
                nr_base: 4000,
                nr_count: 500,
                signal_calls: SignalSyscalls {
                    rt_sigreturn: Some(TOY_NR_SIGRETURN),
                    sigaltstack: Some(TOY_NR_SIGALTSTACK),
                    rt_sigaction: Some(TOY_NR_SIGACTION),
                    rt_sigprocmask: Some(TOY_NR_SIGPROCMASK),
                    rt_sigpending: Some(TOY_NR_SIGPENDING),
                },
            },
            signal_abi: SignalAbi {
                red_zone: TOY_RED_ZONE,
                frame_align: 8,
                handler_call: HandlerCall::FunctionDescriptor { word_size: 4 },
                min_sigstksz: 2048,
            },
        }
    }
}

pub static TOY_TRAMPOLINE: [u8; 8] = [
    0x61, 0x10, 0x02, 0x24, // li v0, 4193
    0x0c, 0x00, 0x00, 0x00, // syscall
];

impl ArchitectureProfile for ToyProfile {
    type Regs = ToyRegs;
    type Layout = ToyLayout;

    fn name(&self) -> &'static str {
        "toy"
    }

    fn classify(&self, trap: &TrapEvent, regs: &ToyRegs) -> TrapClass {
        match trap.code {
            TOY_TRAP_SYSCALL => TrapClass::Syscall,
            TOY_TRAP_FAULT => {
                let addr = trap.fault_address.unwrap_or(0);
                TrapClass::Fault(PendingSignal::fault(SIGSEGV, SEGV_MAPERR, addr))
            }
            TOY_TRAP_BREAK => {
                TrapClass::Breakpoint(PendingSignal::fault(SIGTRAP, TRAP_BRKPT, regs.pc))
            }
            TOY_TRAP_ATOMIC => TrapClass::Atomic,
            TOY_TRAP_INTERRUPT => TrapClass::Interrupt,
            _ => TrapClass::Unknown,
        }
    }

    fn syscall_abi(&self) -> &SyscallAbi {
        &self.syscall_abi
    }

    fn signal_abi(&self) -> &SignalAbi {
        &self.signal_abi
    }

    fn trampoline(&self) -> &'static [u8] {
        &TOY_TRAMPOLINE
    }

    fn frame_layout(&self, _regs: &ToyRegs, _signal: &PendingSignal) -> ToyLayout {
        ToyLayout
    }

    fn write_frame(
        &self,
        buf: &mut [u8],
        _layout: &ToyLayout,
        ctx: &FrameContext<'_, ToyRegs>,
    ) -> Result<(), FrameError> {
        let mut w = FrameWriter::new(buf);
        if ctx.siginfo {
            w.put_bytes(0, &ctx.signal.encode_siginfo())?;
        }
        for (i, value) in ctx.regs.r.iter().enumerate() {
            w.put_u64(TOY_REGS_OFFSET + 8 * i, *value)?;
        }
        w.put_u64(TOY_PC_OFFSET, ctx.regs.pc)?;
        w.put_u64(TOY_MASK_OFFSET, ctx.saved_mask)?;
        w.put_bytes(TOY_STACK_OFFSET, &ctx.alt_stack.to_guest_bytes())?;
        w.put_u64(TOY_MAGIC_OFFSET, TOY_FRAME_MAGIC)
    }

    fn enter_handler(&self, regs: &mut ToyRegs, entry: &HandlerEntry, _layout: &ToyLayout) {
        regs.r[REG_A0] = u64::from(entry.signo);
        if entry.siginfo {
            regs.r[REG_A1] = entry.frame_addr;
            regs.r[REG_A2] = entry.frame_addr + TOY_REGS_OFFSET as u64;
        }
        if let Some(gp) = entry.global_pointer {
            regs.r[REG_GP] = gp;
        }
        regs.r[REG_T9] = entry.handler_pc;
        regs.r[REG_RA] = entry.return_addr;
        regs.r[REG_SP] = entry.frame_addr;
        regs.pc = entry.handler_pc;
    }

    fn sigreturn_frame(&self, regs: &ToyRegs) -> u64 {
        regs.r[REG_SP]
    }

    fn restore_frame(
        &self,
        regs: &ToyRegs,
        memory: &dyn GuestMemory,
    ) -> Result<RestoredFrame<ToyRegs>, FrameError> {
        let frame = self.sigreturn_frame(regs);
        if frame % 8 != 0 {
            return Err(FrameError::Misaligned { addr: frame });
        }
        let mut buf = vec![0u8; TOY_FRAME_SIZE];
        memory.read(frame, &mut buf)?;
        let r = FrameReader::new(&buf);
        if r.u64(TOY_MAGIC_OFFSET)? != TOY_FRAME_MAGIC {
            return Err(FrameError::MissingTerminator);
        }

        let mut new = ToyRegs::new();
        for i in 1..32 {
            new.r[i] = r.u64(TOY_REGS_OFFSET + 8 * i)?;
        }
        new.pc = r.u64(TOY_PC_OFFSET)?;
        let mut stack = [0u8; StackT::GUEST_SIZE];
        stack.copy_from_slice(r.bytes(TOY_STACK_OFFSET, StackT::GUEST_SIZE)?);

        Ok(RestoredFrame {
            regs: new,
            blocked: r.u64(TOY_MASK_OFFSET)?,
            alt_stack: StackT::from_guest_bytes(&stack),
        })
    }

    fn decode_atomic(&self, trap: &TrapEvent, regs: &ToyRegs) -> Option<AtomicOp> {
        let insn = trap.aux;
        if insn >> 24 != TOY_OP_AMOADD {
            return None;
        }
        let base = ((insn >> 16) & 0x1f) as usize;
        let src = ((insn >> 8) & 0x1f) as usize;
        let dest = (insn & 0x1f) as usize;
        Some(AtomicOp {
            addr: regs.gpr(base),
            width: 4,
            kind: AtomicKind::Add,
            operand: regs.gpr(src),
            dest: if dest == 0 { None } else { Some(dest) },
            len: 4,
        })
    }
}

pub fn toy_syscall() -> TrapEvent {
    TrapEvent::new(TOY_TRAP_SYSCALL)
}

pub fn toy_amoadd(base: usize, src: usize, dest: usize) -> TrapEvent {
    TrapEvent {
        code: TOY_TRAP_ATOMIC,
        fault_address: None,
        aux: (TOY_OP_AMOADD << 24) | ((base as u64) << 16) | ((src as u64) << 8) | dest as u64,
    }
}
