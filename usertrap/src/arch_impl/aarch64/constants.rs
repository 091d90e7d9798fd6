//! ARM64 guest constants.
//!
//! This module centralizes the AArch64 Linux user ABI numbers used by the
//! profile: engine trap codes, syscall numbers, signal frame offsets and
//! extension record magics.

// ============================================================================
// Engine Trap Codes
// ============================================================================

/// Undefined instruction.
pub const EXCP_UDEF: u32 = 1;
/// Supervisor call (svc).
pub const EXCP_SWI: u32 = 2;
/// Instruction abort; aux carries ESR.
pub const EXCP_PREFETCH_ABORT: u32 = 3;
/// Data abort; aux carries ESR.
pub const EXCP_DATA_ABORT: u32 = 4;
/// BKPT / BRK instruction.
pub const EXCP_BKPT: u32 = 7;
/// Engine left the translated-code loop (timer, exit request).
pub const EXCP_INTERRUPT: u32 = 0x10000;
/// Debug exception (single step, watchpoint).
pub const EXCP_DEBUG: u32 = 0x10002;
/// Cooperative yield.
pub const EXCP_YIELD: u32 = 0x10004;
/// Atomic instruction needing emulation; aux carries the instruction word.
pub const EXCP_ATOMIC: u32 = 0x10005;

// ============================================================================
// Syscall ABI
// ============================================================================

/// Register holding the syscall number.
pub const SYSCALL_NR_REG: usize = 8;
/// Argument registers x0..x5.
pub const SYSCALL_ARG_REGS: [usize; 6] = [0, 1, 2, 3, 4, 5];
/// Return register.
pub const SYSCALL_RET_REG: usize = 0;
/// asm-generic `__NR_syscalls`.
pub const NR_SYSCALLS: u64 = 463;

pub const NR_SIGALTSTACK: u64 = 132;
pub const NR_RT_SIGACTION: u64 = 134;
pub const NR_RT_SIGPROCMASK: u64 = 135;
pub const NR_RT_SIGPENDING: u64 = 136;
pub const NR_RT_SIGRETURN: u64 = 139;
pub const NR_EXIT: u64 = 93;

/// Every A64 instruction is 4 bytes.
pub const INSN_LEN: u64 = 4;

/// Smallest alternate stack sigaltstack accepts.
pub const MINSIGSTKSZ: u64 = 5120;

// ============================================================================
// Signal Trampoline
// ============================================================================

/// `mov x8, #139; svc #0; brk #1`
///
/// Instruction encoding (little-endian):
/// - mov x8, #139:  0xD2801168 -> 68 11 80 D2
/// - svc #0:        0xD4000001 -> 01 00 00 D4
/// - brk #1:        0xD4200020 -> 20 00 20 D4
pub static SIGNAL_TRAMPOLINE: [u8; 12] = [
    0x68, 0x11, 0x80, 0xD2, // mov x8, #139 (rt_sigreturn)
    0x01, 0x00, 0x00, 0xD4, // svc #0
    0x20, 0x00, 0x20, 0xD4, // brk #1 (never reached)
];

// ============================================================================
// rt_sigframe Layout
// ============================================================================

pub const SIGINFO_OFFSET: usize = 0;
pub const UCONTEXT_OFFSET: usize = 128;
pub const UC_FLAGS_OFFSET: usize = 128;
pub const UC_LINK_OFFSET: usize = 136;
pub const UC_STACK_OFFSET: usize = 144;
pub const UC_SIGMASK_OFFSET: usize = 168;
pub const SC_FAULT_ADDRESS_OFFSET: usize = 304;
pub const SC_REGS_OFFSET: usize = 312;
pub const SC_SP_OFFSET: usize = 560;
pub const SC_PC_OFFSET: usize = 568;
pub const SC_PSTATE_OFFSET: usize = 576;
/// Start of `__reserved`, where extension records live.
pub const SC_RESERVED_OFFSET: usize = 592;
pub const SC_RESERVED_SIZE: usize = 4096;
/// Size of `struct rt_sigframe`.
pub const SIGFRAME_SIZE: usize = SC_RESERVED_OFFSET + SC_RESERVED_SIZE;
/// `{fp, lr}` frame record placed after the rt_sigframe.
pub const FRAME_RECORD_SIZE: usize = 16;

/// Records and the extra area are 16-byte aligned.
pub const RECORD_ALIGN: usize = 16;
/// Size of a terminator slot.
pub const TERMINATOR_SIZE: usize = 16;
/// Largest frame a restore accepts, extra area included.
pub const SIGFRAME_MAXSZ: usize = 256 * 1024;

// ============================================================================
// Extension Records
// ============================================================================

pub const FPSIMD_MAGIC: u32 = 0x4650_8001;
pub const FPSIMD_SIZE: usize = 528;
pub const ESR_MAGIC: u32 = 0x4553_5201;
pub const ESR_SIZE: usize = 16;
pub const SVE_MAGIC: u32 = 0x5356_4501;
pub const TPIDR2_MAGIC: u32 = 0x5450_4902;
pub const TPIDR2_SIZE: usize = 16;
pub const ZA_MAGIC: u32 = 0x5436_6345;
pub const EXTRA_MAGIC: u32 = 0x4558_5401;
pub const EXTRA_SIZE: usize = 32;

/// Every record magic a restore accepts.
pub const KNOWN_RECORDS: [u32; 6] = [
    FPSIMD_MAGIC,
    ESR_MAGIC,
    SVE_MAGIC,
    TPIDR2_MAGIC,
    ZA_MAGIC,
    EXTRA_MAGIC,
];

/// `sve_context.flags`: the payload was saved in streaming mode.
pub const SVE_SIG_FLAG_SM: u16 = 1;

/// Bytes per vector quantum.
pub const VQ_BYTES: usize = 16;

// ============================================================================
// PSTATE
// ============================================================================

pub const PSTATE_N: u64 = 1 << 31;
pub const PSTATE_Z: u64 = 1 << 30;
pub const PSTATE_C: u64 = 1 << 29;
pub const PSTATE_V: u64 = 1 << 28;
pub const PSTATE_BTYPE_SHIFT: u32 = 10;
pub const PSTATE_BTYPE_MASK: u64 = 3 << PSTATE_BTYPE_SHIFT;

/// SVCR.SM: streaming SVE mode.
pub const SVCR_SM: u64 = 1 << 0;
/// SVCR.ZA: ZA storage live.
pub const SVCR_ZA: u64 = 1 << 1;
