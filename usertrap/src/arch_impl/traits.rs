//! Architecture-agnostic traits for guest ISA profiles.
//!
//! These traits define the interface between ISA-specific code and the
//! generic trap-handling engine. Each supported guest ISA implements
//! [`ArchitectureProfile`] once; the engine never branches on the ISA.

use core::fmt::Debug;

use crate::atomic::AtomicOp;
use crate::dispatch::TrapEvent;
use crate::memory::GuestMemory;
use crate::signal::frame::FrameError;
use crate::signal::types::{PendingSignal, StackT};

/// One guest thread's CPU context.
pub trait RegisterFile: Clone + Debug + Send {
    /// Returns the program counter.
    fn pc(&self) -> u64;

    /// Sets the program counter.
    fn set_pc(&mut self, pc: u64);

    /// Returns the stack pointer.
    fn sp(&self) -> u64;

    /// Sets the stack pointer.
    fn set_sp(&mut self, sp: u64);

    /// Reads general-purpose register `index`.
    ///
    /// Indices that name a hard-wired zero register read as 0.
    fn gpr(&self, index: usize) -> u64;

    /// Writes general-purpose register `index`.
    ///
    /// Writes to a hard-wired zero register are discarded.
    fn set_gpr(&mut self, index: usize, value: u64);

    /// Multi-line dump of every register, for fatal-trap reports.
    fn dump(&self) -> String;
}

/// Profile-level classification of a trap code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapClass {
    /// Asynchronous exit from the engine; nothing to do
    Interrupt,
    /// Supervisor call
    Syscall,
    /// Synchronous fault, already mapped to a guest signal
    Fault(PendingSignal),
    /// Breakpoint or debug exception, mapped to SIGTRAP
    Breakpoint(PendingSignal),
    /// Read-modify-write instruction the engine wants emulated
    Atomic,
    /// No defined mapping; never continue
    Unknown,
}

/// How the kernel reports syscall failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorConvention {
    /// `-errno` in the return register
    NegatedReturn,
    /// Positive errno in the return register, 1 in `reg` (0 on success)
    FlagRegister { reg: usize },
}

/// Arguments beyond the register set, read from the caller's stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackSpill {
    /// Offset of the first spilled argument from SP
    pub sp_offset: u64,
    /// Number of spilled arguments
    pub count: usize,
    /// Size of one stack slot (4 or 8)
    pub word_size: usize,
}

/// Syscall numbers the runtime services itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SignalSyscalls {
    pub rt_sigreturn: Option<u64>,
    pub sigaltstack: Option<u64>,
    pub rt_sigaction: Option<u64>,
    pub rt_sigprocmask: Option<u64>,
    pub rt_sigpending: Option<u64>,
}

/// Syscall calling convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyscallAbi {
    /// Register holding the syscall number
    pub number_reg: usize,
    /// Registers holding the leading arguments, in order
    pub arg_regs: &'static [usize],
    pub stack_args: Option<StackSpill>,
    pub return_reg: usize,
    pub errors: ErrorConvention,
    /// Bytes the PC is rewound by to re-execute the syscall instruction
    pub instruction_length: u64,
    /// Lowest valid syscall number
    pub nr_base: u64,
    /// Number of valid syscall numbers starting at `nr_base`
    pub nr_count: u64,
    pub signal_calls: SignalSyscalls,
}

impl SyscallAbi {
    /// True if `nr` lies in the declared numeric range
    #[inline]
    pub fn in_range(&self, nr: u64) -> bool {
        nr >= self.nr_base && nr - self.nr_base < self.nr_count
    }
}

/// How a handler address is turned into an entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerCall {
    /// The handler value is the entry PC
    Direct,
    /// The handler value points at `{entry, global pointer}` words
    FunctionDescriptor { word_size: usize },
}

/// Signal-frame placement rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalAbi {
    /// Bytes below SP the frame must not touch
    pub red_zone: u64,
    /// Required alignment of the frame base
    pub frame_align: u64,
    pub handler_call: HandlerCall,
    /// Smallest alternate stack sigaltstack accepts
    pub min_sigstksz: u64,
}

/// Computed placement of a frame for one delivery.
pub trait FrameLayout: Debug {
    /// Total bytes reserved below the stack top, before alignment
    fn size(&self) -> u64;
}

/// Everything a profile needs to serialise one signal frame.
pub struct FrameContext<'a, R> {
    pub regs: &'a R,
    pub signal: &'a PendingSignal,
    /// Guest address of the frame base
    pub frame_addr: u64,
    /// Blocked mask to restore on sigreturn
    pub saved_mask: u64,
    /// Alternate-stack state as seen from the interrupted SP
    pub alt_stack: StackT,
    /// Where the handler returns to
    pub return_addr: u64,
    /// Handler asked for siginfo/ucontext (SA_SIGINFO)
    pub siginfo: bool,
}

/// Register redirection for handler entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerEntry {
    pub handler_pc: u64,
    /// Resolved from a function descriptor, if the ABI uses them
    pub global_pointer: Option<u64>,
    pub return_addr: u64,
    pub frame_addr: u64,
    pub signo: u32,
    pub siginfo: bool,
}

/// State recovered from a validated sigreturn frame.
#[derive(Debug, Clone)]
pub struct RestoredFrame<R> {
    /// Complete replacement register file
    pub regs: R,
    /// Saved blocked mask (uncatchable bits are stripped by the caller)
    pub blocked: u64,
    /// Saved alternate-stack description
    pub alt_stack: StackT,
}

/// Immutable per-ISA configuration and frame codec.
///
/// Implementations are shared by every guest thread of a process.
pub trait ArchitectureProfile: Send + Sync {
    type Regs: RegisterFile;
    type Layout: FrameLayout;

    /// Short ISA name for logs
    fn name(&self) -> &'static str;

    /// Map a trap to its class; fault classes carry the synthesised signal.
    fn classify(&self, trap: &TrapEvent, regs: &Self::Regs) -> TrapClass;

    fn syscall_abi(&self) -> &SyscallAbi;

    fn signal_abi(&self) -> &SignalAbi;

    /// Machine code of the sigreturn trampoline
    fn trampoline(&self) -> &'static [u8];

    /// Frame size and record placement for the current CPU state
    fn frame_layout(&self, regs: &Self::Regs, signal: &PendingSignal) -> Self::Layout;

    /// Serialise a frame into `buf`, which is exactly `layout.size()` bytes
    /// and will be written at `ctx.frame_addr`.
    fn write_frame(
        &self,
        buf: &mut [u8],
        layout: &Self::Layout,
        ctx: &FrameContext<'_, Self::Regs>,
    ) -> Result<(), FrameError>;

    /// Redirect `regs` into the handler.
    fn enter_handler(&self, regs: &mut Self::Regs, entry: &HandlerEntry, layout: &Self::Layout);

    /// Frame base for an rt_sigreturn issued with `regs`
    fn sigreturn_frame(&self, regs: &Self::Regs) -> u64;

    /// Read and validate the frame at `sigreturn_frame(regs)`.
    ///
    /// Must not modify anything; the caller applies the result as a whole.
    fn restore_frame(
        &self,
        regs: &Self::Regs,
        memory: &dyn GuestMemory,
    ) -> Result<RestoredFrame<Self::Regs>, FrameError>;

    /// Decode the instruction behind an atomic trap
    fn decode_atomic(&self, trap: &TrapEvent, regs: &Self::Regs) -> Option<AtomicOp>;
}
