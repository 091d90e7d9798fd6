//! AArch64 Linux guest profile.
//!
//! Trap numbering follows the execution engine's exception codes; the
//! syscall ABI, signal frame and record formats are those of the Linux
//! arm64 user ABI, including SVE, SME and BTI state.

pub mod atomic;
pub mod constants;
pub mod context;
pub mod exception;
pub mod signal_frame;

pub use context::Aarch64Regs;
pub use signal_frame::Aarch64FrameLayout;

use self::constants::*;
use crate::arch_impl::traits::{
    ArchitectureProfile, ErrorConvention, FrameContext, HandlerCall, HandlerEntry, RestoredFrame,
    SignalAbi, SignalSyscalls, SyscallAbi, TrapClass,
};
use crate::atomic::AtomicOp;
use crate::dispatch::TrapEvent;
use crate::memory::GuestMemory;
use crate::signal::frame::FrameError;
use crate::signal::types::PendingSignal;

/// Optional CPU features that change the signal frame.
///
/// Vector lengths are in bytes: a multiple of 16 between 16 and 256.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CpuFeatures {
    /// SVE vector length, if SVE is implemented
    pub sve_vl: Option<u16>,
    /// SME streaming vector length, if SME is implemented
    pub sme_vl: Option<u16>,
    /// Branch target identification
    pub bti: bool,
}

impl CpuFeatures {
    /// Vector length outside streaming mode
    pub fn normal_vl(&self) -> usize {
        self.sve_vl.map(usize::from).unwrap_or(VQ_BYTES)
    }

    fn sanitize_vl(name: &str, vl: Option<u16>) -> Option<u16> {
        let vl = vl?;
        let fixed = (vl / 16 * 16).clamp(16, 256);
        if fixed != vl {
            log::warn!(
                "aarch64: {} vector length {} not supported, using {}",
                name,
                vl,
                fixed
            );
        }
        Some(fixed)
    }
}

/// AArch64 Linux profile
pub struct Aarch64Profile {
    features: CpuFeatures,
    syscall_abi: SyscallAbi,
    signal_abi: SignalAbi,
}

impl Aarch64Profile {
    pub fn new(features: CpuFeatures) -> Self {
        let features = CpuFeatures {
            sve_vl: CpuFeatures::sanitize_vl("SVE", features.sve_vl),
            sme_vl: CpuFeatures::sanitize_vl("SME", features.sme_vl),
            bti: features.bti,
        };
        Aarch64Profile {
            features,
            syscall_abi: SyscallAbi {
                number_reg: SYSCALL_NR_REG,
                arg_regs: &SYSCALL_ARG_REGS,
                stack_args: None,
                return_reg: SYSCALL_RET_REG,
                errors: ErrorConvention::NegatedReturn,
                instruction_length: INSN_LEN,
                nr_base: 0,
                nr_count: NR_SYSCALLS,
                signal_calls: SignalSyscalls {
                    rt_sigreturn: Some(NR_RT_SIGRETURN),
                    sigaltstack: Some(NR_SIGALTSTACK),
                    rt_sigaction: Some(NR_RT_SIGACTION),
                    rt_sigprocmask: Some(NR_RT_SIGPROCMASK),
                    rt_sigpending: Some(NR_RT_SIGPENDING),
                },
            },
            signal_abi: SignalAbi {
                red_zone: 0,
                frame_align: 16,
                handler_call: HandlerCall::Direct,
                min_sigstksz: MINSIGSTKSZ,
            },
        }
    }

    pub fn features(&self) -> &CpuFeatures {
        &self.features
    }

    /// Zeroed register file with vector storage matching the features
    pub fn new_regs(&self) -> Aarch64Regs {
        Aarch64Regs::new(
            self.features.normal_vl(),
            self.features.sme_vl.map(usize::from).unwrap_or(0),
        )
    }
}

impl ArchitectureProfile for Aarch64Profile {
    type Regs = Aarch64Regs;
    type Layout = Aarch64FrameLayout;

    fn name(&self) -> &'static str {
        "aarch64"
    }

    fn classify(&self, trap: &TrapEvent, regs: &Aarch64Regs) -> TrapClass {
        exception::classify(trap, regs)
    }

    fn syscall_abi(&self) -> &SyscallAbi {
        &self.syscall_abi
    }

    fn signal_abi(&self) -> &SignalAbi {
        &self.signal_abi
    }

    fn trampoline(&self) -> &'static [u8] {
        &SIGNAL_TRAMPOLINE
    }

    fn frame_layout(&self, regs: &Aarch64Regs, signal: &PendingSignal) -> Aarch64FrameLayout {
        signal_frame::layout(regs, signal, &self.features)
    }

    fn write_frame(
        &self,
        buf: &mut [u8],
        layout: &Aarch64FrameLayout,
        ctx: &FrameContext<'_, Aarch64Regs>,
    ) -> Result<(), FrameError> {
        signal_frame::write(buf, layout, ctx, &self.features)
    }

    fn enter_handler(
        &self,
        regs: &mut Aarch64Regs,
        entry: &HandlerEntry,
        layout: &Aarch64FrameLayout,
    ) {
        signal_frame::enter_handler(regs, entry, layout, &self.features)
    }

    fn sigreturn_frame(&self, regs: &Aarch64Regs) -> u64 {
        regs.sp
    }

    fn restore_frame(
        &self,
        regs: &Aarch64Regs,
        memory: &dyn GuestMemory,
    ) -> Result<RestoredFrame<Aarch64Regs>, FrameError> {
        signal_frame::restore(regs, memory, &self.features)
    }

    fn decode_atomic(&self, trap: &TrapEvent, regs: &Aarch64Regs) -> Option<AtomicOp> {
        atomic::decode(trap.aux as u32, regs)
    }
}
