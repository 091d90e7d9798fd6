//! System call marshaling
//!
//! A guest `svc` arrives at the dispatcher as a syscall trap. The bridge
//! extracts the request from the guest registers (and stack, for ABIs that
//! spill arguments), services the signal-state calls itself and hands
//! everything else to the embedding's [`HostSyscalls`] implementation.

pub mod bridge;
pub mod errno;
pub mod signal;

pub use bridge::SyscallBridge;

/// Maximum number of syscall arguments any profile passes
pub const MAX_SYSCALL_ARGS: usize = 8;

/// A decoded guest system call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyscallRequest {
    pub number: u64,
    /// Unused trailing slots are zero
    pub args: [u64; MAX_SYSCALL_ARGS],
}

impl SyscallRequest {
    pub fn new(number: u64) -> Self {
        SyscallRequest {
            number,
            args: [0; MAX_SYSCALL_ARGS],
        }
    }

    #[inline]
    pub fn arg(&self, index: usize) -> u64 {
        self.args.get(index).copied().unwrap_or(0)
    }
}

/// System call result type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallResult {
    Ok(u64),
    /// Positive errno
    Err(u64),
    /// Interrupted before doing anything; re-execute the instruction
    Restart,
    /// rt_sigreturn already replaced the register file
    SigreturnCompleted,
    /// The calling thread ends with this status
    Exit(i32),
}

/// Host side of the syscall boundary
///
/// Implementations perform the actual operation for every syscall the
/// runtime does not service itself.
pub trait HostSyscalls {
    fn invoke(&mut self, request: &SyscallRequest) -> SyscallResult;
}

impl<F> HostSyscalls for F
where
    F: FnMut(&SyscallRequest) -> SyscallResult,
{
    fn invoke(&mut self, request: &SyscallRequest) -> SyscallResult {
        self(request)
    }
}
