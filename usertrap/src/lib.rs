//! Guest trap dispatch and signal ABI runtime.
//!
//! This crate sits between an instruction-level execution engine and the
//! host operating system. Every trap the engine raises for a guest thread
//! (system call, fault, breakpoint, atomic instruction, interrupt) is
//! classified by an [`ArchitectureProfile`](arch_impl::traits::ArchitectureProfile)
//! and routed to:
//! - the syscall bridge (`syscall`), which marshals requests to the host
//!   and implements restart/sigreturn semantics
//! - the signal deliverer (`signal`), which builds and validates ABI-exact
//!   signal frames in guest memory
//! - the atomic emulator (`atomic`), which serialises software-emulated
//!   read-modify-write instructions across guest threads
//!
//! Pending signals are delivered only at trap boundaries, from
//! `dispatch::TrapDispatcher`.

pub mod arch_impl;
pub mod atomic;
pub mod dispatch;
pub mod logger;
pub mod memory;
pub mod runtime;
pub mod signal;
pub mod syscall;

pub use arch_impl::aarch64::{Aarch64Profile, Aarch64Regs, CpuFeatures};
pub use arch_impl::traits::{ArchitectureProfile, RegisterFile, TrapClass};
pub use dispatch::{Action, ExecutionEngine, ThreadExit, TrapDispatcher, TrapEvent};
pub use memory::{Access, FlatGuestMemory, GuestMemory, MemFault};
pub use runtime::{GuestThread, SharedRuntime};
pub use signal::types::{PendingSignal, SignalAction};
pub use syscall::{HostSyscalls, SyscallRequest, SyscallResult};
