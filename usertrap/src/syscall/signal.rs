//! Signal-related system calls
//!
//! These calls manipulate emulated signal state, so the bridge services
//! them instead of forwarding them to the host:
//! - rt_sigaction(sig, act, oldact, sigsetsize) - Set signal handler
//! - rt_sigprocmask(how, set, oldset, sigsetsize) - Block/unblock signals
//! - rt_sigpending(set, sigsetsize) - Query blocked pending signals
//! - sigaltstack(ss, old_ss) - Configure the alternate signal stack
//!
//! rt_sigreturn lives with the frame code in `signal::delivery`.

use super::errno::EINVAL;
use super::SyscallResult;
use crate::memory::userptr::{copy_from_guest, copy_to_guest, read_u64, write_u64};
use crate::memory::GuestMemory;
use crate::runtime::SharedRuntime;
use crate::signal::constants::*;
use crate::signal::queue::SignalQueue;
use crate::signal::types::{SignalAction, StackT};

/// rt_sigaction(sig, act, oldact, sigsetsize) - Set signal handler
///
/// # Arguments
/// * `sig` - Signal number (1-64, cannot be SIGKILL or SIGSTOP)
/// * `new_act` - Guest pointer to new sigaction, or 0 to query current
/// * `old_act` - Guest pointer to store old sigaction, or 0 to not store
/// * `sigsetsize` - Size of signal set (must be 8)
///
/// # Returns
/// * 0 on success
/// * -EINVAL (22) for invalid arguments
/// * -EFAULT (14) for bad pointers
pub fn sys_sigaction(
    runtime: &SharedRuntime,
    memory: &dyn GuestMemory,
    signals: &mut SignalQueue,
    sig: u64,
    new_act: u64,
    old_act: u64,
    sigsetsize: u64,
) -> SyscallResult {
    let sig = sig as u32;

    // Validate signal number
    if !is_valid_signal(sig) {
        log::warn!("sys_sigaction: invalid signal number {}", sig);
        return SyscallResult::Err(EINVAL);
    }

    // sigsetsize must be 8 (size of u64 bitmask)
    if sigsetsize != 8 {
        log::warn!(
            "sys_sigaction: invalid sigsetsize {} (expected 8)",
            sigsetsize
        );
        return SyscallResult::Err(EINVAL);
    }

    let new_action = if new_act != 0 {
        // Cannot change handler for SIGKILL or SIGSTOP
        if !is_catchable(sig) {
            log::warn!(
                "sys_sigaction: cannot set handler for {} (uncatchable)",
                signal_name(sig)
            );
            return SyscallResult::Err(EINVAL);
        }
        match copy_from_guest::<{ SignalAction::GUEST_SIZE }>(memory, new_act) {
            Ok(bytes) => Some(SignalAction::from_guest_bytes(&bytes)),
            Err(errno) => return SyscallResult::Err(errno),
        }
    } else {
        None
    };

    let old_action = match new_action {
        Some(action) => {
            // Sanitize the mask - cannot block SIGKILL or SIGSTOP
            let sanitized = SignalAction {
                mask: action.mask & !UNCATCHABLE_SIGNALS,
                ..action
            };
            let old = runtime.set_action(sig, sanitized);
            if sanitized.is_ignore() {
                signals.discard(sig);
            }
            log::debug!(
                "Signal {} ({}) handler set to {:#x} flags={:#x}",
                sig,
                signal_name(sig),
                sanitized.handler,
                sanitized.flags
            );
            old
        }
        None => runtime.action(sig),
    };

    if old_act != 0 {
        if let Err(errno) = copy_to_guest(memory, old_act, &old_action.to_guest_bytes()) {
            return SyscallResult::Err(errno);
        }
    }

    SyscallResult::Ok(0)
}

/// rt_sigprocmask(how, set, oldset, sigsetsize) - Block/unblock signals
///
/// # Arguments
/// * `how` - SIG_BLOCK (0), SIG_UNBLOCK (1), or SIG_SETMASK (2)
/// * `new_set` - Guest pointer to u64 signal mask, or 0 to not change
/// * `old_set` - Guest pointer to store old mask, or 0 to not store
/// * `sigsetsize` - Size of signal set (must be 8)
pub fn sys_sigprocmask(
    memory: &dyn GuestMemory,
    signals: &mut SignalQueue,
    how: u64,
    new_set: u64,
    old_set: u64,
    sigsetsize: u64,
) -> SyscallResult {
    // sigsetsize must be 8
    if sigsetsize != 8 {
        log::warn!(
            "sys_sigprocmask: invalid sigsetsize {} (expected 8)",
            sigsetsize
        );
        return SyscallResult::Err(EINVAL);
    }

    let how = how as i32;
    let old_mask = signals.blocked();

    if new_set != 0 {
        let set = match read_u64(memory, new_set) {
            Ok(mask) => mask,
            Err(errno) => return SyscallResult::Err(errno),
        };

        match how {
            SIG_BLOCK => {
                signals.block(set);
                log::debug!("Blocked signals: {:#x}", set);
            }
            SIG_UNBLOCK => {
                signals.unblock(set);
                log::debug!("Unblocked signals: {:#x}", set);
            }
            SIG_SETMASK => {
                signals.set_blocked(set);
                log::debug!("Set signal mask to: {:#x}", set);
            }
            _ => {
                log::warn!("sys_sigprocmask: invalid 'how' value {}", how);
                return SyscallResult::Err(EINVAL);
            }
        }
    }

    if old_set != 0 {
        if let Err(errno) = write_u64(memory, old_set, old_mask) {
            return SyscallResult::Err(errno);
        }
    }

    SyscallResult::Ok(0)
}

/// rt_sigpending(set, sigsetsize) - Pending signals that are blocked
pub fn sys_sigpending(
    memory: &dyn GuestMemory,
    signals: &SignalQueue,
    set: u64,
    sigsetsize: u64,
) -> SyscallResult {
    if sigsetsize > 8 {
        return SyscallResult::Err(EINVAL);
    }
    let pending = signals.blocked_pending().to_le_bytes();
    match copy_to_guest(memory, set, &pending[..sigsetsize as usize]) {
        Ok(()) => SyscallResult::Ok(0),
        Err(errno) => SyscallResult::Err(errno),
    }
}

/// sigaltstack(ss, old_ss) - Configure the alternate signal stack
///
/// # Arguments
/// * `ss` - Guest pointer to the new stack_t, or 0 to query
/// * `old_ss` - Guest pointer to store the current stack_t, or 0
/// * `sp` - Caller's stack pointer, to detect running on the alt stack
/// * `min_size` - The profile's MINSIGSTKSZ
///
/// # Returns
/// * -EPERM (1) when changing the stack while running on it
/// * -ENOMEM (12) for a stack below `min_size`
pub fn sys_sigaltstack(
    memory: &dyn GuestMemory,
    signals: &mut SignalQueue,
    ss: u64,
    old_ss: u64,
    sp: u64,
    min_size: u64,
) -> SyscallResult {
    let old = signals.alt_stack.to_stack_t(sp);

    if ss != 0 {
        let new = match copy_from_guest::<{ StackT::GUEST_SIZE }>(memory, ss) {
            Ok(bytes) => StackT::from_guest_bytes(&bytes),
            Err(errno) => return SyscallResult::Err(errno),
        };
        if let Err(errno) = signals.alt_stack.reconfigure(&new, sp, min_size) {
            log::debug!("sys_sigaltstack: rejected {:?} (errno {})", new, errno);
            return SyscallResult::Err(errno);
        }
    }

    if old_ss != 0 {
        if let Err(errno) = copy_to_guest(memory, old_ss, &old.to_guest_bytes()) {
            return SyscallResult::Err(errno);
        }
    }

    SyscallResult::Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{FlatGuestMemory, PROT_READ, PROT_WRITE};
    use crate::signal::types::PendingSignal;
    use crate::syscall::errno::{EFAULT, ENOMEM, EPERM};

    const BUF: u64 = 0x10_0000;
    const OLD: u64 = BUF + 0x100;
    const USR1: u64 = SIGUSR1 as u64;
    const OK: SyscallResult = SyscallResult::Ok(0);

    fn memory() -> FlatGuestMemory {
        let mem = FlatGuestMemory::new();
        mem.map(BUF, 0x1000, PROT_READ | PROT_WRITE).unwrap();
        mem
    }

    #[test]
    fn test_sigaction_set_and_query() {
        let mem = memory();
        let rt = SharedRuntime::new(1);
        let mut q = SignalQueue::new();
        let act = SignalAction {
            handler: 0x40_1000,
            mask: u64::MAX,
            flags: SA_SIGINFO | SA_RESTORER,
            restorer: 0x40_2000,
        };
        mem.write(BUF, &act.to_guest_bytes()).unwrap();
        assert_eq!(sys_sigaction(&rt, &mem, &mut q, USR1, BUF, 0, 8), OK);
        assert_eq!(rt.action(SIGUSR1).mask, !UNCATCHABLE_SIGNALS);

        assert_eq!(sys_sigaction(&rt, &mem, &mut q, USR1, 0, OLD, 8), OK);
        let mut out = [0u8; SignalAction::GUEST_SIZE];
        mem.read(OLD, &mut out).unwrap();
        assert_eq!(SignalAction::from_guest_bytes(&out).handler, 0x40_1000);
    }

    #[test]
    fn test_sigaction_rejects_bad_arguments() {
        let mem = memory();
        let rt = SharedRuntime::new(1);
        let mut q = SignalQueue::new();
        let kill = SIGKILL as u64;
        let inval = SyscallResult::Err(EINVAL);
        assert_eq!(sys_sigaction(&rt, &mem, &mut q, 0, 0, 0, 8), inval);
        assert_eq!(sys_sigaction(&rt, &mem, &mut q, 65, 0, 0, 8), inval);
        assert_eq!(sys_sigaction(&rt, &mem, &mut q, kill, BUF, 0, 8), inval);
        assert_eq!(sys_sigaction(&rt, &mem, &mut q, USR1, 0, 0, 4), inval);
        assert_eq!(
            sys_sigaction(&rt, &mem, &mut q, USR1, 0x10, 0, 8),
            SyscallResult::Err(EFAULT)
        );
    }

    #[test]
    fn test_sigaction_ignore_discards_pending() {
        let mem = memory();
        let rt = SharedRuntime::new(1);
        let mut q = SignalQueue::new();
        q.block(sig_mask(SIGUSR2));
        q.raise(PendingSignal::kernel(SIGUSR2)).unwrap();
        let ign = SignalAction {
            handler: SIG_IGN,
            ..SignalAction::default()
        };
        mem.write(BUF, &ign.to_guest_bytes()).unwrap();
        sys_sigaction(&rt, &mem, &mut q, SIGUSR2 as u64, BUF, 0, 8);
        assert_eq!(q.pending_set(), 0);
    }

    #[test]
    fn test_sigprocmask_returns_old_mask() {
        let mem = memory();
        let mut q = SignalQueue::new();
        let (block, unblock) = (SIG_BLOCK as u64, SIG_UNBLOCK as u64);
        write_u64(&mem, BUF, sig_mask(SIGINT) | sig_mask(SIGKILL)).unwrap();
        assert_eq!(sys_sigprocmask(&mem, &mut q, block, BUF, OLD, 8), OK);
        assert_eq!(q.blocked(), sig_mask(SIGINT));
        assert_eq!(read_u64(&mem, OLD), Ok(0));

        write_u64(&mem, BUF, sig_mask(SIGINT)).unwrap();
        sys_sigprocmask(&mem, &mut q, unblock, BUF, OLD, 8);
        assert_eq!(q.blocked(), 0);
        assert_eq!(read_u64(&mem, OLD), Ok(sig_mask(SIGINT)));

        let inval = SyscallResult::Err(EINVAL);
        assert_eq!(sys_sigprocmask(&mem, &mut q, 7, BUF, 0, 8), inval);
        // 'how' is not looked at without a new set
        assert_eq!(sys_sigprocmask(&mem, &mut q, 7, 0, OLD, 8), OK);
    }

    #[test]
    fn test_sigpending_reports_blocked_only() {
        let mem = memory();
        let mut q = SignalQueue::new();
        q.block(sig_mask(SIGUSR1));
        q.raise(PendingSignal::kernel(SIGUSR1)).unwrap();
        q.raise(PendingSignal::kernel(SIGUSR2)).unwrap();
        assert_eq!(sys_sigpending(&mem, &q, BUF, 8), OK);
        assert_eq!(read_u64(&mem, BUF), Ok(sig_mask(SIGUSR1)));
    }

    #[test]
    fn test_sigaltstack_lifecycle() {
        const MIN: u64 = 5120;
        let mem = memory();
        let mut q = SignalQueue::new();
        let ss = StackT {
            ss_sp: 0x20_0000,
            ss_flags: 0,
            ss_size: 0x4000,
        };
        let (off_stack, on_stack) = (0x9000, 0x20_1000);
        mem.write(BUF, &ss.to_guest_bytes()).unwrap();
        assert_eq!(sys_sigaltstack(&mem, &mut q, BUF, OLD, off_stack, MIN), OK);

        let mut old = [0u8; StackT::GUEST_SIZE];
        mem.read(OLD, &mut old).unwrap();
        assert_eq!(StackT::from_guest_bytes(&old).ss_flags, SS_DISABLE);

        // Running on it: query reports SS_ONSTACK, change refused
        assert_eq!(sys_sigaltstack(&mem, &mut q, 0, OLD, on_stack, MIN), OK);
        mem.read(OLD, &mut old).unwrap();
        assert_eq!(StackT::from_guest_bytes(&old).ss_flags, SS_ONSTACK);
        assert_eq!(
            sys_sigaltstack(&mem, &mut q, BUF, 0, on_stack, MIN),
            SyscallResult::Err(EPERM)
        );

        let tiny = StackT { ss_size: 64, ..ss };
        mem.write(BUF, &tiny.to_guest_bytes()).unwrap();
        assert_eq!(
            sys_sigaltstack(&mem, &mut q, BUF, 0, off_stack, MIN),
            SyscallResult::Err(ENOMEM)
        );
    }
}
