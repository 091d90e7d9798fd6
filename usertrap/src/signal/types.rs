//! Signal-related data structures

use super::constants::*;

/// Alternate signal stack as the guest sees it (Linux stack_t)
///
/// Guest layout (LP64): `ss_sp` at 0, `ss_flags` at 8, `ss_size` at 16.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackT {
    /// Base address of the alternate stack
    pub ss_sp: u64,
    /// Flags (SS_ONSTACK, SS_DISABLE)
    pub ss_flags: u32,
    /// Size of the alternate stack in bytes
    pub ss_size: u64,
}

impl Default for StackT {
    fn default() -> Self {
        StackT {
            ss_sp: 0,
            ss_flags: SS_DISABLE,
            ss_size: 0,
        }
    }
}

impl StackT {
    pub const GUEST_SIZE: usize = 24;

    pub fn to_guest_bytes(&self) -> [u8; Self::GUEST_SIZE] {
        let mut out = [0u8; Self::GUEST_SIZE];
        out[0..8].copy_from_slice(&self.ss_sp.to_le_bytes());
        out[8..12].copy_from_slice(&self.ss_flags.to_le_bytes());
        out[16..24].copy_from_slice(&self.ss_size.to_le_bytes());
        out
    }

    pub fn from_guest_bytes(bytes: &[u8; Self::GUEST_SIZE]) -> Self {
        let mut sp = [0u8; 8];
        let mut flags = [0u8; 4];
        let mut size = [0u8; 8];
        sp.copy_from_slice(&bytes[0..8]);
        flags.copy_from_slice(&bytes[8..12]);
        size.copy_from_slice(&bytes[16..24]);
        StackT {
            ss_sp: u64::from_le_bytes(sp),
            ss_flags: u32::from_le_bytes(flags),
            ss_size: u64::from_le_bytes(size),
        }
    }
}

/// Per-thread alternate signal stack state
///
/// Whether the thread is currently running on the alternate stack is not
/// stored; it is derived from the stack pointer at delivery time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AltStack {
    /// Base address of the alternate stack
    pub base: u64,
    /// Size of the alternate stack in bytes
    pub size: u64,
    /// Flags (SS_DISABLE if disabled, SS_AUTODISARM preserved)
    pub flags: u32,
}

impl Default for AltStack {
    fn default() -> Self {
        AltStack {
            base: 0,
            size: 0,
            flags: SS_DISABLE,
        }
    }
}

impl AltStack {
    /// True if an alternate stack is configured
    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.flags & SS_DISABLE == 0 && self.size != 0
    }

    /// True if `sp` lies inside the alternate stack
    ///
    /// The stack grows down, so `base + size` is a valid (empty) position and
    /// `base` itself is not.
    #[inline]
    pub fn contains(&self, sp: u64) -> bool {
        self.is_enabled() && sp > self.base && sp - self.base <= self.size
    }

    /// Initial stack pointer when switching to the alternate stack
    #[inline]
    pub fn top(&self) -> u64 {
        self.base.wrapping_add(self.size)
    }

    /// `ss_flags` as reported to the guest for a thread whose SP is `sp`
    pub fn ss_flags_for(&self, sp: u64) -> u32 {
        if !self.is_enabled() {
            SS_DISABLE
        } else if self.contains(sp) {
            SS_ONSTACK
        } else {
            0
        }
    }

    /// Guest-visible description for a thread whose SP is `sp`
    pub fn to_stack_t(&self, sp: u64) -> StackT {
        StackT {
            ss_sp: self.base,
            ss_flags: self.ss_flags_for(sp) | (self.flags & SS_AUTODISARM),
            ss_size: self.size,
        }
    }

    /// Apply a new configuration (sigaltstack semantics)
    ///
    /// # Returns
    /// * `Err(EPERM)` while executing on the current alternate stack
    /// * `Err(EINVAL)` for unknown flag bits
    /// * `Err(ENOMEM)` if the stack is smaller than `min_size`
    pub fn reconfigure(&mut self, new: &StackT, sp: u64, min_size: u64) -> Result<(), u64> {
        use crate::syscall::errno::{EINVAL, ENOMEM, EPERM};

        if self.contains(sp) {
            return Err(EPERM);
        }
        let mode = new.ss_flags & !SS_AUTODISARM;
        if mode != 0 && mode != SS_DISABLE && mode != SS_ONSTACK {
            return Err(EINVAL);
        }
        if mode == SS_DISABLE {
            *self = AltStack::default();
            return Ok(());
        }
        if new.ss_size < min_size {
            return Err(ENOMEM);
        }
        *self = AltStack {
            base: new.ss_sp,
            size: new.ss_size,
            flags: new.ss_flags & SS_AUTODISARM,
        };
        Ok(())
    }
}

/// Default action for a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalDefaultAction {
    /// Terminate the process
    Terminate,
    /// Ignore the signal
    Ignore,
    /// Terminate with core dump
    CoreDump,
    /// Stop (pause) the process
    Stop,
    /// Continue a stopped process
    Continue,
}

/// Get the default action for a signal
pub fn default_action(sig: u32) -> SignalDefaultAction {
    match sig {
        // Terminate
        SIGHUP | SIGINT | SIGKILL | SIGPIPE | SIGALRM | SIGTERM | SIGUSR1 | SIGUSR2 | SIGIO
        | SIGPWR | SIGSTKFLT | SIGVTALRM | SIGPROF => SignalDefaultAction::Terminate,

        // Core dump
        SIGQUIT | SIGILL | SIGTRAP | SIGABRT | SIGBUS | SIGFPE | SIGSEGV | SIGXCPU | SIGXFSZ
        | SIGSYS => SignalDefaultAction::CoreDump,

        // Ignore
        SIGCHLD | SIGURG | SIGWINCH => SignalDefaultAction::Ignore,

        // Stop
        SIGSTOP | SIGTSTP | SIGTTIN | SIGTTOU => SignalDefaultAction::Stop,

        // Continue
        SIGCONT => SignalDefaultAction::Continue,

        // Default for unknown/realtime signals
        _ => SignalDefaultAction::Terminate,
    }
}

/// Signal handler configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalAction {
    /// Handler address (SIG_DFL, SIG_IGN, or guest function pointer)
    pub handler: u64,
    /// Signals to block during handler execution
    pub mask: u64,
    /// Flags (SA_RESTART, SA_SIGINFO, etc.)
    pub flags: u64,
    /// Restorer function for sigreturn (provided by libc)
    pub restorer: u64,
}

impl Default for SignalAction {
    fn default() -> Self {
        SignalAction {
            handler: SIG_DFL,
            mask: 0,
            flags: 0,
            restorer: 0,
        }
    }
}

impl SignalAction {
    /// Size of the guest `struct sigaction` (asm-generic LP64 kernel layout)
    pub const GUEST_SIZE: usize = 32;

    /// Check if handler is the default action
    #[inline]
    pub fn is_default(&self) -> bool {
        self.handler == SIG_DFL
    }

    /// Check if handler ignores the signal
    #[inline]
    pub fn is_ignore(&self) -> bool {
        self.handler == SIG_IGN
    }

    /// Restorer to use as the handler's return address, if the guest gave one
    #[inline]
    pub fn restorer(&self) -> Option<u64> {
        if self.flags & SA_RESTORER != 0 && self.restorer != 0 {
            Some(self.restorer)
        } else {
            None
        }
    }

    /// Guest layout: handler, flags, restorer, mask
    pub fn to_guest_bytes(&self) -> [u8; Self::GUEST_SIZE] {
        let mut out = [0u8; Self::GUEST_SIZE];
        out[0..8].copy_from_slice(&self.handler.to_le_bytes());
        out[8..16].copy_from_slice(&self.flags.to_le_bytes());
        out[16..24].copy_from_slice(&self.restorer.to_le_bytes());
        out[24..32].copy_from_slice(&self.mask.to_le_bytes());
        out
    }

    pub fn from_guest_bytes(bytes: &[u8; Self::GUEST_SIZE]) -> Self {
        let word = |i: usize| {
            let mut w = [0u8; 8];
            w.copy_from_slice(&bytes[i * 8..i * 8 + 8]);
            u64::from_le_bytes(w)
        };
        SignalAction {
            handler: word(0),
            flags: word(1),
            restorer: word(2),
            mask: word(3),
        }
    }
}

/// Process-wide signal disposition table
///
/// Handlers are boxed so the table does not sit inline in the runtime
/// (64 * 32 bytes).
#[derive(Clone)]
pub struct SignalActions {
    handlers: Box<[SignalAction; 64]>,
}

impl Default for SignalActions {
    fn default() -> Self {
        SignalActions {
            handlers: Box::new([SignalAction::default(); 64]),
        }
    }
}

impl SignalActions {
    /// Get handler for a signal
    ///
    /// Returns the default handler for invalid signal numbers
    pub fn get(&self, sig: u32) -> SignalAction {
        if is_valid_signal(sig) {
            self.handlers[(sig - 1) as usize]
        } else {
            SignalAction::default()
        }
    }

    /// Set handler for a signal
    ///
    /// Does nothing for invalid signal numbers
    pub fn set(&mut self, sig: u32, action: SignalAction) {
        if is_valid_signal(sig) {
            self.handlers[(sig - 1) as usize] = action;
        }
    }

    /// Reset a signal to SIG_DFL, keeping nothing of the old action
    pub fn reset(&mut self, sig: u32) {
        self.set(sig, SignalAction::default());
    }
}

/// Sender details carried in siginfo
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigInfo {
    /// Raised by the runtime itself (faults, forced signals)
    Kernel,
    /// kill()/tgkill() style: sender pid and uid
    Sender { pid: i32, uid: u32 },
    /// sigqueue() style: sender plus a value
    Queued { pid: i32, uid: u32, value: u64 },
}

/// A signal waiting for delivery to one guest thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingSignal {
    pub signo: u32,
    /// si_code
    pub code: i32,
    /// Faulting address for fault-class signals, 0 otherwise
    pub addr: u64,
    pub siginfo: SigInfo,
    /// Raw exception syndrome for signals synthesised from a CPU abort
    pub syndrome: Option<u64>,
}

impl PendingSignal {
    /// Synchronous fault signal (SIGSEGV, SIGBUS, SIGILL, SIGTRAP, SIGFPE)
    pub fn fault(signo: u32, code: i32, addr: u64) -> Self {
        PendingSignal {
            signo,
            code,
            addr,
            siginfo: SigInfo::Kernel,
            syndrome: None,
        }
    }

    /// Fault signal carrying the CPU syndrome that produced it
    pub fn fault_with_syndrome(signo: u32, code: i32, addr: u64, syndrome: u64) -> Self {
        PendingSignal {
            syndrome: Some(syndrome),
            ..Self::fault(signo, code, addr)
        }
    }

    /// Signal raised by the runtime with no particular address
    pub fn kernel(signo: u32) -> Self {
        PendingSignal {
            signo,
            code: SI_KERNEL,
            addr: 0,
            siginfo: SigInfo::Kernel,
            syndrome: None,
        }
    }

    /// Signal sent by a process (kill semantics)
    pub fn user(signo: u32, pid: i32, uid: u32) -> Self {
        PendingSignal {
            signo,
            code: SI_USER,
            addr: 0,
            siginfo: SigInfo::Sender { pid, uid },
            syndrome: None,
        }
    }

    /// Signal queued with a value (sigqueue semantics)
    pub fn queued(signo: u32, pid: i32, uid: u32, value: u64) -> Self {
        PendingSignal {
            signo,
            code: SI_QUEUE,
            addr: 0,
            siginfo: SigInfo::Queued { pid, uid, value },
            syndrome: None,
        }
    }

    /// True for signals whose siginfo carries a fault address
    pub fn is_fault(&self) -> bool {
        matches!(self.signo, SIGILL | SIGFPE | SIGSEGV | SIGBUS | SIGTRAP) && self.code > 0
    }

    /// Guest siginfo_t (128 bytes, LP64 generic layout)
    pub fn encode_siginfo(&self) -> [u8; SIGINFO_SIZE] {
        let mut out = [0u8; SIGINFO_SIZE];
        out[0..4].copy_from_slice(&(self.signo as i32).to_le_bytes());
        // si_errno stays 0
        out[8..12].copy_from_slice(&self.code.to_le_bytes());
        if self.is_fault() {
            out[16..24].copy_from_slice(&self.addr.to_le_bytes());
            return out;
        }
        match self.siginfo {
            SigInfo::Kernel => {}
            SigInfo::Sender { pid, uid } => {
                out[16..20].copy_from_slice(&pid.to_le_bytes());
                out[20..24].copy_from_slice(&uid.to_le_bytes());
            }
            SigInfo::Queued { pid, uid, value } => {
                out[16..20].copy_from_slice(&pid.to_le_bytes());
                out[20..24].copy_from_slice(&uid.to_le_bytes());
                out[24..32].copy_from_slice(&value.to_le_bytes());
            }
        }
        out
    }
}

/// Size of siginfo_t in guest memory
pub const SIGINFO_SIZE: usize = 128;
