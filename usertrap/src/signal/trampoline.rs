//! Signal trampoline installation
//!
//! The trampoline is a few bytes of guest code that issue rt_sigreturn.
//! Handlers whose sigaction carries no SA_RESTORER return into it. It is
//! written once at process start into a page the front end reserved for
//! it, and its address is recorded in a once-initialised cell; deliveries
//! only ever read that cell.

use core::fmt;

use conquer_once::spin::OnceCell;

use crate::memory::{GuestMemory, MemFault};

/// Why the trampoline could not be installed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrampolineError {
    /// A trampoline is already installed at this address
    AlreadyInstalled(u64),
    /// The target page is not writable guest memory
    Memory(MemFault),
}

impl fmt::Display for TrampolineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrampolineError::AlreadyInstalled(addr) => {
                write!(f, "signal trampoline already installed at {:#x}", addr)
            }
            TrampolineError::Memory(fault) => {
                write!(f, "cannot install signal trampoline: {}", fault)
            }
        }
    }
}

/// Write `code` at `addr` and record `addr` in `cell`
///
/// The page must be writable at install time; the front end may drop the
/// write permission afterwards.
pub fn install(
    cell: &OnceCell<u64>,
    memory: &dyn GuestMemory,
    addr: u64,
    code: &[u8],
) -> Result<u64, TrampolineError> {
    if let Some(&existing) = cell.get() {
        return Err(TrampolineError::AlreadyInstalled(existing));
    }
    memory.write(addr, code).map_err(TrampolineError::Memory)?;
    if cell.try_init_once(|| addr).is_err() {
        let existing = cell.get().copied().unwrap_or(addr);
        return Err(TrampolineError::AlreadyInstalled(existing));
    }
    log::debug!(
        "signal trampoline installed at {:#x} ({} bytes)",
        addr,
        code.len()
    );
    Ok(addr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{FlatGuestMemory, PROT_READ, PROT_WRITE};

    const CODE: [u8; 4] = [0xde, 0xad, 0xbe, 0xef];

    #[test]
    fn test_install_once() {
        let mem = FlatGuestMemory::new();
        mem.map(0x7000, 0x1000, PROT_READ | PROT_WRITE).unwrap();
        let cell = OnceCell::uninit();
        assert_eq!(install(&cell, &mem, 0x7000, &CODE), Ok(0x7000));
        assert_eq!(cell.get(), Some(&0x7000));
        assert_eq!(
            install(&cell, &mem, 0x7100, &CODE),
            Err(TrampolineError::AlreadyInstalled(0x7000))
        );
        let mut buf = [0u8; 4];
        mem.read(0x7000, &mut buf).unwrap();
        assert_eq!(buf, CODE);
    }

    #[test]
    fn test_install_into_readonly_page_fails() {
        let mem = FlatGuestMemory::new();
        mem.map(0x7000, 0x1000, PROT_READ).unwrap();
        let cell = OnceCell::uninit();
        assert!(matches!(
            install(&cell, &mem, 0x7000, &CODE),
            Err(TrampolineError::Memory(_))
        ));
        assert!(cell.get().is_none());
    }
}
