//! Guest memory access boundary
//!
//! Every access the runtime makes on behalf of the guest (signal frames,
//! sigreturn data, emulated atomics, syscall stack arguments) goes through
//! [`GuestMemory`]. Accesses fail soft with a [`MemFault`] instead of
//! faulting the host, so that the caller can turn them into guest-visible
//! signals.

pub mod userptr;

use core::fmt;
use spin::RwLock;

use crate::signal::constants::{SEGV_ACCERR, SEGV_MAPERR};

/// Page protection bits (same values as mmap PROT_*)
pub const PROT_NONE: u8 = 0;
pub const PROT_READ: u8 = 1;
pub const PROT_WRITE: u8 = 2;
pub const PROT_EXEC: u8 = 4;

/// Kind of access being validated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
    /// Read-modify-write, needs both permissions
    ReadWrite,
}

impl Access {
    fn permitted_by(self, prot: u8) -> bool {
        match self {
            Access::Read => prot & PROT_READ != 0,
            Access::Write => prot & PROT_WRITE != 0,
            Access::ReadWrite => prot & (PROT_READ | PROT_WRITE) == (PROT_READ | PROT_WRITE),
        }
    }
}

/// Why a guest access failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// No mapping covers the address
    Unmapped,
    /// Mapping exists but does not allow the access
    Protection,
    /// addr + len wraps the address space
    Overflow,
}

/// A failed guest memory access
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemFault {
    /// First address that could not be accessed
    pub addr: u64,
    pub kind: FaultKind,
}

impl MemFault {
    pub const fn unmapped(addr: u64) -> Self {
        MemFault {
            addr,
            kind: FaultKind::Unmapped,
        }
    }

    pub const fn protection(addr: u64) -> Self {
        MemFault {
            addr,
            kind: FaultKind::Protection,
        }
    }

    pub const fn overflow(addr: u64) -> Self {
        MemFault {
            addr,
            kind: FaultKind::Overflow,
        }
    }

    /// si_code reported with SIGSEGV for this fault
    pub fn segv_code(&self) -> i32 {
        match self.kind {
            FaultKind::Protection => SEGV_ACCERR,
            FaultKind::Unmapped | FaultKind::Overflow => SEGV_MAPERR,
        }
    }
}

impl fmt::Display for MemFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let what = match self.kind {
            FaultKind::Unmapped => "unmapped",
            FaultKind::Protection => "protection violation",
            FaultKind::Overflow => "range overflow",
        };
        write!(f, "guest access fault at {:#x} ({})", self.addr, what)
    }
}

/// Bounds- and permission-checked access to the guest address space.
///
/// Implementations must never let a bad guest address fault the host.
/// `write` must not modify any byte unless the whole range is writable.
pub trait GuestMemory: Send + Sync {
    /// Validate that `[addr, addr + len)` is mapped and allows `access`.
    fn check(&self, addr: u64, len: u64, access: Access) -> Result<(), MemFault>;

    /// Copy guest bytes into `buf`.
    fn read(&self, addr: u64, buf: &mut [u8]) -> Result<(), MemFault>;

    /// Copy `data` into guest memory, all or nothing.
    fn write(&self, addr: u64, data: &[u8]) -> Result<(), MemFault>;
}

/// One contiguous guest mapping
struct Region {
    base: u64,
    prot: u8,
    data: Vec<u8>,
}

impl Region {
    fn end(&self) -> u64 {
        self.base + self.data.len() as u64
    }

    fn contains(&self, addr: u64) -> bool {
        addr >= self.base && addr < self.end()
    }
}

/// Region-list guest memory backed by host vectors.
///
/// Used by process-setup front ends that do not map guest memory directly
/// into the host address space, and by the test suite.
pub struct FlatGuestMemory {
    regions: RwLock<Vec<Region>>,
}

impl Default for FlatGuestMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl FlatGuestMemory {
    pub const fn new() -> Self {
        FlatGuestMemory {
            regions: RwLock::new(Vec::new()),
        }
    }

    /// Map a zero-filled region. Overlapping an existing mapping is refused.
    pub fn map(&self, base: u64, len: u64, prot: u8) -> Result<(), MemFault> {
        let end = base.checked_add(len).ok_or(MemFault::overflow(base))?;
        let mut regions = self.regions.write();
        if regions.iter().any(|r| base < r.end() && r.base < end) {
            return Err(MemFault::protection(base));
        }
        regions.push(Region {
            base,
            prot,
            data: vec![0u8; len as usize],
        });
        regions.sort_by_key(|r| r.base);
        Ok(())
    }

    /// Change the protection of the mapping that starts at `base`.
    pub fn protect(&self, base: u64, prot: u8) -> Result<(), MemFault> {
        let mut regions = self.regions.write();
        let region = regions
            .iter_mut()
            .find(|r| r.base == base)
            .ok_or(MemFault::unmapped(base))?;
        region.prot = prot;
        Ok(())
    }

    /// Remove the mapping that starts at `base`.
    pub fn unmap(&self, base: u64) -> Result<(), MemFault> {
        let mut regions = self.regions.write();
        let idx = regions
            .iter()
            .position(|r| r.base == base)
            .ok_or(MemFault::unmapped(base))?;
        regions.remove(idx);
        Ok(())
    }

    fn check_locked(
        regions: &[Region],
        addr: u64,
        len: u64,
        access: Access,
    ) -> Result<(), MemFault> {
        if len == 0 {
            return Ok(());
        }
        let end = addr.checked_add(len).ok_or(MemFault::overflow(addr))?;
        let mut cur = addr;
        while cur < end {
            let region = regions
                .iter()
                .find(|r| r.contains(cur))
                .ok_or(MemFault::unmapped(cur))?;
            if !access.permitted_by(region.prot) {
                return Err(MemFault::protection(cur));
            }
            cur = region.end().min(end);
        }
        Ok(())
    }
}

impl GuestMemory for FlatGuestMemory {
    fn check(&self, addr: u64, len: u64, access: Access) -> Result<(), MemFault> {
        let regions = self.regions.read();
        Self::check_locked(&regions, addr, len, access)
    }

    fn read(&self, addr: u64, buf: &mut [u8]) -> Result<(), MemFault> {
        let regions = self.regions.read();
        Self::check_locked(&regions, addr, buf.len() as u64, Access::Read)?;
        let mut done = 0usize;
        while done < buf.len() {
            let cur = addr + done as u64;
            let Some(region) = regions.iter().find(|r| r.contains(cur)) else {
                return Err(MemFault::unmapped(cur));
            };
            let off = (cur - region.base) as usize;
            let n = (region.data.len() - off).min(buf.len() - done);
            buf[done..done + n].copy_from_slice(&region.data[off..off + n]);
            done += n;
        }
        Ok(())
    }

    fn write(&self, addr: u64, data: &[u8]) -> Result<(), MemFault> {
        let mut regions = self.regions.write();
        Self::check_locked(&regions, addr, data.len() as u64, Access::Write)?;
        let mut done = 0usize;
        while done < data.len() {
            let cur = addr + done as u64;
            let Some(region) = regions.iter_mut().find(|r| r.contains(cur)) else {
                return Err(MemFault::unmapped(cur));
            };
            let off = (cur - region.base) as usize;
            let n = (region.data.len() - off).min(data.len() - done);
            region.data[off..off + n].copy_from_slice(&data[done..done + n]);
            done += n;
        }
        Ok(())
    }
}
