//! Guest pointer validation and typed copies
//!
//! Syscall-side helpers on top of [`GuestMemory`]: they reject null and
//! wrapping pointers up front and report every failure as EFAULT, which is
//! what the syscall layer hands back to the guest.

use super::{Access, GuestMemory};
use crate::syscall::errno::EFAULT;

/// Validate that a guest pointer range is safe to access
///
/// # Validation Checks
/// 1. Pointer is not null
/// 2. Pointer + size doesn't overflow
/// 3. The whole range is mapped with the requested access
pub fn validate_guest_ptr(
    memory: &dyn GuestMemory,
    addr: u64,
    size: u64,
    access: Access,
) -> Result<(), u64> {
    if addr == 0 {
        return Err(EFAULT);
    }
    if addr.checked_add(size).is_none() {
        return Err(EFAULT);
    }
    memory.check(addr, size, access).map_err(|_| EFAULT)
}

/// Copy a fixed-size byte array from the guest
pub fn copy_from_guest<const N: usize>(
    memory: &dyn GuestMemory,
    addr: u64,
) -> Result<[u8; N], u64> {
    validate_guest_ptr(memory, addr, N as u64, Access::Read)?;
    let mut buf = [0u8; N];
    memory.read(addr, &mut buf).map_err(|_| EFAULT)?;
    Ok(buf)
}

/// Copy bytes to the guest
pub fn copy_to_guest(memory: &dyn GuestMemory, addr: u64, data: &[u8]) -> Result<(), u64> {
    validate_guest_ptr(memory, addr, data.len() as u64, Access::Write)?;
    memory.write(addr, data).map_err(|_| EFAULT)
}

/// Read a little-endian u64
pub fn read_u64(memory: &dyn GuestMemory, addr: u64) -> Result<u64, u64> {
    copy_from_guest::<8>(memory, addr).map(u64::from_le_bytes)
}

/// Write a little-endian u64
pub fn write_u64(memory: &dyn GuestMemory, addr: u64, value: u64) -> Result<(), u64> {
    copy_to_guest(memory, addr, &value.to_le_bytes())
}

/// Read one ABI word (4 or 8 bytes), zero-extended
pub fn read_word(memory: &dyn GuestMemory, addr: u64, word_size: usize) -> Result<u64, u64> {
    match word_size {
        4 => copy_from_guest::<4>(memory, addr).map(|b| u32::from_le_bytes(b) as u64),
        _ => read_u64(memory, addr),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{FlatGuestMemory, PROT_READ, PROT_WRITE};

    fn memory() -> FlatGuestMemory {
        let mem = FlatGuestMemory::new();
        mem.map(0x1000_0000, 0x1000, PROT_READ | PROT_WRITE)
            .unwrap();
        mem
    }

    #[test]
    fn test_null_pointer_rejected() {
        let mem = memory();
        assert_eq!(read_u64(&mem, 0), Err(EFAULT));
    }

    #[test]
    fn test_overflow_rejected() {
        let mem = memory();
        assert_eq!(read_u64(&mem, u64::MAX - 4), Err(EFAULT));
    }

    #[test]
    fn test_valid_guest_address() {
        let mem = memory();
        write_u64(&mem, 0x1000_0010, 0x1122_3344_5566_7788).unwrap();
        assert_eq!(read_u64(&mem, 0x1000_0010), Ok(0x1122_3344_5566_7788));
        assert_eq!(read_word(&mem, 0x1000_0010, 4), Ok(0x5566_7788));
    }

    #[test]
    fn test_boundary_case() {
        let mem = memory();
        // Crosses the end of the only mapping
        assert_eq!(read_u64(&mem, 0x1000_0ffc), Err(EFAULT));
    }
}
