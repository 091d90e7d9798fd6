//! POSIX errno values
//!
//! Standard error codes handed back to the guest. Values are the Linux
//! asm-generic numbers; the profile's error convention decides how they are
//! encoded into registers.

/// Operation not permitted
pub const EPERM: u64 = 1;

/// Resource temporarily unavailable
pub const EAGAIN: u64 = 11;

/// Cannot allocate memory
pub const ENOMEM: u64 = 12;

/// Bad address
pub const EFAULT: u64 = 14;

/// Invalid argument
pub const EINVAL: u64 = 22;

/// Function not implemented
pub const ENOSYS: u64 = 38;
