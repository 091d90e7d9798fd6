//! Architecture abstraction layer.
//!
//! Everything the dispatcher, syscall bridge, signal deliverer and atomic
//! emulator need to know about a guest ISA sits behind
//! [`traits::ArchitectureProfile`]. Generic code outside this module should
//! use the traits rather than profile-specific types.
//!
//! # Supported Architectures
//!
//! - `aarch64`: Linux user-mode ABI, including SVE/SME signal records

pub mod aarch64;

pub mod traits;
pub use traits::*;
