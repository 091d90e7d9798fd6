//! Guest signal handling
//!
//! Pending-signal bookkeeping, sigaction state and the construction and
//! teardown of ABI-exact signal frames in guest memory.

pub mod constants;
pub mod delivery;
pub mod frame;
pub mod queue;
pub mod trampoline;
pub mod types;

pub use delivery::{SignalDeliverer, SignalExit};
pub use queue::{SignalQueue, SignalSender};
