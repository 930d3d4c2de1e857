//! # System call boundary
//!
//! Everything between a trapped `ecall` and the VM core or the host:
//!
//! - [`errno`]: Linux errno values and the negated return convention.
//! - [`sysno`]: RISC-V Linux syscall numbers the proxy kernel knows about.
//! - [`file`]: the file descriptor table.
//! - [`host`]: forwarding to the host frontend, serialized by its own lock.
//! - [`mm`]: `brk`, `mmap`, `munmap`, `mremap` and `mprotect` adapters.
//!
//! Return values follow the kernel ABI: a non-negative result, or `-errno`
//! reinterpreted as `u64`. `mmap` additionally reports resource exhaustion
//! as `-1`.

#![cfg_attr(not(any(test, doctest)), no_std)]

extern crate alloc;

pub mod errno;
pub mod file;
pub mod host;
pub mod mm;
pub mod sysno;

pub use crate::errno::Errno;
pub use crate::file::FileTable;
pub use crate::host::{Frontend, HostChannel, HostFile};
pub use crate::mm::MmSyscalls;
pub use crate::sysno::Sysno;
