//! Low-level Linux wrappers for ptrace based sandboxing.
//!
//! This crate provides thin wrappers around the `ptrace(2)` and `waitpid(2)`
//! requests a tracer needs, plus the register ABI of every personality a
//! traced process can run under. Higher level policy lives in
//! `sydbox-sandbox`.
//!
//! ## Modules
//!
//! - **abi** - Per-personality register layout (x86_64, i386 compat)
//! - **ptrace** - Raw ptrace requests (`TRACEME`, `SETOPTIONS`, `PEEKDATA`, ...)
//! - **tracee** - Argument, return value and memory access for a stopped tracee
//! - **wait** - `waitpid` wrapper and wait status decoding
//! - **check** - Runtime system capability detection
//!
//! ## Error Classes
//!
//! Every request against a tracee can fail in two fundamentally different
//! ways. `ESRCH` means the tracee is gone (killed, or exited between two
//! stops) and is always recoverable. Anything else means the tracer and the
//! kernel disagree about the tracee's state, see [`TraceError`].
//!
//! # Safety
//!
//! This crate contains raw syscall wrappers. Casts between integer types
//! are unavoidable when interfacing with the kernel ABI.

#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_wrap)]

#[cfg(not(all(target_os = "linux", target_arch = "x86_64")))]
compile_error!("sydbox-sys supports Linux on x86_64 only");

pub mod abi;
pub mod check;
pub mod ptrace;
pub mod tracee;
pub mod wait;

pub use abi::{Abi, Personality, Regs, StatKind};
pub use check::{CheckError, SystemInfo, check};
pub use tracee::{PtraceTracee, TraceError, Tracee};

#[inline]
pub fn last_errno() -> rustix::io::Errno {
    // SAFETY: __errno_location always returns valid thread-local pointer.
    rustix::io::Errno::from_raw_os_error(unsafe { *libc::__errno_location() })
}

#[inline]
pub(crate) fn clear_errno() {
    // SAFETY: __errno_location always returns valid thread-local pointer.
    unsafe { *libc::__errno_location() = 0 };
}
