//! sydbox-sandbox: ptrace based syscall sandbox
//!
//! This crate confines an unmodified process tree by tracing every system
//! call it makes. Each traced process carries its own policy, inherited at
//! fork time:
//!
//! - **Path sandbox** - writes only beneath the write prefixes
//! - **Exec sandbox** - exec only beneath the exec prefixes
//! - **Network sandbox** - `allow`, `deny` (whitelist) or `local` destinations
//! - **Magic commands** - a traced process reconfigures its own sandbox by
//!   calling `stat("/dev/sydbox/...")`, until it locks itself
//!
//! Denied calls never reach the kernel: the syscall number is replaced with
//! an invalid one and the faked return value is written at syscall exit.
//!
//! ## Quick Start
//!
//! ```ignore
//! use sydbox_sandbox::{Policy, run};
//!
//! let policy = Policy::new().write("/tmp").predict("/dev");
//! let status = run(&policy, &["make", "install"])?;
//! std::process::exit(status.code());
//! ```
//!
//! ## Requirements
//!
//! - Linux kernel 3.5+ on x86_64 (i386 binaries are traced too)
//! - ptrace permitted (Yama `ptrace_scope` below 3)

#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_wrap)]

pub mod magic;
pub mod net;
pub mod pipeline;
pub mod policy;
pub mod prefix;
pub mod registry;
pub mod report;
pub mod resolve;
pub mod syscall;
pub mod trace;
pub mod validate;

pub use net::{AddrParseError, NetAddr, NetWhitelist, SocketAddress};
pub use pipeline::Verdict;
pub use policy::{GlobalPolicy, Lock, NetMode, ParseEnumError, Policy, ProcessPolicy, WaitMode};
pub use prefix::{PrefixError, PrefixList};
pub use registry::{Pid, Registry, TracedProcess};
pub use report::{FilterError, Filters, VIOLATION_TARGET, Violation, ViolationKind};
pub use trace::{Control, ExitStatus, Ptrace, SandboxError, Tracer, run};
pub use validate::ValidationError;
