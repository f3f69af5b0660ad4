//! Requests the trace loop makes against its tracees.
//!
//! [`Tracer`](super::Tracer) reaches processes only through [`Control`]:
//! waiting, resuming, killing, personality detection and the per-stop
//! memory view. [`Ptrace`] implements it with ptrace and `waitpid`.

use std::path::PathBuf;

use rustix::io::Errno;
use sydbox_sys::ptrace::{self, TRACE_OPTIONS};
use sydbox_sys::wait::{self, WaitStatus};
use sydbox_sys::{Personality, PtraceTracee, TraceError, Tracee};

use super::signal;
use crate::registry::Pid;
use crate::resolve;

pub trait Control {
    type Tracee: Tracee;

    /// Called once before the first wait.
    fn install_signals(&mut self) -> nix::Result<()>;

    /// Termination signal received, if any.
    fn interrupted(&mut self) -> Option<i32>;

    /// Next state change of any child.
    fn wait(&mut self) -> Result<(Pid, WaitStatus), Errno>;

    fn set_options(&mut self, pid: Pid) -> Result<(), Errno>;

    /// Resume until the next syscall stop, delivering `sig` (0 for none).
    fn resume(&mut self, pid: Pid, sig: i32) -> Result<(), Errno>;

    /// `PTRACE_GETEVENTMSG` of the current event stop.
    fn event_msg(&mut self, pid: Pid) -> Result<libc::c_ulong, Errno>;

    /// The signal stop of `pid` is a group-stop.
    fn group_stop(&mut self, pid: Pid) -> bool;

    fn kill(&mut self, pid: Pid) -> Result<(), Errno>;

    fn detect(&mut self, pid: Pid) -> Result<Personality, TraceError>;

    fn cwd(&mut self, pid: Pid) -> Result<PathBuf, Errno>;

    fn tracee(&self, pid: Pid, personality: Personality) -> Self::Tracee;
}

/// The real thing.
#[derive(Debug, Default, Clone, Copy)]
pub struct Ptrace;

impl Control for Ptrace {
    type Tracee = PtraceTracee;

    fn install_signals(&mut self) -> nix::Result<()> {
        signal::install()
    }

    fn interrupted(&mut self) -> Option<i32> {
        signal::pending()
    }

    fn wait(&mut self) -> Result<(Pid, WaitStatus), Errno> {
        wait::wait_any()
    }

    fn set_options(&mut self, pid: Pid) -> Result<(), Errno> {
        ptrace::set_options(pid, TRACE_OPTIONS)
    }

    fn resume(&mut self, pid: Pid, sig: i32) -> Result<(), Errno> {
        ptrace::resume_syscall(pid, sig)
    }

    fn event_msg(&mut self, pid: Pid) -> Result<libc::c_ulong, Errno> {
        ptrace::event_msg(pid)
    }

    fn group_stop(&mut self, pid: Pid) -> bool {
        // A group-stop has no siginfo.
        matches!(ptrace::siginfo(pid), Err(errno) if errno == Errno::INVAL)
    }

    fn kill(&mut self, pid: Pid) -> Result<(), Errno> {
        ptrace::kill(pid)
    }

    fn detect(&mut self, pid: Pid) -> Result<Personality, TraceError> {
        PtraceTracee::detect(pid).map(|tracee| tracee.personality())
    }

    fn cwd(&mut self, pid: Pid) -> Result<PathBuf, Errno> {
        resolve::proc_cwd(pid)
    }

    fn tracee(&self, pid: Pid, personality: Personality) -> PtraceTracee {
        PtraceTracee::new(pid, personality)
    }
}
