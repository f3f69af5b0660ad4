//! `waitpid(2)` wrapper and wait status decoding.
//!
//! Statuses are decoded here rather than through a typed signal enum because
//! tracees routinely stop with realtime signals (glibc uses `SIGRTMIN` and
//! `SIGRTMIN+1` internally), which must be re-injected verbatim.

use rustix::io::Errno;

use crate::last_errno;

/// `SIGTRAP | 0x80`: syscall stop under `PTRACE_O_TRACESYSGOOD`.
pub const SYSCALL_STOP_SIGNAL: i32 = libc::SIGTRAP | 0x80;

/// Decoded wait status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    /// Normal exit with code.
    Exited(i32),
    /// Killed by signal.
    Signaled(i32),
    /// Syscall-enter or syscall-exit stop.
    SyscallStop,
    /// `PTRACE_EVENT_*` stop.
    Event(i32),
    /// Signal-delivery stop (or the initial `SIGSTOP` of a new tracee).
    Stopped(i32),
    /// Anything else (`WCONTINUED`).
    Other(i32),
}

impl WaitStatus {
    pub fn from_raw(status: i32) -> Self {
        if libc::WIFEXITED(status) {
            return Self::Exited(libc::WEXITSTATUS(status));
        }
        if libc::WIFSIGNALED(status) {
            return Self::Signaled(libc::WTERMSIG(status));
        }
        if libc::WIFSTOPPED(status) {
            let sig = libc::WSTOPSIG(status);
            if sig == SYSCALL_STOP_SIGNAL {
                return Self::SyscallStop;
            }
            let event = (status >> 16) & 0xff;
            if sig == libc::SIGTRAP && event != 0 {
                return Self::Event(event);
            }
            return Self::Stopped(sig);
        }
        Self::Other(status)
    }
}

/// Block until any child (traced or not, thread or not) changes state.
///
/// Returns `EINTR` when interrupted by a signal handler; `ECHILD` when there
/// is nothing left to wait for.
pub fn wait_any() -> Result<(libc::pid_t, WaitStatus), Errno> {
    wait_pid(-1)
}

/// Block until `pid` changes state.
pub fn wait_pid(pid: libc::pid_t) -> Result<(libc::pid_t, WaitStatus), Errno> {
    let mut status = 0;
    let ret = unsafe { libc::waitpid(pid, &mut status, libc::__WALL) };
    if ret < 0 {
        return Err(last_errno());
    }
    Ok((ret, WaitStatus::from_raw(status)))
}
