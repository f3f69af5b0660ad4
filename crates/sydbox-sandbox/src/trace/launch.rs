//! Starting a traced process tree.
//!
//! ## Launch
//!
//! The child requests tracing, stops itself with `SIGSTOP` and only then
//! execs the command, so the tracer sees the exec as the first syscall of a
//! fully set up tracee:
//!
//! ```text
//! parent                       child
//!   fork() ------------------>   PTRACE_TRACEME
//!   waitpid(child) <----------   raise(SIGSTOP)
//!   PTRACE_SETOPTIONS
//!   PTRACE_SYSCALL ---------->   execv(binary, argv)
//! ```
//!
//! ## Attach
//!
//! Every thread listed under `/proc/<pid>/task` is attached individually;
//! each one reports its attach `SIGSTOP` through the regular trace loop.

use std::ffi::CString;
use std::fs;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use rustix::io::Errno;
use sydbox_sys::wait::{self, WaitStatus};
use sydbox_sys::{last_errno, ptrace};
use thiserror::Error;

use crate::registry::Pid;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("command not found: {0}")]
    NotFound(String),
}

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("argument contains a null byte")]
    NullByte,

    #[error("fork: {0}")]
    Fork(Errno),

    #[error("waiting for child: {0}")]
    Wait(Errno),

    #[error("child did not stop: {0:?}")]
    NoStop(WaitStatus),

    #[error("listing tasks of {pid}: {source}")]
    Tasks {
        pid: Pid,
        #[source]
        source: io::Error,
    },

    #[error("attach {pid}: {errno}")]
    Attach { pid: Pid, errno: Errno },
}

/// Resolve a command name to an absolute path.
pub fn resolve_binary(cmd: &str) -> Result<PathBuf, ResolveError> {
    if cmd.contains('/') {
        let path = PathBuf::from(cmd);
        if !path.exists() {
            return Err(ResolveError::NotFound(cmd.to_string()));
        }
        return Ok(path);
    }
    which::which(cmd).map_err(|_| ResolveError::NotFound(cmd.to_string()))
}

/// Fork and exec `binary` with `argv` under trace.
///
/// Returns once the child sits in its initial `SIGSTOP`, before the exec.
pub fn spawn<S: AsRef<str>>(binary: &Path, argv: &[S]) -> Result<Pid, LaunchError> {
    // Allocate before fork: the child only makes raw syscalls.
    let path = CString::new(binary.as_os_str().as_bytes()).map_err(|_| LaunchError::NullByte)?;
    let args = argv
        .iter()
        .map(|a| CString::new(a.as_ref()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| LaunchError::NullByte)?;
    let arg_ptrs: Vec<*const libc::c_char> = args
        .iter()
        .map(|s| s.as_ptr())
        .chain(std::iter::once(std::ptr::null()))
        .collect();

    let pid = unsafe { libc::fork() };
    if pid < 0 {
        return Err(LaunchError::Fork(last_errno()));
    }
    if pid == 0 {
        child(&path, &arg_ptrs);
    }

    match wait::wait_pid(pid) {
        Ok((_, WaitStatus::Stopped(libc::SIGSTOP))) => Ok(pid),
        Ok((_, status)) => Err(LaunchError::NoStop(status)),
        Err(errno) => Err(LaunchError::Wait(errno)),
    }
}

fn child(path: &CString, argv: &[*const libc::c_char]) -> ! {
    if ptrace::traceme().is_err() {
        unsafe { libc::_exit(126) }
    }
    unsafe {
        libc::raise(libc::SIGSTOP);
        libc::execv(path.as_ptr(), argv.as_ptr());
        libc::_exit(127)
    }
}

/// Threads of `pid`, the thread group leader first.
pub fn tasks(pid: Pid) -> Result<Vec<Pid>, LaunchError> {
    let entries = fs::read_dir(format!("/proc/{pid}/task"))
        .map_err(|source| LaunchError::Tasks { pid, source })?;
    let mut tids: Vec<Pid> = entries
        .filter_map(|e| e.ok()?.file_name().to_str()?.parse().ok())
        .collect();
    tids.sort_by_key(|&tid| (tid != pid, tid));
    Ok(tids)
}

/// Attach every thread of `pid`. Returns the attached thread ids.
pub fn attach(pid: Pid) -> Result<Vec<Pid>, LaunchError> {
    let tids = tasks(pid)?;
    for &tid in &tids {
        ptrace::attach(tid).map_err(|errno| LaunchError::Attach { pid: tid, errno })?;
    }
    Ok(tids)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_sh() {
        let path = resolve_binary("sh").unwrap();
        assert!(path.is_absolute());
        assert!(path.exists());
    }

    #[test]
    fn resolve_nonexistent() {
        assert!(matches!(
            resolve_binary("nonexistent_binary_12345"),
            Err(ResolveError::NotFound(_))
        ));
        assert!(resolve_binary("/no/such/binary").is_err());
    }

    #[test]
    fn own_tasks_leader_first() {
        let me = std::process::id() as Pid;
        let tids = tasks(me).unwrap();
        assert_eq!(tids.first(), Some(&me));
    }

    #[test]
    fn tasks_of_missing_process() {
        assert!(matches!(tasks(-1), Err(LaunchError::Tasks { .. })));
    }
}
