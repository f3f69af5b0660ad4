//! Raw `ptrace(2)` requests.
//!
//! Every wrapper returns the kernel's `Errno` unchanged; classification into
//! "tracee gone" versus "tracer bug" happens in [`crate::tracee::TraceError`].
//!
//! ## Options
//!
//! [`TRACE_OPTIONS`] is what the sandbox installs on every tracee:
//!
//! - `PTRACE_O_TRACESYSGOOD` - syscall stops report `SIGTRAP | 0x80`
//! - `PTRACE_O_TRACEFORK` / `TRACEVFORK` / `TRACECLONE` - auto-attach children
//! - `PTRACE_O_TRACEEXEC` - `PTRACE_EVENT_EXEC` instead of a bare `SIGTRAP`

use std::ptr;

use rustix::io::Errno;

use crate::abi::Regs;
use crate::{clear_errno, last_errno};

/// Options installed on every tracee.
///
/// `PTRACE_O_EXITKILL` sends `SIGKILL` to every tracee if the tracer dies,
/// so no process outlives us untraced.
pub const TRACE_OPTIONS: libc::c_int = libc::PTRACE_O_TRACESYSGOOD
    | libc::PTRACE_O_TRACEFORK
    | libc::PTRACE_O_TRACEVFORK
    | libc::PTRACE_O_TRACECLONE
    | libc::PTRACE_O_TRACEEXEC
    | libc::PTRACE_O_EXITKILL;

#[inline]
fn check(ret: libc::c_long) -> Result<(), Errno> {
    if ret < 0 { Err(last_errno()) } else { Ok(()) }
}

/// Request to be traced by the parent. Called in the forked child.
pub fn traceme() -> Result<(), Errno> {
    check(unsafe {
        libc::ptrace(
            libc::PTRACE_TRACEME,
            0,
            ptr::null_mut::<libc::c_void>(),
            ptr::null_mut::<libc::c_void>(),
        )
    })
}

/// Attach to a running task. The task is sent `SIGSTOP`.
pub fn attach(pid: libc::pid_t) -> Result<(), Errno> {
    check(unsafe {
        libc::ptrace(
            libc::PTRACE_ATTACH,
            pid,
            ptr::null_mut::<libc::c_void>(),
            ptr::null_mut::<libc::c_void>(),
        )
    })
}

/// Install ptrace options on a stopped tracee.
pub fn set_options(pid: libc::pid_t, options: libc::c_int) -> Result<(), Errno> {
    check(unsafe {
        libc::ptrace(
            libc::PTRACE_SETOPTIONS,
            pid,
            ptr::null_mut::<libc::c_void>(),
            options as libc::c_long as *mut libc::c_void,
        )
    })
}

/// Resume a stopped tracee until the next syscall boundary, delivering `signal`
/// (0 for none).
pub fn resume_syscall(pid: libc::pid_t, signal: i32) -> Result<(), Errno> {
    check(unsafe {
        libc::ptrace(
            libc::PTRACE_SYSCALL,
            pid,
            ptr::null_mut::<libc::c_void>(),
            signal as libc::c_long as *mut libc::c_void,
        )
    })
}

/// Fetch the message of the last ptrace event (new child pid for fork events).
pub fn event_msg(pid: libc::pid_t) -> Result<libc::c_ulong, Errno> {
    let mut msg: libc::c_ulong = 0;
    check(unsafe {
        libc::ptrace(
            libc::PTRACE_GETEVENTMSG,
            pid,
            ptr::null_mut::<libc::c_void>(),
            &mut msg as *mut libc::c_ulong,
        )
    })?;
    Ok(msg)
}

/// Signal information of a signal-delivery stop.
///
/// Fails with `EINVAL` in a group-stop, where no signal is pending.
pub fn siginfo(pid: libc::pid_t) -> Result<libc::siginfo_t, Errno> {
    // SAFETY: siginfo_t is plain data.
    let mut info: libc::siginfo_t = unsafe { std::mem::zeroed() };
    check(unsafe {
        libc::ptrace(
            libc::PTRACE_GETSIGINFO,
            pid,
            ptr::null_mut::<libc::c_void>(),
            &mut info as *mut libc::siginfo_t,
        )
    })?;
    Ok(info)
}

pub fn get_regs(pid: libc::pid_t) -> Result<Regs, Errno> {
    // SAFETY: user_regs_struct is plain integers.
    let mut regs: Regs = unsafe { std::mem::zeroed() };
    check(unsafe {
        libc::ptrace(
            libc::PTRACE_GETREGS,
            pid,
            ptr::null_mut::<libc::c_void>(),
            &mut regs as *mut Regs,
        )
    })?;
    Ok(regs)
}

pub fn set_regs(pid: libc::pid_t, regs: &Regs) -> Result<(), Errno> {
    check(unsafe {
        libc::ptrace(
            libc::PTRACE_SETREGS,
            pid,
            ptr::null_mut::<libc::c_void>(),
            regs as *const Regs,
        )
    })
}

/// Read one word of tracee memory.
///
/// `PEEKDATA` returns the word itself, so failure is only visible via errno.
pub fn peek_data(pid: libc::pid_t, addr: u64) -> Result<u64, Errno> {
    clear_errno();
    let word = unsafe {
        libc::ptrace(
            libc::PTRACE_PEEKDATA,
            pid,
            addr as *mut libc::c_void,
            ptr::null_mut::<libc::c_void>(),
        )
    };
    if word == -1 {
        let errno = last_errno();
        if errno.raw_os_error() != 0 {
            return Err(errno);
        }
    }
    Ok(word as u64)
}

/// Write one word of tracee memory.
pub fn poke_data(pid: libc::pid_t, addr: u64, word: u64) -> Result<(), Errno> {
    check(unsafe {
        libc::ptrace(
            libc::PTRACE_POKEDATA,
            pid,
            addr as *mut libc::c_void,
            word as *mut libc::c_void,
        )
    })
}

/// Send `SIGKILL` to a task, tracee or not.
pub fn kill(pid: libc::pid_t) -> Result<(), Errno> {
    let ret = unsafe { libc::kill(pid, libc::SIGKILL) };
    if ret < 0 { Err(last_errno()) } else { Ok(()) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_cover_all_children() {
        for flag in [
            libc::PTRACE_O_TRACEFORK,
            libc::PTRACE_O_TRACEVFORK,
            libc::PTRACE_O_TRACECLONE,
        ] {
            assert_ne!(TRACE_OPTIONS & flag, 0);
        }
        assert_ne!(TRACE_OPTIONS & libc::PTRACE_O_TRACESYSGOOD, 0);
    }

    #[test]
    fn tracer_death_kills_tracees() {
        assert_ne!(TRACE_OPTIONS & libc::PTRACE_O_EXITKILL, 0);
    }

    #[test]
    fn requests_on_untraced_pid_fail() {
        // pid 1 is never our tracee.
        assert!(get_regs(1).is_err());
        assert!(peek_data(1, 0).is_err());
    }
}
