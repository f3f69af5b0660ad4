//! Per-syscall policy decisions.
//!
//! At syscall-enter [`enter`] looks the call up in the dispatch table and
//! runs [`check`]:
//!
//! 1. stat-family calls on a path under `/dev/sydbox` are magic commands;
//! 2. opens and access checks that cannot write are let through early;
//! 3. the final-symlink rule of the call is evaluated;
//! 4. each path argument is canonicalized against the process's cwd or
//!    dirfd;
//! 5. the canonical path is matched against the write, predict and exec
//!    prefixes, or the destination address against the network policy.
//!
//! A denied call is neutralised by rewriting its number to
//! [`FAKED_SYSCALL`](crate::registry::FAKED_SYSCALL); [`exit`] puts the real
//! number back and writes the faked return value. The exit side also keeps
//! the cached cwd current and grows the network whitelist after `bind`.

use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use rustix::io::Errno;
use sydbox_sys::{StatKind, TraceError, Tracee};
use tracing::{debug, trace, warn};

use crate::magic::{self, Command, Invalid, Outcome};
use crate::net::{self, NetAddr, SocketAddress};
use crate::policy::{GlobalPolicy, Lock, NetMode};
use crate::registry::{PendingBind, TracedProcess};
use crate::report::{self, Violation, ViolationKind};
use crate::resolve::{self, CreateMode};
use crate::syscall::{self, Creation, Follow, Kind, ModeArg, NetCall, PathArg, SyscallEntry};

/// Outcome of checking one syscall.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    /// The call cannot write; no path check was needed.
    AllowNonWrite,
    /// A magic command was applied; the call returns a synthetic stat.
    Magic,
    /// Skip the call and make it return `ret`.
    Deny {
        ret: i64,
        violation: Option<Violation>,
    },
}

impl Verdict {
    fn deny(errno: Errno) -> Self {
        Self::Deny {
            ret: -i64::from(errno.raw_os_error()),
            violation: None,
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow | Self::AllowNonWrite)
    }
}

/// Handle the syscall-enter stop of `proc`.
pub fn enter(
    tracee: &dyn Tracee,
    proc: &mut TracedProcess,
    global: &mut GlobalPolicy,
) -> Result<(), TraceError> {
    let nr = tracee.syscall_no()?;
    proc.syscall_no = nr;
    proc.pending_bind = None;
    proc.current = syscall::lookup(proc.personality, nr);
    let Some(entry) = proc.current else {
        return Ok(());
    };

    let verdict = check(tracee, entry, proc, global)?;
    trace!(pid = proc.pid, syscall = entry.name, ?verdict, "checked");
    match verdict {
        Verdict::Allow | Verdict::AllowNonWrite => Ok(()),
        Verdict::Magic => deny_with(tracee, proc, 0),
        Verdict::Deny { ret, violation } => {
            if let Some(violation) = violation {
                global.violations += 1;
                report::report(proc.pid, &violation, &global.filters);
            }
            deny_with(tracee, proc, ret)
        }
    }
}

fn deny_with(tracee: &dyn Tracee, proc: &mut TracedProcess, ret: i64) -> Result<(), TraceError> {
    tracee.set_syscall_no(proc.faked_syscall_no)?;
    proc.pending_deny = true;
    proc.faked_return = ret;
    proc.pending_bind = None;
    Ok(())
}

/// Handle the syscall-exit stop of `proc`.
pub fn exit(
    tracee: &dyn Tracee,
    proc: &mut TracedProcess,
    global: &mut GlobalPolicy,
) -> Result<(), TraceError> {
    let entry = proc.current.take();
    if proc.pending_deny {
        proc.pending_deny = false;
        tracee.set_syscall_no(proc.syscall_no)?;
        tracee.set_return_value(proc.faked_return)?;
        return Ok(());
    }
    let Some(entry) = entry else {
        return Ok(());
    };

    match entry.kind {
        Kind::Chdir | Kind::Fchdir => {
            if tracee.return_value()? == 0 {
                update_cwd(proc)?;
            }
        }
        Kind::Net(_) => {
            if let Some(bind) = proc.pending_bind.take() {
                if tracee.return_value()? == 0 {
                    whitelist_bound(proc, bind, global);
                }
            }
        }
        _ => {}
    }
    Ok(())
}

fn update_cwd(proc: &mut TracedProcess) -> Result<(), TraceError> {
    match resolve::proc_cwd(proc.pid) {
        Ok(cwd) => {
            debug!(pid = proc.pid, cwd = %cwd.display(), "changed directory");
            proc.cwd = cwd;
            Ok(())
        }
        Err(errno) if errno == Errno::NOENT || errno == Errno::SRCH => {
            Err(TraceError::ProcessGone)
        }
        Err(errno) => {
            warn!(pid = proc.pid, %errno, "failed to read cwd");
            Ok(())
        }
    }
}

fn whitelist_bound(proc: &TracedProcess, bind: PendingBind, global: &mut GlobalPolicy) {
    let mut addr = bind.addr;
    if let SocketAddress::Inet(_, port) | SocketAddress::Inet6(_, port) = &mut addr {
        if *port == 0 {
            match net::bound_port(proc.pid, bind.fd) {
                Some(bound) => *port = bound,
                None => {
                    debug!(pid = proc.pid, fd = bind.fd, "bound port not found");
                    return;
                }
            }
        }
    }
    if let Some(entry) = NetAddr::from_bound(&addr) {
        debug!(pid = proc.pid, addr = %entry, "whitelisting bound address");
        global.whitelist.add(entry);
    }
}

/// Decide `entry` for the tracee stopped at syscall-enter.
///
/// A tracee pointer that cannot be read is the tracee's own fault and fails
/// the call with `EFAULT`.
pub fn check(
    tracee: &dyn Tracee,
    entry: &'static SyscallEntry,
    proc: &mut TracedProcess,
    global: &mut GlobalPolicy,
) -> Result<Verdict, TraceError> {
    let verdict = match entry.kind {
        Kind::Stat { arg, buf, layout } => check_magic(tracee, arg, buf, layout, proc, global),
        Kind::Path { args, mode, follow } => check_path(tracee, entry, args, mode, follow, proc),
        Kind::Exec { arg, follow } => check_exec(tracee, entry, arg, follow, proc),
        Kind::Net(call) => check_net(tracee, entry, call, proc, global),
        Kind::Chdir | Kind::Fchdir => Ok(Verdict::Allow),
    };
    match verdict {
        Err(TraceError::BadAddress(addr)) => {
            debug!(pid = proc.pid, syscall = entry.name, addr, "unreadable argument");
            Ok(Verdict::deny(Errno::FAULT))
        }
        other => other,
    }
}

fn check_magic(
    tracee: &dyn Tracee,
    arg: PathArg,
    buf: usize,
    layout: StatKind,
    proc: &mut TracedProcess,
    global: &mut GlobalPolicy,
) -> Result<Verdict, TraceError> {
    if proc.policy.lock == Lock::Set {
        return Ok(Verdict::Allow);
    }
    // statx(fd, NULL, AT_EMPTY_PATH) is valid.
    let addr = tracee.arg(arg.path)?;
    if addr == 0 {
        return Ok(Verdict::Allow);
    }
    let raw = tracee.read_string(addr)?;
    let Some(path) = magic::control_path(&raw, &proc.cwd) else {
        return Ok(Verdict::Allow);
    };
    let Some(command) = Command::parse(&path) else {
        return Ok(Verdict::Allow);
    };
    let command = match command {
        Ok(command) => command,
        Err(Invalid::Unknown(name)) => {
            debug!(pid = proc.pid, command = name, "unknown magic command");
            return Ok(Verdict::deny(Errno::NOENT));
        }
        Err(Invalid::Address(e)) => {
            warn!(pid = proc.pid, path = %magic::display(&path), error = %e, "bad whitelist address");
            return Ok(Verdict::deny(Errno::INVAL));
        }
    };

    // The answer is written before the command runs: a call failing with
    // EFAULT leaves the policy untouched.
    let previous = tracee.fake_stat(buf, layout)?;
    debug!(pid = proc.pid, ?command, "magic");
    let verdict = match magic::execute(command, proc, global) {
        Outcome::Done => return Ok(Verdict::Magic),
        Outcome::PassThrough => Verdict::Allow,
        Outcome::Failed(errno) => Verdict::deny(Errno::from_raw_os_error(errno)),
    };
    tracee.write_bytes(tracee.arg(buf)?, &previous)?;
    Ok(verdict)
}

/// True if an open with `flags` may modify the filesystem.
fn open_writes(flags: u64) -> bool {
    let flags = flags as i32;
    flags & libc::O_ACCMODE != libc::O_RDONLY || flags & (libc::O_CREAT | libc::O_TRUNC) != 0
}

fn creation(create: Creation, flags: Option<u64>) -> Creation {
    match (create, flags) {
        (Creation::FromFlags, Some(flags)) => {
            let flags = flags as i32;
            if flags & libc::O_CREAT == 0 {
                Creation::Exists
            } else if flags & libc::O_EXCL != 0 {
                Creation::Must
            } else {
                Creation::May
            }
        }
        (Creation::FromFlags, None) => Creation::Exists,
        (create, _) => create,
    }
}

fn follow_last(tracee: &dyn Tracee, follow: Follow, flags: Option<u64>) -> Result<bool, TraceError> {
    Ok(match follow {
        Follow::Always => true,
        Follow::Never => false,
        Follow::UnlessFlag { arg, flag } => tracee.arg(arg)? & flag == 0,
        Follow::FromFlags => {
            let flags = flags.unwrap_or(0) as i32;
            flags & libc::O_NOFOLLOW == 0
                && flags & (libc::O_CREAT | libc::O_EXCL) != libc::O_CREAT | libc::O_EXCL
        }
    })
}

/// Canonical path of a path argument.
///
/// `Ok(Err(errno))` is a lookup failure the kernel would report too.
fn canonical(
    tracee: &dyn Tracee,
    proc: &TracedProcess,
    arg: PathArg,
    mode: CreateMode,
    follow: bool,
) -> Result<Result<PathBuf, Errno>, TraceError> {
    let pid = proc.pid;
    let addr = tracee.arg(arg.path)?;
    let dirfd = match arg.dirfd {
        Some(index) => Some(tracee.arg(index)? as i32),
        None => None,
    };

    if addr == 0 {
        return match dirfd {
            Some(fd) if arg.nullable => Ok(resolve::fd_path(pid, fd)),
            _ => Err(TraceError::BadAddress(0)),
        };
    }
    let raw = tracee.read_string(addr)?;
    if raw.is_empty() {
        return Ok(match dirfd {
            Some(fd) if arg.empty_fd => resolve::fd_path(pid, fd),
            _ => Err(Errno::NOENT),
        });
    }

    let raw = Path::new(OsStr::from_bytes(&raw));
    let base = match dirfd {
        Some(fd) if raw.is_relative() => match resolve::dir_fd_path(pid, fd) {
            Ok(dir) => dir,
            Err(errno) => return Ok(Err(errno)),
        },
        _ => proc.cwd.clone(),
    };
    Ok(resolve::resolve(pid, raw, &base, mode, follow))
}

fn check_path(
    tracee: &dyn Tracee,
    entry: &'static SyscallEntry,
    args: &'static [PathArg],
    mode: ModeArg,
    follow: Follow,
    proc: &TracedProcess,
) -> Result<Verdict, TraceError> {
    if !proc.policy.path {
        return Ok(Verdict::Allow);
    }

    let flags = match mode {
        ModeArg::None => None,
        ModeArg::OpenFlags(index) => Some(tracee.arg(index)?),
        ModeArg::OpenHow(index) => {
            let how = tracee.read_bytes(tracee.arg(index)?, 8)?;
            let mut word = [0u8; 8];
            word.copy_from_slice(&how);
            Some(u64::from_ne_bytes(word))
        }
        ModeArg::Access(index) => {
            if tracee.arg(index)? & libc::W_OK as u64 == 0 {
                return Ok(Verdict::AllowNonWrite);
            }
            None
        }
    };
    if flags.is_some_and(|flags| !open_writes(flags)) {
        return Ok(Verdict::AllowNonWrite);
    }

    let follow = follow_last(tracee, follow, flags)?;
    for &arg in args {
        let create = creation(arg.create, flags);
        let mode = match create {
            Creation::Exists => CreateMode::Existing,
            _ => CreateMode::MayCreate,
        };
        let path = match canonical(tracee, proc, arg, mode, follow)? {
            Ok(path) => path,
            Err(errno) => {
                trace!(pid = proc.pid, syscall = entry.name, %errno, "unresolvable path");
                return Ok(Verdict::deny(errno));
            }
        };
        if let Some(verdict) = check_write(entry, arg.path, create, &path, proc) {
            return Ok(verdict);
        }
    }
    Ok(Verdict::Allow)
}

fn check_write(
    entry: &'static SyscallEntry,
    position: usize,
    create: Creation,
    path: &Path,
    proc: &TracedProcess,
) -> Option<Verdict> {
    let policy = &proc.policy;
    if policy.write.contains(path) {
        return None;
    }
    if policy.predict.contains(path) {
        return Some(Verdict::Deny {
            ret: 0,
            violation: None,
        });
    }
    if create == Creation::Must && resolve::exists(path) {
        return Some(Verdict::deny(Errno::EXIST));
    }
    if entry.is_access() {
        return Some(Verdict::deny(Errno::ACCESS));
    }
    Some(Verdict::Deny {
        ret: -i64::from(libc::EPERM),
        violation: Some(Violation {
            kind: ViolationKind::Write,
            syscall: entry.name,
            arg: position,
            target: path.display().to_string(),
        }),
    })
}

fn check_exec(
    tracee: &dyn Tracee,
    entry: &'static SyscallEntry,
    arg: PathArg,
    follow: Follow,
    proc: &TracedProcess,
) -> Result<Verdict, TraceError> {
    if !proc.policy.exec || proc.exec_exempt {
        return Ok(Verdict::Allow);
    }
    let follow = follow_last(tracee, follow, None)?;
    let path = match canonical(tracee, proc, arg, CreateMode::Existing, follow)? {
        Ok(path) => path,
        Err(errno) => return Ok(Verdict::deny(errno)),
    };
    if proc.policy.exec_allow.contains(&path) {
        return Ok(Verdict::Allow);
    }
    Ok(Verdict::Deny {
        ret: -i64::from(libc::EACCES),
        violation: Some(Violation {
            kind: ViolationKind::Exec,
            syscall: entry.name,
            arg: arg.path,
            target: path.display().to_string(),
        }),
    })
}

/// Argument position of the address of a demultiplexed network call.
fn address_arg(call: NetCall) -> usize {
    match call {
        NetCall::Sendto => 4,
        NetCall::Connect | NetCall::Bind | NetCall::Sendmsg | NetCall::Socketcall => 1,
    }
}

fn check_net(
    tracee: &dyn Tracee,
    entry: &'static SyscallEntry,
    call: NetCall,
    proc: &mut TracedProcess,
    global: &GlobalPolicy,
) -> Result<Verdict, TraceError> {
    if !proc.policy.network {
        return Ok(Verdict::Allow);
    }
    let Some(dest) = net::read_destination(tracee, call, &proc.cwd)? else {
        return Ok(Verdict::Allow);
    };
    if dest.addr.is_unchecked() {
        return Ok(Verdict::Allow);
    }

    let bind = dest.call == NetCall::Bind;
    let policy = &proc.policy;
    let allowed = match policy.net_mode {
        NetMode::Allow => true,
        NetMode::Deny => global.whitelist.contains(&dest.addr),
        NetMode::Local if bind => dest.addr.is_local(true),
        NetMode::Local => {
            dest.addr.is_local(false)
                && (!policy.restrict_connect || global.whitelist.contains(&dest.addr))
        }
    };

    if !allowed {
        return Ok(Verdict::Deny {
            ret: -i64::from(libc::ECONNREFUSED),
            violation: Some(Violation {
                kind: ViolationKind::Network,
                syscall: entry.name,
                arg: address_arg(dest.call),
                target: dest.addr.to_string(),
            }),
        });
    }
    if bind {
        proc.pending_bind = Some(PendingBind {
            fd: dest.fd,
            addr: dest.addr,
        });
    }
    Ok(Verdict::Allow)
}
