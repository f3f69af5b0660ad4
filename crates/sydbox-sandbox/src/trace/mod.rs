//! The trace event loop.
//!
//! A single thread blocks in `waitpid(-1, __WALL)` and handles one stop at a
//! time: syscall stops go through the policy [`pipeline`](crate::pipeline),
//! fork events register the new child with a copy of its parent's policy,
//! exec events re-detect the personality and arm pending locks, and signal
//! stops are re-injected. The loop ends when the last traced process exits,
//! or with the eldest under [`WaitMode::Eldest`]. Any error ends the loop
//! with every traced process killed.
//!
//! Processes are reached through [`Control`]; [`Ptrace`] is the one used
//! outside tests.
//!
//! ## Fork Ordering
//!
//! A new child may report its initial stop before the parent reports the
//! fork event. Such a child is set up but held stopped until the parent's
//! event names it; only then is the parent's policy copied and the child
//! resumed.

mod control;
mod event;
pub mod launch;
pub mod signal;

use rustix::io::Errno;
use sydbox_sys::{CheckError, TraceError};
use thiserror::Error;
use tracing::{debug, info, trace, warn};

pub use control::{Control, Ptrace};
pub use event::Event;
pub use launch::{LaunchError, ResolveError, resolve_binary};

use crate::pipeline;
use crate::policy::{GlobalPolicy, Lock, Policy, WaitMode};
use crate::registry::{Pid, Registry};
use crate::report::FilterError;
use crate::validate::{ValidationError, validate_cmd, validate_pids};

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("system check: {0}")]
    SystemCheck(#[from] CheckError),

    #[error("validation: {0}")]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Launch(#[from] LaunchError),

    #[error(transparent)]
    Filter(#[from] FilterError),

    #[error("installing signal handlers: {0}")]
    Signals(#[from] nix::Error),

    #[error("{op} {pid}: {errno}")]
    Ptrace {
        op: &'static str,
        pid: Pid,
        errno: Errno,
    },

    #[error("tracing {pid}: {source}")]
    Trace {
        pid: Pid,
        #[source]
        source: TraceError,
    },

    #[error("wait: {0}")]
    Wait(Errno),

    #[error("interrupted by signal {0}")]
    Interrupted(i32),
}

/// How the eldest traced process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Code(i32),
    Signal(i32),
}

impl ExitStatus {
    /// Shell convention: the exit code, or `128 + signal`.
    pub fn code(self) -> i32 {
        match self {
            Self::Code(code) => code,
            Self::Signal(sig) => 128 + sig,
        }
    }

    pub fn success(self) -> bool {
        self == Self::Code(0)
    }
}

/// Tracer of one process tree.
#[derive(Debug)]
pub struct Tracer<C: Control = Ptrace> {
    control: C,
    registry: Registry,
    global: GlobalPolicy,
    eldest_status: Option<ExitStatus>,
}

impl Tracer {
    pub fn new(policy: &Policy) -> Result<Self, SandboxError> {
        Self::with_control(policy, Ptrace)
    }

    /// Launch `cmd` under trace. The command's own exec is not
    /// exec-sandboxed.
    pub fn spawn<S: AsRef<str>>(&mut self, cmd: &[S]) -> Result<Pid, SandboxError> {
        validate_cmd(cmd)?;
        sydbox_sys::check().map_err(|e| e.clone())?;
        let binary = resolve_binary(cmd[0].as_ref())?;

        let pid = launch::spawn(&binary, cmd)?;
        info!(pid, binary = %binary.display(), "launched");
        self.registry.create(pid, None).exec_exempt = true;
        self.setup(pid)?;
        self.resume(pid, 0)?;
        Ok(pid)
    }

    /// Attach to every thread of each of `pids`. The first pid is the eldest.
    pub fn attach(&mut self, pids: &[Pid]) -> Result<(), SandboxError> {
        validate_pids(pids)?;
        sydbox_sys::check().map_err(|e| e.clone())?;
        for &pid in pids {
            for tid in launch::attach(pid)? {
                debug!(pid, tid, "attached");
                self.registry.create(tid, None);
            }
        }
        Ok(())
    }
}

impl<C: Control> Tracer<C> {
    pub fn with_control(policy: &Policy, control: C) -> Result<Self, SandboxError> {
        Ok(Self {
            control,
            registry: Registry::new(policy.process.clone()),
            global: GlobalPolicy::new(policy)?,
            eldest_status: None,
        })
    }

    /// Access violations reported so far.
    pub fn violations(&self) -> u64 {
        self.global.violations
    }

    /// Trace until the tree exits.
    ///
    /// Under [`WaitMode::Eldest`] this returns as soon as the eldest exits;
    /// the processes still running are killed when the tracer exits. On any
    /// error every traced process is killed before the error is returned.
    pub fn run(&mut self) -> Result<ExitStatus, SandboxError> {
        self.control.install_signals()?;
        let result = self.trace();
        if let Err(e) = &result {
            warn!(error = %e, "killing traced processes");
            self.kill_all();
        }
        result
    }

    fn trace(&mut self) -> Result<ExitStatus, SandboxError> {
        loop {
            if let Some(sig) = self.control.interrupted() {
                return Err(SandboxError::Interrupted(sig));
            }
            let (pid, status) = match self.control.wait() {
                Ok(stop) => stop,
                Err(errno) if errno == Errno::INTR => continue,
                Err(errno) if errno == Errno::CHILD => break,
                Err(errno) => return Err(SandboxError::Wait(errno)),
            };
            let event = Event::from(status);
            trace!(pid, ?event, "stop");
            if self.handle(pid, event)? {
                break;
            }
        }
        Ok(self.eldest_status.unwrap_or(ExitStatus::Code(0)))
    }

    /// Handle one stop. Returns true when tracing is over.
    fn handle(&mut self, pid: Pid, event: Event) -> Result<bool, SandboxError> {
        match event {
            Event::Syscall => return self.on_syscall(pid),
            Event::Fork => self.on_fork(pid)?,
            Event::Exec => self.on_exec(pid)?,
            Event::Signal(sig) => self.on_signal(pid, sig)?,
            Event::OtherEvent(_) => self.resume(pid, 0)?,
            Event::Exited(code) => return Ok(self.on_exit(pid, ExitStatus::Code(code))),
            Event::Killed(sig) => return Ok(self.on_exit(pid, ExitStatus::Signal(sig))),
            Event::Unknown(raw) => debug!(pid, raw, "ignoring wait status"),
        }
        Ok(false)
    }

    fn on_syscall(&mut self, pid: Pid) -> Result<bool, SandboxError> {
        let Some(proc) = self.registry.find_mut(pid) else {
            self.resume(pid, 0)?;
            return Ok(false);
        };
        let tracee = self.control.tracee(pid, proc.personality);
        let result = if proc.in_syscall {
            proc.in_syscall = false;
            pipeline::exit(&tracee, proc, &mut self.global)
        } else {
            proc.in_syscall = true;
            pipeline::enter(&tracee, proc, &mut self.global)
        };
        match result {
            Ok(()) => self.resume(pid, 0)?,
            Err(TraceError::ProcessGone) => {
                debug!(pid, "process went away mid-syscall");
                // Its exit report, if one still comes, overrides this.
                return Ok(self.on_exit(pid, ExitStatus::Signal(libc::SIGKILL)));
            }
            Err(TraceError::BadAddress(addr)) => {
                debug!(pid, addr, "unreadable syscall argument");
                self.resume(pid, 0)?;
            }
            Err(source) => return Err(SandboxError::Trace { pid, source }),
        }
        Ok(false)
    }

    fn on_fork(&mut self, parent: Pid) -> Result<(), SandboxError> {
        let child = match self.control.event_msg(parent) {
            Ok(msg) => msg as Pid,
            Err(errno) if errno == Errno::SRCH => return Ok(()),
            Err(errno) => {
                return Err(SandboxError::Ptrace {
                    op: "geteventmsg",
                    pid: parent,
                    errno,
                });
            }
        };
        match self.registry.find(child).map(|proc| proc.awaiting_parent) {
            Some(true) => {
                self.registry.adopt(child, parent);
                debug!(parent, child, "released held child");
                self.resume(child, 0)?;
            }
            Some(false) => {}
            None => {
                self.registry.create(child, Some(parent));
                debug!(parent, child, "new child");
            }
        }
        self.resume(parent, 0)
    }

    fn on_exec(&mut self, pid: Pid) -> Result<(), SandboxError> {
        if let Ok(former) = self.control.event_msg(pid) {
            self.registry.rename(former as Pid, pid);
        }
        if self.registry.contains(pid) {
            let personality = match self.control.detect(pid) {
                Ok(personality) => personality,
                Err(e) if e.is_gone() => return Ok(()),
                Err(source) => return Err(SandboxError::Trace { pid, source }),
            };
            if let Some(proc) = self.registry.find_mut(pid) {
                proc.personality = personality;
                proc.exec_exempt = false;
                if proc.policy.lock == Lock::PendingExec {
                    debug!(pid, "magic commands locked");
                    proc.policy.lock = Lock::Set;
                }
                trace!(pid, %personality, "exec");
            }
        }
        self.resume(pid, 0)
    }

    fn on_signal(&mut self, pid: Pid, sig: i32) -> Result<(), SandboxError> {
        let Some(proc) = self.registry.find(pid) else {
            // Initial stop of a child whose parent has not reported the fork.
            self.registry.create(pid, None).awaiting_parent = true;
            debug!(pid, "holding child until its parent's fork event");
            return self.setup(pid);
        };
        if proc.needs_setup {
            self.setup(pid)?;
            let sig = if sig == libc::SIGSTOP { 0 } else { sig };
            return self.resume(pid, sig);
        }
        // Resuming a group-stop must not inject the stop signal again.
        let group_stop = self.control.group_stop(pid);
        let sig = if group_stop { 0 } else { sig };
        trace!(pid, signal = sig, group_stop, "signal");
        self.resume(pid, sig)
    }

    fn on_exit(&mut self, pid: Pid, status: ExitStatus) -> bool {
        debug!(pid, ?status, "exited");
        if self.registry.eldest() == Some(pid) {
            self.eldest_status = Some(status);
            if self.global.wait == WaitMode::Eldest {
                info!(pid, ?status, "eldest exited");
                self.registry.remove(pid);
                return true;
            }
        }
        self.registry.remove(pid)
    }

    /// First-stop setup: options, personality, cwd.
    fn setup(&mut self, pid: Pid) -> Result<(), SandboxError> {
        match self.control.set_options(pid) {
            Ok(()) => {}
            Err(errno) if errno == Errno::SRCH => return Ok(()),
            Err(errno) => {
                return Err(SandboxError::Ptrace {
                    op: "setoptions",
                    pid,
                    errno,
                });
            }
        }
        let personality = match self.control.detect(pid) {
            Ok(personality) => personality,
            Err(e) if e.is_gone() => return Ok(()),
            Err(source) => return Err(SandboxError::Trace { pid, source }),
        };
        let cwd = self.control.cwd(pid);
        if let Some(proc) = self.registry.find_mut(pid) {
            proc.personality = personality;
            proc.needs_setup = false;
            match cwd {
                Ok(cwd) => proc.cwd = cwd,
                Err(errno) => warn!(pid, %errno, "failed to read cwd"),
            }
            trace!(pid, %personality, "set up");
        }
        Ok(())
    }

    fn resume(&mut self, pid: Pid, sig: i32) -> Result<(), SandboxError> {
        match self.control.resume(pid, sig) {
            Ok(()) => Ok(()),
            // Dead; its exit is reported separately.
            Err(errno) if errno == Errno::SRCH => {
                debug!(pid, "resume: process gone");
                Ok(())
            }
            Err(errno) => Err(SandboxError::Ptrace {
                op: "resume",
                pid,
                errno,
            }),
        }
    }

    /// Kill every traced process and reap what can be reaped.
    pub fn kill_all(&mut self) {
        for pid in self.registry.pids() {
            if let Err(errno) = self.control.kill(pid) {
                debug!(pid, %errno, "kill failed");
            }
        }
        while !self.registry.is_empty() {
            match self.control.wait() {
                Ok((pid, status)) if Event::from(status).is_exit() => {
                    self.registry.remove(pid);
                }
                Ok(_) => {}
                Err(errno) if errno == Errno::INTR => {}
                Err(_) => break,
            }
        }
    }
}

/// Launch `cmd` under `policy` and trace it to the end.
pub fn run<S: AsRef<str>>(policy: &Policy, cmd: &[S]) -> Result<ExitStatus, SandboxError> {
    let mut tracer = Tracer::new(policy)?;
    tracer.spawn(cmd)?;
    tracer.run()
}
