//! In-band control commands.
//!
//! A traced process reconfigures its own sandbox by calling `stat(2)` on a
//! path under [`CONTROL_DIR`]. The path never exists; the call is answered
//! with a synthetic directory and the command takes effect as a side effect.
//! Commands are refused (passed through to the kernel) once the process's
//! lock is set.
//!
//! | Path | Effect |
//! |------|--------|
//! | `/dev/sydbox` | presence check |
//! | `enabled` | succeeds only if path sandboxing is on |
//! | `on`, `off`, `toggle` | path sandboxing |
//! | `lock`, `exec_lock` | lock now, or at the next exec |
//! | `wait/all`, `wait/eldest` | termination policy |
//! | `write/P`, `unwrite/P` | write prefixes |
//! | `predict/P`, `unpredict/P` | predict prefixes |
//! | `sandbox/exec`, `sandunbox/exec` | exec sandboxing |
//! | `addexec/P`, `rmexec/P` | exec prefixes |
//! | `sandbox/net`, `sandunbox/net` | network sandboxing |
//! | `addfilter/G`, `rmfilter/G` | violation filters |
//! | `net/allow`, `net/deny`, `net/local` | network mode |
//! | `net/restrict/connect` | toggle restrict-connect |
//! | `net/whitelist/ADDR` | whitelist a destination |

use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use crate::net::{AddrParseError, NetAddr};
use crate::policy::{GlobalPolicy, Lock, NetMode, WaitMode};
use crate::registry::TracedProcess;

pub const CONTROL_DIR: &str = "/dev/sydbox";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Presence,
    Enabled,
    On,
    Off,
    Toggle,
    Lock,
    ExecLock,
    Wait(WaitMode),
    Write(PathBuf),
    Unwrite(PathBuf),
    Predict(PathBuf),
    Unpredict(PathBuf),
    SandboxExec(bool),
    AddExec(PathBuf),
    RmExec(PathBuf),
    SandboxNet(bool),
    AddFilter(String),
    RmFilter(String),
    NetMode(NetMode),
    RestrictConnect,
    Whitelist(NetAddr),
}

/// Why a path under the control directory is not a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invalid {
    Unknown(String),
    Address(AddrParseError),
}

impl Command {
    /// Parse a raw path. `None` if it is not under the control directory.
    pub fn parse(raw: &[u8]) -> Option<Result<Self, Invalid>> {
        let rest = raw.strip_prefix(CONTROL_DIR.as_bytes())?;
        if rest.is_empty() {
            return Some(Ok(Self::Presence));
        }
        let rest = rest.strip_prefix(b"/")?;
        let rest = String::from_utf8_lossy(rest);
        Some(Self::parse_command(&rest))
    }

    fn parse_command(cmd: &str) -> Result<Self, Invalid> {
        let command = match cmd {
            "" => Self::Presence,
            "enabled" => Self::Enabled,
            "on" => Self::On,
            "off" => Self::Off,
            "toggle" => Self::Toggle,
            "lock" => Self::Lock,
            "exec_lock" => Self::ExecLock,
            "wait/all" => Self::Wait(WaitMode::All),
            "wait/eldest" => Self::Wait(WaitMode::Eldest),
            "sandbox/exec" => Self::SandboxExec(true),
            "sandunbox/exec" => Self::SandboxExec(false),
            "sandbox/net" => Self::SandboxNet(true),
            "sandunbox/net" => Self::SandboxNet(false),
            "net/allow" => Self::NetMode(NetMode::Allow),
            "net/deny" => Self::NetMode(NetMode::Deny),
            "net/local" => Self::NetMode(NetMode::Local),
            "net/restrict/connect" => Self::RestrictConnect,
            _ => return Self::parse_with_arg(cmd),
        };
        Ok(command)
    }

    fn parse_with_arg(cmd: &str) -> Result<Self, Invalid> {
        let unknown = || Invalid::Unknown(cmd.to_string());
        let (name, arg) = cmd.split_once('/').ok_or_else(unknown)?;
        if arg.is_empty() {
            return Err(unknown());
        }
        if name == "net" {
            let addr = arg.strip_prefix("whitelist/").ok_or_else(unknown)?;
            return addr
                .parse()
                .map(Self::Whitelist)
                .map_err(Invalid::Address);
        }
        let path = || PathBuf::from(format!("/{arg}"));
        Ok(match name {
            "write" => Self::Write(path()),
            "unwrite" => Self::Unwrite(path()),
            "predict" => Self::Predict(path()),
            "unpredict" => Self::Unpredict(path()),
            "addexec" => Self::AddExec(path()),
            "rmexec" => Self::RmExec(path()),
            "addfilter" => Self::AddFilter(format!("/{arg}")),
            "rmfilter" => Self::RmFilter(format!("/{arg}")),
            _ => return Err(unknown()),
        })
    }
}

/// Spell `raw` as `/dev/sydbox[/...]` if it names the control directory.
///
/// Leading components are anchored at `cwd` and normalized lexically
/// (`/dev//sydbox`, `/dev/./sydbox`, `sydbox` from `/dev`). Everything past
/// the control directory is kept verbatim: whitelist addresses contain `//`.
pub fn control_path(raw: &[u8], cwd: &Path) -> Option<Vec<u8>> {
    if !raw.windows(6).any(|w| w == b"sydbox") {
        return None;
    }
    let mut joined = Vec::with_capacity(raw.len() + 1);
    if !raw.starts_with(b"/") {
        joined.extend_from_slice(cwd.as_os_str().as_bytes());
        joined.push(b'/');
    }
    joined.extend_from_slice(raw);

    let mut acc = PathBuf::from("/");
    let mut rest = &joined[..];
    loop {
        let start = rest.iter().position(|&b| b != b'/').unwrap_or(rest.len());
        rest = &rest[start..];
        if acc == Path::new(CONTROL_DIR) {
            let mut out = CONTROL_DIR.as_bytes().to_vec();
            if !rest.is_empty() {
                out.push(b'/');
                out.extend_from_slice(rest);
            }
            return Some(out);
        }
        if rest.is_empty() {
            return None;
        }
        let end = rest.iter().position(|&b| b == b'/').unwrap_or(rest.len());
        match &rest[..end] {
            b"." => {}
            b".." => {
                acc.pop();
            }
            comp => acc.push(OsStr::from_bytes(comp)),
        }
        rest = &rest[end..];
    }
}

/// Result of executing a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Applied: answer with a synthetic directory.
    Done,
    /// Let the kernel answer (`ENOENT`).
    PassThrough,
    /// Refused: fail the call with this errno.
    Failed(i32),
}

/// Apply `command` on behalf of `proc`.
pub fn execute(command: Command, proc: &mut TracedProcess, global: &mut GlobalPolicy) -> Outcome {
    let policy = &mut proc.policy;
    match command {
        Command::Presence => {}
        Command::Enabled => {
            if !policy.path {
                return Outcome::PassThrough;
            }
        }
        Command::On => policy.path = true,
        Command::Off => policy.path = false,
        Command::Toggle => policy.path = !policy.path,
        Command::Lock => policy.lock = Lock::Set,
        Command::ExecLock => policy.lock = Lock::PendingExec,
        Command::Wait(mode) => global.wait = mode,
        Command::Write(path) => policy.write.push(path),
        Command::Unwrite(path) => {
            policy.write.delete(path);
        }
        Command::Predict(path) => policy.predict.push(path),
        Command::Unpredict(path) => {
            policy.predict.delete(path);
        }
        Command::SandboxExec(on) => policy.exec = on,
        Command::AddExec(path) => policy.exec_allow.push(path),
        Command::RmExec(path) => {
            policy.exec_allow.delete(path);
        }
        Command::SandboxNet(on) => policy.network = on,
        Command::AddFilter(pattern) => {
            if let Err(e) = global.filters.add(&pattern) {
                tracing::warn!(pid = proc.pid, error = %e, "rejected filter");
                return Outcome::Failed(libc::EINVAL);
            }
        }
        Command::RmFilter(pattern) => {
            global.filters.remove(&pattern);
        }
        Command::NetMode(mode) => policy.net_mode = mode,
        Command::RestrictConnect => policy.restrict_connect = !policy.restrict_connect,
        Command::Whitelist(addr) => {
            global.whitelist.add(addr);
        }
    }
    Outcome::Done
}

/// Lossy rendering of a raw path for logs.
pub fn display(raw: &[u8]) -> std::borrow::Cow<'_, str> {
    OsStr::from_bytes(raw).to_string_lossy()
}
