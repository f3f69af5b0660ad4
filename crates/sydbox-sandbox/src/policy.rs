//! Sandbox policy.
//!
//! A [`Policy`] describes the startup state of the sandbox. It is split in
//! two when tracing starts:
//!
//! - [`ProcessPolicy`] is seeded into the eldest process and copied into
//!   every child at fork time. Each copy evolves independently.
//! - [`GlobalPolicy`] is shared by the whole process tree (network
//!   whitelist, violation filters, wait mode).
//!
//! ## Example
//!
//! ```ignore
//! use sydbox_sandbox::{NetMode, Policy};
//!
//! let policy = Policy::new()
//!     .write("/tmp")
//!     .predict("/dev")
//!     .network_sandbox(true)
//!     .net_mode(NetMode::Local);
//! ```
//!
//! ## Defaults
//!
//! | Field | Default |
//! |-------|---------|
//! | `path` | true (sandboxed) |
//! | `exec` | false |
//! | `network` | false |
//! | `net_mode` | `allow` |
//! | `restrict_connect` | false |
//! | `lock` | `unset` |
//! | `wait` | `all` |

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::net::{NetAddr, NetWhitelist};
use crate::prefix::PrefixList;
use crate::report::{FilterError, Filters};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} {value:?}")]
pub struct ParseEnumError {
    kind: &'static str,
    value: String,
}

/// What network sandboxing lets through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NetMode {
    /// Everything.
    #[default]
    Allow,
    /// Whitelisted destinations only.
    Deny,
    /// Loopback and UNIX sockets only.
    Local,
}

impl FromStr for NetMode {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "allow" => Ok(Self::Allow),
            "deny" => Ok(Self::Deny),
            "local" => Ok(Self::Local),
            _ => Err(ParseEnumError {
                kind: "network mode",
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for NetMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Allow => "allow",
            Self::Deny => "deny",
            Self::Local => "local",
        })
    }
}

/// Magic command lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Lock {
    #[default]
    Unset,
    Set,
    /// Becomes `Set` on the next successful exec.
    PendingExec,
}

impl FromStr for Lock {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unset" | "off" => Ok(Self::Unset),
            "set" | "on" => Ok(Self::Set),
            "exec" => Ok(Self::PendingExec),
            _ => Err(ParseEnumError {
                kind: "lock state",
                value: s.to_string(),
            }),
        }
    }
}

/// When the trace loop ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaitMode {
    /// Once every traced process has exited.
    #[default]
    All,
    /// As soon as the eldest process exits.
    Eldest,
}

impl FromStr for WaitMode {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(Self::All),
            "eldest" => Ok(Self::Eldest),
            _ => Err(ParseEnumError {
                kind: "wait mode",
                value: s.to_string(),
            }),
        }
    }
}

/// Policy carried by each traced process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessPolicy {
    pub path: bool,
    pub exec: bool,
    pub network: bool,
    pub net_mode: NetMode,
    pub restrict_connect: bool,
    pub lock: Lock,
    pub write: PrefixList,
    /// Writes here are denied with a fake success and no report.
    pub predict: PrefixList,
    pub exec_allow: PrefixList,
}

impl Default for ProcessPolicy {
    fn default() -> Self {
        Self {
            path: true,
            exec: false,
            network: false,
            net_mode: NetMode::Allow,
            restrict_connect: false,
            lock: Lock::Unset,
            write: PrefixList::new(),
            predict: PrefixList::new(),
            exec_allow: PrefixList::new(),
        }
    }
}

/// State shared by the whole traced tree.
#[derive(Debug, Clone, Default)]
pub struct GlobalPolicy {
    pub whitelist: NetWhitelist,
    pub filters: Filters,
    pub wait: WaitMode,
    /// Violations reported so far.
    pub violations: u64,
}

impl GlobalPolicy {
    pub fn new(policy: &Policy) -> Result<Self, FilterError> {
        Ok(Self {
            whitelist: policy.whitelist.clone(),
            filters: Filters::from_patterns(&policy.filters)?,
            wait: policy.wait,
            violations: 0,
        })
    }
}

/// Startup policy of a sandbox.
#[derive(Debug, Clone, Default)]
pub struct Policy {
    pub process: ProcessPolicy,
    pub whitelist: NetWhitelist,
    pub filters: Vec<String>,
    pub wait: WaitMode,
}

impl Policy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow writes beneath `path` (taken verbatim).
    pub fn write(mut self, path: impl AsRef<std::path::Path>) -> Self {
        self.process.write.push(path);
        self
    }

    /// Fake successful writes beneath `path`.
    pub fn predict(mut self, path: impl AsRef<std::path::Path>) -> Self {
        self.process.predict.push(path);
        self
    }

    /// Allow exec of binaries beneath `path`.
    pub fn exec_allow(mut self, path: impl AsRef<std::path::Path>) -> Self {
        self.process.exec_allow.push(path);
        self
    }

    pub fn path_sandbox(mut self, enabled: bool) -> Self {
        self.process.path = enabled;
        self
    }

    pub fn exec_sandbox(mut self, enabled: bool) -> Self {
        self.process.exec = enabled;
        self
    }

    pub fn network_sandbox(mut self, enabled: bool) -> Self {
        self.process.network = enabled;
        self
    }

    pub fn net_mode(mut self, mode: NetMode) -> Self {
        self.process.net_mode = mode;
        self
    }

    pub fn restrict_connect(mut self, enabled: bool) -> Self {
        self.process.restrict_connect = enabled;
        self
    }

    pub fn lock(mut self, lock: Lock) -> Self {
        self.process.lock = lock;
        self
    }

    pub fn wait(mut self, mode: WaitMode) -> Self {
        self.wait = mode;
        self
    }

    pub fn whitelist(mut self, addr: NetAddr) -> Self {
        self.whitelist.add(addr);
        self
    }

    /// Silence violations whose target matches `pattern`.
    pub fn filter(mut self, pattern: impl Into<String>) -> Self {
        self.filters.push(pattern.into());
        self
    }
}
