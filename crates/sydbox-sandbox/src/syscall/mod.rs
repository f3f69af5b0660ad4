//! Syscall dispatch table.
//!
//! Each [`SyscallEntry`] says which arguments of a call are paths, whether
//! the call may create its target, how the final symlink is treated, and
//! which argument carries the open or access mode. Calls absent from the
//! table are never inspected.
//!
//! Numbers differ per personality; [`lookup`] maps `(personality, nr)` to the
//! entry through a table built once on first use.

mod table;

use std::collections::HashMap;
use std::sync::LazyLock;

use sydbox_sys::{Personality, StatKind};

pub use table::TABLE;

/// Whether the target of a path argument may or must be created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Creation {
    /// The target must exist.
    Exists,
    /// The target may be missing.
    May,
    /// The target must not exist (`EEXIST` otherwise).
    Must,
    /// Decided by the call's open flags (`O_CREAT`, `O_EXCL`).
    FromFlags,
}

/// A path argument, optionally relative to a dirfd argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathArg {
    pub dirfd: Option<usize>,
    pub path: usize,
    pub create: Creation,
    /// A NULL pointer means "operate on the dirfd itself".
    pub nullable: bool,
    /// An empty path refers to the dirfd itself (`AT_EMPTY_PATH`).
    pub empty_fd: bool,
}

impl PathArg {
    pub const fn new(path: usize, create: Creation) -> Self {
        Self {
            dirfd: None,
            path,
            create,
            nullable: false,
            empty_fd: false,
        }
    }

    pub const fn at(dirfd: usize, path: usize, create: Creation) -> Self {
        Self {
            dirfd: Some(dirfd),
            path,
            create,
            nullable: false,
            empty_fd: false,
        }
    }

    pub const fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub const fn empty_fd(mut self) -> Self {
        self.empty_fd = true;
        self
    }
}

/// Whether a symlink in final position is dereferenced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Follow {
    Always,
    Never,
    /// Follow unless `flag` is set in argument `arg`.
    UnlessFlag { arg: usize, flag: u64 },
    /// Decided by the call's open flags (`O_NOFOLLOW`, `O_CREAT|O_EXCL`).
    FromFlags,
}

/// Argument carrying an open or access mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeArg {
    None,
    /// `open(2)` flags in argument `n`.
    OpenFlags(usize),
    /// Pointer to a `struct open_how` in argument `n`.
    OpenHow(usize),
    /// `access(2)` mode in argument `n`.
    Access(usize),
}

/// Network calls carrying a destination address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetCall {
    Connect,
    Bind,
    Sendto,
    Sendmsg,
    /// i386 `socketcall(2)` multiplexer.
    Socketcall,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// A call that may write through one or two path arguments.
    Path {
        args: &'static [PathArg],
        mode: ModeArg,
        follow: Follow,
    },
    Exec { arg: PathArg, follow: Follow },
    /// A stat-family call (magic commands are interpreted here).
    Stat {
        arg: PathArg,
        buf: usize,
        layout: StatKind,
    },
    Chdir,
    Fchdir,
    Net(NetCall),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyscallEntry {
    pub name: &'static str,
    pub x86_64: Option<u64>,
    pub i386: Option<u64>,
    pub kind: Kind,
}

impl SyscallEntry {
    pub fn number(&self, personality: Personality) -> Option<u64> {
        match personality {
            Personality::X86_64 => self.x86_64,
            Personality::I386 => self.i386,
        }
    }

    /// `access(2)` family: denials are silent.
    pub fn is_access(&self) -> bool {
        matches!(
            self.kind,
            Kind::Path {
                mode: ModeArg::Access(_),
                ..
            }
        )
    }
}

static LOOKUP: LazyLock<HashMap<(Personality, u64), &'static SyscallEntry>> =
    LazyLock::new(|| {
        let mut map = HashMap::with_capacity(TABLE.len() * 2);
        for entry in TABLE {
            for personality in [Personality::X86_64, Personality::I386] {
                if let Some(nr) = entry.number(personality) {
                    map.insert((personality, nr), entry);
                }
            }
        }
        map
    });

/// Table entry for syscall `nr` under `personality`.
pub fn lookup(personality: Personality, nr: u64) -> Option<&'static SyscallEntry> {
    LOOKUP.get(&(personality, nr)).copied()
}

/// Name of an intercepted syscall, for diagnostics.
pub fn name(personality: Personality, nr: u64) -> &'static str {
    lookup(personality, nr).map_or("unknown", |e| e.name)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn numbers_are_unique() {
        for personality in [Personality::X86_64, Personality::I386] {
            let mut seen = HashSet::new();
            for entry in TABLE {
                if let Some(nr) = entry.number(personality) {
                    assert!(seen.insert(nr), "{personality}: {} reuses {nr}", entry.name);
                }
            }
        }
    }

    #[test]
    fn lookup_by_personality() {
        assert_eq!(lookup(Personality::X86_64, 90).unwrap().name, "chmod");
        assert_eq!(lookup(Personality::I386, 15).unwrap().name, "chmod");
        assert_eq!(lookup(Personality::I386, 102).unwrap().name, "socketcall");
        assert!(lookup(Personality::X86_64, 0).is_none());
        assert_eq!(name(Personality::X86_64, 59), "execve");
        assert_eq!(name(Personality::X86_64, 0), "unknown");
    }

    #[test]
    fn argument_indices_in_range() {
        for entry in TABLE {
            let args: Vec<PathArg> = match entry.kind {
                Kind::Path { args, .. } => args.to_vec(),
                Kind::Exec { arg, .. } | Kind::Stat { arg, .. } => vec![arg],
                _ => continue,
            };
            for arg in args {
                assert!(arg.path < 6, "{}", entry.name);
                assert!(arg.dirfd.is_none_or(|d| d < 6), "{}", entry.name);
            }
        }
    }

    #[test]
    fn access_family() {
        assert!(lookup(Personality::X86_64, 21).unwrap().is_access());
        assert!(!lookup(Personality::X86_64, 90).unwrap().is_access());
    }
}
