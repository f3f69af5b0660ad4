//! Traced process bookkeeping.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::path::PathBuf;

use sydbox_sys::Personality;

use crate::net::SocketAddress;
use crate::policy::ProcessPolicy;
use crate::syscall::SyscallEntry;

pub type Pid = libc::pid_t;

/// Syscall number a denied call is rewritten to. No kernel implements it,
/// so the call fails with `ENOSYS` without side effects.
pub const FAKED_SYSCALL: u64 = 0xbadca11;

/// Address handed to a `bind` that is still in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingBind {
    pub fd: i32,
    pub addr: SocketAddress,
}

/// A process under trace.
#[derive(Debug, Clone)]
pub struct TracedProcess {
    pub pid: Pid,
    pub personality: Personality,
    /// First stop not handled yet.
    pub needs_setup: bool,
    /// Between syscall-enter and syscall-exit.
    pub in_syscall: bool,
    /// A denial must be finished at syscall-exit.
    pub pending_deny: bool,
    pub faked_syscall_no: u64,
    pub faked_return: i64,
    /// Real syscall number seen at syscall-enter.
    pub syscall_no: u64,
    /// Table entry of the call in flight.
    pub current: Option<&'static SyscallEntry>,
    pub cwd: PathBuf,
    pub policy: ProcessPolicy,
    /// The launch exec of the eldest is not exec-sandboxed.
    pub exec_exempt: bool,
    /// Stopped before its parent's fork event; policy not inherited yet.
    pub awaiting_parent: bool,
    pub pending_bind: Option<PendingBind>,
}

impl TracedProcess {
    fn new(pid: Pid, policy: ProcessPolicy) -> Self {
        Self {
            pid,
            personality: Personality::default(),
            needs_setup: true,
            in_syscall: false,
            pending_deny: false,
            faked_syscall_no: FAKED_SYSCALL,
            faked_return: -1,
            syscall_no: 0,
            current: None,
            cwd: PathBuf::from("/"),
            policy,
            exec_exempt: false,
            awaiting_parent: false,
            pending_bind: None,
        }
    }

    /// Take over the inheritable state of `parent`.
    pub fn inherit(&mut self, parent: &TracedProcess) {
        self.policy = parent.policy.clone();
        self.cwd = parent.cwd.clone();
        self.personality = parent.personality;
    }
}

/// Every process under trace, keyed by pid.
#[derive(Debug)]
pub struct Registry {
    procs: HashMap<Pid, TracedProcess>,
    defaults: ProcessPolicy,
    eldest: Option<Pid>,
}

impl Registry {
    pub fn new(defaults: ProcessPolicy) -> Self {
        Self {
            procs: HashMap::new(),
            defaults,
            eldest: None,
        }
    }

    /// Insert `pid`, copying the policy of `parent` if it is traced, else
    /// the defaults. The first process ever created is the eldest.
    pub fn create(&mut self, pid: Pid, parent: Option<Pid>) -> &mut TracedProcess {
        let mut proc = TracedProcess::new(pid, self.defaults.clone());
        if let Some(parent) = parent.and_then(|p| self.procs.get(&p)) {
            proc.inherit(parent);
        }
        self.eldest.get_or_insert(pid);
        match self.procs.entry(pid) {
            Entry::Occupied(mut slot) => {
                slot.insert(proc);
                slot.into_mut()
            }
            Entry::Vacant(slot) => slot.insert(proc),
        }
    }

    /// Give a child held in `awaiting_parent` the state of `parent`.
    ///
    /// Returns false if either process is unknown.
    pub fn adopt(&mut self, child: Pid, parent: Pid) -> bool {
        let Some(parent) = self.procs.get(&parent).cloned() else {
            return false;
        };
        let Some(child) = self.procs.get_mut(&child) else {
            return false;
        };
        child.inherit(&parent);
        child.awaiting_parent = false;
        true
    }

    /// Move the entry of `former` to `pid`. A non-leader thread that execs
    /// takes over the thread group id.
    pub fn rename(&mut self, former: Pid, pid: Pid) {
        if former == pid {
            return;
        }
        if let Some(mut proc) = self.procs.remove(&former) {
            proc.pid = pid;
            self.procs.insert(pid, proc);
        }
    }

    pub fn find(&self, pid: Pid) -> Option<&TracedProcess> {
        self.procs.get(&pid)
    }

    pub fn find_mut(&mut self, pid: Pid) -> Option<&mut TracedProcess> {
        self.procs.get_mut(&pid)
    }

    pub fn contains(&self, pid: Pid) -> bool {
        self.procs.contains_key(&pid)
    }

    /// Remove `pid`. Returns true if the registry is now empty.
    pub fn remove(&mut self, pid: Pid) -> bool {
        self.procs.remove(&pid);
        self.procs.is_empty()
    }

    pub fn eldest(&self) -> Option<Pid> {
        self.eldest
    }

    pub fn pids(&self) -> Vec<Pid> {
        self.procs.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.procs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.procs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::prefix::PrefixList;

    #[test]
    fn create_then_find() {
        let mut reg = Registry::new(ProcessPolicy::default());
        reg.create(666, None);
        let proc = reg.find(666).unwrap();
        assert!(proc.needs_setup);
        assert!(!proc.in_syscall);
        assert_eq!(proc.faked_syscall_no, 0xbadca11);
        assert_eq!(proc.faked_return, -1);
        assert_eq!(reg.eldest(), Some(666));
    }

    #[test]
    fn remove_keeps_others() {
        let mut reg = Registry::new(ProcessPolicy::default());
        for pid in [666, 667, 668] {
            reg.create(pid, None);
        }
        assert!(!reg.remove(666));
        assert!(reg.find(666).is_none());
        assert!(reg.find(667).is_some());
        assert!(reg.find(668).is_some());
        assert!(!reg.remove(667));
        assert!(reg.remove(668));
        assert!(reg.is_empty());
        assert_eq!(reg.eldest(), Some(666));
    }

    #[test]
    fn fork_copies_policy() {
        let mut reg = Registry::new(ProcessPolicy::default());
        let parent = reg.create(1, None);
        parent.policy.network = false;
        parent.policy.write = ["/tmp"].iter().collect::<PrefixList>();
        parent.cwd = PathBuf::from("/work");

        let child = reg.create(2, Some(1));
        assert!(!child.policy.network);
        assert!(child.policy.write.contains(Path::new("/tmp/x")));
        assert_eq!(child.cwd, PathBuf::from("/work"));

        child.policy.write.push("/home");
        child.policy.network = true;

        let parent = reg.find(1).unwrap();
        assert!(!parent.policy.network);
        assert_eq!(parent.policy.write.len(), 1);
        assert!(!parent.policy.write.contains(Path::new("/home")));
    }

    #[test]
    fn adopt_held_child() {
        let mut reg = Registry::new(ProcessPolicy::default());
        let parent = reg.create(10, None);
        parent.policy.exec = true;
        parent.cwd = PathBuf::from("/src");

        let child = reg.create(11, None);
        child.awaiting_parent = true;
        assert!(!child.policy.exec);

        assert!(reg.adopt(11, 10));
        let child = reg.find(11).unwrap();
        assert!(!child.awaiting_parent);
        assert!(child.policy.exec);
        assert_eq!(child.cwd, PathBuf::from("/src"));
        assert!(!reg.adopt(12, 10));
    }

    #[test]
    fn rename_after_thread_exec() {
        let mut reg = Registry::new(ProcessPolicy::default());
        reg.create(20, None);
        reg.create(21, None).in_syscall = true;
        reg.rename(21, 20);
        assert_eq!(reg.len(), 1);
        let proc = reg.find(20).unwrap();
        assert_eq!(proc.pid, 20);
        assert!(proc.in_syscall);
    }

    #[test]
    fn unknown_parent_uses_defaults() {
        let defaults = ProcessPolicy {
            exec: true,
            ..ProcessPolicy::default()
        };
        let mut reg = Registry::new(defaults);
        assert!(reg.create(5, Some(4)).policy.exec);
    }
}
