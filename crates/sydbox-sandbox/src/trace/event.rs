//! Classification of wait statuses into trace events.

use sydbox_sys::wait::WaitStatus;

/// What a `waitpid` report means for the trace loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// Syscall-enter or syscall-exit stop.
    Syscall,
    /// `fork`, `vfork` or `clone` event in the parent.
    Fork,
    /// Successful exec, reported before the syscall-exit stop.
    Exec,
    /// Any other ptrace event (`VFORK_DONE`, `EXIT`).
    OtherEvent(i32),
    /// Signal-delivery stop, group-stop or the initial stop of a new tracee.
    Signal(i32),
    Exited(i32),
    Killed(i32),
    Unknown(i32),
}

impl From<WaitStatus> for Event {
    fn from(status: WaitStatus) -> Self {
        match status {
            WaitStatus::Exited(code) => Self::Exited(code),
            WaitStatus::Signaled(sig) => Self::Killed(sig),
            WaitStatus::SyscallStop => Self::Syscall,
            WaitStatus::Event(
                libc::PTRACE_EVENT_FORK | libc::PTRACE_EVENT_VFORK | libc::PTRACE_EVENT_CLONE,
            ) => Self::Fork,
            WaitStatus::Event(libc::PTRACE_EVENT_EXEC) => Self::Exec,
            WaitStatus::Event(event) => Self::OtherEvent(event),
            WaitStatus::Stopped(sig) => Self::Signal(sig),
            WaitStatus::Other(raw) => Self::Unknown(raw),
        }
    }
}

impl Event {
    /// The process is gone after this event.
    pub fn is_exit(self) -> bool {
        matches!(self, Self::Exited(_) | Self::Killed(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fork_family() {
        for event in [
            libc::PTRACE_EVENT_FORK,
            libc::PTRACE_EVENT_VFORK,
            libc::PTRACE_EVENT_CLONE,
        ] {
            assert_eq!(Event::from(WaitStatus::Event(event)), Event::Fork);
        }
        assert_eq!(
            Event::from(WaitStatus::Event(libc::PTRACE_EVENT_VFORK_DONE)),
            Event::OtherEvent(libc::PTRACE_EVENT_VFORK_DONE)
        );
    }

    #[test]
    fn exits() {
        assert!(Event::from(WaitStatus::Exited(0)).is_exit());
        assert!(Event::from(WaitStatus::Signaled(9)).is_exit());
        assert!(!Event::from(WaitStatus::SyscallStop).is_exit());
        assert_eq!(
            Event::from(WaitStatus::Event(libc::PTRACE_EVENT_EXEC)),
            Event::Exec
        );
    }
}
