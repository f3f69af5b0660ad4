//! Termination signals observed by the trace loop.
//!
//! The handlers installed here only record the signal number. They are
//! installed without `SA_RESTART`, so a blocking `waitpid` in the loop fails
//! with `EINTR` and the loop notices the request at once.

use std::sync::atomic::{AtomicI32, Ordering};

use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};

static PENDING: AtomicI32 = AtomicI32::new(0);

extern "C" fn record(sig: libc::c_int) {
    PENDING.store(sig, Ordering::SeqCst);
}

/// Install the handlers for `SIGINT`, `SIGTERM` and `SIGHUP`.
pub fn install() -> nix::Result<()> {
    let action = SigAction::new(SigHandler::Handler(record), SaFlags::empty(), SigSet::empty());
    for sig in [Signal::SIGINT, Signal::SIGTERM, Signal::SIGHUP] {
        // SAFETY: the handler only stores to an atomic.
        unsafe { signal::sigaction(sig, &action) }?;
    }
    Ok(())
}

/// The last termination signal received, if any.
pub fn pending() -> Option<i32> {
    match PENDING.load(Ordering::SeqCst) {
        0 => None,
        sig => Some(sig),
    }
}

#[cfg(test)]
pub(crate) fn clear() {
    PENDING.store(0, Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_signal() {
        clear();
        assert_eq!(pending(), None);
        record(libc::SIGTERM);
        assert_eq!(pending(), Some(libc::SIGTERM));
        clear();
    }
}
