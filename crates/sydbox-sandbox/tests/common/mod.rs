//! Common utilities for trace tests.

use std::sync::{Mutex, MutexGuard};

use sydbox_sandbox::{ExitStatus, Policy, Tracer};

/// The tracer reaps any child of the test process, so traced runs must
/// not overlap.
static SERIAL: Mutex<()> = Mutex::new(());

fn serial() -> MutexGuard<'static, ()> {
    SERIAL.lock().unwrap_or_else(|e| e.into_inner())
}

/// Result of a traced run.
#[derive(Debug)]
pub struct Traced {
    pub status: ExitStatus,
    pub violations: u64,
}

impl Traced {
    pub fn success(&self) -> bool {
        self.status.success()
    }
}

/// Run `cmd` under `policy` to completion.
pub fn trace(policy: &Policy, cmd: &[&str]) -> Traced {
    let _guard = serial();
    let mut tracer = Tracer::new(policy).expect("policy should be valid");
    tracer.spawn(cmd).expect("command should launch");
    let status = tracer.run().expect("trace loop should finish");
    Traced {
        status,
        violations: tracer.violations(),
    }
}

/// Run a shell script under `policy`.
pub fn sh(policy: &Policy, script: &str) -> Traced {
    trace(policy, &["sh", "-c", script])
}

/// A temporary directory under its canonical name.
pub fn tempdir() -> (tempfile::TempDir, String) {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = std::fs::canonicalize(dir.path()).expect("canonicalize");
    (dir, path.to_string_lossy().into_owned())
}
