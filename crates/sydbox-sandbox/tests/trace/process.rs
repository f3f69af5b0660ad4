//! Process lifecycle tests.

use std::path::Path;

use sydbox_sandbox::{ExitStatus, Policy};

use crate::common::{sh, tempdir, trace};

#[test]
#[ignore]
fn test_exit_code_propagates() {
    let run = sh(&Policy::new(), "exit 7");
    assert_eq!(run.status, ExitStatus::Code(7));
}

#[test]
#[ignore]
fn test_killed_by_signal() {
    let run = sh(&Policy::new(), "kill -9 $$");
    assert_eq!(run.status, ExitStatus::Signal(libc::SIGKILL));
    assert_eq!(run.status.code(), 137);
}

#[test]
#[ignore]
fn test_children_inherit_policy() {
    let (_dir, work) = tempdir();
    let script = format!("(touch {work}/a) & (touch {work}/b) & wait");
    let run = sh(&Policy::new().write(&work), &script);

    assert!(run.success(), "{run:?}");
    assert!(Path::new(&format!("{work}/a")).exists());
    assert!(Path::new(&format!("{work}/b")).exists());
}

#[test]
#[ignore]
fn test_magic_changes_stay_in_child() {
    let (_dir, work) = tempdir();
    let script = format!(
        "(test -e /dev/sydbox/write{work}); touch {work}/f"
    );
    let run = sh(&Policy::new(), &script);

    assert!(!run.success(), "parent must not see the child's prefix");
    assert!(!Path::new(&format!("{work}/f")).exists());
}

#[test]
#[ignore]
fn test_exec_sandbox() {
    let policy = Policy::new().exec_sandbox(true);
    let run = sh(&policy, "/bin/true");
    assert!(!run.success(), "exec outside the exec prefixes should fail");
    assert!(run.violations >= 1);

    // The launch exec itself is exempt.
    let run = trace(&policy, &["/bin/true"]);
    assert!(run.success(), "{run:?}");
}

#[test]
#[ignore]
fn test_exec_allowed_prefix() {
    let run = sh(
        &Policy::new().exec_sandbox(true).exec_allow("/"),
        "/bin/true",
    );
    assert!(run.success(), "{run:?}");
}
