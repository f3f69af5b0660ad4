//! In-band control command tests.

use std::path::Path;

use sydbox_sandbox::Policy;

use crate::common::{sh, tempdir};

#[test]
#[ignore]
fn test_presence_check() {
    let run = sh(&Policy::new(), "test -e /dev/sydbox");
    assert!(run.success(), "{run:?}");
}

#[test]
#[ignore]
fn test_enabled_follows_path_sandbox() {
    assert!(sh(&Policy::new(), "test -e /dev/sydbox/enabled").success());
    assert!(!sh(&Policy::new().path_sandbox(false), "test -e /dev/sydbox/enabled").success());
}

#[test]
#[ignore]
fn test_magic_write_grants_access() {
    let (_dir, work) = tempdir();
    let target = format!("{work}/f");
    let run = sh(
        &Policy::new(),
        &format!("test -e /dev/sydbox/write{work} && touch {target}"),
    );

    assert!(run.success(), "{run:?}");
    assert_eq!(run.violations, 0);
    assert!(Path::new(&target).exists());
}

#[test]
#[ignore]
fn test_lock_refuses_commands() {
    let run = sh(
        &Policy::new(),
        "test -e /dev/sydbox/lock && ! test -e /dev/sydbox/off",
    );
    assert!(run.success(), "{run:?}");
}

#[test]
#[ignore]
fn test_unknown_command() {
    let run = sh(&Policy::new(), "test -e /dev/sydbox/bogus");
    assert!(!run.success());
    assert_eq!(run.violations, 0);
}
