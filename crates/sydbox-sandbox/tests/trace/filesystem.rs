//! Path sandbox tests.

use std::path::Path;

use sydbox_sandbox::Policy;

use crate::common::{sh, tempdir};

#[test]
#[ignore]
fn test_write_outside_denied() {
    let (_dir, outside) = tempdir();
    let target = format!("{outside}/f");
    let run = sh(&Policy::new(), &format!("touch {target}"));

    assert!(!run.success(), "write outside the prefixes should fail");
    assert!(run.violations >= 1);
    assert!(!Path::new(&target).exists());
}

#[test]
#[ignore]
fn test_write_inside_allowed() {
    let (_dir, work) = tempdir();
    let target = format!("{work}/f");
    let run = sh(&Policy::new().write(&work), &format!("echo ok > {target}"));

    assert!(run.success(), "{run:?}");
    assert_eq!(run.violations, 0);
    assert_eq!(std::fs::read_to_string(&target).unwrap(), "ok\n");
}

#[test]
#[ignore]
fn test_predict_fakes_success() {
    let (_dir, scratch) = tempdir();
    let target = format!("{scratch}/f");
    let run = sh(&Policy::new().predict(&scratch), &format!("mkdir {target}"));

    assert!(run.success(), "predicted write should look successful: {run:?}");
    assert_eq!(run.violations, 0);
    assert!(!Path::new(&target).exists());
}

#[test]
#[ignore]
fn test_path_sandbox_disabled() {
    let (_dir, outside) = tempdir();
    let target = format!("{outside}/f");
    let run = sh(&Policy::new().path_sandbox(false), &format!("touch {target}"));

    assert!(run.success(), "{run:?}");
    assert!(Path::new(&target).exists());
}

#[test]
#[ignore]
fn test_redirect_needs_prefix() {
    let run = sh(&Policy::new(), "cat /etc/passwd > /dev/null");
    assert!(!run.success(), "redirect to /dev/null is a write");

    let run = sh(&Policy::new().write("/dev/null"), "cat /etc/passwd > /dev/null");
    assert!(run.success(), "{run:?}");
    assert_eq!(run.violations, 0);
}
