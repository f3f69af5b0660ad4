//! End-to-end tests of the trace loop.
//!
//! These tests launch real processes under ptrace. They are ignored by
//! default because ptrace is often unavailable in containers (Yama
//! `ptrace_scope`, seccomp profiles).
//!
//! ## Running Tests
//!
//! ```bash
//! # Unit tests (no ptrace needed)
//! cargo test -p sydbox-sandbox
//!
//! # End-to-end tests
//! cargo test -p sydbox-sandbox --test trace_tests -- --ignored
//!
//! # With violation reports
//! SYDBOX_LOG=debug cargo test -p sydbox-sandbox --test trace_tests test_write_outside_denied -- --ignored --nocapture
//! ```
//!
//! ## Test Categories
//!
//! - **filesystem**: write prefixes, predict prefixes, path sandbox toggle
//! - **magic**: `/dev/sydbox` commands issued by the traced process
//! - **process**: exit status, fork inheritance, exec sandbox

mod common;

#[path = "trace/filesystem.rs"]
mod filesystem;

#[path = "trace/magic.rs"]
mod magic;

#[path = "trace/process.rs"]
mod process;
