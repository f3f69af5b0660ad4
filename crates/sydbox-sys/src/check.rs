//! System capability checking.
//!
//! Verifies at runtime that the host can trace processes the way the sandbox
//! needs to. The check is performed once and cached in a static `OnceLock`.
//!
//! ## Required Features
//!
//! | Feature | Minimum | Check Method |
//! |---------|---------|--------------|
//! | Kernel | 3.5 | `uname` syscall |
//! | procfs | mounted | `/proc/self/status` readable |
//! | Yama | `ptrace_scope` < 3 | `/proc/sys/kernel/yama/ptrace_scope` |
//!
//! ## Usage
//!
//! ```ignore
//! match check::check() {
//!     Ok(info) => println!("kernel: {:?}", info.kernel_version),
//!     Err(e) => eprintln!("System not supported: {}", e),
//! }
//! ```

use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use rustix::system::uname;
use thiserror::Error;

/// Information about the system's tracing capabilities.
#[derive(Debug, Clone)]
pub struct SystemInfo {
    pub kernel_version: (u32, u32, u32),
    /// Yama `ptrace_scope`, `None` when Yama is not built in.
    pub ptrace_scope: Option<u32>,
    pub proc_mounted: bool,
}

/// Errors that can occur during system capability checking.
#[derive(Debug, Clone, Error)]
pub enum CheckError {
    #[error("kernel version {}.{}.{} is too old, need at least {}.{}.{}", .found.0, .found.1, .found.2, .required.0, .required.1, .required.2)]
    KernelTooOld {
        required: (u32, u32, u32),
        found: (u32, u32, u32),
    },

    #[error("/proc is not mounted")]
    ProcNotMounted,

    #[error("ptrace is disabled (kernel.yama.ptrace_scope = 3)")]
    PtraceDisabled,

    #[error("failed to read kernel version")]
    KernelVersionReadFailed,
}

// Exec of a multi-threaded tracee reports a single PTRACE_EVENT_EXEC.
const MIN_KERNEL_VERSION: (u32, u32, u32) = (3, 5, 0);
const YAMA_NO_ATTACH: u32 = 3;
const YAMA_SCOPE: &str = "/proc/sys/kernel/yama/ptrace_scope";

static SYSTEM_INFO: OnceLock<Result<SystemInfo, CheckError>> = OnceLock::new();

/// Check system capabilities and cache the result.
pub fn check() -> Result<&'static SystemInfo, &'static CheckError> {
    SYSTEM_INFO.get_or_init(check_impl).as_ref()
}

fn check_impl() -> Result<SystemInfo, CheckError> {
    let kernel_version = get_kernel_version()?;
    if kernel_version < MIN_KERNEL_VERSION {
        return Err(CheckError::KernelTooOld {
            required: MIN_KERNEL_VERSION,
            found: kernel_version,
        });
    }

    let proc_mounted = Path::new("/proc/self/status").exists();
    if !proc_mounted {
        return Err(CheckError::ProcNotMounted);
    }

    let ptrace_scope = fs::read_to_string(YAMA_SCOPE)
        .ok()
        .and_then(|s| s.trim().parse::<u32>().ok());
    if ptrace_scope == Some(YAMA_NO_ATTACH) {
        return Err(CheckError::PtraceDisabled);
    }

    Ok(SystemInfo {
        kernel_version,
        ptrace_scope,
        proc_mounted,
    })
}

fn get_kernel_version() -> Result<(u32, u32, u32), CheckError> {
    let uts = uname();
    let release = uts
        .release()
        .to_str()
        .map_err(|_| CheckError::KernelVersionReadFailed)?;
    parse_kernel_version(release)
}

fn parse_kernel_version(release: &str) -> Result<(u32, u32, u32), CheckError> {
    let mut parts = release.split('.');
    let mut number = |required: bool| -> Result<u32, CheckError> {
        match parts.next() {
            Some(p) => {
                let digits: String = p.chars().take_while(char::is_ascii_digit).collect();
                digits
                    .parse::<u32>()
                    .map_err(|_| CheckError::KernelVersionReadFailed)
            }
            None if required => Err(CheckError::KernelVersionReadFailed),
            None => Ok(0),
        }
    };

    let major = number(true)?;
    let minor = number(true)?;
    // "0-generic", "44-fc" and friends.
    let patch = number(false).unwrap_or(0);

    Ok((major, minor, patch))
}
