//! Input validation before launching or attaching.
//!
//! - **Empty commands** - nothing to exec
//! - **Null bytes** - cannot be passed to `execv`
//! - **Bad pids** - attaching to pid 0, negative pids or ourselves

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("command cannot be empty")]
    EmptyCommand,

    #[error("program name is empty")]
    EmptyProgram,

    #[error("null byte in argument {0}")]
    NullByte(usize),

    #[error("invalid pid {0}")]
    InvalidPid(libc::pid_t),

    #[error("refusing to trace ourselves")]
    SelfAttach,

    #[error("no pids to attach to")]
    NoPids,
}

/// Validate command and arguments.
pub fn validate_cmd<S: AsRef<str>>(cmd: &[S]) -> Result<(), ValidationError> {
    let Some(program) = cmd.first() else {
        return Err(ValidationError::EmptyCommand);
    };
    if program.as_ref().is_empty() {
        return Err(ValidationError::EmptyProgram);
    }
    for (i, arg) in cmd.iter().enumerate() {
        if arg.as_ref().contains('\0') {
            return Err(ValidationError::NullByte(i));
        }
    }
    Ok(())
}

/// Validate pids given for attaching.
pub fn validate_pids(pids: &[libc::pid_t]) -> Result<(), ValidationError> {
    if pids.is_empty() {
        return Err(ValidationError::NoPids);
    }
    let me = std::process::id() as libc::pid_t;
    for &pid in pids {
        if pid <= 0 {
            return Err(ValidationError::InvalidPid(pid));
        }
        if pid == me {
            return Err(ValidationError::SelfAttach);
        }
    }
    Ok(())
}
