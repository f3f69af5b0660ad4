//! Access violation reports and the filters that silence them.

use std::fmt;

use globset::{Glob, GlobSet, GlobSetBuilder};
use thiserror::Error;

/// Log target of violation reports.
pub const VIOLATION_TARGET: &str = "sydbox::violation";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationKind {
    Write,
    Exec,
    Network,
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Write => "write",
            Self::Exec => "exec",
            Self::Network => "network",
        })
    }
}

/// A denied access attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub kind: ViolationKind,
    pub syscall: &'static str,
    /// Position of the offending argument.
    pub arg: usize,
    /// Path or address the call targeted.
    pub target: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} access violation: {}(arg{}: \"{}\")",
            self.kind, self.syscall, self.arg, self.target
        )
    }
}

#[derive(Debug, Error)]
pub enum FilterError {
    #[error("invalid filter pattern {pattern:?}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: globset::Error,
    },
}

/// Glob patterns whose matching violations are not reported.
///
/// Filtered violations are still denied.
#[derive(Debug, Clone, Default)]
pub struct Filters {
    patterns: Vec<String>,
    set: GlobSet,
}

impl Filters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a list of patterns.
    pub fn from_patterns<S: AsRef<str>>(
        patterns: impl IntoIterator<Item = S>,
    ) -> Result<Self, FilterError> {
        let mut filters = Self::new();
        for pattern in patterns {
            filters.patterns.push(pattern.as_ref().to_string());
        }
        filters.rebuild()?;
        Ok(filters)
    }

    /// Add `pattern`. Returns false if it was already present.
    pub fn add(&mut self, pattern: &str) -> Result<bool, FilterError> {
        if self.patterns.iter().any(|p| p == pattern) {
            return Ok(false);
        }
        self.patterns.push(pattern.to_string());
        if let Err(e) = self.rebuild() {
            self.patterns.pop();
            return Err(e);
        }
        Ok(true)
    }

    /// Remove `pattern`. Returns false if it was not present.
    pub fn remove(&mut self, pattern: &str) -> bool {
        let Some(idx) = self.patterns.iter().position(|p| p == pattern) else {
            return false;
        };
        self.patterns.remove(idx);
        // Every remaining pattern compiled before.
        if self.rebuild().is_err() {
            self.set = GlobSet::empty();
        }
        true
    }

    pub fn matches(&self, target: &str) -> bool {
        self.set.is_match(target)
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    fn rebuild(&mut self) -> Result<(), FilterError> {
        let mut builder = GlobSetBuilder::new();
        for pattern in &self.patterns {
            let glob = Glob::new(pattern).map_err(|source| FilterError::Pattern {
                pattern: pattern.clone(),
                source,
            })?;
            builder.add(glob);
        }
        self.set = builder.build().map_err(|source| FilterError::Pattern {
            pattern: self.patterns.join(","),
            source,
        })?;
        Ok(())
    }
}

/// Emit `violation` for `pid` unless a filter matches its target.
///
/// Returns true if the violation was reported.
pub fn report(pid: libc::pid_t, violation: &Violation, filters: &Filters) -> bool {
    if filters.matches(&violation.target) {
        tracing::debug!(pid, %violation, "filtered violation");
        return false;
    }
    tracing::warn!(
        target: VIOLATION_TARGET,
        pid,
        kind = %violation.kind,
        syscall = violation.syscall,
        arg = violation.arg,
        path = %violation.target,
        "{violation}"
    );
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn violation(target: &str) -> Violation {
        Violation {
            kind: ViolationKind::Write,
            syscall: "chmod",
            arg: 0,
            target: target.to_string(),
        }
    }

    #[test]
    fn display_names_call_and_target() {
        assert_eq!(
            violation("/etc/passwd").to_string(),
            "write access violation: chmod(arg0: \"/etc/passwd\")"
        );
    }

    #[test]
    fn filters_suppress_reports() {
        let filters = Filters::from_patterns(["/proc/*", "/sys/**"]).unwrap();
        assert!(!report(1, &violation("/proc/1"), &filters));
        assert!(!report(1, &violation("/sys/fs/cgroup/x"), &filters));
        assert!(report(1, &violation("/etc/passwd"), &filters));
    }

    #[test]
    fn add_and_remove() {
        let mut filters = Filters::new();
        assert!(!filters.matches("/tmp/x"));
        assert!(filters.add("/tmp/*").unwrap());
        assert!(!filters.add("/tmp/*").unwrap());
        assert!(filters.matches("/tmp/x"));
        assert!(filters.remove("/tmp/*"));
        assert!(!filters.remove("/tmp/*"));
        assert!(!filters.matches("/tmp/x"));
    }

    #[test]
    fn bad_pattern_is_rejected() {
        let mut filters = Filters::new();
        assert!(filters.add("/tmp/[").is_err());
        assert!(filters.patterns().is_empty());
    }
}
