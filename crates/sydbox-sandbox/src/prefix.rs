//! Path prefix allow-lists.
//!
//! A [`PrefixList`] answers "is this path underneath any permitted
//! directory". Matching is on whole components: `/dev` covers `/dev` and
//! `/dev/zero` but not `/devzero`. An entry of `/` covers everything.
//!
//! Entries are kept in insertion order; lookups scan the most recently
//! added entries first.

use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::process::Command;

use thiserror::Error;

/// Characters that make [`PrefixList::add`] hand a path to the shell.
const SHELL_SPECIAL: &[u8] = b"~$`*?[{\\'\"";

#[derive(Debug, Error)]
pub enum PrefixError {
    #[error("failed to expand {path:?}: {source}")]
    Expand {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("shell expansion of {path:?} failed ({status})")]
    ExpandFailed {
        path: String,
        status: std::process::ExitStatus,
    },

    #[error("empty path")]
    Empty,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrefixList {
    entries: Vec<PathBuf>,
}

impl PrefixList {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if `candidate` equals an entry or lies beneath one.
    pub fn contains(&self, candidate: &Path) -> bool {
        let candidate = candidate.as_os_str().as_bytes();
        self.entries.iter().rev().any(|entry| {
            let prefix = entry.as_os_str().as_bytes();
            if prefix == b"/" {
                return true;
            }
            candidate.starts_with(prefix)
                && (candidate.len() == prefix.len() || candidate[prefix.len()] == b'/')
        })
    }

    /// Add every non-empty `:`-separated path of `value`, returning how many
    /// were added. Entries that fail shell expansion are skipped.
    pub fn init_from_colon_separated(&mut self, value: &str) -> usize {
        let mut added = 0;
        for path in value.split(':').filter(|p| !p.is_empty()) {
            match self.add(path, true) {
                Ok(()) => added += 1,
                Err(e) => tracing::warn!(path, error = %e, "ignoring prefix"),
            }
        }
        added
    }

    /// Add `path`, optionally running it through `/bin/sh` word expansion
    /// first (`~`, `$VAR`, globs).
    pub fn add(&mut self, path: &str, expand: bool) -> Result<(), PrefixError> {
        let path = if expand && needs_expansion(path) {
            shell_expand(path)?
        } else {
            path.to_string()
        };
        if path.is_empty() {
            return Err(PrefixError::Empty);
        }
        self.entries.push(compress(OsStr::new(&path)));
        Ok(())
    }

    /// Add an already expanded path verbatim (after slash compression).
    pub fn push(&mut self, path: impl AsRef<Path>) {
        self.entries.push(compress(path.as_ref().as_os_str()));
    }

    /// Remove the most recently added entry equal to `path` after slash
    /// compression. Returns false if there was none.
    pub fn delete(&mut self, path: impl AsRef<Path>) -> bool {
        let path = compress(path.as_ref().as_os_str());
        match self.entries.iter().rposition(|e| *e == path) {
            Some(idx) => {
                self.entries.remove(idx);
                true
            }
            None => false,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries, most recently added first.
    pub fn iter(&self) -> impl Iterator<Item = &Path> {
        self.entries.iter().rev().map(PathBuf::as_path)
    }
}

impl<P: AsRef<Path>> FromIterator<P> for PrefixList {
    fn from_iter<I: IntoIterator<Item = P>>(iter: I) -> Self {
        let mut list = Self::new();
        for path in iter {
            list.push(path);
        }
        list
    }
}

fn needs_expansion(path: &str) -> bool {
    path.bytes().any(|b| SHELL_SPECIAL.contains(&b))
}

fn shell_expand(path: &str) -> Result<String, PrefixError> {
    let output = Command::new("/bin/sh")
        .arg("-c")
        .arg(format!("printf '%s' {path}"))
        .output()
        .map_err(|source| PrefixError::Expand {
            path: path.to_string(),
            source,
        })?;
    if !output.status.success() {
        return Err(PrefixError::ExpandFailed {
            path: path.to_string(),
            status: output.status,
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Collapse repeated slashes and strip trailing ones (the root stays `/`).
fn compress(path: &OsStr) -> PathBuf {
    let bytes = path.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    for &b in bytes {
        if b == b'/' && out.last() == Some(&b'/') {
            continue;
        }
        out.push(b);
    }
    while out.len() > 1 && out.last() == Some(&b'/') {
        out.pop();
    }
    PathBuf::from(OsStr::from_bytes(&out))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(entries: &[&str]) -> PrefixList {
        entries.iter().collect()
    }

    #[test]
    fn component_boundaries() {
        let dev = list(&["/dev"]);
        assert!(dev.contains(Path::new("/dev/zero")));
        assert!(!dev.contains(Path::new("/devzero")));
        assert!(dev.contains(Path::new("/dev")));
        assert!(!dev.contains(Path::new("/")));
    }

    #[test]
    fn root_matches_everything() {
        let root = list(&["/"]);
        for p in ["/", "/etc/passwd", "/a/b/c", "/devzero"] {
            assert!(root.contains(Path::new(p)), "{p}");
        }
    }

    #[test]
    fn colon_separated_skips_empty() {
        let mut l = PrefixList::new();
        assert_eq!(l.init_from_colon_separated("foo::bar::baz::::::"), 3);
        let entries: Vec<_> = l.iter().collect();
        assert_eq!(
            entries,
            vec![Path::new("baz"), Path::new("bar"), Path::new("foo")]
        );
    }

    #[test]
    fn add_compresses_slashes() {
        let mut l = PrefixList::new();
        l.add("//tmp///build//", false).unwrap();
        l.add("///", false).unwrap();
        let entries: Vec<_> = l.iter().collect();
        assert_eq!(entries, vec![Path::new("/"), Path::new("/tmp/build")]);
    }

    #[test]
    fn add_expands_variables() {
        let mut l = PrefixList::new();
        l.add("/opt/${SYDBOX_TEST_UNSET_VAR:-fallback}/", true)
            .unwrap();
        assert!(l.contains(Path::new("/opt/fallback/x")));
    }

    #[test]
    fn delete_exact_only() {
        let mut l = list(&["/tmp", "/tmp/a", "/tmp"]);
        assert!(!l.delete("/tmp/b"));
        assert!(l.delete("/tmp//"));
        assert_eq!(l.len(), 2);
        assert!(l.delete("/tmp"));
        assert!(!l.delete("/tmp"));
        assert!(l.contains(Path::new("/tmp/a/x")));
        assert!(!l.contains(Path::new("/tmp/b")));
    }

    #[test]
    fn empty_expansion_is_rejected() {
        let mut l = PrefixList::new();
        assert!(matches!(l.add("$SYDBOX_TEST_UNSET_VAR", true), Err(PrefixError::Empty)));
        assert!(l.is_empty());
    }
}
