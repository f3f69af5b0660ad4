//! Path canonicalization from a tracee's point of view.
//!
//! Relative paths are anchored at the tracee's working directory or at the
//! directory behind a dirfd, never at ours. `.` and `..` are handled
//! lexically as the walk proceeds; every other component is `lstat`ed and
//! symlinks are spliced into the remaining path.
//!
//! ## Symlinks
//!
//! Intermediate symlinks are always followed because the kernel follows
//! them too. `follow` only decides whether a symlink in the final position
//! is dereferenced (`lstat` versus `stat` semantics). A trailing slash
//! forces following, as it does for the kernel.
//!
//! ## /proc/self
//!
//! `/proc/self` and `/proc/thread-self` name the resolving process, so they
//! are rewritten to the tracee's own `/proc/<pid>` before any lookup.

use std::collections::VecDeque;
use std::ffi::{OsStr, OsString};
use std::fs;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::{Component, Path, PathBuf};

use rustix::io::Errno;

/// Symlinks spliced before giving up with `ELOOP`.
pub const MAX_SYMLINKS: usize = 256;

/// Whether the final component of a path may be missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateMode {
    /// Every component, including the last, must exist.
    Existing,
    /// Every component but the last must exist.
    MayCreate,
}

/// Join `raw` onto `base` and resolve `.`, `..` and repeated slashes
/// without touching the filesystem.
pub fn normalize(raw: impl AsRef<Path>, base: impl AsRef<Path>) -> PathBuf {
    let raw = raw.as_ref();
    let joined = if raw.is_absolute() {
        raw.to_path_buf()
    } else {
        base.as_ref().join(raw)
    };
    let mut out = PathBuf::from("/");
    for comp in joined.components() {
        match comp {
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(name) => out.push(name),
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
        }
    }
    out
}

/// Canonicalize `raw` for tracee `pid`, relative paths anchored at `base`.
///
/// Errors are the errno the kernel would report for the same lookup.
pub fn resolve(
    pid: libc::pid_t,
    raw: &Path,
    base: &Path,
    mode: CreateMode,
    follow: bool,
) -> Result<PathBuf, Errno> {
    let bytes = raw.as_os_str().as_bytes();
    if bytes.is_empty() {
        return Err(Errno::NOENT);
    }
    let follow = follow || bytes.ends_with(b"/");

    let start = if raw.is_absolute() {
        raw.to_path_buf()
    } else {
        base.join(raw)
    };
    let mut pending: VecDeque<OsString> = split(start.as_os_str());
    let mut acc = PathBuf::from("/");
    let mut links = 0;

    while let Some(comp) = pending.pop_front() {
        if comp == "." {
            continue;
        }
        if comp == ".." {
            acc.pop();
            continue;
        }
        let comp = proc_self(pid, &acc, comp);
        let next = acc.join(&comp);
        let last = pending.is_empty();

        match fs::symlink_metadata(&next) {
            Ok(meta) => {
                let ft = meta.file_type();
                if ft.is_symlink() && (!last || follow) {
                    links += 1;
                    if links > MAX_SYMLINKS {
                        return Err(Errno::LOOP);
                    }
                    let target = fs::read_link(&next).map_err(errno)?;
                    if target.is_absolute() {
                        acc = PathBuf::from("/");
                    }
                    for part in split(target.as_os_str()).into_iter().rev() {
                        pending.push_front(part);
                    }
                    continue;
                }
                if !last && !ft.is_dir() {
                    return Err(Errno::NOTDIR);
                }
                acc = next;
            }
            Err(e) => {
                let errno = errno(e);
                if errno == Errno::NOENT && last && mode == CreateMode::MayCreate {
                    acc = next;
                    continue;
                }
                return Err(errno);
            }
        }
    }

    if acc.as_os_str().len() >= libc::PATH_MAX as usize {
        return Err(Errno::NAMETOOLONG);
    }
    Ok(acc)
}

/// Path of the file behind descriptor `fd` of `pid`.
pub fn fd_path(pid: libc::pid_t, fd: i32) -> Result<PathBuf, Errno> {
    if fd == libc::AT_FDCWD {
        return proc_cwd(pid);
    }
    if fd < 0 {
        return Err(Errno::BADF);
    }
    fs::read_link(format!("/proc/{pid}/fd/{fd}")).map_err(|e| {
        let errno = errno(e);
        if errno == Errno::NOENT { Errno::BADF } else { errno }
    })
}

/// Directory behind `dirfd` of `pid` (`AT_FDCWD` means its cwd).
pub fn dir_fd_path(pid: libc::pid_t, dirfd: i32) -> Result<PathBuf, Errno> {
    let path = fd_path(pid, dirfd)?;
    // Sockets and pipes read back as "socket:[1234]".
    if !path.is_absolute() {
        return Err(Errno::NOTDIR);
    }
    if dirfd != libc::AT_FDCWD {
        let meta = fs::metadata(format!("/proc/{pid}/fd/{dirfd}")).map_err(errno)?;
        if !meta.is_dir() {
            return Err(Errno::NOTDIR);
        }
    }
    Ok(path)
}

/// Current working directory of `pid`.
pub fn proc_cwd(pid: libc::pid_t) -> Result<PathBuf, Errno> {
    fs::read_link(format!("/proc/{pid}/cwd")).map_err(errno)
}

/// True if `path` exists, without following a final symlink.
pub fn exists(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

fn split(path: &OsStr) -> VecDeque<OsString> {
    path.as_bytes()
        .split(|&b| b == b'/')
        .filter(|c| !c.is_empty())
        .map(|c| OsStr::from_bytes(c).to_os_string())
        .collect()
}

fn proc_self(pid: libc::pid_t, acc: &Path, comp: OsString) -> OsString {
    if acc != Path::new("/proc") {
        return comp;
    }
    if comp == "self" {
        OsString::from(pid.to_string())
    } else if comp == "thread-self" {
        OsString::from(format!("{pid}/task/{pid}"))
    } else {
        comp
    }
}

fn errno(e: io::Error) -> Errno {
    Errno::from_raw_os_error(e.raw_os_error().unwrap_or(libc::EIO))
}
