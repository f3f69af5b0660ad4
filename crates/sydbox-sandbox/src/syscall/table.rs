use sydbox_sys::StatKind;

use super::Creation::{Exists, FromFlags, May, Must};
use super::{Follow, Kind, ModeArg, NetCall, PathArg, SyscallEntry};

const NOFOLLOW: u64 = libc::AT_SYMLINK_NOFOLLOW as u64;
const UMOUNT_NOFOLLOW: u64 = 8;

const fn nr(n: libc::c_long) -> Option<u64> {
    Some(n as u64)
}

const fn path(
    name: &'static str,
    x86_64: Option<u64>,
    i386: Option<u64>,
    args: &'static [PathArg],
    follow: Follow,
) -> SyscallEntry {
    SyscallEntry {
        name,
        x86_64,
        i386,
        kind: Kind::Path {
            args,
            mode: ModeArg::None,
            follow,
        },
    }
}

const fn moded(
    name: &'static str,
    x86_64: Option<u64>,
    i386: Option<u64>,
    args: &'static [PathArg],
    mode: ModeArg,
    follow: Follow,
) -> SyscallEntry {
    SyscallEntry {
        name,
        x86_64,
        i386,
        kind: Kind::Path { args, mode, follow },
    }
}

const fn stat(
    name: &'static str,
    x86_64: Option<u64>,
    i386: Option<u64>,
    arg: PathArg,
    buf: usize,
    layout: StatKind,
) -> SyscallEntry {
    SyscallEntry {
        name,
        x86_64,
        i386,
        kind: Kind::Stat { arg, buf, layout },
    }
}

const fn net(name: &'static str, x86_64: Option<u64>, i386: Option<u64>, call: NetCall) -> SyscallEntry {
    SyscallEntry {
        name,
        x86_64,
        i386,
        kind: Kind::Net(call),
    }
}

const P0: &[PathArg] = &[PathArg::new(0, Exists)];
const P0_MAY: &[PathArg] = &[PathArg::new(0, May)];
const P0_MUST: &[PathArg] = &[PathArg::new(0, Must)];
const P0_FLAGS: &[PathArg] = &[PathArg::new(0, FromFlags)];
const P1: &[PathArg] = &[PathArg::new(1, Exists)];
const P1_MUST: &[PathArg] = &[PathArg::new(1, Must)];
const P0_P1_MAY: &[PathArg] = &[PathArg::new(0, Exists), PathArg::new(1, May)];
const AT01: &[PathArg] = &[PathArg::at(0, 1, Exists)];
const AT01_MUST: &[PathArg] = &[PathArg::at(0, 1, Must)];
const AT01_FLAGS: &[PathArg] = &[PathArg::at(0, 1, FromFlags)];
const AT01_EMPTY: &[PathArg] = &[PathArg::at(0, 1, Exists).empty_fd()];
const AT01_NULLABLE: &[PathArg] = &[PathArg::at(0, 1, Exists).nullable()];
const AT12_MUST: &[PathArg] = &[PathArg::at(1, 2, Must)];
const AT23_MUST: &[PathArg] = &[PathArg::at(2, 3, Must)];
const AT01_AT23_MAY: &[PathArg] = &[PathArg::at(0, 1, Exists), PathArg::at(2, 3, May)];

/// Every intercepted syscall.
pub static TABLE: &[SyscallEntry] = &[
    path("chmod", nr(libc::SYS_chmod), Some(15), P0, Follow::Always),
    path("fchmodat", nr(libc::SYS_fchmodat), Some(306), AT01, Follow::Always),
    path(
        "fchmodat2",
        Some(452),
        Some(452),
        AT01,
        Follow::UnlessFlag { arg: 3, flag: NOFOLLOW },
    ),
    path("chown", nr(libc::SYS_chown), Some(182), P0, Follow::Always),
    path("chown32", None, Some(212), P0, Follow::Always),
    path("lchown", nr(libc::SYS_lchown), Some(16), P0, Follow::Never),
    path("lchown32", None, Some(198), P0, Follow::Never),
    path(
        "fchownat",
        nr(libc::SYS_fchownat),
        Some(298),
        AT01_EMPTY,
        Follow::UnlessFlag { arg: 4, flag: NOFOLLOW },
    ),
    moded(
        "open",
        nr(libc::SYS_open),
        Some(5),
        P0_FLAGS,
        ModeArg::OpenFlags(1),
        Follow::FromFlags,
    ),
    moded(
        "openat",
        nr(libc::SYS_openat),
        Some(295),
        AT01_FLAGS,
        ModeArg::OpenFlags(2),
        Follow::FromFlags,
    ),
    moded(
        "openat2",
        nr(libc::SYS_openat2),
        Some(437),
        AT01_FLAGS,
        ModeArg::OpenHow(2),
        Follow::FromFlags,
    ),
    path("creat", nr(libc::SYS_creat), Some(8), P0_MAY, Follow::Always),
    path("link", nr(libc::SYS_link), Some(9), P1_MUST, Follow::Never),
    path(
        "linkat",
        nr(libc::SYS_linkat),
        Some(303),
        AT23_MUST,
        Follow::Never,
    ),
    path("mkdir", nr(libc::SYS_mkdir), Some(39), P0_MUST, Follow::Never),
    path("mkdirat", nr(libc::SYS_mkdirat), Some(296), AT01_MUST, Follow::Never),
    path("mknod", nr(libc::SYS_mknod), Some(14), P0_MUST, Follow::Never),
    path("mknodat", nr(libc::SYS_mknodat), Some(297), AT01_MUST, Follow::Never),
    path(
        "rename",
        nr(libc::SYS_rename),
        Some(38),
        P0_P1_MAY,
        Follow::Never,
    ),
    path(
        "renameat",
        nr(libc::SYS_renameat),
        Some(302),
        AT01_AT23_MAY,
        Follow::Never,
    ),
    path(
        "renameat2",
        nr(libc::SYS_renameat2),
        Some(353),
        AT01_AT23_MAY,
        Follow::Never,
    ),
    path("rmdir", nr(libc::SYS_rmdir), Some(40), P0, Follow::Never),
    path("unlink", nr(libc::SYS_unlink), Some(10), P0, Follow::Never),
    path("unlinkat", nr(libc::SYS_unlinkat), Some(301), AT01, Follow::Never),
    path("symlink", nr(libc::SYS_symlink), Some(83), P1_MUST, Follow::Never),
    path(
        "symlinkat",
        nr(libc::SYS_symlinkat),
        Some(304),
        AT12_MUST,
        Follow::Never,
    ),
    path("truncate", nr(libc::SYS_truncate), Some(92), P0, Follow::Always),
    path("truncate64", None, Some(193), P0, Follow::Always),
    path(
        "mount",
        nr(libc::SYS_mount),
        Some(21),
        P1,
        Follow::Always,
    ),
    path("umount", None, Some(22), P0, Follow::Always),
    path(
        "umount2",
        nr(libc::SYS_umount2),
        Some(52),
        P0,
        Follow::UnlessFlag { arg: 1, flag: UMOUNT_NOFOLLOW },
    ),
    path("utime", nr(libc::SYS_utime), Some(30), P0, Follow::Always),
    path("utimes", nr(libc::SYS_utimes), Some(271), P0, Follow::Always),
    path(
        "futimesat",
        nr(libc::SYS_futimesat),
        Some(299),
        AT01_NULLABLE,
        Follow::Always,
    ),
    path(
        "utimensat",
        nr(libc::SYS_utimensat),
        Some(320),
        AT01_NULLABLE,
        Follow::UnlessFlag { arg: 3, flag: NOFOLLOW },
    ),
    path("setxattr", nr(libc::SYS_setxattr), Some(226), P0, Follow::Always),
    path("lsetxattr", nr(libc::SYS_lsetxattr), Some(227), P0, Follow::Never),
    path("removexattr", nr(libc::SYS_removexattr), Some(235), P0, Follow::Always),
    path("lremovexattr", nr(libc::SYS_lremovexattr), Some(236), P0, Follow::Never),
    moded(
        "access",
        nr(libc::SYS_access),
        Some(33),
        P0,
        ModeArg::Access(1),
        Follow::Always,
    ),
    moded(
        "faccessat",
        nr(libc::SYS_faccessat),
        Some(307),
        AT01,
        ModeArg::Access(2),
        Follow::Always,
    ),
    moded(
        "faccessat2",
        nr(libc::SYS_faccessat2),
        Some(439),
        AT01,
        ModeArg::Access(2),
        Follow::UnlessFlag { arg: 3, flag: NOFOLLOW },
    ),
    SyscallEntry {
        name: "execve",
        x86_64: nr(libc::SYS_execve),
        i386: Some(11),
        kind: Kind::Exec {
            arg: PathArg::new(0, Exists),
            follow: Follow::Always,
        },
    },
    SyscallEntry {
        name: "execveat",
        x86_64: nr(libc::SYS_execveat),
        i386: Some(358),
        kind: Kind::Exec {
            arg: PathArg::at(0, 1, Exists).empty_fd(),
            follow: Follow::UnlessFlag { arg: 4, flag: NOFOLLOW },
        },
    },
    SyscallEntry {
        name: "chdir",
        x86_64: nr(libc::SYS_chdir),
        i386: Some(12),
        kind: Kind::Chdir,
    },
    SyscallEntry {
        name: "fchdir",
        x86_64: nr(libc::SYS_fchdir),
        i386: Some(133),
        kind: Kind::Fchdir,
    },
    stat("stat", nr(libc::SYS_stat), Some(106), PathArg::new(0, Exists), 1, StatKind::Stat),
    stat("lstat", nr(libc::SYS_lstat), Some(107), PathArg::new(0, Exists), 1, StatKind::Stat),
    stat("stat64", None, Some(195), PathArg::new(0, Exists), 1, StatKind::Stat64),
    stat("lstat64", None, Some(196), PathArg::new(0, Exists), 1, StatKind::Stat64),
    stat(
        "newfstatat",
        nr(libc::SYS_newfstatat),
        None,
        PathArg::at(0, 1, Exists),
        2,
        StatKind::Stat,
    ),
    stat("fstatat64", None, Some(300), PathArg::at(0, 1, Exists), 2, StatKind::Stat64),
    stat(
        "statx",
        nr(libc::SYS_statx),
        Some(383),
        PathArg::at(0, 1, Exists),
        4,
        StatKind::Statx,
    ),
    net("connect", nr(libc::SYS_connect), Some(362), NetCall::Connect),
    net("bind", nr(libc::SYS_bind), Some(361), NetCall::Bind),
    net("sendto", nr(libc::SYS_sendto), Some(369), NetCall::Sendto),
    net("sendmsg", nr(libc::SYS_sendmsg), Some(370), NetCall::Sendmsg),
    net("socketcall", None, Some(102), NetCall::Socketcall),
];
