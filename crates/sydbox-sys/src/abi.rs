//! Register ABI of each personality a tracee can run under.
//!
//! A 64-bit tracer sees every tracee through the same `user_regs_struct`,
//! but where the syscall arguments live depends on the calling convention
//! the tracee used to enter the kernel:
//!
//! | Personality | `cs` | Arguments 0-5 | Word |
//! |-------------|------|---------------|------|
//! | `X86_64` | `0x33` | rdi, rsi, rdx, r10, r8, r9 | 8 |
//! | `I386` | `0x23` | ebx, ecx, edx, esi, edi, ebp | 4 |
//!
//! Both report the syscall number in `orig_rax` and the return value in
//! `rax`. The personality is detected when a tracee is set up and again after
//! every successful exec, see [`Personality::from_regs`].

use std::fmt;

/// Register set as returned by `PTRACE_GETREGS`.
pub type Regs = libc::user_regs_struct;

/// Maximum number of syscall arguments.
pub const MAX_ARGS: usize = 6;

const CS_X86_64: u64 = 0x33;
const CS_I386: u64 = 0x23;

/// Calling convention and bitness of a traced process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Personality {
    #[default]
    X86_64,
    I386,
}

impl Personality {
    /// Detect the personality from the code segment selector.
    pub fn from_regs(regs: &Regs) -> Option<Self> {
        match regs.cs {
            CS_X86_64 => Some(Self::X86_64),
            CS_I386 => Some(Self::I386),
            _ => None,
        }
    }

    /// The ABI accessor for this personality.
    pub fn abi(self) -> &'static dyn Abi {
        match self {
            Self::X86_64 => &X86_64,
            Self::I386 => &I386,
        }
    }

    #[inline]
    pub fn word_size(self) -> usize {
        self.abi().word_size()
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::X86_64 => "x86_64",
            Self::I386 => "i386",
        }
    }
}

impl fmt::Display for Personality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Which `stat` structure a stat-family syscall fills in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatKind {
    /// `struct stat` (`stat`, `lstat`, `newfstatat`).
    Stat,
    /// `struct stat64` (`stat64`, `lstat64`, `fstatat64`).
    Stat64,
    /// `struct statx`.
    Statx,
}

/// Where the interesting fields of a stat buffer live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatLayout {
    pub size: usize,
    pub mode_offset: usize,
    /// Width of `st_mode` in bytes (2 or 4).
    pub mode_width: usize,
    /// Offset of `stx_mask` (statx only).
    pub mask_offset: Option<usize>,
}

const STATX_LAYOUT: StatLayout = StatLayout {
    size: 256,
    mode_offset: 28,
    mode_width: 2,
    mask_offset: Some(0),
};

/// Per-personality register accessor.
///
/// One implementation exists per supported personality; callers obtain it
/// through [`Personality::abi`].
pub trait Abi: Sync {
    fn personality(&self) -> Personality;

    fn word_size(&self) -> usize;

    /// Raw syscall argument `index` (0-based), or `None` if out of range.
    fn arg(&self, regs: &Regs, index: usize) -> Option<u64>;

    fn stat_layout(&self, kind: StatKind) -> StatLayout;

    fn syscall_no(&self, regs: &Regs) -> u64 {
        regs.orig_rax
    }

    fn set_syscall_no(&self, regs: &mut Regs, nr: u64) {
        regs.orig_rax = nr;
    }

    fn return_value(&self, regs: &Regs) -> i64 {
        regs.rax as i64
    }

    fn set_return_value(&self, regs: &mut Regs, value: i64) {
        regs.rax = value as u64;
    }
}

struct X86_64;

impl Abi for X86_64 {
    fn personality(&self) -> Personality {
        Personality::X86_64
    }

    fn word_size(&self) -> usize {
        8
    }

    fn arg(&self, regs: &Regs, index: usize) -> Option<u64> {
        match index {
            0 => Some(regs.rdi),
            1 => Some(regs.rsi),
            2 => Some(regs.rdx),
            3 => Some(regs.r10),
            4 => Some(regs.r8),
            5 => Some(regs.r9),
            _ => None,
        }
    }

    fn stat_layout(&self, kind: StatKind) -> StatLayout {
        match kind {
            // x86_64 has no separate stat64, fstatat64 is newfstatat.
            StatKind::Stat | StatKind::Stat64 => StatLayout {
                size: 144,
                mode_offset: 24,
                mode_width: 4,
                mask_offset: None,
            },
            StatKind::Statx => STATX_LAYOUT,
        }
    }
}

struct I386;

impl Abi for I386 {
    fn personality(&self) -> Personality {
        Personality::I386
    }

    fn word_size(&self) -> usize {
        4
    }

    fn arg(&self, regs: &Regs, index: usize) -> Option<u64> {
        let value = match index {
            0 => regs.rbx,
            1 => regs.rcx,
            2 => regs.rdx,
            3 => regs.rsi,
            4 => regs.rdi,
            5 => regs.rbp,
            _ => return None,
        };
        Some(value & 0xffff_ffff)
    }

    fn stat_layout(&self, kind: StatKind) -> StatLayout {
        match kind {
            StatKind::Stat => StatLayout {
                size: 64,
                mode_offset: 8,
                mode_width: 2,
                mask_offset: None,
            },
            StatKind::Stat64 => StatLayout {
                size: 96,
                mode_offset: 16,
                mode_width: 4,
                mask_offset: None,
            },
            StatKind::Statx => STATX_LAYOUT,
        }
    }

    fn return_value(&self, regs: &Regs) -> i64 {
        i64::from(regs.rax as u32 as i32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zeroed() -> Regs {
        // SAFETY: user_regs_struct is plain integers.
        unsafe { std::mem::zeroed() }
    }

    #[test]
    fn personality_from_cs() {
        let mut regs = zeroed();
        regs.cs = 0x33;
        assert_eq!(Personality::from_regs(&regs), Some(Personality::X86_64));
        regs.cs = 0x23;
        assert_eq!(Personality::from_regs(&regs), Some(Personality::I386));
        regs.cs = 0x2b;
        assert_eq!(Personality::from_regs(&regs), None);
    }

    #[test]
    fn x86_64_argument_registers() {
        let mut regs = zeroed();
        regs.rdi = 1;
        regs.rsi = 2;
        regs.rdx = 3;
        regs.r10 = 4;
        regs.r8 = 5;
        regs.r9 = 6;
        let abi = Personality::X86_64.abi();
        let args: Vec<u64> = (0..MAX_ARGS).filter_map(|i| abi.arg(&regs, i)).collect();
        assert_eq!(args, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(abi.arg(&regs, MAX_ARGS), None);
    }

    #[test]
    fn i386_arguments_are_truncated() {
        let mut regs = zeroed();
        regs.rbx = 0xdead_beef_0000_0001;
        regs.rbp = 0xffff_ff9c;
        let abi = Personality::I386.abi();
        assert_eq!(abi.arg(&regs, 0), Some(1));
        assert_eq!(abi.arg(&regs, 5), Some(0xffff_ff9c));
    }

    #[test]
    fn i386_return_value_is_sign_extended() {
        let mut regs = zeroed();
        regs.rax = u64::from((-13i32) as u32);
        assert_eq!(Personality::I386.abi().return_value(&regs), -13);
        assert_eq!(
            Personality::X86_64.abi().return_value(&regs),
            i64::from((-13i32) as u32)
        );
    }

    #[test]
    fn syscall_number_roundtrip() {
        let mut regs = zeroed();
        let abi = Personality::X86_64.abi();
        abi.set_syscall_no(&mut regs, 0xbadca11);
        assert_eq!(abi.syscall_no(&regs), 0xbadca11);
        abi.set_return_value(&mut regs, -1);
        assert_eq!(abi.return_value(&regs), -1);
    }

    #[test]
    fn stat_layouts() {
        assert_eq!(Personality::X86_64.abi().stat_layout(StatKind::Stat).size, 144);
        assert_eq!(Personality::I386.abi().stat_layout(StatKind::Stat64).size, 96);
        assert_eq!(
            Personality::I386.abi().stat_layout(StatKind::Statx),
            Personality::X86_64.abi().stat_layout(StatKind::Statx)
        );
    }
}
