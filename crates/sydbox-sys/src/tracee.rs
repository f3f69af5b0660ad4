//! Argument, return value and memory access for a stopped tracee.
//!
//! [`Tracee`] is built from four primitives (`regs`, `set_regs`, `peek`,
//! `poke`); everything the policy pipeline needs is a provided method on top
//! of them, dispatched through the tracee's [`Personality`]. [`PtraceTracee`]
//! implements the primitives with ptrace requests.
//!
//! ## Memory Reads
//!
//! Strings are read one aligned word at a time until a NUL byte shows up, so
//! a read never touches a page past the word holding the terminator. There is
//! no length limit: a missing terminator ends in a fault on the first
//! unmapped page, reported as [`TraceError::BadAddress`].

use rustix::io::Errno;
use thiserror::Error;

use crate::abi::{Personality, Regs, StatKind};
use crate::ptrace;

const S_IFDIR: u32 = 0o040_000;
/// `STATX_BASIC_STATS`.
const STATX_BASIC_STATS: u32 = 0x7ff;
const WORD: u64 = 8;

/// Failure of a request against a tracee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TraceError {
    /// The tracee no longer exists (`ESRCH`). Recoverable.
    #[error("process gone")]
    ProcessGone,

    /// The tracee handed us an unreadable pointer.
    #[error("bad address {0:#x}")]
    BadAddress(u64),

    /// The tracee exists but the request still failed.
    #[error("{op}: {errno}")]
    Fatal { op: &'static str, errno: Errno },
}

impl TraceError {
    /// Classify a register or control request failure.
    pub fn from_errno(op: &'static str, errno: Errno) -> Self {
        if errno == Errno::SRCH {
            Self::ProcessGone
        } else {
            Self::Fatal { op, errno }
        }
    }

    /// Classify a memory access failure at `addr`.
    pub fn from_mem_errno(op: &'static str, addr: u64, errno: Errno) -> Self {
        if errno == Errno::FAULT || errno == Errno::IO {
            Self::BadAddress(addr)
        } else {
            Self::from_errno(op, errno)
        }
    }

    #[inline]
    pub fn is_gone(&self) -> bool {
        matches!(self, Self::ProcessGone)
    }

    #[inline]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal { .. })
    }
}

/// A stopped process whose registers and memory can be inspected.
pub trait Tracee {
    fn pid(&self) -> libc::pid_t;

    fn personality(&self) -> Personality;

    fn regs(&self) -> Result<Regs, TraceError>;

    fn set_regs(&self, regs: &Regs) -> Result<(), TraceError>;

    /// Read the 8-byte word at `addr` (must be word aligned).
    fn peek(&self, addr: u64) -> Result<u64, TraceError>;

    /// Write the 8-byte word at `addr` (must be word aligned).
    fn poke(&self, addr: u64, word: u64) -> Result<(), TraceError>;

    fn syscall_no(&self) -> Result<u64, TraceError> {
        Ok(self.personality().abi().syscall_no(&self.regs()?))
    }

    fn set_syscall_no(&self, nr: u64) -> Result<(), TraceError> {
        let mut regs = self.regs()?;
        self.personality().abi().set_syscall_no(&mut regs, nr);
        self.set_regs(&regs)
    }

    /// Raw value of syscall argument `index` (0-based).
    fn arg(&self, index: usize) -> Result<u64, TraceError> {
        let regs = self.regs()?;
        self.personality()
            .abi()
            .arg(&regs, index)
            .ok_or(TraceError::Fatal {
                op: "arg",
                errno: Errno::INVAL,
            })
    }

    fn return_value(&self) -> Result<i64, TraceError> {
        Ok(self.personality().abi().return_value(&self.regs()?))
    }

    fn set_return_value(&self, value: i64) -> Result<(), TraceError> {
        let mut regs = self.regs()?;
        self.personality().abi().set_return_value(&mut regs, value);
        self.set_regs(&regs)
    }

    /// Read `len` bytes starting at `addr`.
    fn read_bytes(&self, addr: u64, len: usize) -> Result<Vec<u8>, TraceError> {
        let mut out = Vec::with_capacity(len);
        let mut word_addr = addr & !(WORD - 1);
        let mut skip = (addr - word_addr) as usize;
        while out.len() < len {
            let word = self.peek(word_addr)?.to_ne_bytes();
            let take = (WORD as usize - skip).min(len - out.len());
            out.extend_from_slice(&word[skip..skip + take]);
            skip = 0;
            word_addr += WORD;
        }
        Ok(out)
    }

    /// Read a NUL-terminated string starting at `addr` (terminator excluded).
    fn read_string(&self, addr: u64) -> Result<Vec<u8>, TraceError> {
        if addr == 0 {
            return Err(TraceError::BadAddress(0));
        }
        let mut out = Vec::with_capacity(64);
        let mut word_addr = addr & !(WORD - 1);
        let mut skip = (addr - word_addr) as usize;
        loop {
            let word = self.peek(word_addr)?.to_ne_bytes();
            for &byte in &word[skip..] {
                if byte == 0 {
                    return Ok(out);
                }
                out.push(byte);
            }
            skip = 0;
            word_addr += WORD;
        }
    }

    /// Read the string pointed to by syscall argument `index`.
    fn read_string_arg(&self, index: usize) -> Result<Vec<u8>, TraceError> {
        let addr = self.arg(index)?;
        self.read_string(addr)
    }

    /// Overwrite tracee memory at `addr` with `data`.
    ///
    /// Partial words at either end are merged with the bytes already there.
    fn write_bytes(&self, addr: u64, data: &[u8]) -> Result<(), TraceError> {
        let mut word_addr = addr & !(WORD - 1);
        let mut skip = (addr - word_addr) as usize;
        let mut rest = data;
        while !rest.is_empty() {
            let take = (WORD as usize - skip).min(rest.len());
            let mut word = if skip == 0 && take == WORD as usize {
                [0u8; 8]
            } else {
                self.peek(word_addr)?.to_ne_bytes()
            };
            word[skip..skip + take].copy_from_slice(&rest[..take]);
            self.poke(word_addr, u64::from_ne_bytes(word))?;
            rest = &rest[take..];
            skip = 0;
            word_addr += WORD;
        }
        Ok(())
    }

    /// Fill the stat buffer pointed to by argument `index` with a synthetic
    /// entry: a directory, mode 0, owned by root, everything else zero.
    ///
    /// Returns the bytes that were overwritten.
    fn fake_stat(&self, index: usize, kind: StatKind) -> Result<Vec<u8>, TraceError> {
        let addr = self.arg(index)?;
        if addr == 0 {
            return Err(TraceError::BadAddress(0));
        }
        let layout = self.personality().abi().stat_layout(kind);
        let previous = self.read_bytes(addr, layout.size)?;
        let mut buf = vec![0u8; layout.size];
        let mode = &mut buf[layout.mode_offset..layout.mode_offset + layout.mode_width];
        if layout.mode_width == 2 {
            mode.copy_from_slice(&(S_IFDIR as u16).to_ne_bytes());
        } else {
            mode.copy_from_slice(&S_IFDIR.to_ne_bytes());
        }
        if let Some(offset) = layout.mask_offset {
            buf[offset..offset + 4].copy_from_slice(&STATX_BASIC_STATS.to_ne_bytes());
        }
        self.write_bytes(addr, &buf)?;
        Ok(previous)
    }
}

/// A tracee accessed through ptrace requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PtraceTracee {
    pid: libc::pid_t,
    personality: Personality,
}

impl PtraceTracee {
    pub fn new(pid: libc::pid_t, personality: Personality) -> Self {
        Self { pid, personality }
    }

    /// Detect the personality of a stopped tracee.
    ///
    /// An unknown code segment is reported as `EINVAL`.
    pub fn detect(pid: libc::pid_t) -> Result<Self, TraceError> {
        let regs = ptrace::get_regs(pid).map_err(|e| TraceError::from_errno("getregs", e))?;
        let personality = Personality::from_regs(&regs).ok_or(TraceError::Fatal {
            op: "personality",
            errno: Errno::INVAL,
        })?;
        Ok(Self { pid, personality })
    }
}

impl Tracee for PtraceTracee {
    fn pid(&self) -> libc::pid_t {
        self.pid
    }

    fn personality(&self) -> Personality {
        self.personality
    }

    fn regs(&self) -> Result<Regs, TraceError> {
        ptrace::get_regs(self.pid).map_err(|e| TraceError::from_errno("getregs", e))
    }

    fn set_regs(&self, regs: &Regs) -> Result<(), TraceError> {
        ptrace::set_regs(self.pid, regs).map_err(|e| TraceError::from_errno("setregs", e))
    }

    fn peek(&self, addr: u64) -> Result<u64, TraceError> {
        ptrace::peek_data(self.pid, addr).map_err(|e| TraceError::from_mem_errno("peekdata", addr, e))
    }

    fn poke(&self, addr: u64, word: u64) -> Result<(), TraceError> {
        ptrace::poke_data(self.pid, addr, word)
            .map_err(|e| TraceError::from_mem_errno("pokedata", addr, e))
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::HashMap;

    use super::*;

    struct Memory {
        personality: Personality,
        regs: RefCell<Regs>,
        words: RefCell<HashMap<u64, u64>>,
    }

    impl Memory {
        fn new(personality: Personality) -> Self {
            Self {
                personality,
                // SAFETY: user_regs_struct is plain integers.
                regs: RefCell::new(unsafe { std::mem::zeroed() }),
                words: RefCell::new(HashMap::new()),
            }
        }

        fn store(&self, addr: u64, bytes: &[u8]) {
            self.write_bytes(addr, bytes).unwrap();
        }
    }

    impl Tracee for Memory {
        fn pid(&self) -> libc::pid_t {
            1
        }
        fn personality(&self) -> Personality {
            self.personality
        }
        fn regs(&self) -> Result<Regs, TraceError> {
            Ok(*self.regs.borrow())
        }
        fn set_regs(&self, regs: &Regs) -> Result<(), TraceError> {
            *self.regs.borrow_mut() = *regs;
            Ok(())
        }
        fn peek(&self, addr: u64) -> Result<u64, TraceError> {
            assert_eq!(addr % WORD, 0);
            Ok(*self.words.borrow().get(&addr).unwrap_or(&0))
        }
        fn poke(&self, addr: u64, word: u64) -> Result<(), TraceError> {
            assert_eq!(addr % WORD, 0);
            self.words.borrow_mut().insert(addr, word);
            Ok(())
        }
    }

    #[test]
    fn read_unaligned_string() {
        let mem = Memory::new(Personality::X86_64);
        mem.store(0x1003, b"/etc/passwd\0");
        assert_eq!(mem.read_string(0x1003).unwrap(), b"/etc/passwd");
    }

    #[test]
    fn read_long_string() {
        let mem = Memory::new(Personality::X86_64);
        let long = "/a".repeat(600);
        let mut bytes = long.clone().into_bytes();
        bytes.push(0);
        mem.store(0x2000, &bytes);
        assert_eq!(mem.read_string(0x2000).unwrap(), long.as_bytes());
    }

    #[test]
    fn null_pointer_is_bad_address() {
        let mem = Memory::new(Personality::X86_64);
        assert_eq!(mem.read_string(0), Err(TraceError::BadAddress(0)));
    }

    #[test]
    fn write_preserves_neighbours() {
        let mem = Memory::new(Personality::X86_64);
        mem.store(0x3000, &[0xaa; 24]);
        mem.write_bytes(0x3005, b"xyz").unwrap();
        let bytes = mem.read_bytes(0x3000, 24).unwrap();
        assert_eq!(&bytes[..5], &[0xaa; 5]);
        assert_eq!(&bytes[5..8], b"xyz");
        assert_eq!(&bytes[8..], &[0xaa; 16]);
    }

    #[test]
    fn fake_stat_x86_64() {
        let mem = Memory::new(Personality::X86_64);
        mem.regs.borrow_mut().rsi = 0x4000;
        mem.store(0x4000, &[0xff; 144]);
        let previous = mem.fake_stat(1, StatKind::Stat).unwrap();
        assert_eq!(previous, [0xff; 144]);
        let buf = mem.read_bytes(0x4000, 144).unwrap();
        assert_eq!(u32::from_ne_bytes(buf[24..28].try_into().unwrap()), S_IFDIR);
        assert!(buf[..24].iter().all(|&b| b == 0));
        assert!(buf[28..].iter().all(|&b| b == 0));
    }

    #[test]
    fn fake_statx_sets_mask() {
        let mem = Memory::new(Personality::I386);
        mem.regs.borrow_mut().rdi = 0x5000;
        mem.fake_stat(4, StatKind::Statx).unwrap();
        let buf = mem.read_bytes(0x5000, 256).unwrap();
        assert_eq!(
            u32::from_ne_bytes(buf[0..4].try_into().unwrap()),
            STATX_BASIC_STATS
        );
        assert_eq!(
            u16::from_ne_bytes(buf[28..30].try_into().unwrap()),
            S_IFDIR as u16
        );
    }

    #[test]
    fn fake_stat_null_buffer() {
        let mem = Memory::new(Personality::X86_64);
        assert_eq!(
            mem.fake_stat(1, StatKind::Stat),
            Err(TraceError::BadAddress(0))
        );
    }

    #[test]
    fn arg_out_of_range_is_fatal() {
        let mem = Memory::new(Personality::X86_64);
        assert!(mem.arg(6).unwrap_err().is_fatal());
    }

    #[test]
    fn esrch_means_gone() {
        assert!(TraceError::from_errno("getregs", Errno::SRCH).is_gone());
        assert!(TraceError::from_errno("getregs", Errno::PERM).is_fatal());
        assert_eq!(
            TraceError::from_mem_errno("peekdata", 8, Errno::IO),
            TraceError::BadAddress(8)
        );
    }
}
