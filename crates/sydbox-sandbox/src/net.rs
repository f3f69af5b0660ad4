//! Socket address decoding and the network whitelist.
//!
//! Destinations of `connect`, `bind`, `sendto` and `sendmsg` are read out of
//! the tracee as raw `sockaddr` bytes and decoded into a [`SocketAddress`].
//! Whitelist entries ([`NetAddr`]) are written as URLs:
//!
//! | Syntax | Matches |
//! |--------|---------|
//! | `unix:///run/foo.sock` | UNIX socket at that path |
//! | `unix-abstract://name` | abstract UNIX socket `name` |
//! | `inet://127.0.0.0/8@53` | IPv4 network, single port |
//! | `inet6://::1@1024-65535` | IPv6 address, port range |

use std::fmt;
use std::fs;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::ops::RangeInclusive;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use sydbox_sys::{Personality, TraceError, Tracee};
use thiserror::Error;

use crate::resolve;
use crate::syscall::NetCall;

/// Largest `sockaddr` we read (`sizeof(struct sockaddr_storage)`).
const SOCKADDR_MAX: u64 = 128;
const SUN_PATH_OFFSET: usize = 2;

// socketcall(2) multiplexer sub-calls.
const SYS_BIND: u64 = 2;
const SYS_CONNECT: u64 = 3;
const SYS_SENDTO: u64 = 11;
const SYS_SENDMSG: u64 = 16;

/// A decoded socket address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketAddress {
    Unix(PathBuf),
    UnixAbstract(Vec<u8>),
    /// An unbound UNIX socket (`autobind`).
    UnixUnnamed,
    Inet(Ipv4Addr, u16),
    Inet6(Ipv6Addr, u16),
    /// Any other address family, passed through unchecked.
    Other(u16),
}

impl SocketAddress {
    /// Decode a raw `sockaddr` as the kernel would see it.
    pub fn from_raw(raw: &[u8]) -> Option<Self> {
        if raw.len() < 2 {
            return None;
        }
        let family = u16::from_ne_bytes([raw[0], raw[1]]);
        let addr = match i32::from(family) {
            libc::AF_UNIX => {
                let path = &raw[SUN_PATH_OFFSET..];
                if path.is_empty() {
                    Self::UnixUnnamed
                } else if path[0] == 0 {
                    Self::UnixAbstract(path[1..].to_vec())
                } else {
                    let end = path.iter().position(|&b| b == 0).unwrap_or(path.len());
                    Self::Unix(PathBuf::from(std::ffi::OsStr::from_bytes(&path[..end])))
                }
            }
            libc::AF_INET => {
                if raw.len() < 8 {
                    return None;
                }
                let port = u16::from_be_bytes([raw[2], raw[3]]);
                Self::Inet(Ipv4Addr::new(raw[4], raw[5], raw[6], raw[7]), port)
            }
            libc::AF_INET6 => {
                if raw.len() < 24 {
                    return None;
                }
                let port = u16::from_be_bytes([raw[2], raw[3]]);
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&raw[8..24]);
                Self::Inet6(Ipv6Addr::from(octets), port)
            }
            _ => Self::Other(family),
        };
        Some(addr)
    }

    pub fn port(&self) -> Option<u16> {
        match self {
            Self::Inet(_, port) | Self::Inet6(_, port) => Some(*port),
            _ => None,
        }
    }

    /// Whether this address stays on the host. `bind` additionally accepts
    /// the unspecified address.
    pub fn is_local(&self, bind: bool) -> bool {
        match self {
            Self::Unix(_) | Self::UnixAbstract(_) | Self::UnixUnnamed => true,
            Self::Inet(ip, _) => ip.is_loopback() || (bind && ip.is_unspecified()),
            Self::Inet6(ip, _) => {
                ip.is_loopback()
                    || (bind && ip.is_unspecified())
                    || ip.to_ipv4_mapped().is_some_and(|v4| v4.is_loopback())
            }
            Self::Other(_) => false,
        }
    }

    /// Anchor a relative UNIX socket path at `cwd`, as the kernel does.
    pub fn anchored(self, cwd: &Path) -> Self {
        match self {
            Self::Unix(path) if path.is_relative() => Self::Unix(resolve::normalize(&path, cwd)),
            other => other,
        }
    }

    /// True for addresses network sandboxing has no opinion about.
    pub fn is_unchecked(&self) -> bool {
        matches!(self, Self::UnixUnnamed | Self::Other(_))
    }
}

impl fmt::Display for SocketAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unix(path) => write!(f, "unix://{}", path.display()),
            Self::UnixAbstract(name) => {
                write!(f, "unix-abstract://{}", String::from_utf8_lossy(name))
            }
            Self::UnixUnnamed => f.write_str("unix://"),
            Self::Inet(ip, port) => write!(f, "inet://{ip}@{port}"),
            Self::Inet6(ip, port) => write!(f, "inet6://{ip}@{port}"),
            Self::Other(family) => write!(f, "family:{family}"),
        }
    }
}

/// Destination of an intercepted network call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    /// The call after `socketcall` demultiplexing.
    pub call: NetCall,
    pub fd: i32,
    pub addr: SocketAddress,
}

/// Read the destination address of a network call out of the tracee.
/// Relative UNIX socket paths are taken relative to `cwd`.
///
/// Returns `None` when the call carries no address (a `sendto` on a
/// connected socket, an unknown `socketcall` sub-call).
pub fn read_destination(
    tracee: &dyn Tracee,
    call: NetCall,
    cwd: &Path,
) -> Result<Option<Destination>, TraceError> {
    let (call, args) = match call {
        NetCall::Socketcall => {
            let sub = tracee.arg(0)?;
            let call = match sub {
                SYS_BIND => NetCall::Bind,
                SYS_CONNECT => NetCall::Connect,
                SYS_SENDTO => NetCall::Sendto,
                SYS_SENDMSG => NetCall::Sendmsg,
                _ => return Ok(None),
            };
            // Arguments are an array of 32-bit words.
            let raw = tracee.read_bytes(tracee.arg(1)?, 6 * 4)?;
            let args: Vec<u64> = raw
                .chunks_exact(4)
                .map(|w| u64::from(u32::from_ne_bytes([w[0], w[1], w[2], w[3]])))
                .collect();
            (call, args)
        }
        direct => {
            let args = (0..6).map(|i| tracee.arg(i)).collect::<Result<Vec<_>, _>>()?;
            (direct, args)
        }
    };

    let fd = args[0] as i32;
    let (addr, len) = match call {
        NetCall::Connect | NetCall::Bind => (args[1], args[2]),
        NetCall::Sendto => (args[4], args[5]),
        NetCall::Sendmsg => msg_name(tracee, args[1])?,
        NetCall::Socketcall => return Ok(None),
    };
    if addr == 0 || len == 0 {
        return Ok(None);
    }
    let raw = tracee.read_bytes(addr, len.min(SOCKADDR_MAX) as usize)?;
    Ok(SocketAddress::from_raw(&raw).map(|addr| Destination {
        call,
        fd,
        addr: addr.anchored(cwd),
    }))
}

/// `msg_name` and `msg_namelen` of the `struct msghdr` at `hdr`.
fn msg_name(tracee: &dyn Tracee, hdr: u64) -> Result<(u64, u64), TraceError> {
    if hdr == 0 {
        return Ok((0, 0));
    }
    match tracee.personality() {
        Personality::X86_64 => {
            let raw = tracee.read_bytes(hdr, 12)?;
            let name = u64::from_ne_bytes(raw[0..8].try_into().unwrap_or_default());
            let len = u32::from_ne_bytes(raw[8..12].try_into().unwrap_or_default());
            Ok((name, u64::from(len)))
        }
        Personality::I386 => {
            let raw = tracee.read_bytes(hdr, 8)?;
            let name = u32::from_ne_bytes(raw[0..4].try_into().unwrap_or_default());
            let len = u32::from_ne_bytes(raw[4..8].try_into().unwrap_or_default());
            Ok((u64::from(name), u64::from(len)))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddrParseError {
    #[error("unknown address scheme in {0:?}")]
    Scheme(String),

    #[error("invalid address {0:?}")]
    Address(String),

    #[error("invalid prefix length in {0:?}")]
    Prefix(String),

    #[error("invalid port in {0:?}")]
    Port(String),
}

/// A whitelist entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetAddr {
    Unix(PathBuf),
    UnixAbstract(Vec<u8>),
    Inet {
        addr: Ipv4Addr,
        prefix: u8,
        ports: RangeInclusive<u16>,
    },
    Inet6 {
        addr: Ipv6Addr,
        prefix: u8,
        ports: RangeInclusive<u16>,
    },
}

impl NetAddr {
    pub fn matches(&self, addr: &SocketAddress) -> bool {
        match (self, addr) {
            (Self::Unix(want), SocketAddress::Unix(got)) => want == got,
            (Self::UnixAbstract(want), SocketAddress::UnixAbstract(got)) => {
                // Abstract names are not NUL terminated; tolerate padding.
                want.as_slice() == trim_nul(got)
            }
            (Self::Inet { addr, prefix, ports }, SocketAddress::Inet(ip, port)) => {
                ports.contains(port) && v4_in(*addr, *prefix, *ip)
            }
            (Self::Inet6 { addr, prefix, ports }, SocketAddress::Inet6(ip, port)) => {
                ports.contains(port) && v6_in(*addr, *prefix, *ip)
            }
            _ => false,
        }
    }

    /// The entry that lets peers reach a socket bound to `addr`.
    ///
    /// A wildcard bind is reachable through loopback.
    pub fn from_bound(addr: &SocketAddress) -> Option<Self> {
        match addr {
            SocketAddress::Unix(path) => Some(Self::Unix(path.clone())),
            SocketAddress::UnixAbstract(name) => Some(Self::UnixAbstract(trim_nul(name).to_vec())),
            SocketAddress::Inet(ip, port) if ip.is_unspecified() => Some(Self::Inet {
                addr: Ipv4Addr::new(127, 0, 0, 0),
                prefix: 8,
                ports: *port..=*port,
            }),
            SocketAddress::Inet(ip, port) => Some(Self::Inet {
                addr: *ip,
                prefix: 32,
                ports: *port..=*port,
            }),
            SocketAddress::Inet6(ip, port) => Some(Self::Inet6 {
                addr: if ip.is_unspecified() { Ipv6Addr::LOCALHOST } else { *ip },
                prefix: 128,
                ports: *port..=*port,
            }),
            SocketAddress::UnixUnnamed | SocketAddress::Other(_) => None,
        }
    }
}

impl FromStr for NetAddr {
    type Err = AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(path) = s.strip_prefix("unix://") {
            if !path.starts_with('/') {
                return Err(AddrParseError::Address(s.to_string()));
            }
            return Ok(Self::Unix(PathBuf::from(path)));
        }
        if let Some(name) = s.strip_prefix("unix-abstract://") {
            return Ok(Self::UnixAbstract(name.as_bytes().to_vec()));
        }
        if let Some(rest) = s.strip_prefix("inet://") {
            let (host, prefix, ports) = split_inet(s, rest, 32)?;
            let addr = host
                .parse::<Ipv4Addr>()
                .map_err(|_| AddrParseError::Address(s.to_string()))?;
            return Ok(Self::Inet { addr, prefix, ports });
        }
        if let Some(rest) = s.strip_prefix("inet6://") {
            let (host, prefix, ports) = split_inet(s, rest, 128)?;
            let addr = host
                .parse::<Ipv6Addr>()
                .map_err(|_| AddrParseError::Address(s.to_string()))?;
            return Ok(Self::Inet6 { addr, prefix, ports });
        }
        Err(AddrParseError::Scheme(s.to_string()))
    }
}

impl fmt::Display for NetAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unix(path) => write!(f, "unix://{}", path.display()),
            Self::UnixAbstract(name) => {
                write!(f, "unix-abstract://{}", String::from_utf8_lossy(name))
            }
            Self::Inet { addr, prefix, ports } => {
                write!(f, "inet://{addr}/{prefix}@")?;
                write_ports(f, ports)
            }
            Self::Inet6 { addr, prefix, ports } => {
                write!(f, "inet6://{addr}/{prefix}@")?;
                write_ports(f, ports)
            }
        }
    }
}

fn write_ports(f: &mut fmt::Formatter<'_>, ports: &RangeInclusive<u16>) -> fmt::Result {
    if ports.start() == ports.end() {
        write!(f, "{}", ports.start())
    } else {
        write!(f, "{}-{}", ports.start(), ports.end())
    }
}

/// Split `ADDR[/BITS]@PORT[-PORT]`.
fn split_inet<'a>(
    whole: &str,
    rest: &'a str,
    max_prefix: u8,
) -> Result<(&'a str, u8, RangeInclusive<u16>), AddrParseError> {
    let (host, ports) = rest
        .rsplit_once('@')
        .ok_or_else(|| AddrParseError::Port(whole.to_string()))?;
    let (host, prefix) = match host.split_once('/') {
        Some((host, bits)) => {
            let bits = bits
                .parse::<u8>()
                .ok()
                .filter(|b| *b <= max_prefix)
                .ok_or_else(|| AddrParseError::Prefix(whole.to_string()))?;
            (host, bits)
        }
        None => (host, max_prefix),
    };
    let port = |p: &str| {
        p.parse::<u16>()
            .map_err(|_| AddrParseError::Port(whole.to_string()))
    };
    let ports = match ports.split_once('-') {
        Some((lo, hi)) => {
            let (lo, hi) = (port(lo)?, port(hi)?);
            if lo > hi {
                return Err(AddrParseError::Port(whole.to_string()));
            }
            lo..=hi
        }
        None => {
            let p = port(ports)?;
            p..=p
        }
    };
    Ok((host, prefix, ports))
}

fn v4_in(net: Ipv4Addr, prefix: u8, ip: Ipv4Addr) -> bool {
    let mask = u32::MAX.checked_shl(32 - u32::from(prefix)).unwrap_or(0);
    u32::from(net) & mask == u32::from(ip) & mask
}

fn v6_in(net: Ipv6Addr, prefix: u8, ip: Ipv6Addr) -> bool {
    let mask = u128::MAX.checked_shl(128 - u32::from(prefix)).unwrap_or(0);
    u128::from(net) & mask == u128::from(ip) & mask
}

fn trim_nul(name: &[u8]) -> &[u8] {
    let end = name.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    &name[..end]
}

/// Network destinations trusted under the `deny` mode and by
/// restrict-connect.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetWhitelist {
    entries: Vec<NetAddr>,
}

impl NetWhitelist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `addr`, returning false if an identical entry already exists.
    pub fn add(&mut self, addr: NetAddr) -> bool {
        if self.entries.contains(&addr) {
            return false;
        }
        self.entries.push(addr);
        true
    }

    pub fn remove(&mut self, addr: &NetAddr) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e != addr);
        self.entries.len() != before
    }

    pub fn contains(&self, addr: &SocketAddress) -> bool {
        self.entries.iter().any(|e| e.matches(addr))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &NetAddr> {
        self.entries.iter()
    }
}

impl FromIterator<NetAddr> for NetWhitelist {
    fn from_iter<I: IntoIterator<Item = NetAddr>>(iter: I) -> Self {
        let mut list = Self::new();
        for addr in iter {
            list.add(addr);
        }
        list
    }
}

/// Local port of socket `fd` of `pid`, looked up through procfs.
///
/// Used after `bind(port 0)` to learn the port the kernel picked.
pub fn bound_port(pid: libc::pid_t, fd: i32) -> Option<u16> {
    let link = fs::read_link(format!("/proc/{pid}/fd/{fd}")).ok()?;
    let inode = parse_socket_inode(&link)?;
    ["tcp", "tcp6", "udp", "udp6"].iter().find_map(|table| {
        let text = fs::read_to_string(format!("/proc/{pid}/net/{table}")).ok()?;
        find_port(&text, inode)
    })
}

fn parse_socket_inode(link: &Path) -> Option<u64> {
    let s = link.to_str()?;
    s.strip_prefix("socket:[")?.strip_suffix(']')?.parse().ok()
}

/// Find the local port of `inode` in a `/proc/net/{tcp,udp}{,6}` table.
fn find_port(table: &str, inode: u64) -> Option<u16> {
    table.lines().skip(1).find_map(|line| {
        let cols: Vec<&str> = line.split_whitespace().collect();
        if cols.get(9)?.parse::<u64>().ok()? != inode {
            return None;
        }
        let (_, port) = cols.get(1)?.rsplit_once(':')?;
        u16::from_str_radix(port, 16).ok()
    })
}
