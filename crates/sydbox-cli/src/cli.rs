//! CLI argument definitions for sydbox.

use std::path::PathBuf;

use clap::Parser;
use sydbox_sandbox::{Lock, NetAddr, NetMode, Policy, PrefixError, WaitMode};

/// sydbox - ptrace based sandbox for build environments
///
/// Runs a command (or attaches to running processes) and confines every
/// process of the tree to the configured write, exec and network policy.
#[derive(Parser, Debug)]
#[command(name = "sydbox")]
#[command(author, version, about, long_about = None)]
#[command(after_help = "EXAMPLES:
    # Allow writes beneath the build directory only
    sydbox --write ./build -- make

    # Fake writes to /dev, confine network to the local host
    sydbox --predict /dev -N -M local -- ./configure

    # Attach to a running process tree
    sydbox -p 4242
")]
pub struct Cli {
    /// Configuration file (default: $SYDBOX_CONFIG)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Attach to a running process instead of launching one
    #[arg(short = 'p', long = "attach", value_name = "PID", conflicts_with = "command")]
    pub attach: Vec<i32>,

    /// Lock magic commands from the start
    #[arg(short = 'L', long)]
    pub lock: bool,

    /// Disable path sandboxing
    #[arg(short = 'P', long = "no-path")]
    pub no_path: bool,

    /// Enable exec sandboxing
    #[arg(short = 'E', long)]
    pub sandbox_exec: bool,

    /// Enable network sandboxing
    #[arg(short = 'N', long)]
    pub sandbox_network: bool,

    /// Network mode: allow, deny or local
    #[arg(short = 'M', long, value_name = "MODE")]
    pub network_mode: Option<NetMode>,

    /// Require whitelisted destinations for connect in local mode
    #[arg(long)]
    pub restrict_connect: bool,

    /// Stop tracing as soon as the launched process exits
    #[arg(short = 'W', long)]
    pub wait_eldest: bool,

    /// Allow writes beneath PATH (repeatable)
    #[arg(short, long, value_name = "PATH")]
    pub write: Vec<String>,

    /// Fake successful writes beneath PATH (repeatable)
    #[arg(long, value_name = "PATH")]
    pub predict: Vec<String>,

    /// Allow exec beneath PATH (repeatable)
    #[arg(long, value_name = "PATH")]
    pub exec_allow: Vec<String>,

    /// Whitelist a network address, e.g. inet://127.0.0.1@53 (repeatable)
    #[arg(long, value_name = "ADDR")]
    pub whitelist: Vec<NetAddr>,

    /// Do not report violations whose target matches GLOB (repeatable)
    #[arg(long, value_name = "GLOB")]
    pub filter: Vec<String>,

    /// Enable verbose output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, conflicts_with = "quiet")]
    pub verbose: u8,

    /// Only log errors
    #[arg(short, long)]
    pub quiet: bool,

    /// Command to run
    #[arg(
        value_name = "COMMAND",
        trailing_var_arg = true,
        allow_hyphen_values = true,
        required_unless_present = "attach"
    )]
    pub command: Vec<String>,
}

impl Cli {
    /// Log filter implied by `-v` and `-q`, if any was given.
    pub fn log_level(&self) -> Option<&'static str> {
        if self.quiet {
            return Some("error");
        }
        match self.verbose {
            0 => None,
            1 => Some("info"),
            2 => Some("debug"),
            _ => Some("trace"),
        }
    }

    /// Apply the flags on top of `policy`.
    pub fn apply(&self, policy: &mut Policy) -> Result<(), PrefixError> {
        let process = &mut policy.process;
        if self.lock {
            process.lock = Lock::Set;
        }
        if self.no_path {
            process.path = false;
        }
        if self.sandbox_exec {
            process.exec = true;
        }
        if self.sandbox_network {
            process.network = true;
        }
        if let Some(mode) = self.network_mode {
            process.net_mode = mode;
        }
        if self.restrict_connect {
            process.restrict_connect = true;
        }
        for path in &self.write {
            process.write.add(path, true)?;
        }
        for path in &self.predict {
            process.predict.add(path, true)?;
        }
        for path in &self.exec_allow {
            process.exec_allow.add(path, true)?;
        }
        if self.wait_eldest {
            policy.wait = WaitMode::Eldest;
        }
        for addr in &self.whitelist {
            policy.whitelist.add(addr.clone());
        }
        policy.filters.extend(self.filter.iter().cloned());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use clap::CommandFactory;

    use super::*;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn command_after_flags() {
        let cli = Cli::parse_from(["sydbox", "-E", "--", "make", "-j4"]);
        assert!(cli.sandbox_exec);
        assert_eq!(cli.command, ["make", "-j4"]);
    }

    #[test]
    fn command_or_attach_required() {
        assert!(Cli::try_parse_from(["sydbox"]).is_err());
        let cli = Cli::parse_from(["sydbox", "-p", "10", "-p", "11"]);
        assert_eq!(cli.attach, [10, 11]);
        assert!(Cli::try_parse_from(["sydbox", "-p", "10", "make"]).is_err());
    }

    #[test]
    fn log_levels() {
        assert_eq!(Cli::parse_from(["sydbox", "true"]).log_level(), None);
        assert_eq!(Cli::parse_from(["sydbox", "-vv", "true"]).log_level(), Some("debug"));
        assert_eq!(Cli::parse_from(["sydbox", "-q", "true"]).log_level(), Some("error"));
    }

    #[test]
    fn flags_override_policy() {
        let cli = Cli::parse_from([
            "sydbox",
            "-L",
            "-P",
            "-N",
            "-M",
            "local",
            "-W",
            "--write",
            "/tmp",
            "--whitelist",
            "unix:///run/x.sock",
            "--",
            "true",
        ]);
        let mut policy = Policy::new().exec_sandbox(true);
        cli.apply(&mut policy).unwrap();

        assert_eq!(policy.process.lock, Lock::Set);
        assert!(!policy.process.path);
        assert!(policy.process.exec);
        assert!(policy.process.network);
        assert_eq!(policy.process.net_mode, NetMode::Local);
        assert_eq!(policy.wait, WaitMode::Eldest);
        assert!(policy.process.write.contains(Path::new("/tmp/x")));
        assert_eq!(policy.whitelist.len(), 1);
    }

    #[test]
    fn bad_network_mode() {
        assert!(Cli::try_parse_from(["sydbox", "-M", "open", "true"]).is_err());
    }
}
