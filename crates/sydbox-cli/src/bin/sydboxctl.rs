//! sydboxctl - control the sandbox from inside it.
//!
//! Each subcommand is a single `stat(2)` of a magic path. Exit status is 0
//! if the command took effect, 1 if it was refused (locked, or `enabled`
//! with path sandboxing off) and 2 when not running under sydbox.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use sydbox_sandbox::NetAddr;
use sydbox_sandbox::magic::CONTROL_DIR;

#[derive(Parser, Debug)]
#[command(name = "sydboxctl")]
#[command(author, version, about = "Control the sydbox sandbox from a traced process")]
struct Cli {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Succeed if path sandboxing is enabled
    Enabled,
    /// Enable path sandboxing
    On,
    /// Disable path sandboxing
    Off,
    /// Toggle path sandboxing
    Toggle,
    /// Refuse all further commands
    Lock,
    /// Refuse all further commands after the next exec
    ExecLock,
    /// Allow writes beneath PATH
    Write { path: PathBuf },
    /// Remove a write prefix
    Unwrite { path: PathBuf },
    /// Fake successful writes beneath PATH
    Predict { path: PathBuf },
    /// Remove a predict prefix
    Unpredict { path: PathBuf },
    /// Allow exec beneath PATH
    Addexec { path: PathBuf },
    /// Remove an exec prefix
    Rmexec { path: PathBuf },
    /// Whitelist a network address, e.g. inet://127.0.0.1@53
    Whitelist { addr: NetAddr },
}

impl Cmd {
    /// Magic path carrying this command.
    fn magic_path(&self) -> std::io::Result<String> {
        let with_path = |name: &str, path: &Path| -> std::io::Result<String> {
            let path = std::path::absolute(path)?;
            Ok(format!("{CONTROL_DIR}/{name}{}", path.display()))
        };
        Ok(match self {
            Self::Enabled => format!("{CONTROL_DIR}/enabled"),
            Self::On => format!("{CONTROL_DIR}/on"),
            Self::Off => format!("{CONTROL_DIR}/off"),
            Self::Toggle => format!("{CONTROL_DIR}/toggle"),
            Self::Lock => format!("{CONTROL_DIR}/lock"),
            Self::ExecLock => format!("{CONTROL_DIR}/exec_lock"),
            Self::Write { path } => with_path("write", path)?,
            Self::Unwrite { path } => with_path("unwrite", path)?,
            Self::Predict { path } => with_path("predict", path)?,
            Self::Unpredict { path } => with_path("unpredict", path)?,
            Self::Addexec { path } => with_path("addexec", path)?,
            Self::Rmexec { path } => with_path("rmexec", path)?,
            Self::Whitelist { addr } => format!("{CONTROL_DIR}/net/whitelist/{addr}"),
        })
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if std::fs::metadata(CONTROL_DIR).is_err() {
        eprintln!("sydboxctl: not running under sydbox");
        return ExitCode::from(2);
    }

    let path = match cli.command.magic_path() {
        Ok(path) => path,
        Err(e) => {
            eprintln!("sydboxctl: {e}");
            return ExitCode::FAILURE;
        }
    };
    match std::fs::metadata(&path) {
        Ok(_) => ExitCode::SUCCESS,
        Err(_) => ExitCode::FAILURE,
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    fn path_of(args: &[&str]) -> String {
        let cli = Cli::parse_from(std::iter::once("sydboxctl").chain(args.iter().copied()));
        cli.command.magic_path().unwrap()
    }

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn simple_commands() {
        assert_eq!(path_of(&["on"]), "/dev/sydbox/on");
        assert_eq!(path_of(&["exec-lock"]), "/dev/sydbox/exec_lock");
        assert_eq!(path_of(&["enabled"]), "/dev/sydbox/enabled");
    }

    #[test]
    fn paths_made_absolute() {
        assert_eq!(path_of(&["write", "/tmp/out"]), "/dev/sydbox/write/tmp/out");
        let cwd = std::env::current_dir().unwrap();
        assert_eq!(
            path_of(&["addexec", "bin"]),
            format!("/dev/sydbox/addexec{}", cwd.join("bin").display())
        );
    }

    #[test]
    fn whitelist_address() {
        assert_eq!(
            path_of(&["whitelist", "inet://127.0.0.1@53"]),
            "/dev/sydbox/net/whitelist/inet://127.0.0.1/32@53"
        );
        assert!(Cli::try_parse_from(["sydboxctl", "whitelist", "ftp://x"]).is_err());
    }
}
