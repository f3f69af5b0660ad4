//! Configuration file and environment.
//!
//! The configuration file is TOML:
//!
//! ```toml
//! [main]
//! lock = "unset"        # unset, set or exec
//! wait = "all"          # all or eldest
//! filters = ["/proc/*"]
//!
//! [sandbox]
//! path = true
//! exec = false
//! network = false
//!
//! [prefix]
//! write = ["/tmp", "~/.cache"]
//! predict = ["/dev"]
//! exec = ["/usr/bin"]
//!
//! [net]
//! mode = "local"        # allow, deny or local
//! restrict_connect = false
//! whitelist = ["unix:///run/nscd/socket", "inet://127.0.0.1@53"]
//! ```
//!
//! Precedence, lowest first: defaults, file, environment, flags.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use sydbox_sandbox::{AddrParseError, ParseEnumError, Policy, PrefixError};
use thiserror::Error;

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "SYDBOX_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error(transparent)]
    Value(#[from] ParseEnumError),

    #[error(transparent)]
    Address(#[from] AddrParseError),

    #[error(transparent)]
    Prefix(#[from] PrefixError),
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub main: MainSection,
    pub sandbox: SandboxSection,
    pub prefix: PrefixSection,
    pub net: NetSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MainSection {
    pub lock: Option<String>,
    pub wait: Option<String>,
    pub filters: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SandboxSection {
    pub path: Option<bool>,
    pub exec: Option<bool>,
    pub network: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PrefixSection {
    pub write: Vec<String>,
    pub predict: Vec<String>,
    pub exec: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NetSection {
    pub mode: Option<String>,
    pub restrict_connect: Option<bool>,
    pub whitelist: Vec<String>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Build the startup policy. Prefixes go through shell expansion.
    pub fn into_policy(self) -> Result<Policy, ConfigError> {
        let mut policy = Policy::new();

        if let Some(lock) = self.main.lock {
            policy.process.lock = lock.parse()?;
        }
        if let Some(wait) = self.main.wait {
            policy.wait = wait.parse()?;
        }
        policy.filters = self.main.filters;

        let process = &mut policy.process;
        if let Some(path) = self.sandbox.path {
            process.path = path;
        }
        if let Some(exec) = self.sandbox.exec {
            process.exec = exec;
        }
        if let Some(network) = self.sandbox.network {
            process.network = network;
        }
        for path in &self.prefix.write {
            process.write.add(path, true)?;
        }
        for path in &self.prefix.predict {
            process.predict.add(path, true)?;
        }
        for path in &self.prefix.exec {
            process.exec_allow.add(path, true)?;
        }
        if let Some(mode) = self.net.mode {
            process.net_mode = mode.parse()?;
        }
        if let Some(restrict) = self.net.restrict_connect {
            process.restrict_connect = restrict;
        }
        for addr in &self.net.whitelist {
            policy.whitelist.add(addr.parse()?);
        }
        Ok(policy)
    }
}

/// Merge the `SYDBOX_*` environment into `policy`.
///
/// `SYDBOX_WRITE`, `SYDBOX_PREDICT` and `SYDBOX_EXEC_ALLOW` are `:`-separated
/// path lists; `SYDBOX_NET_WHITELIST` is a `;`-separated address list.
/// Unparsable whitelist entries are skipped with a warning.
pub fn apply_env(policy: &mut Policy, lookup: impl Fn(&str) -> Option<String>) {
    let process = &mut policy.process;
    if let Some(value) = lookup("SYDBOX_WRITE") {
        process.write.init_from_colon_separated(&value);
    }
    if let Some(value) = lookup("SYDBOX_PREDICT") {
        process.predict.init_from_colon_separated(&value);
    }
    if let Some(value) = lookup("SYDBOX_EXEC_ALLOW") {
        process.exec_allow.init_from_colon_separated(&value);
    }
    if let Some(value) = lookup("SYDBOX_NET_WHITELIST") {
        for entry in value.split(';').map(str::trim).filter(|e| !e.is_empty()) {
            match entry.parse() {
                Ok(addr) => {
                    policy.whitelist.add(addr);
                }
                Err(e) => tracing::warn!(entry, error = %e, "ignoring whitelist entry"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use sydbox_sandbox::{Lock, NetMode, WaitMode};

    use super::*;

    #[test]
    fn full_file() {
        let config = Config::parse(
            r#"
            [main]
            lock = "exec"
            wait = "eldest"
            filters = ["/proc/*"]

            [sandbox]
            path = false
            exec = true
            network = true

            [prefix]
            write = ["/tmp"]
            predict = ["/dev"]
            exec = ["/usr/bin"]

            [net]
            mode = "deny"
            restrict_connect = true
            whitelist = ["inet://127.0.0.1@53", "unix:///run/nscd/socket"]
            "#,
        )
        .unwrap();
        let policy = config.into_policy().unwrap();

        assert_eq!(policy.process.lock, Lock::PendingExec);
        assert_eq!(policy.wait, WaitMode::Eldest);
        assert_eq!(policy.filters, ["/proc/*"]);
        assert!(!policy.process.path);
        assert!(policy.process.exec);
        assert!(policy.process.network);
        assert!(policy.process.write.contains(Path::new("/tmp/a")));
        assert!(policy.process.predict.contains(Path::new("/dev/null")));
        assert!(policy.process.exec_allow.contains(Path::new("/usr/bin/cc")));
        assert_eq!(policy.process.net_mode, NetMode::Deny);
        assert!(policy.process.restrict_connect);
        assert_eq!(policy.whitelist.len(), 2);
    }

    #[test]
    fn empty_file_is_default() {
        let policy = Config::parse("").unwrap().into_policy().unwrap();
        assert_eq!(policy.process, Policy::new().process);
        assert!(policy.whitelist.is_empty());
    }

    #[test]
    fn unknown_keys_rejected() {
        assert!(matches!(
            Config::parse("[sandbox]\nfilesystem = true\n"),
            Err(ConfigError::Parse(_))
        ));
        assert!(Config::parse("[bogus]\n").is_err());
    }

    #[test]
    fn bad_values() {
        let config = Config::parse("[net]\nmode = \"open\"\n").unwrap();
        assert!(matches!(config.into_policy(), Err(ConfigError::Value(_))));

        let config = Config::parse("[net]\nwhitelist = [\"tcp://x\"]\n").unwrap();
        assert!(matches!(config.into_policy(), Err(ConfigError::Address(_))));
    }

    #[test]
    fn load_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[prefix]\nwrite = [\"/var/tmp\"]").unwrap();
        let policy = Config::load(file.path()).unwrap().into_policy().unwrap();
        assert!(policy.process.write.contains(Path::new("/var/tmp/x")));

        assert!(matches!(
            Config::load(Path::new("/nonexistent/sydbox.toml")),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn environment_lists() {
        let env: HashMap<&str, &str> = [
            ("SYDBOX_WRITE", "/tmp::/var/tmp"),
            ("SYDBOX_PREDICT", "/dev"),
            (
                "SYDBOX_NET_WHITELIST",
                "inet://127.0.0.1@80; bogus ;unix:///run/a.sock",
            ),
        ]
        .into_iter()
        .collect();
        let mut policy = Policy::new();
        apply_env(&mut policy, |key| env.get(key).map(|v| v.to_string()));

        assert_eq!(policy.process.write.len(), 2);
        assert!(policy.process.predict.contains(Path::new("/dev/tty")));
        assert!(policy.process.exec_allow.is_empty());
        assert_eq!(policy.whitelist.len(), 2);
    }
}
