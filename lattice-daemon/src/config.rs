//
// Copyright (c) The Lattice Project Contributors
//
// SPDX-License-Identifier: MIT
//

#![allow(clippy::derivable_impls)]

use serde::Deserialize;
use tracing::warn;

use crate::northbound::datastore::FileFormat;

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub database_path: String,
    pub pidfile: String,
    pub startup_mode: StartupMode,
    // Extra XML configuration merged into the startup candidate.
    pub extra_config: Option<String>,
    pub datastore: Datastore,
    // Per-request deadline, in seconds (0 disables it).
    pub rpc_timeout: u32,
    pub listen: Listen,
    pub yang: Yang,
    pub nacm: NacmSettings,
    pub confirmed_commit: ConfirmedCommitSettings,
    pub logging: Logging,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum StartupMode {
    None,
    #[default]
    Startup,
    Running,
    Init,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Datastore {
    pub dir: String,
    pub format: String,
    pub cache: bool,
    pub pretty: bool,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Listen {
    pub enabled: bool,
    pub family: ListenFamily,
    pub address: String,
    // Peer group required to connect (Unix sockets only).
    pub group: Option<String>,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ListenFamily {
    #[default]
    Unix,
    Ipv4,
    Ipv6,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Yang {
    pub search_paths: Vec<String>,
    pub modules: Vec<String>,
    pub main_module: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NacmSettings {
    pub mode: NacmMode,
    pub external_file: Option<String>,
    pub credentials: NacmCredentials,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum NacmMode {
    Disabled,
    #[default]
    Internal,
    External,
}

// How transport credentials map to the NACM principal.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum NacmCredentials {
    // Credentials are not verified.
    None,
    // Credentials identify the user; no recovery session exists.
    Exact,
    // As `exact`, except that uid 0 is a recovery session.
    #[default]
    Except,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfirmedCommitSettings {
    pub default_timeout: u32,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Logging {
    pub file: LoggingFile,
    pub stdout: LoggingStdout,
    pub stderr: LoggingStderr,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingFile {
    pub enabled: bool,
    pub dir: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingStdout {
    pub enabled: bool,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingStderr {
    pub enabled: bool,
}

// ===== impl Config =====

impl Config {
    const DFLT_FILEPATH: &'static str = "/etc/latticed.toml";

    pub(crate) fn load(config_file: Option<&str>) -> Config {
        let config_file = config_file.unwrap_or(Config::DFLT_FILEPATH);

        match std::fs::read_to_string(config_file) {
            Ok(config_str) => toml::from_str(&config_str)
                .expect("Failed to parse configuration file"),
            Err(err) => {
                eprintln!("Failed to load configuration file: {err}");
                eprintln!("Falling back to default configuration...");
                Config::default()
            }
        }
    }

    // Applies a single `-o key=val` override.
    pub(crate) fn apply_override(&mut self, key: &str, value: &str) {
        match key {
            "database-path" => self.database_path = value.to_owned(),
            "pidfile" => self.pidfile = value.to_owned(),
            "startup-mode" => match value.parse::<StartupMode>() {
                Ok(mode) => self.startup_mode = mode,
                Err(()) => warn!(%value, "invalid startup mode"),
            },
            "extra-config" => self.extra_config = Some(value.to_owned()),
            "rpc-timeout" => match value.parse::<u32>() {
                Ok(timeout) => self.rpc_timeout = timeout,
                Err(_) => warn!(%value, "invalid rpc timeout"),
            },
            "datastore.dir" => self.datastore.dir = value.to_owned(),
            "datastore.format" => self.datastore.format = value.to_owned(),
            "datastore.cache" => {
                self.datastore.cache = value == "true";
            }
            "datastore.pretty" => {
                self.datastore.pretty = value == "true";
            }
            "listen.enabled" => self.listen.enabled = value == "true",
            "listen.family" => match value.parse::<ListenFamily>() {
                Ok(family) => self.listen.family = family,
                Err(()) => warn!(%value, "invalid socket family"),
            },
            "listen.address" => self.listen.address = value.to_owned(),
            "listen.group" => self.listen.group = Some(value.to_owned()),
            "yang.main-module" => {
                self.yang.main_module = Some(value.to_owned())
            }
            "nacm.mode" => match value {
                "disabled" => self.nacm.mode = NacmMode::Disabled,
                "internal" => self.nacm.mode = NacmMode::Internal,
                "external" => self.nacm.mode = NacmMode::External,
                _ => warn!(%value, "invalid NACM mode"),
            },
            "nacm.external-file" => {
                self.nacm.external_file = Some(value.to_owned())
            }
            "confirmed-commit.default-timeout" => {
                match value.parse::<u32>() {
                    Ok(timeout) => {
                        self.confirmed_commit.default_timeout = timeout
                    }
                    Err(_) => warn!(%value, "invalid confirm timeout"),
                }
            }
            _ => warn!(%key, "unknown configuration override"),
        }
    }
}

impl Default for Config {
    fn default() -> Config {
        Config {
            database_path: "/var/lib/lattice/transactions.db".to_owned(),
            pidfile: "/run/latticed.pid".to_owned(),
            startup_mode: Default::default(),
            extra_config: None,
            rpc_timeout: 0,
            datastore: Default::default(),
            listen: Default::default(),
            yang: Default::default(),
            nacm: Default::default(),
            confirmed_commit: Default::default(),
            logging: Default::default(),
        }
    }
}

// ===== impl StartupMode =====

impl std::str::FromStr for StartupMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(StartupMode::None),
            "startup" => Ok(StartupMode::Startup),
            "running" => Ok(StartupMode::Running),
            "init" => Ok(StartupMode::Init),
            _ => Err(()),
        }
    }
}

// ===== impl Datastore =====

impl Datastore {
    pub(crate) fn file_format(&self) -> FileFormat {
        self.format.parse().unwrap_or_default()
    }
}

impl Default for Datastore {
    fn default() -> Datastore {
        Datastore {
            dir: "/var/lib/lattice/datastores".to_owned(),
            format: "xml".to_owned(),
            cache: true,
            pretty: false,
        }
    }
}

// ===== impl Listen =====

impl Default for Listen {
    fn default() -> Listen {
        Listen {
            enabled: true,
            family: Default::default(),
            address: "/run/latticed.sock".to_owned(),
            group: None,
        }
    }
}

// ===== impl ListenFamily =====

impl std::str::FromStr for ListenFamily {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "UNIX" | "unix" => Ok(ListenFamily::Unix),
            "IPv4" | "ipv4" => Ok(ListenFamily::Ipv4),
            "IPv6" | "ipv6" => Ok(ListenFamily::Ipv6),
            _ => Err(()),
        }
    }
}

// ===== impl NacmSettings =====

impl Default for NacmSettings {
    fn default() -> NacmSettings {
        NacmSettings {
            mode: Default::default(),
            external_file: None,
            credentials: Default::default(),
        }
    }
}

// ===== impl ConfirmedCommitSettings =====

impl Default for ConfirmedCommitSettings {
    fn default() -> ConfirmedCommitSettings {
        ConfirmedCommitSettings {
            default_timeout: crate::northbound::confirmed::DEFAULT_TIMEOUT,
        }
    }
}

// ===== impl LoggingFile =====

impl Default for LoggingFile {
    fn default() -> LoggingFile {
        LoggingFile {
            enabled: false,
            dir: "/var/log".to_owned(),
            name: "latticed.log".to_owned(),
        }
    }
}

// ===== impl LoggingStdout =====

impl Default for LoggingStdout {
    fn default() -> LoggingStdout {
        LoggingStdout { enabled: false }
    }
}

// ===== impl LoggingStderr =====

impl Default for LoggingStderr {
    fn default() -> LoggingStderr {
        LoggingStderr { enabled: true }
    }
}
