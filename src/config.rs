//! Server configuration.
//!
//! Settings come from an optional YAML file named by `LANTERN_CONFIG`; every
//! field has a default, so a partial file (or none at all) is fine.
//! `LANTERN_PORT` and `LANTERN_ROOT` override the corresponding file values.
//!
//! ```yaml
//! server:
//!   port: 8081
//!   trigger_mode: edge      # level | conn-edge | listen-edge | edge, or 0-3
//!   idle_timeout_ms: 60000  # 0 disables idle eviction
//!   linger: false
//!   workers: 4
//!   max_connections: 65535
//!   max_events: 1024
//!   root: ./resources
//! log:
//!   enabled: true
//!   level: info
//!   file: /var/log/lantern.log
//!   rotation: daily         # never | minutely | hourly | daily
//!   asynchronous: true
//!   queue_capacity: 1024
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

pub const CONFIG_ENV: &str = "LANTERN_CONFIG";
pub const PORT_ENV: &str = "LANTERN_PORT";
pub const ROOT_ENV: &str = "LANTERN_ROOT";

/// How sockets are registered with epoll.
///
/// Connection sockets are always one-shot; the mode only decides whether
/// the listener and the connections use edge- or level-triggered
/// notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "RawTriggerMode")]
pub enum TriggerMode {
    /// Both level-triggered
    Level,
    /// Connections edge-triggered, listener level-triggered
    ConnEdge,
    /// Listener edge-triggered, connections level-triggered
    ListenEdge,
    /// Both edge-triggered
    #[default]
    Edge,
}

impl TriggerMode {
    /// Legacy numeric selector: 0 level, 1 conn-edge, 2 listen-edge,
    /// anything else edge.
    pub fn from_index(index: u64) -> Self {
        match index {
            0 => TriggerMode::Level,
            1 => TriggerMode::ConnEdge,
            2 => TriggerMode::ListenEdge,
            _ => TriggerMode::Edge,
        }
    }

    pub fn listen_edge(&self) -> bool {
        matches!(self, TriggerMode::ListenEdge | TriggerMode::Edge)
    }

    pub fn conn_edge(&self) -> bool {
        matches!(self, TriggerMode::ConnEdge | TriggerMode::Edge)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTriggerMode {
    Index(u64),
    Name(String),
}

impl TryFrom<RawTriggerMode> for TriggerMode {
    type Error = String;

    fn try_from(raw: RawTriggerMode) -> Result<Self, Self::Error> {
        match raw {
            RawTriggerMode::Index(i) => Ok(TriggerMode::from_index(i)),
            RawTriggerMode::Name(name) => match name.as_str() {
                "level" => Ok(TriggerMode::Level),
                "conn-edge" => Ok(TriggerMode::ConnEdge),
                "listen-edge" => Ok(TriggerMode::ListenEdge),
                "edge" => Ok(TriggerMode::Edge),
                other => Err(format!(
                    "unknown trigger mode {:?}, expected level, conn-edge, listen-edge or edge",
                    other
                )),
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub port: u16,
    pub trigger_mode: TriggerMode,
    /// Idle eviction timeout in milliseconds; 0 disables it.
    pub idle_timeout_ms: u64,
    /// Graceful close with `SO_LINGER`.
    pub linger: bool,
    pub workers: usize,
    pub max_connections: usize,
    /// Capacity of the epoll event array.
    pub max_events: usize,
    /// Document root.
    pub root: PathBuf,
}

impl ServerConfig {
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_ms > 0).then(|| Duration::from_millis(self.idle_timeout_ms))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8081,
            trigger_mode: TriggerMode::Edge,
            idle_timeout_ms: 60_000,
            linger: false,
            workers: 4,
            max_connections: 65535,
            max_events: 1024,
            root: PathBuf::from("./resources"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    /// With logging disabled no subscriber is installed at all.
    pub enabled: bool,
    /// Maximum level: trace, debug, info, warn or error.
    pub level: String,
    /// Write to this file instead of stdout. Rotated files get a date
    /// suffix after the file name.
    pub file: Option<PathBuf>,
    /// Period after which a new log file is started.
    pub rotation: LogRotation,
    /// Hand lines to a background writer thread instead of writing them on
    /// the calling thread.
    pub asynchronous: bool,
    /// Lines the background writer may hold before new ones are dropped.
    pub queue_capacity: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: "info".to_string(),
            file: None,
            rotation: LogRotation::Daily,
            asynchronous: true,
            queue_capacity: 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    Never,
    Minutely,
    Hourly,
    #[default]
    Daily,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub server: ServerConfig,
    pub log: LogConfig,
}

impl Config {
    /// Load from the file named by `LANTERN_CONFIG` (defaults when unset),
    /// then apply the `LANTERN_PORT` and `LANTERN_ROOT` overrides.
    pub fn load() -> anyhow::Result<Self> {
        let mut cfg = match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };

        if let Ok(port) = std::env::var(PORT_ENV) {
            cfg.server.port = port
                .trim()
                .parse()
                .with_context(|| format!("invalid {}: {:?}", PORT_ENV, port))?;
        }
        if let Some(root) = std::env::var_os(ROOT_ENV) {
            cfg.server.root = PathBuf::from(root);
        }

        Ok(cfg)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_yaml_str(&text).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn from_yaml_str(text: &str) -> anyhow::Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(text).context("failed to parse YAML")
    }

    /// Reject settings the server cannot start with.
    pub fn validate(&self) -> anyhow::Result<()> {
        let server = &self.server;
        anyhow::ensure!(
            server.port >= 1024,
            "port {} out of range, expected 1024-65535",
            server.port
        );
        anyhow::ensure!(server.workers > 0, "workers must be at least 1");
        anyhow::ensure!(server.max_connections > 0, "max_connections must be at least 1");
        anyhow::ensure!(server.max_events > 0, "max_events must be at least 1");
        anyhow::ensure!(
            server.root.is_dir(),
            "document root {} is not a directory",
            server.root.display()
        );

        let log = &self.log;
        anyhow::ensure!(log.queue_capacity > 0, "log queue_capacity must be at least 1");
        if let Some(file) = &log.file {
            anyhow::ensure!(
                file.file_name().is_some(),
                "log file {} has no file name",
                file.display()
            );
        }
        Ok(())
    }
}
