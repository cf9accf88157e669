//! Configuration module for the uring-ack server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Command-line arguments for the server
#[derive(Parser, Debug)]
#[command(name = "uring-ack")]
#[command(version = "0.1.0")]
#[command(about = "A single-threaded io_uring acknowledgment server", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 0.0.0.0:4242)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Listen backlog
    #[arg(long)]
    pub backlog: Option<i32>,

    /// Submission queue entries
    #[arg(long)]
    pub ring_depth: Option<u32>,

    /// Disable the kernel submission queue polling thread
    #[arg(long)]
    pub no_sqpoll: bool,

    /// Milliseconds of idleness before the SQ polling thread parks
    #[arg(long)]
    pub sqpoll_idle_ms: Option<u32>,

    /// Skip registering the ring file descriptor with itself
    #[arg(long)]
    pub no_register_ring_fd: bool,

    /// Number of fixed file slots (upper bound on concurrent connections)
    #[arg(long)]
    pub fixed_slots: Option<u32>,

    /// Read buffer size in bytes
    #[arg(long)]
    pub buffer_size: Option<usize>,

    /// Print which io_uring opcodes this kernel supports and exit
    #[arg(long)]
    pub probe: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub ring: RingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listening socket configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Listen backlog
    #[serde(default = "default_backlog")]
    pub backlog: i32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            backlog: default_backlog(),
        }
    }
}

/// io_uring configuration
#[derive(Debug, Deserialize)]
pub struct RingConfig {
    #[serde(default = "default_ring_depth")]
    pub depth: u32,
    #[serde(default = "default_true")]
    pub sqpoll: bool,
    #[serde(default = "default_sqpoll_idle_ms")]
    pub sqpoll_idle_ms: u32,
    #[serde(default = "default_true")]
    pub register_ring_fd: bool,
    #[serde(default = "default_fixed_slots")]
    pub fixed_slots: u32,
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            depth: default_ring_depth(),
            sqpoll: true,
            sqpoll_idle_ms: default_sqpoll_idle_ms(),
            register_ring_fd: true,
            fixed_slots: default_fixed_slots(),
            buffer_size: default_buffer_size(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0:4242".to_string()
}

fn default_backlog() -> i32 {
    128
}

fn default_ring_depth() -> u32 {
    8
}

fn default_sqpoll_idle_ms() -> u32 {
    2
}

fn default_fixed_slots() -> u32 {
    8
}

fn default_buffer_size() -> usize {
    1024
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: SocketAddr,
    pub backlog: i32,
    pub ring_depth: u32,
    pub sqpoll: bool,
    pub sqpoll_idle_ms: u32,
    pub register_ring_fd: bool,
    pub fixed_slots: u32,
    pub buffer_size: usize,
    pub probe: bool,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(CliArgs::parse())
    }

    /// Merge parsed CLI args with the TOML file they point at, if any.
    /// CLI arguments take precedence over TOML file values.
    pub fn from_args(cli: CliArgs) -> Result<Self, ConfigError> {
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        let listen = cli.listen.unwrap_or(toml_config.server.listen);
        let listen = listen
            .parse()
            .map_err(|_| ConfigError::InvalidListen(listen))?;

        let config = Config {
            listen,
            backlog: cli.backlog.unwrap_or(toml_config.server.backlog),
            ring_depth: cli.ring_depth.unwrap_or(toml_config.ring.depth),
            sqpoll: toml_config.ring.sqpoll && !cli.no_sqpoll,
            sqpoll_idle_ms: cli
                .sqpoll_idle_ms
                .unwrap_or(toml_config.ring.sqpoll_idle_ms),
            register_ring_fd: toml_config.ring.register_ring_fd && !cli.no_register_ring_fd,
            fixed_slots: cli.fixed_slots.unwrap_or(toml_config.ring.fixed_slots),
            buffer_size: cli.buffer_size.unwrap_or(toml_config.ring.buffer_size),
            probe: cli.probe,
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.ring_depth == 0 {
            return Err(ConfigError::Invalid("ring depth must be non-zero"));
        }
        if self.fixed_slots == 0 {
            return Err(ConfigError::Invalid("fixed slot count must be non-zero"));
        }
        if self.buffer_size == 0 {
            return Err(ConfigError::Invalid("buffer size must be non-zero"));
        }
        if self.buffer_size > u32::MAX as usize {
            return Err(ConfigError::Invalid("buffer size must fit in 32 bits"));
        }
        Ok(())
    }
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {}", .0.display(), .1)]
    FileRead(PathBuf, std::io::Error),
    #[error("Failed to parse config file '{}': {}", .0.display(), .1)]
    TomlParse(PathBuf, toml::de::Error),
    #[error("Invalid listen address '{0}'")]
    InvalidListen(String),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}
