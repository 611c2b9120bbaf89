// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Daemon configuration.
//!
//! Resolution order, later wins: built-in defaults, JSON config file,
//! environment variables, command-line flags.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use udprox::config::{parse_duration, DEFAULT_BUFFER_TTL, DEFAULT_PORTS};
use udprox::elements::builtin::{
    FaultInjectElement, FirewallElement, LoggingElement, MetricsElement,
};
use udprox::elements::{Element, ElementChain};
use udprox::ProxyConfig;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Console,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, ConfigError> {
        match s {
            "console" => Ok(Self::Console),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::InvalidValue(format!(
                "log format must be console or json, got `{}`",
                other
            ))),
        }
    }
}

/// One element chain entry, in chain order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ElementConfig {
    Logging,
    Firewall {
        /// Byte patterns (as strings) that block a request when the public
        /// segment body starts with one of them.
        #[serde(default)]
        block: Vec<String>,
    },
    Fault {
        /// Drop every nth request; 0 disables.
        every_nth: u64,
    },
    Metrics,
}

/// Proxy daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to (default: 0.0.0.0)
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,

    /// UDP ports to listen on; every port behaves identically.
    #[serde(default = "default_ports")]
    pub ports: Vec<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub log_format: LogFormat,

    /// `false` runs the data plane in pure passthrough mode.
    #[serde(default = "default_true")]
    pub buffering_enabled: bool,

    /// TTL for buffered fragment states and cached verdicts.
    #[serde(default = "default_buffer_ttl_ms")]
    pub buffer_ttl_ms: u64,

    /// Fallback destination for packets that carry none in their header.
    #[serde(default)]
    pub target_addr: Option<SocketAddr>,

    /// Element chain, front to back.
    #[serde(default)]
    pub elements: Vec<ElementConfig>,
}

fn default_bind_address() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_ports() -> Vec<u16> {
    DEFAULT_PORTS.to_vec()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_buffer_ttl_ms() -> u64 {
    DEFAULT_BUFFER_TTL.as_millis() as u64
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            ports: default_ports(),
            log_level: default_log_level(),
            log_format: LogFormat::Console,
            buffering_enabled: true,
            buffer_ttl_ms: default_buffer_ttl_ms(),
            target_addr: None,
            elements: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
        serde_json::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Fold the documented environment variables over the current values.
    /// Unset variables change nothing; malformed values are fatal.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(v) = std::env::var("LOG_LEVEL") {
            self.log_level = v;
        }
        if let Ok(v) = std::env::var("LOG_FORMAT") {
            self.log_format = v.parse()?;
        }
        if let Ok(v) = std::env::var("ENABLE_PACKET_BUFFERING") {
            self.buffering_enabled = match v.trim() {
                "true" | "1" => true,
                "false" | "0" => false,
                other => {
                    return Err(ConfigError::InvalidValue(format!(
                        "ENABLE_PACKET_BUFFERING must be true or false, got `{}`",
                        other
                    )))
                }
            };
        }
        if let Ok(v) = std::env::var("BUFFER_TIMEOUT") {
            let ttl = parse_duration("BUFFER_TIMEOUT", &v)
                .map_err(|e| ConfigError::InvalidValue(e.to_string()))?;
            self.buffer_ttl_ms = ttl.as_millis() as u64;
        }
        if let Ok(v) = std::env::var("TARGET_ADDR") {
            if v.is_empty() {
                self.target_addr = None;
            } else {
                let addr = v.parse().map_err(|e| {
                    ConfigError::InvalidValue(format!("TARGET_ADDR `{}`: {}", v, e))
                })?;
                self.target_addr = Some(addr);
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ports.is_empty() {
            return Err(ConfigError::InvalidValue(
                "at least one listen port is required".into(),
            ));
        }
        if self.ports.iter().any(|p| *p == 0) {
            return Err(ConfigError::InvalidValue("port cannot be 0".into()));
        }
        if self.buffer_ttl_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "buffer_ttl_ms cannot be 0".into(),
            ));
        }
        Ok(())
    }

    pub fn buffer_ttl(&self) -> Duration {
        Duration::from_millis(self.buffer_ttl_ms)
    }

    /// The data-plane slice of this configuration.
    pub fn proxy_config(&self) -> ProxyConfig {
        ProxyConfig {
            buffering_enabled: self.buffering_enabled,
            buffer_ttl: self.buffer_ttl(),
            target_addr: self.target_addr,
        }
    }

    /// Instantiate the configured element chain.
    pub fn build_chain(&self) -> ElementChain {
        let elements: Vec<Arc<dyn Element>> = self
            .elements
            .iter()
            .map(|cfg| -> Arc<dyn Element> {
                match cfg {
                    ElementConfig::Logging => Arc::new(LoggingElement),
                    ElementConfig::Firewall { block } => Arc::new(FirewallElement::new(
                        block.iter().map(|s| s.as_bytes().to_vec()).collect(),
                    )),
                    ElementConfig::Fault { every_nth } => {
                        Arc::new(FaultInjectElement::new(*every_nth))
                    }
                    ElementConfig::Metrics => Arc::new(MetricsElement::new()),
                }
            })
            .collect();
        ElementChain::new(elements)
    }
}

/// Configuration error types.
#[derive(Debug, Clone)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IoError(s) => write!(f, "I/O error: {}", s),
            Self::ParseError(s) => write!(f, "Parse error: {}", s),
            Self::InvalidValue(s) => write!(f, "Invalid value: {}", s),
        }
    }
}

impl std::error::Error for ConfigError {}
