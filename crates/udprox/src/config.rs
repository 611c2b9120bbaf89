// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Proxy constants and runtime configuration - single source of truth.
//!
//! All wire-format and sizing constants live here. **Never hardcode them
//! elsewhere!** Runtime knobs are resolved from the environment once, at
//! startup, and injected into the engine by the daemon.

use crate::error::{ProxyError, Result};
use std::net::SocketAddr;
use std::time::Duration;

// =======================================================================
// Wire format
// =======================================================================

/// Ceiling for a whole datagram on the wire (header + payload).
pub const MTU: usize = 1400;

/// Fixed `DataPacket` header:
/// `type(1) | rpc_id(8) | total(2) | seq(2) | dst(6) | src(6) | payload_len(4)`.
pub const DATA_HEADER_LEN: usize = 29;

/// Fixed `ErrorPacket` header: `type(1) | rpc_id(8) | msg_len(4)`.
pub const ERROR_HEADER_LEN: usize = 13;

/// Largest payload a single fragment may carry.
pub const MAX_FRAGMENT_PAYLOAD: usize = MTU - DATA_HEADER_LEN;

/// Bytes of fragment 0 needed to learn the public-segment length:
/// version byte plus the u32 `offset_to_private` field.
pub const PREFIX_FIELD_LEN: usize = 5;

// =======================================================================
// Buffering and expiry
// =======================================================================

/// Number of fragment-store shards. Must stay a power of two; the shard
/// index is `fnv1a32(source_addr) & (N_SHARDS - 1)`.
pub const N_SHARDS: usize = 256;

/// Soft ceiling on buffered RPC states per shard. A breach force-reaps the
/// oldest states in that shard instead of back-pressuring the sender.
pub const MAX_STATES_PER_SHARD: usize = 1024;

/// Memory clamp for a single RPC's buffered fragments.
pub const MAX_RPC_BUFFER_BYTES: usize = 8 * 1024 * 1024;

/// Default TTL for fragment states and cached verdicts.
pub const DEFAULT_BUFFER_TTL: Duration = Duration::from_secs(30);

/// UDP ports the daemon listens on when none are configured.
pub const DEFAULT_PORTS: [u16; 2] = [15002, 15006];

// =======================================================================
// Runtime configuration
// =======================================================================

/// Environment-driven proxy configuration.
///
/// | Variable | Effect | Default |
/// |---|---|---|
/// | `ENABLE_PACKET_BUFFERING` | `false` switches the engine to passthrough | `true` |
/// | `BUFFER_TIMEOUT` | TTL for the reaper (`30s`, `500ms`, bare seconds) | `30s` |
/// | `TARGET_ADDR` | fallback destination when the header carries none | unset |
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub buffering_enabled: bool,
    pub buffer_ttl: Duration,
    pub target_addr: Option<SocketAddr>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            buffering_enabled: true,
            buffer_ttl: DEFAULT_BUFFER_TTL,
            target_addr: None,
        }
    }
}

impl ProxyConfig {
    /// Resolve configuration from the process environment.
    ///
    /// Unset variables keep their defaults; set-but-malformed values are
    /// startup errors (the daemon refuses to run on a half-read config).
    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("ENABLE_PACKET_BUFFERING") {
            cfg.buffering_enabled = parse_bool("ENABLE_PACKET_BUFFERING", &v)?;
        }
        if let Ok(v) = std::env::var("BUFFER_TIMEOUT") {
            cfg.buffer_ttl = parse_duration("BUFFER_TIMEOUT", &v)?;
        }
        if let Ok(v) = std::env::var("TARGET_ADDR") {
            if !v.is_empty() {
                let addr = v.parse().map_err(|e| {
                    ProxyError::InvalidConfig(format!("TARGET_ADDR `{}`: {}", v, e))
                })?;
                cfg.target_addr = Some(addr);
            }
        }

        Ok(cfg)
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        other => Err(ProxyError::InvalidConfig(format!(
            "{} must be true or false, got `{}`",
            name, other
        ))),
    }
}

/// Parse `30s`, `500ms`, `2m`, or a bare number of seconds.
pub fn parse_duration(name: &str, value: &str) -> Result<Duration> {
    let v = value.trim();
    let (digits, unit) = match v.find(|c: char| !c.is_ascii_digit()) {
        Some(idx) => v.split_at(idx),
        None => (v, "s"),
    };
    let n: u64 = digits.parse().map_err(|_| {
        ProxyError::InvalidConfig(format!("{} `{}` is not a duration", name, value))
    })?;
    match unit {
        "ms" => Ok(Duration::from_millis(n)),
        "s" => Ok(Duration::from_secs(n)),
        "m" => Ok(Duration::from_secs(n * 60)),
        _ => Err(ProxyError::InvalidConfig(format!(
            "{} `{}` has unknown unit `{}`",
            name, value, unit
        ))),
    }
}
