// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error types for the proxy data plane.
//!
//! Every variant except `InvalidConfig` and `Io` is recovered locally by
//! dropping the offending datagram; startup errors are the only fatal ones.

use std::fmt;

/// Result type for proxy operations.
pub type Result<T> = std::result::Result<T, ProxyError>;

/// Errors raised while parsing, buffering, or forwarding datagrams.
#[derive(Debug)]
pub enum ProxyError {
    /// Datagram shorter than the fixed wire header.
    TruncatedHeader { needed: usize, got: usize },

    /// First byte is not a known packet type.
    UnknownPacketType(u8),

    /// Packet type is valid but not the kind this decoder handles.
    UnexpectedPacketType(u8),

    /// Declared payload length exceeds the bytes actually present.
    PayloadOverrun { declared: usize, available: usize },

    /// Fragment contradicts the state already buffered for its RPC.
    FragmentInconsistency(String),

    /// Per-RPC buffering cap would be exceeded.
    RpcBufferOverflow { buffered: usize, incoming: usize },

    /// Packet carries no usable destination and no fallback is configured.
    MissingRoute,

    /// Malformed configuration value.
    InvalidConfig(String),

    /// Socket-level failure.
    Io(std::io::Error),
}

impl fmt::Display for ProxyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TruncatedHeader { needed, got } => {
                write!(f, "truncated header: need {} bytes, got {}", needed, got)
            }
            Self::UnknownPacketType(t) => write!(f, "unknown packet type {}", t),
            Self::UnexpectedPacketType(t) => write!(f, "unexpected packet type {}", t),
            Self::PayloadOverrun {
                declared,
                available,
            } => write!(
                f,
                "declared payload length {} exceeds {} available bytes",
                declared, available
            ),
            Self::FragmentInconsistency(msg) => write!(f, "fragment inconsistency: {}", msg),
            Self::RpcBufferOverflow { buffered, incoming } => write!(
                f,
                "per-rpc buffer cap exceeded ({} buffered, {} incoming)",
                buffered, incoming
            ),
            Self::MissingRoute => write!(f, "no destination in header and no fallback configured"),
            Self::InvalidConfig(msg) => write!(f, "invalid configuration: {}", msg),
            Self::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for ProxyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ProxyError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_stable() {
        let e = ProxyError::TruncatedHeader { needed: 29, got: 4 };
        assert_eq!(e.to_string(), "truncated header: need 29 bytes, got 4");

        let e = ProxyError::PayloadOverrun {
            declared: 100,
            available: 7,
        };
        assert_eq!(
            e.to_string(),
            "declared payload length 100 exceeds 7 available bytes"
        );
    }

    #[test]
    fn io_error_keeps_source() {
        use std::error::Error;
        let e = ProxyError::from(std::io::Error::new(std::io::ErrorKind::Other, "boom"));
        assert!(e.source().is_some());
    }
}
