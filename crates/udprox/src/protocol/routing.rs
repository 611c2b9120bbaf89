// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Fast-path routing extraction.
//!
//! The verdict-cache fast path only needs the routing tuple and the packet
//! identity, so this module indexes the header bytes directly instead of
//! running the full decoder.

use crate::config::{DATA_HEADER_LEN, ERROR_HEADER_LEN};
use crate::error::{ProxyError, Result};
use crate::protocol::packet::{DataPacket, PacketType};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

/// Identity and addressing of a data packet, read straight from the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteInfo {
    pub packet_type: PacketType,
    pub rpc_id: u64,
    pub dst: SocketAddrV4,
    pub src: SocketAddrV4,
}

impl RouteInfo {
    /// Extract routing from a raw datagram without validating the payload.
    pub fn from_datagram(buf: &[u8]) -> Result<Self> {
        if buf.len() < DATA_HEADER_LEN {
            return Err(ProxyError::TruncatedHeader {
                needed: DATA_HEADER_LEN,
                got: buf.len(),
            });
        }
        let packet_type = PacketType::from_wire(buf[0])?;
        if packet_type == PacketType::Error {
            // Error packets carry no routing tuple.
            return Err(ProxyError::MissingRoute);
        }

        Ok(Self {
            packet_type,
            rpc_id: u64::from_le_bytes([
                buf[1], buf[2], buf[3], buf[4], buf[5], buf[6], buf[7], buf[8],
            ]),
            dst: SocketAddrV4::new(
                Ipv4Addr::new(buf[13], buf[14], buf[15], buf[16]),
                u16::from_le_bytes([buf[17], buf[18]]),
            ),
            src: SocketAddrV4::new(
                Ipv4Addr::new(buf[19], buf[20], buf[21], buf[22]),
                u16::from_le_bytes([buf[23], buf[24]]),
            ),
        })
    }

    pub fn from_packet(pkt: &DataPacket<'_>) -> Self {
        Self {
            packet_type: pkt.packet_type,
            rpc_id: pkt.rpc_id,
            dst: SocketAddrV4::new(pkt.dst_ip, pkt.dst_port),
            src: SocketAddrV4::new(pkt.src_ip, pkt.src_port),
        }
    }

    /// The peer the proxy forwards to: the in-header destination unless it
    /// is unspecified, in which case the configured fallback.
    pub fn destination(&self, fallback: Option<SocketAddr>) -> Option<SocketAddr> {
        if self.dst.ip().is_unspecified() || self.dst.port() == 0 {
            fallback
        } else {
            Some(SocketAddr::V4(self.dst))
        }
    }
}

/// First-byte dispatch between the two wire layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketClass {
    Data(RouteInfo),
    Error { rpc_id: u64 },
}

/// Classify a datagram by its leading type byte.
pub fn classify(buf: &[u8]) -> Result<PacketClass> {
    let first = *buf.first().ok_or(ProxyError::TruncatedHeader {
        needed: 1,
        got: 0,
    })?;
    if first == PacketType::Error.as_u8() {
        if buf.len() < ERROR_HEADER_LEN {
            return Err(ProxyError::TruncatedHeader {
                needed: ERROR_HEADER_LEN,
                got: buf.len(),
            });
        }
        let rpc_id = u64::from_le_bytes([
            buf[1], buf[2], buf[3], buf[4], buf[5], buf[6], buf[7], buf[8],
        ]);
        return Ok(PacketClass::Error { rpc_id });
    }
    Ok(PacketClass::Data(RouteInfo::from_datagram(buf)?))
}
