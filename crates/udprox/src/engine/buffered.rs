// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The unit of work handed to the element chain and the refragmenter.

use crate::protocol::{PacketType, RouteInfo};
use std::net::SocketAddr;

/// Where a [`BufferedPacket`]'s payload came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketOrigin {
    /// An original fragment passing through unchanged (verdict fast path,
    /// streaming mode, or a post-verdict drain).
    Fragment { seq: u16 },
    /// A `total_packets == 1` datagram forwarded whole.
    Singleton,
    /// A reassembled public prefix. `tail` holds the unconsumed remainder
    /// of the last consumed fragment; the daemon re-joins it to the
    /// processed prefix before refragmenting.
    PublicPrefix { last_used_seq: u16, tail: Vec<u8> },
}

/// A payload plus everything needed to run the chain and re-emit it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferedPacket {
    pub payload: Vec<u8>,
    /// UDP peer the datagram(s) arrived from.
    pub source: SocketAddr,
    /// Identity and addressing copied from the wire header.
    pub route: RouteInfo,
    pub total_packets: u16,
    /// Whether `payload` holds the entire message.
    pub is_full: bool,
    pub origin: PacketOrigin,
}

impl BufferedPacket {
    pub fn rpc_id(&self) -> u64 {
        self.route.rpc_id
    }

    pub fn packet_type(&self) -> PacketType {
        self.route.packet_type
    }

    /// Sequence number to put on the wire when the payload fits one
    /// datagram: original fragments keep theirs, everything else restarts
    /// at zero.
    pub fn wire_seq(&self) -> u16 {
        match self.origin {
            PacketOrigin::Fragment { seq } => seq,
            PacketOrigin::Singleton | PacketOrigin::PublicPrefix { .. } => 0,
        }
    }

    pub fn last_used_seq(&self) -> Option<u16> {
        match self.origin {
            PacketOrigin::PublicPrefix { last_used_seq, .. } => Some(last_used_seq),
            _ => None,
        }
    }

    /// Append the private tail (if any) to the payload, emptying it.
    pub fn merge_private_tail(&mut self) {
        if let PacketOrigin::PublicPrefix { tail, .. } = &mut self.origin {
            let tail = std::mem::take(tail);
            self.payload.extend_from_slice(&tail);
        }
    }
}
