// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Wire codec for the two datagram kinds the proxy understands.
//!
//! One datagram is one packet; there is no framing. All multi-byte fields
//! are little-endian with no padding.
//!
//! ```text
//! DataPacket  = type(1) | rpc_id(8) | total(2) | seq(2)
//!             | dst_ip(4) | dst_port(2) | src_ip(4) | src_port(2)
//!             | payload_len(4) | payload
//! ErrorPacket = type(1)=3 | rpc_id(8) | msg_len(4) | msg
//! ```
//!
//! `deserialize` borrows the payload from the input buffer; the fragment
//! store performs the single copy when it decides to retain bytes.

use crate::config::{DATA_HEADER_LEN, ERROR_HEADER_LEN};
use crate::error::{ProxyError, Result};
use std::net::Ipv4Addr;

const TYPE_OFF: usize = 0;
const RPC_ID_OFF: usize = 1;
const TOTAL_OFF: usize = 9;
const SEQ_OFF: usize = 11;
const DST_IP_OFF: usize = 13;
const DST_PORT_OFF: usize = 17;
const SRC_IP_OFF: usize = 19;
const SRC_PORT_OFF: usize = 23;
const PAYLOAD_LEN_OFF: usize = 25;

const ERR_MSG_LEN_OFF: usize = 9;

/// Application packet kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    Request = 1,
    Response = 2,
    Error = 3,
    Other = 4,
}

impl PacketType {
    pub fn from_wire(byte: u8) -> Result<Self> {
        match byte {
            1 => Ok(Self::Request),
            2 => Ok(Self::Response),
            3 => Ok(Self::Error),
            4 => Ok(Self::Other),
            other => Err(ProxyError::UnknownPacketType(other)),
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// One fragment of an RPC message, as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPacket<'a> {
    pub packet_type: PacketType,
    pub rpc_id: u64,
    pub total_packets: u16,
    pub seq_number: u16,
    pub dst_ip: Ipv4Addr,
    pub dst_port: u16,
    pub src_ip: Ipv4Addr,
    pub src_port: u16,
    pub payload: &'a [u8],
}

impl<'a> DataPacket<'a> {
    /// Decode a datagram. Rejects short input, a declared payload length
    /// beyond the buffer, and any type byte that is not a data kind
    /// (`ErrorPacket` uses a different header layout).
    pub fn deserialize(buf: &'a [u8]) -> Result<Self> {
        if buf.len() < DATA_HEADER_LEN {
            return Err(ProxyError::TruncatedHeader {
                needed: DATA_HEADER_LEN,
                got: buf.len(),
            });
        }
        let packet_type = PacketType::from_wire(buf[TYPE_OFF])?;
        if packet_type == PacketType::Error {
            return Err(ProxyError::UnexpectedPacketType(buf[TYPE_OFF]));
        }

        let payload_len = read_u32(buf, PAYLOAD_LEN_OFF) as usize;
        let available = buf.len() - DATA_HEADER_LEN;
        if payload_len > available {
            return Err(ProxyError::PayloadOverrun {
                declared: payload_len,
                available,
            });
        }

        Ok(Self {
            packet_type,
            rpc_id: read_u64(buf, RPC_ID_OFF),
            total_packets: read_u16(buf, TOTAL_OFF),
            seq_number: read_u16(buf, SEQ_OFF),
            dst_ip: read_ip(buf, DST_IP_OFF),
            dst_port: read_u16(buf, DST_PORT_OFF),
            src_ip: read_ip(buf, SRC_IP_OFF),
            src_port: read_u16(buf, SRC_PORT_OFF),
            payload: &buf[DATA_HEADER_LEN..DATA_HEADER_LEN + payload_len],
        })
    }

    pub fn serialized_len(&self) -> usize {
        DATA_HEADER_LEN + self.payload.len()
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.serialized_len());
        buf.push(self.packet_type.as_u8());
        buf.extend_from_slice(&self.rpc_id.to_le_bytes());
        buf.extend_from_slice(&self.total_packets.to_le_bytes());
        buf.extend_from_slice(&self.seq_number.to_le_bytes());
        buf.extend_from_slice(&self.dst_ip.octets());
        buf.extend_from_slice(&self.dst_port.to_le_bytes());
        buf.extend_from_slice(&self.src_ip.octets());
        buf.extend_from_slice(&self.src_port.to_le_bytes());
        buf.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(self.payload);
        buf
    }
}

/// Error notification packet. Carries no routing tuple; the daemon forwards
/// it to the configured fallback destination or drops it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorPacket<'a> {
    pub rpc_id: u64,
    pub message: &'a [u8],
}

impl<'a> ErrorPacket<'a> {
    pub fn deserialize(buf: &'a [u8]) -> Result<Self> {
        if buf.len() < ERROR_HEADER_LEN {
            return Err(ProxyError::TruncatedHeader {
                needed: ERROR_HEADER_LEN,
                got: buf.len(),
            });
        }
        if buf[TYPE_OFF] != PacketType::Error.as_u8() {
            return Err(ProxyError::UnexpectedPacketType(buf[TYPE_OFF]));
        }

        let msg_len = read_u32(buf, ERR_MSG_LEN_OFF) as usize;
        let available = buf.len() - ERROR_HEADER_LEN;
        if msg_len > available {
            return Err(ProxyError::PayloadOverrun {
                declared: msg_len,
                available,
            });
        }

        Ok(Self {
            rpc_id: read_u64(buf, RPC_ID_OFF),
            message: &buf[ERROR_HEADER_LEN..ERROR_HEADER_LEN + msg_len],
        })
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(ERROR_HEADER_LEN + self.message.len());
        buf.push(PacketType::Error.as_u8());
        buf.extend_from_slice(&self.rpc_id.to_le_bytes());
        buf.extend_from_slice(&(self.message.len() as u32).to_le_bytes());
        buf.extend_from_slice(self.message);
        buf
    }
}

fn read_u16(buf: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([buf[off], buf[off + 1]])
}

fn read_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

fn read_u64(buf: &[u8], off: usize) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&buf[off..off + 8]);
    u64::from_le_bytes(b)
}

fn read_ip(buf: &[u8], off: usize) -> Ipv4Addr {
    Ipv4Addr::new(buf[off], buf[off + 1], buf[off + 2], buf[off + 3])
}
