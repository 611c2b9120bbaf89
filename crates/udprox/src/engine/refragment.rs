// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! MTU refragmentation of outbound payloads.
//!
//! A payload that fits one datagram keeps the origin's sequencing so
//! fast-forwarded tail fragments slot back into the receiver's reassembly
//! unchanged. A larger payload gets a fresh fragmentation schedule;
//! downstream endpoints key reassembly on `(rpc_id, seq_number)` and are
//! expected to tolerate that.

use crate::config::MAX_FRAGMENT_PAYLOAD;
use crate::engine::buffered::BufferedPacket;
use crate::protocol::DataPacket;

/// Split a buffered packet into ready-to-send datagrams.
pub fn refragment(bp: &BufferedPacket) -> Vec<Vec<u8>> {
    let route = &bp.route;

    if bp.payload.len() <= MAX_FRAGMENT_PAYLOAD {
        let pkt = DataPacket {
            packet_type: route.packet_type,
            rpc_id: route.rpc_id,
            total_packets: bp.total_packets,
            seq_number: bp.wire_seq(),
            dst_ip: *route.dst.ip(),
            dst_port: route.dst.port(),
            src_ip: *route.src.ip(),
            src_port: route.src.port(),
            payload: &bp.payload,
        };
        return vec![pkt.serialize()];
    }

    let n = bp.payload.len().div_ceil(MAX_FRAGMENT_PAYLOAD);
    let mut out = Vec::with_capacity(n);
    for (i, chunk) in bp.payload.chunks(MAX_FRAGMENT_PAYLOAD).enumerate() {
        let pkt = DataPacket {
            packet_type: route.packet_type,
            rpc_id: route.rpc_id,
            total_packets: n as u16,
            seq_number: i as u16,
            dst_ip: *route.dst.ip(),
            dst_port: route.dst.port(),
            src_ip: *route.src.ip(),
            src_port: route.src.port(),
            payload: chunk,
        };
        out.push(pkt.serialize());
    }
    out
}
