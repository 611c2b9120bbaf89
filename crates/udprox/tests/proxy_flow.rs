// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! End-to-end engine scenarios: the full decision pipeline driven the way
//! the daemon drives it, without sockets.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use udprox::elements::{
    BufferMode, Element, ElementChain, ElementContext, ElementError,
};
use udprox::engine::buffered::PacketOrigin;
use udprox::protocol::{DataPacket, PacketType};
use udprox::{refragment, BufferedPacket, Decision, ProxyConfig, ProxyEngine, Verdict};

const CHUNK: usize = 1371;

fn source() -> SocketAddr {
    "127.0.0.1:12345".parse().unwrap()
}

fn datagram(packet_type: PacketType, rpc_id: u64, total: u16, seq: u16, payload: &[u8]) -> Vec<u8> {
    DataPacket {
        packet_type,
        rpc_id,
        total_packets: total,
        seq_number: seq,
        dst_ip: Ipv4Addr::new(127, 0, 0, 1),
        dst_port: 9000,
        src_ip: Ipv4Addr::new(127, 0, 0, 1),
        src_port: 12345,
        payload,
    }
    .serialize()
}

/// A message whose first five bytes declare `offset` as the public length.
fn message(offset: u32, len: usize) -> Vec<u8> {
    let mut m = vec![0x01];
    m.extend_from_slice(&offset.to_le_bytes());
    while m.len() < len {
        m.push((m.len() % 251) as u8);
    }
    m.truncate(len);
    m
}

/// Split a message into wire datagrams of the given payload sizes.
fn fragment_message(
    packet_type: PacketType,
    rpc_id: u64,
    msg: &[u8],
    sizes: &[usize],
) -> Vec<Vec<u8>> {
    assert_eq!(sizes.iter().sum::<usize>(), msg.len());
    let total = sizes.len() as u16;
    let mut offset = 0;
    sizes
        .iter()
        .enumerate()
        .map(|(i, size)| {
            let frag = &msg[offset..offset + size];
            offset += size;
            datagram(packet_type, rpc_id, total, i as u16, frag)
        })
        .collect()
}

/// Drive the daemon's post-chain sequence for a `Forward(_, None)` result:
/// run the chain, emit the head, clean up, drain. Returns every emitted
/// wire datagram.
fn settle(engine: &ProxyEngine, mut bp: BufferedPacket, src: SocketAddr) -> Vec<Vec<u8>> {
    let verdict = engine.run_chain(&mut bp);
    if verdict == Verdict::Drop {
        return Vec::new();
    }

    let mut emitted = Vec::new();
    let last_used = bp.last_used_seq();
    bp.merge_private_tail();
    emitted.extend(refragment(&bp));

    if let Some(up_to) = last_used {
        engine.cleanup_used_fragments(src, bp.rpc_id(), up_to);
        for tail in engine.drain_remaining(src, bp.rpc_id(), bp.packet_type(), bp.route, bp.total_packets)
        {
            emitted.extend(refragment(&tail));
        }
    }
    emitted
}

/// Reassemble emitted datagrams by sequence number, the way a downstream
/// endpoint does.
fn reassemble(wires: &[Vec<u8>]) -> Vec<u8> {
    let mut frags: Vec<(u16, Vec<u8>)> = wires
        .iter()
        .map(|w| {
            let pkt = DataPacket::deserialize(w).unwrap();
            (pkt.seq_number, pkt.payload.to_vec())
        })
        .collect();
    frags.sort_by_key(|(seq, _)| *seq);
    frags.into_iter().flat_map(|(_, bytes)| bytes).collect()
}

struct DropRequests;

impl Element for DropRequests {
    fn name(&self) -> &'static str {
        "drop-requests"
    }
    fn process_request(
        &self,
        _ctx: &mut ElementContext,
        _packet: &mut BufferedPacket,
    ) -> Result<Verdict, ElementError> {
        Ok(Verdict::Drop)
    }
    fn process_response(
        &self,
        _ctx: &mut ElementContext,
        _packet: &mut BufferedPacket,
    ) -> Result<Verdict, ElementError> {
        Ok(Verdict::Pass)
    }
}

struct NeedsFullMessage;

impl Element for NeedsFullMessage {
    fn name(&self) -> &'static str {
        "needs-full-message"
    }
    fn process_request(
        &self,
        _ctx: &mut ElementContext,
        _packet: &mut BufferedPacket,
    ) -> Result<Verdict, ElementError> {
        Ok(Verdict::Pass)
    }
    fn process_response(
        &self,
        _ctx: &mut ElementContext,
        _packet: &mut BufferedPacket,
    ) -> Result<Verdict, ElementError> {
        Ok(Verdict::Pass)
    }
    fn request_mode(&self) -> BufferMode {
        BufferMode::FullBuffering
    }
    fn response_mode(&self) -> BufferMode {
        BufferMode::FullBuffering
    }
}

// Scenario: single-datagram fast path. The emitted bytes are identical to
// the received bytes, and the verdict lands in the cache afterwards.
#[test]
fn single_datagram_fast_path_is_bit_transparent() {
    let engine = ProxyEngine::new(ProxyConfig::default(), ElementChain::empty());
    let payload = [
        0x01, 0x0D, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0xAA, 0xBB, 0xCC,
    ];
    let wire = datagram(PacketType::Request, 42, 1, 0, &payload);

    let Decision::Forward(bp, None) = engine.process_packet(&wire, source()).unwrap() else {
        panic!("singleton must surface for the chain");
    };
    assert!(engine.verdict_cache().is_empty());

    let emitted = settle(&engine, bp, source());
    assert_eq!(emitted, vec![wire]);
    assert_eq!(
        engine.verdict_cache().lookup(42, PacketType::Request),
        Some(Verdict::Pass)
    );
}

// Scenario: three fragments arriving in order. Fragment 0 alone yields the
// 13-byte public prefix; the re-joined head equals the original fragment 0;
// fragments 1 and 2 fast-forward under the stored verdict.
#[test]
fn three_fragments_in_order() {
    let engine = ProxyEngine::new(ProxyConfig::default(), ElementChain::empty());
    let src = source();
    let msg = message(13, 1400);
    let wires = fragment_message(PacketType::Request, 100, &msg, &[600, 600, 200]);

    let Decision::Forward(bp, None) = engine.process_packet(&wires[0], src).unwrap() else {
        panic!("prefix is contained in fragment 0");
    };
    assert_eq!(bp.payload.len(), 13);
    assert_eq!(bp.last_used_seq(), Some(0));

    let mut emitted = settle(&engine, bp, src);
    // Head emission is fragment 0, bit for bit.
    assert_eq!(emitted, vec![wires[0].clone()]);

    for wire in &wires[1..] {
        let Decision::Forward(tail, Some(Verdict::Pass)) =
            engine.process_packet(wire, src).unwrap()
        else {
            panic!("tail fragments fast-forward after the verdict");
        };
        emitted.extend(refragment(&tail));
    }

    assert_eq!(reassemble(&emitted), msg);
    assert!(engine.fragment_store().is_empty());
}

// Scenario: same message, fragments arriving 2, 1, 0.
#[test]
fn three_fragments_reverse_order() {
    let engine = ProxyEngine::new(ProxyConfig::default(), ElementChain::empty());
    let src = source();
    let msg = message(13, 1400);
    let wires = fragment_message(PacketType::Request, 101, &msg, &[600, 600, 200]);

    assert!(matches!(
        engine.process_packet(&wires[2], src).unwrap(),
        Decision::Buffered
    ));
    assert!(matches!(
        engine.process_packet(&wires[1], src).unwrap(),
        Decision::Buffered
    ));

    let Decision::Forward(bp, None) = engine.process_packet(&wires[0], src).unwrap() else {
        panic!("fragment 0 completes the prefix");
    };

    // The drain returns fragments 1 and 2 with their original sequencing.
    let emitted = settle(&engine, bp, src);
    assert_eq!(emitted.len(), 3);
    assert_eq!(reassemble(&emitted), msg);
    assert!(engine.fragment_store().is_empty());
}

// Scenario: public prefix spans two fragments (offset 1500 over two
// 1371-byte fragments).
#[test]
fn prefix_spanning_two_fragments() {
    let engine = ProxyEngine::new(ProxyConfig::default(), ElementChain::empty());
    let src = source();
    let msg = message(1500, 2 * CHUNK);
    let wires = fragment_message(PacketType::Request, 102, &msg, &[CHUNK, CHUNK]);

    assert!(matches!(
        engine.process_packet(&wires[0], src).unwrap(),
        Decision::Buffered
    ));

    let Decision::Forward(bp, None) = engine.process_packet(&wires[1], src).unwrap() else {
        panic!("both fragments buffered, prefix must be ready");
    };
    assert_eq!(bp.payload.len(), 1500);
    assert_eq!(bp.last_used_seq(), Some(1));

    let emitted = settle(&engine, bp, src);
    assert_eq!(reassemble(&emitted), msg);
}

// Scenario: a Drop verdict blocks the tail. Nothing is emitted, and the
// buffered fragments wait for the reaper rather than leaking forever.
#[test]
fn drop_verdict_blocks_everything() {
    let chain = ElementChain::new(vec![Arc::new(DropRequests)]);
    let config = ProxyConfig {
        buffer_ttl: Duration::from_millis(40),
        ..ProxyConfig::default()
    };
    let engine = ProxyEngine::new(config, chain);
    let src = source();

    let msg = message(13, 3000);
    let wires = fragment_message(PacketType::Request, 7, &msg, &[600, 600, 600, 600, 600]);

    let Decision::Forward(bp, None) = engine.process_packet(&wires[0], src).unwrap() else {
        panic!("prefix ready from fragment 0");
    };
    let emitted = settle(&engine, bp, src);
    assert!(emitted.is_empty());

    for wire in &wires[1..] {
        match engine.process_packet(wire, src).unwrap() {
            Decision::Forward(_, Some(Verdict::Drop)) => {}
            other => panic!("tail fragments must hit the Drop verdict: {:?}", other),
        }
    }

    assert_eq!(engine.fragment_store().len(), 1);
    std::thread::sleep(Duration::from_millis(100));
    engine.reap_expired();
    assert!(engine.fragment_store().is_empty());
}

// Scenario: large SET-style round-trip. 382 fragments, offset 13; fragment
// 0 triggers the prefix forward, the rest fast-forward in arbitrary order,
// and the downstream reassembly equals the original message.
#[test]
fn large_message_round_trip() {
    let engine = ProxyEngine::new(ProxyConfig::default(), ElementChain::empty());
    let src = source();

    let total = 382usize;
    let msg = message(13, (total - 1) * CHUNK + 523);
    let sizes: Vec<usize> = (0..total)
        .map(|i| if i + 1 == total { 523 } else { CHUNK })
        .collect();
    let wires = fragment_message(PacketType::Request, 523_001, &msg, &sizes);

    let Decision::Forward(bp, None) = engine.process_packet(&wires[0], src).unwrap() else {
        panic!("prefix ready from fragment 0");
    };
    let mut emitted = settle(&engine, bp, src);

    let mut order: Vec<usize> = (1..total).collect();
    fastrand::seed(0x5E7);
    fastrand::shuffle(&mut order);
    for i in order {
        let Decision::Forward(tail, Some(Verdict::Pass)) =
            engine.process_packet(&wires[i], src).unwrap()
        else {
            panic!("fragment {} must fast-forward", i);
        };
        emitted.extend(refragment(&tail));
    }

    assert_eq!(emitted.len(), total);
    assert_eq!(reassemble(&emitted), msg);
    assert!(engine.fragment_store().is_empty());
}

// Property: reassembly is permutation-independent under full buffering.
#[test]
fn full_buffering_reassembles_any_permutation() {
    let sizes = [700usize, 1371, 40, 900, 1371, 213];
    let msg = message(13, sizes.iter().sum());

    fastrand::seed(42);
    for round in 0..8u64 {
        let chain = ElementChain::new(vec![Arc::new(NeedsFullMessage)]);
        let engine = ProxyEngine::new(ProxyConfig::default(), chain);
        assert_eq!(engine.buffer_mode(), BufferMode::FullBuffering);
        let src = source();
        let wires = fragment_message(PacketType::Request, 9000 + round, &msg, &sizes);

        let mut order: Vec<usize> = (0..sizes.len()).collect();
        fastrand::shuffle(&mut order);

        let mut forwarded = None;
        for &i in &order {
            match engine.process_packet(&wires[i], src).unwrap() {
                Decision::Buffered => {}
                Decision::Forward(bp, None) => {
                    assert!(forwarded.is_none(), "only one full-message forward");
                    assert!(bp.is_full);
                    forwarded = Some(bp);
                }
                other => panic!("unexpected decision: {:?}", other),
            }
        }

        let bp = forwarded.expect("last fragment completes the message");
        assert_eq!(bp.payload, msg);
        let emitted = settle(&engine, bp, src);
        assert_eq!(reassemble(&emitted), msg);
    }
}

// Property: once a verdict is stored, every later packet of that
// (rpc, direction) sees the same verdict, until TTL expiry.
#[test]
fn verdict_stickiness_until_ttl() {
    let config = ProxyConfig {
        buffer_ttl: Duration::from_millis(40),
        ..ProxyConfig::default()
    };
    let engine = ProxyEngine::new(config, ElementChain::empty());
    let src = source();

    let wire = datagram(PacketType::Request, 55, 1, 0, &message(13, 100));
    let Decision::Forward(bp, None) = engine.process_packet(&wire, src).unwrap() else {
        panic!("singleton");
    };
    settle(&engine, bp, src);

    for _ in 0..3 {
        match engine.process_packet(&wire, src).unwrap() {
            Decision::Forward(_, Some(Verdict::Pass)) => {}
            other => panic!("verdict must stick: {:?}", other),
        }
    }

    std::thread::sleep(Duration::from_millis(100));
    engine.reap_expired();
    assert!(engine.verdict_cache().is_empty());

    // Cold cache again: the chain path re-opens.
    assert!(matches!(
        engine.process_packet(&wire, src).unwrap(),
        Decision::Forward(_, None)
    ));
}

// Property: the public prefix is surfaced at most once per RPC.
#[test]
fn prefix_forward_happens_once() {
    let engine = ProxyEngine::new(ProxyConfig::default(), ElementChain::empty());
    let src = source();
    let msg = message(13, 2000);
    let wires = fragment_message(PacketType::Request, 60, &msg, &[800, 800, 400]);

    let mut prefix_forwards = 0;
    for wire in &wires {
        if let Decision::Forward(bp, None) = engine.process_packet(wire, src).unwrap() {
            if matches!(bp.origin, PacketOrigin::PublicPrefix { .. }) {
                prefix_forwards += 1;
            }
        }
    }
    assert_eq!(prefix_forwards, 1);
}

// Streaming chains see every fragment individually; the verdict still
// sticks for the rest of the RPC.
#[test]
fn streaming_mode_forwards_each_fragment() {
    struct StreamingPass;
    impl Element for StreamingPass {
        fn name(&self) -> &'static str {
            "streaming-pass"
        }
        fn process_request(
            &self,
            _ctx: &mut ElementContext,
            _packet: &mut BufferedPacket,
        ) -> Result<Verdict, ElementError> {
            Ok(Verdict::Pass)
        }
        fn process_response(
            &self,
            _ctx: &mut ElementContext,
            _packet: &mut BufferedPacket,
        ) -> Result<Verdict, ElementError> {
            Ok(Verdict::Pass)
        }
        fn request_mode(&self) -> BufferMode {
            BufferMode::Streaming
        }
        fn response_mode(&self) -> BufferMode {
            BufferMode::Streaming
        }
    }

    let chain = ElementChain::new(vec![Arc::new(StreamingPass)]);
    let engine = ProxyEngine::new(ProxyConfig::default(), chain);
    assert_eq!(engine.buffer_mode(), BufferMode::Streaming);
    let src = source();

    let msg = message(13, 1500);
    let wires = fragment_message(PacketType::Request, 70, &msg, &[750, 750]);

    // First fragment: no verdict yet, chain judges it as-is.
    let Decision::Forward(mut bp, None) = engine.process_packet(&wires[0], src).unwrap() else {
        panic!("streaming forwards fragment 0 directly");
    };
    assert_eq!(bp.origin, PacketOrigin::Fragment { seq: 0 });
    engine.run_chain(&mut bp);

    // Second fragment rides the cached verdict.
    assert!(matches!(
        engine.process_packet(&wires[1], src).unwrap(),
        Decision::Forward(_, Some(Verdict::Pass))
    ));
    assert!(engine.fragment_store().is_empty());
}
