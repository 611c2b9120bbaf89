// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Hot-path benchmarks: wire decode, routing extraction, and the
//! single-datagram decision pipeline.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::net::Ipv4Addr;
use udprox::elements::ElementChain;
use udprox::protocol::{DataPacket, PacketType, RouteInfo};
use udprox::{ProxyConfig, ProxyEngine, Verdict};

fn singleton_wire() -> Vec<u8> {
    let mut payload = vec![0x01];
    payload.extend_from_slice(&13u32.to_le_bytes());
    payload.resize(1200, 0xAB);

    DataPacket {
        packet_type: PacketType::Request,
        rpc_id: 42,
        total_packets: 1,
        seq_number: 0,
        dst_ip: Ipv4Addr::new(127, 0, 0, 1),
        dst_port: 9000,
        src_ip: Ipv4Addr::new(127, 0, 0, 1),
        src_port: 12345,
        payload: &payload,
    }
    .serialize()
}

fn bench_decode(c: &mut Criterion) {
    let wire = singleton_wire();
    c.bench_function("data_packet_deserialize", |b| {
        b.iter(|| DataPacket::deserialize(black_box(&wire)).unwrap())
    });
    c.bench_function("route_extraction", |b| {
        b.iter(|| RouteInfo::from_datagram(black_box(&wire)).unwrap())
    });
}

fn bench_decision(c: &mut Criterion) {
    let wire = singleton_wire();
    let source = "127.0.0.1:12345".parse().unwrap();

    let engine = ProxyEngine::new(ProxyConfig::default(), ElementChain::empty());
    c.bench_function("process_packet_singleton", |b| {
        b.iter(|| engine.process_packet(black_box(&wire), source).unwrap())
    });

    let cached = ProxyEngine::new(ProxyConfig::default(), ElementChain::empty());
    cached
        .verdict_cache()
        .store(42, PacketType::Request, Verdict::Pass);
    c.bench_function("process_packet_verdict_hit", |b| {
        b.iter(|| cached.process_packet(black_box(&wire), source).unwrap())
    });
}

criterion_group!(benches, bench_decode, bench_decision);
criterion_main!(benches);
