// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Fuzz target for the datagram wire codec
//!
//! Feeds arbitrary bytes to the packet decoders and the routing extractor.
//! None of these operations should panic on any input.

#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Full decoders - must not panic on any input
    let _ = udprox::protocol::DataPacket::deserialize(data);
    let _ = udprox::protocol::ErrorPacket::deserialize(data);

    // Header-indexed fast paths
    let _ = udprox::protocol::RouteInfo::from_datagram(data);
    let _ = udprox::protocol::classify(data);
});
