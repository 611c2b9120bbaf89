// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The reassembly and forwarding engine.
//!
//! One `ProxyEngine` per process, owned by the daemon and shared by every
//! per-datagram task. The engine decides, for each received datagram,
//! whether it is absorbed into the fragment store, fast-forwarded under a
//! cached verdict, or surfaced as a packet the element chain must judge.
//!
//! ```text
//! datagram -> decode -> verdict cache hit? -> Forward(pkt, Some(verdict))
//!                    -> singleton?         -> Forward(pkt, None)
//!                    -> buffer fragment    -> prefix ready? -> Forward(prefix, None)
//!                                          -> otherwise     -> Buffered
//! ```
//!
//! The daemon runs the chain for `Forward(_, None)`, stores the verdict,
//! and then drains whatever the store still holds for that RPC.

pub mod buffered;
pub mod fragment_store;
pub mod prefix;
pub mod refragment;
pub mod verdict;

use crate::config::{ProxyConfig, MTU};
use crate::elements::{BufferMode, ElementChain};
use crate::error::Result;
use crate::protocol::{DataPacket, PacketType, RouteInfo};
use crate::stats::ProxyStats;
use buffered::{BufferedPacket, PacketOrigin};
use fragment_store::FragmentStore;
use prefix::{extract_public_prefix, read_offset_to_private, PrefixCheck};
use std::net::SocketAddr;
use std::time::Duration;
use verdict::{Verdict, VerdictCache};

/// Outcome of processing one datagram.
#[derive(Debug)]
pub enum Decision {
    /// Ready to hand downstream. The verdict is `Some` on a cache hit
    /// (including the non-judged packet kinds, which always pass) and
    /// `None` when the element chain still has to run.
    Forward(BufferedPacket, Option<Verdict>),
    /// Absorbed into the fragment store; nothing to send yet.
    Buffered,
}

/// Shared data-plane state: fragment store, verdict cache, element chain.
pub struct ProxyEngine {
    config: ProxyConfig,
    store: FragmentStore,
    verdicts: VerdictCache,
    chain: ElementChain,
    /// Aggregated once at construction; the chain is immutable afterwards.
    mode: BufferMode,
    stats: ProxyStats,
}

impl ProxyEngine {
    pub fn new(config: ProxyConfig, chain: ElementChain) -> Self {
        let mode = chain.aggregate_mode();
        Self {
            config,
            store: FragmentStore::new(),
            verdicts: VerdictCache::new(),
            chain,
            mode,
            stats: ProxyStats::default(),
        }
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    pub fn stats(&self) -> &ProxyStats {
        &self.stats
    }

    pub fn verdict_cache(&self) -> &VerdictCache {
        &self.verdicts
    }

    pub fn fragment_store(&self) -> &FragmentStore {
        &self.store
    }

    pub fn buffer_mode(&self) -> BufferMode {
        self.mode
    }

    /// Single entry point for a received data datagram.
    ///
    /// Errors mean the datagram is malformed or inconsistent with buffered
    /// state; the caller logs and drops it, the loop continues.
    pub fn process_packet(&self, datagram: &[u8], source: SocketAddr) -> Result<Decision> {
        ProxyStats::incr(&self.stats.datagrams_received);

        let pkt = match DataPacket::deserialize(datagram) {
            Ok(pkt) => pkt,
            Err(e) => {
                ProxyStats::incr(&self.stats.malformed);
                return Err(e);
            }
        };
        let route = RouteInfo::from_packet(&pkt);

        // Error/Other kinds and passthrough mode skip judgment entirely.
        if !self.config.buffering_enabled || pkt.packet_type == PacketType::Other {
            return Ok(Decision::Forward(
                Self::as_fragment(&pkt, route, source),
                Some(Verdict::Pass),
            ));
        }

        // A cached verdict fast-forwards the fragment untouched. No
        // fragment state is allocated on this path.
        if let Some(verdict) = self.verdicts.lookup(pkt.rpc_id, pkt.packet_type) {
            return Ok(Decision::Forward(
                Self::as_fragment(&pkt, route, source),
                Some(verdict),
            ));
        }

        // Streaming elements judge each fragment on its own.
        if self.mode == BufferMode::Streaming {
            return Ok(Decision::Forward(Self::as_fragment(&pkt, route, source), None));
        }

        // Single-datagram RPC whose public segment fits one MTU: skip the
        // store, but still surface it for the chain to judge.
        if pkt.seq_number == 0 && pkt.total_packets == 1 && self.mode != BufferMode::FullBuffering
        {
            let prefix_fits = match read_offset_to_private(pkt.payload) {
                Some(offset) => (offset as usize) < MTU,
                // Too short to even carry the offset field; nothing more
                // will ever arrive for it, so forward it whole.
                None => true,
            };
            if prefix_fits {
                return Ok(Decision::Forward(
                    BufferedPacket {
                        payload: pkt.payload.to_vec(),
                        source,
                        route,
                        total_packets: 1,
                        is_full: true,
                        origin: PacketOrigin::Singleton,
                    },
                    None,
                ));
            }
        }

        // Buffer the fragment and probe for readiness under the RPC lock.
        let state = self
            .store
            .get_or_create(source, pkt.rpc_id, pkt.total_packets);
        let mut st = state.lock();

        if let Err(e) = st.add_fragment(pkt.seq_number, pkt.total_packets, pkt.payload) {
            ProxyStats::incr(&self.stats.malformed);
            return Err(e);
        }
        ProxyStats::incr(&self.stats.fragments_buffered);

        if st.is_extracted() {
            return Ok(Decision::Buffered);
        }
        match extract_public_prefix(&mut st, self.mode) {
            PrefixCheck::NotReady => Ok(Decision::Buffered),
            PrefixCheck::Ready(prefix) => {
                let total_packets = st.total_packets();
                let is_full =
                    prefix.tail.is_empty() && u32::from(prefix.last_used_seq) + 1 == u32::from(total_packets);
                Ok(Decision::Forward(
                    BufferedPacket {
                        payload: prefix.bytes,
                        source,
                        route,
                        total_packets,
                        is_full,
                        origin: PacketOrigin::PublicPrefix {
                            last_used_seq: prefix.last_used_seq,
                            tail: prefix.tail,
                        },
                    },
                    None,
                ))
            }
        }
    }

    /// Run the element chain for a packet the cache had no answer for, and
    /// remember the outcome for the rest of the RPC.
    pub fn run_chain(&self, packet: &mut BufferedPacket) -> Verdict {
        ProxyStats::incr(&self.stats.chain_runs);
        let verdict = self.chain.run(packet);
        self.verdicts
            .store(packet.rpc_id(), packet.packet_type(), verdict);
        if verdict == Verdict::Drop {
            ProxyStats::incr(&self.stats.dropped_by_verdict);
        }
        verdict
    }

    /// Drop the fragments the public prefix consumed.
    pub fn cleanup_used_fragments(&self, source: SocketAddr, rpc_id: u64, up_to_seq: u16) {
        self.store.cleanup_used_fragments(source, rpc_id, up_to_seq);
    }

    /// Fragments still buffered for an RPC after its verdict was stored.
    ///
    /// Empty under a Drop verdict: the buffered fragments are discarded in
    /// place (the reaper collects the state at TTL). Under Pass the store
    /// is drained and each fragment is wrapped with the caller's routing
    /// metadata, preserving the origin's sequencing.
    pub fn drain_remaining(
        &self,
        source: SocketAddr,
        rpc_id: u64,
        packet_type: PacketType,
        route: RouteInfo,
        total_packets: u16,
    ) -> Vec<BufferedPacket> {
        match self.verdicts.lookup(rpc_id, packet_type) {
            Some(Verdict::Pass) => {}
            _ => return Vec::new(),
        }

        self.store
            .drain_fragments(source, rpc_id)
            .into_iter()
            .map(|(seq, payload)| BufferedPacket {
                payload,
                source,
                route,
                total_packets,
                is_full: total_packets == 1,
                origin: PacketOrigin::Fragment { seq },
            })
            .collect()
    }

    /// One reaper sweep over both maps. Returns `(states, verdicts)` reaped.
    pub fn reap_expired(&self) -> (usize, usize) {
        let ttl = self.config.buffer_ttl;
        let states = self.store.reap_expired(ttl);
        let verdicts = self.verdicts.reap_expired(ttl);
        ProxyStats::add(&self.stats.states_reaped, states as u64);
        ProxyStats::add(&self.stats.verdicts_reaped, verdicts as u64);
        if states > 0 || verdicts > 0 {
            log::debug!(
                "[engine] reaped {} fragment states, {} verdicts (ttl {:?})",
                states,
                verdicts,
                ttl
            );
        }
        (states, verdicts)
    }

    fn as_fragment(pkt: &DataPacket<'_>, route: RouteInfo, source: SocketAddr) -> BufferedPacket {
        BufferedPacket {
            payload: pkt.payload.to_vec(),
            source,
            route,
            total_packets: pkt.total_packets,
            is_full: pkt.total_packets == 1,
            origin: PacketOrigin::Fragment {
                seq: pkt.seq_number,
            },
        }
    }
}

/// Half the TTL, the cadence at which the daemon's reaper wakes.
pub fn reaper_interval(ttl: Duration) -> Duration {
    ttl / 2
}
