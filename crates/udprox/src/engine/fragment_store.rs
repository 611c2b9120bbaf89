// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Sharded fragment buffering keyed by `(source address, rpc id)`.
//!
//! Reassembly of one RPC is inherently serial, so each RPC gets its own
//! small mutex; cross-RPC work spreads over a fixed array of shards so no
//! global lock exists. Shard selection hashes the source address with
//! FNV-1a, matching how the sender side of the protocol spreads RPC ids.
//!
//! Memory is bounded three ways: a per-fragment size check, a per-RPC byte
//! cap, and a per-shard soft ceiling that force-reaps the oldest states
//! instead of back-pressuring the sender.

use crate::config::{
    MAX_FRAGMENT_PAYLOAD, MAX_RPC_BUFFER_BYTES, MAX_STATES_PER_SHARD, N_SHARDS,
};
use crate::error::{ProxyError, Result};
use const_fnv1a_hash::fnv1a_hash_32;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

type FragmentKey = (SocketAddr, u64);

/// Buffered fragments of one RPC in one direction of travel.
///
/// All mutation happens under the owning `Mutex`, held briefly.
pub struct FragmentState {
    /// seq -> payload bytes, owned by the store.
    pub(crate) fragments: HashMap<u16, Vec<u8>>,
    /// Learned from the first fragment observed; 0 means not yet known.
    pub(crate) total_packets: u16,
    /// Monotonic: once the public prefix has been handed out, later
    /// arrivals are buffered without re-running extraction.
    pub(crate) public_segment_extracted: bool,
    /// Refreshed on every insertion; drives TTL expiry.
    pub(crate) last_seen: Instant,
    pub(crate) buffered_bytes: usize,
}

impl FragmentState {
    fn new(total_packets: u16) -> Self {
        Self {
            fragments: HashMap::new(),
            total_packets,
            public_segment_extracted: false,
            last_seen: Instant::now(),
            buffered_bytes: 0,
        }
    }

    /// Copy a fragment into the state, refreshing `last_seen`.
    ///
    /// Rejects fragments that contradict the buffered state (sequence out
    /// of range, a changed `total_packets`) and fragments that would blow
    /// the per-RPC byte cap. The existing state is kept either way.
    pub fn add_fragment(&mut self, seq: u16, total_packets: u16, payload: &[u8]) -> Result<()> {
        if payload.len() > MAX_FRAGMENT_PAYLOAD {
            return Err(ProxyError::FragmentInconsistency(format!(
                "fragment payload {} exceeds the {} byte fragment ceiling",
                payload.len(),
                MAX_FRAGMENT_PAYLOAD
            )));
        }
        if total_packets == 0 {
            return Err(ProxyError::FragmentInconsistency(
                "total_packets is zero".into(),
            ));
        }
        if self.total_packets == 0 {
            self.total_packets = total_packets;
        } else if self.total_packets != total_packets {
            return Err(ProxyError::FragmentInconsistency(format!(
                "total_packets changed from {} to {}",
                self.total_packets, total_packets
            )));
        }
        if seq >= self.total_packets {
            return Err(ProxyError::FragmentInconsistency(format!(
                "seq {} out of range for {} fragments",
                seq, self.total_packets
            )));
        }

        let replaced = self.fragments.get(&seq).map_or(0, Vec::len);
        let next_total = self.buffered_bytes - replaced + payload.len();
        if next_total > MAX_RPC_BUFFER_BYTES {
            return Err(ProxyError::RpcBufferOverflow {
                buffered: self.buffered_bytes,
                incoming: payload.len(),
            });
        }

        self.fragments.insert(seq, payload.to_vec());
        self.buffered_bytes = next_total;
        self.last_seen = Instant::now();
        Ok(())
    }

    pub fn total_packets(&self) -> u16 {
        self.total_packets
    }

    pub fn fragment_count(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_extracted(&self) -> bool {
        self.public_segment_extracted
    }
}

struct Shard {
    states: RwLock<HashMap<FragmentKey, Arc<Mutex<FragmentState>>>>,
}

/// Thread-safe fragment store, `N_SHARDS` ways.
pub struct FragmentStore {
    shards: Vec<Shard>,
}

impl Default for FragmentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FragmentStore {
    pub fn new() -> Self {
        let mut shards = Vec::with_capacity(N_SHARDS);
        for _ in 0..N_SHARDS {
            shards.push(Shard {
                states: RwLock::new(HashMap::new()),
            });
        }
        Self { shards }
    }

    fn shard(&self, source: &SocketAddr) -> &Shard {
        &self.shards[shard_index(source)]
    }

    /// Fetch or lazily create the state for `(source, rpc_id)`.
    ///
    /// Idempotent; does not refresh `last_seen` (only real fragment
    /// arrivals count against the TTL). Creation enforces the per-shard
    /// soft ceiling.
    pub fn get_or_create(
        &self,
        source: SocketAddr,
        rpc_id: u64,
        total_packets: u16,
    ) -> Arc<Mutex<FragmentState>> {
        let shard = self.shard(&source);
        let key = (source, rpc_id);

        if let Some(state) = shard.states.read().get(&key) {
            return Arc::clone(state);
        }

        let mut states = shard.states.write();
        if let Some(state) = states.get(&key) {
            return Arc::clone(state);
        }
        if states.len() >= MAX_STATES_PER_SHARD {
            force_reap_oldest(&mut states);
        }
        let state = Arc::new(Mutex::new(FragmentState::new(total_packets)));
        states.insert(key, Arc::clone(&state));
        state
    }

    pub fn get(&self, source: SocketAddr, rpc_id: u64) -> Option<Arc<Mutex<FragmentState>>> {
        self.shard(&source).states.read().get(&(source, rpc_id)).cloned()
    }

    /// Drop fragments with `seq <= up_to_seq`; the rest stay buffered.
    /// A state left empty after extraction is removed entirely.
    pub fn cleanup_used_fragments(&self, source: SocketAddr, rpc_id: u64, up_to_seq: u16) {
        let Some(state) = self.get(source, rpc_id) else {
            return;
        };

        let remove = {
            let mut st = state.lock();
            st.fragments.retain(|seq, _| *seq > up_to_seq);
            st.buffered_bytes = st.fragments.values().map(Vec::len).sum();
            st.fragments.is_empty() && st.public_segment_extracted
        };
        if remove {
            self.shard(&source).states.write().remove(&(source, rpc_id));
        }
    }

    /// Atomically remove the state and return its remaining fragments in
    /// sequence order.
    pub fn drain_fragments(&self, source: SocketAddr, rpc_id: u64) -> Vec<(u16, Vec<u8>)> {
        let removed = self.shard(&source).states.write().remove(&(source, rpc_id));
        let Some(state) = removed else {
            return Vec::new();
        };

        let mut st = state.lock();
        let mut fragments: Vec<(u16, Vec<u8>)> = st.fragments.drain().collect();
        st.buffered_bytes = 0;
        fragments.sort_unstable_by_key(|(seq, _)| *seq);
        fragments
    }

    /// Drop states whose `last_seen` is older than `ttl`. Returns how many
    /// were removed. States currently locked by a worker are left alone.
    pub fn reap_expired(&self, ttl: Duration) -> usize {
        let now = Instant::now();
        let mut reaped = 0;
        for shard in &self.shards {
            let mut states = shard.states.write();
            states.retain(|_, state| match state.try_lock() {
                Some(st) => {
                    let keep = now.duration_since(st.last_seen) <= ttl;
                    if !keep {
                        reaped += 1;
                    }
                    keep
                }
                None => true,
            });
        }
        reaped
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.states.read().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn shard_index(source: &SocketAddr) -> usize {
    let mut key = [0u8; 18];
    let len = match source {
        SocketAddr::V4(v4) => {
            key[..4].copy_from_slice(&v4.ip().octets());
            key[4..6].copy_from_slice(&v4.port().to_le_bytes());
            6
        }
        SocketAddr::V6(v6) => {
            key[..16].copy_from_slice(&v6.ip().octets());
            key[16..18].copy_from_slice(&v6.port().to_le_bytes());
            18
        }
    };
    (fnv1a_hash_32(&key[..len], None) as usize) & (N_SHARDS - 1)
}

/// Evict the state with the oldest `last_seen` from a full shard.
/// Locked states are skipped; they are in active use.
fn force_reap_oldest(states: &mut HashMap<FragmentKey, Arc<Mutex<FragmentState>>>) {
    let oldest = states
        .iter()
        .filter_map(|(key, state)| state.try_lock().map(|st| (*key, st.last_seen)))
        .min_by_key(|(_, last_seen)| *last_seen)
        .map(|(key, _)| key);

    if let Some(key) = oldest {
        states.remove(&key);
        log::debug!(
            "[store] shard ceiling hit, force-reaped rpc {} from {}",
            key.1,
            key.0
        );
    }
}
