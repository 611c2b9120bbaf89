// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Verdict cache.
//!
//! Once the element chain has decided an RPC's fate in one direction, every
//! later fragment of that RPC skips the chain and fast-forwards (or is
//! discarded). Request and response verdicts are independent keys even
//! though they share the rpc id.

use crate::protocol::PacketType;
use dashmap::DashMap;
use std::time::{Duration, Instant};

/// Element-chain decision for one `(rpc_id, direction)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Drop,
}

#[derive(Debug, Clone, Copy)]
struct VerdictEntry {
    verdict: Verdict,
    last_access: Instant,
}

/// Concurrent `(rpc_id, packet_type) -> verdict` map with TTL expiry.
#[derive(Default)]
pub struct VerdictCache {
    entries: DashMap<(u64, PacketType), VerdictEntry>,
}

impl VerdictCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite, stamping the access time.
    pub fn store(&self, rpc_id: u64, packet_type: PacketType, verdict: Verdict) {
        self.entries.insert(
            (rpc_id, packet_type),
            VerdictEntry {
                verdict,
                last_access: Instant::now(),
            },
        );
    }

    /// Look up a verdict, refreshing its access time on a hit.
    pub fn lookup(&self, rpc_id: u64, packet_type: PacketType) -> Option<Verdict> {
        self.entries.get_mut(&(rpc_id, packet_type)).map(|mut e| {
            e.last_access = Instant::now();
            e.verdict
        })
    }

    /// Drop entries not touched within `ttl`. Returns how many went.
    pub fn reap_expired(&self, ttl: Duration) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries
            .retain(|_, e| now.duration_since(e.last_access) <= ttl);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_then_lookup() {
        let cache = VerdictCache::new();
        assert_eq!(cache.lookup(1, PacketType::Request), None);

        cache.store(1, PacketType::Request, Verdict::Pass);
        assert_eq!(cache.lookup(1, PacketType::Request), Some(Verdict::Pass));
    }

    #[test]
    fn directions_are_independent() {
        let cache = VerdictCache::new();
        cache.store(1, PacketType::Request, Verdict::Drop);

        assert_eq!(cache.lookup(1, PacketType::Request), Some(Verdict::Drop));
        assert_eq!(cache.lookup(1, PacketType::Response), None);
    }

    #[test]
    fn overwrite_wins() {
        let cache = VerdictCache::new();
        cache.store(1, PacketType::Request, Verdict::Pass);
        cache.store(1, PacketType::Request, Verdict::Drop);
        assert_eq!(cache.lookup(1, PacketType::Request), Some(Verdict::Drop));
    }

    #[test]
    fn reaper_honors_ttl() {
        let cache = VerdictCache::new();
        cache.store(1, PacketType::Request, Verdict::Pass);
        assert_eq!(cache.reap_expired(Duration::from_secs(30)), 0);

        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(cache.reap_expired(Duration::from_millis(10)), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn lookup_refreshes_access_time() {
        let cache = VerdictCache::new();
        cache.store(1, PacketType::Request, Verdict::Pass);

        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(cache.lookup(1, PacketType::Request), Some(Verdict::Pass));
        // The lookup above re-stamped the entry, so a 20ms TTL keeps it.
        assert_eq!(cache.reap_expired(Duration::from_millis(20)), 0);
    }
}
