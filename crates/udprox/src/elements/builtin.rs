// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The statically-known element set the daemon can wire from configuration.
//!
//! The element interface is the extension point; these implementations are
//! deliberately small. Anything heavier belongs behind the same trait.

use crate::elements::{BufferMode, Element, ElementContext, ElementError};
use crate::engine::buffered::BufferedPacket;
use crate::engine::verdict::Verdict;
use std::sync::atomic::{AtomicU64, Ordering};

/// Logs every packet it sees and passes it on.
#[derive(Debug, Default)]
pub struct LoggingElement;

impl Element for LoggingElement {
    fn name(&self) -> &'static str {
        "logging"
    }

    fn process_request(
        &self,
        ctx: &mut ElementContext,
        packet: &mut BufferedPacket,
    ) -> Result<Verdict, ElementError> {
        log::info!(
            "[element/logging] request rpc={} {} bytes from {}",
            ctx.rpc_id,
            packet.payload.len(),
            packet.source
        );
        Ok(Verdict::Pass)
    }

    fn process_response(
        &self,
        ctx: &mut ElementContext,
        packet: &mut BufferedPacket,
    ) -> Result<Verdict, ElementError> {
        log::info!(
            "[element/logging] response rpc={} {} bytes from {}",
            ctx.rpc_id,
            packet.payload.len(),
            packet.source
        );
        Ok(Verdict::Pass)
    }
}

/// Drops requests whose public segment starts with a blocked byte pattern.
///
/// Matching skips the 5-byte segment header (version + offset field) so
/// patterns are written against application bytes.
#[derive(Debug, Default)]
pub struct FirewallElement {
    blocked_prefixes: Vec<Vec<u8>>,
}

impl FirewallElement {
    pub fn new(blocked_prefixes: Vec<Vec<u8>>) -> Self {
        Self { blocked_prefixes }
    }

    fn matches(&self, payload: &[u8]) -> bool {
        let body = payload.get(crate::config::PREFIX_FIELD_LEN..).unwrap_or(&[]);
        self.blocked_prefixes
            .iter()
            .any(|prefix| !prefix.is_empty() && body.starts_with(prefix))
    }
}

impl Element for FirewallElement {
    fn name(&self) -> &'static str {
        "firewall"
    }

    fn process_request(
        &self,
        ctx: &mut ElementContext,
        packet: &mut BufferedPacket,
    ) -> Result<Verdict, ElementError> {
        if self.matches(&packet.payload) {
            log::info!("[element/firewall] blocked request rpc={}", ctx.rpc_id);
            return Ok(Verdict::Drop);
        }
        Ok(Verdict::Pass)
    }

    fn process_response(
        &self,
        _ctx: &mut ElementContext,
        _packet: &mut BufferedPacket,
    ) -> Result<Verdict, ElementError> {
        Ok(Verdict::Pass)
    }
}

/// Deterministically drops every `every_nth` request, for chaos testing.
#[derive(Debug)]
pub struct FaultInjectElement {
    every_nth: u64,
    seen: AtomicU64,
}

impl FaultInjectElement {
    /// `every_nth == 0` disables injection.
    pub fn new(every_nth: u64) -> Self {
        Self {
            every_nth,
            seen: AtomicU64::new(0),
        }
    }
}

impl Element for FaultInjectElement {
    fn name(&self) -> &'static str {
        "fault-inject"
    }

    fn process_request(
        &self,
        ctx: &mut ElementContext,
        _packet: &mut BufferedPacket,
    ) -> Result<Verdict, ElementError> {
        if self.every_nth == 0 {
            return Ok(Verdict::Pass);
        }
        let n = self.seen.fetch_add(1, Ordering::Relaxed) + 1;
        if n % self.every_nth == 0 {
            log::info!(
                "[element/fault-inject] dropping request rpc={} (#{})",
                ctx.rpc_id,
                n
            );
            return Ok(Verdict::Drop);
        }
        Ok(Verdict::Pass)
    }

    fn process_response(
        &self,
        _ctx: &mut ElementContext,
        _packet: &mut BufferedPacket,
    ) -> Result<Verdict, ElementError> {
        Ok(Verdict::Pass)
    }
}

/// Counts traffic by direction. Readable at any time, never drops.
#[derive(Debug, Default)]
pub struct MetricsElement {
    requests: AtomicU64,
    responses: AtomicU64,
    request_bytes: AtomicU64,
    response_bytes: AtomicU64,
}

impl MetricsElement {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requests_seen(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    pub fn responses_seen(&self) -> u64 {
        self.responses.load(Ordering::Relaxed)
    }

    pub fn request_bytes(&self) -> u64 {
        self.request_bytes.load(Ordering::Relaxed)
    }

    pub fn response_bytes(&self) -> u64 {
        self.response_bytes.load(Ordering::Relaxed)
    }
}

impl Element for MetricsElement {
    fn name(&self) -> &'static str {
        "metrics"
    }

    fn process_request(
        &self,
        _ctx: &mut ElementContext,
        packet: &mut BufferedPacket,
    ) -> Result<Verdict, ElementError> {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.request_bytes
            .fetch_add(packet.payload.len() as u64, Ordering::Relaxed);
        Ok(Verdict::Pass)
    }

    fn process_response(
        &self,
        _ctx: &mut ElementContext,
        packet: &mut BufferedPacket,
    ) -> Result<Verdict, ElementError> {
        self.responses.fetch_add(1, Ordering::Relaxed);
        self.response_bytes
            .fetch_add(packet.payload.len() as u64, Ordering::Relaxed);
        Ok(Verdict::Pass)
    }

    fn request_mode(&self) -> BufferMode {
        BufferMode::Streaming
    }

    fn response_mode(&self) -> BufferMode {
        BufferMode::Streaming
    }
}
