// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Element chain - the proxy's middleware layer.
//!
//! Elements inspect (and may mutate) the public segment of an RPC and vote
//! Pass or Drop. Requests traverse the chain front-to-back, responses
//! back-to-front, so a pair of endpoints sees symmetric middleware.
//! Elements run synchronously on the datagram hot path and must not block
//! on external I/O.

pub mod builtin;

use crate::engine::buffered::BufferedPacket;
use crate::engine::verdict::Verdict;
use crate::protocol::PacketType;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Which pipeline a packet goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Request,
    Response,
}

impl Direction {
    pub fn from_packet_type(packet_type: PacketType) -> Self {
        match packet_type {
            PacketType::Response => Self::Response,
            _ => Self::Request,
        }
    }
}

/// How much of a message an element needs before it can decide.
///
/// The chain aggregates to the maximum requirement: `Streaming` passes each
/// fragment independently, `StreamingWithBuffering` holds fragments until
/// the public prefix is ready, `FullBuffering` holds the whole message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BufferMode {
    Streaming,
    StreamingWithBuffering,
    FullBuffering,
}

/// Per-RPC scratch threaded through the chain, front to back (or back to
/// front for responses). Used for correlation ids and metrics scratch.
#[derive(Debug)]
pub struct ElementContext {
    pub rpc_id: u64,
    pub direction: Direction,
    values: HashMap<String, String>,
}

impl ElementContext {
    pub fn new(rpc_id: u64, direction: Direction) -> Self {
        Self {
            rpc_id,
            direction,
            values: HashMap::new(),
        }
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }
}

/// Failure inside an element. Propagates as a Drop verdict for the RPC.
#[derive(Debug)]
pub struct ElementError(pub String);

impl fmt::Display for ElementError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for ElementError {}

/// One middleware stage.
pub trait Element: Send + Sync {
    fn name(&self) -> &'static str;

    fn process_request(
        &self,
        ctx: &mut ElementContext,
        packet: &mut BufferedPacket,
    ) -> Result<Verdict, ElementError>;

    fn process_response(
        &self,
        ctx: &mut ElementContext,
        packet: &mut BufferedPacket,
    ) -> Result<Verdict, ElementError>;

    fn request_mode(&self) -> BufferMode {
        BufferMode::StreamingWithBuffering
    }

    fn response_mode(&self) -> BufferMode {
        BufferMode::StreamingWithBuffering
    }
}

/// Ordered middleware chain.
#[derive(Clone, Default)]
pub struct ElementChain {
    elements: Vec<Arc<dyn Element>>,
}

impl ElementChain {
    pub fn new(elements: Vec<Arc<dyn Element>>) -> Self {
        Self { elements }
    }

    /// A chain with no elements: passes everything.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// The buffering discipline the data plane must honor: the maximum
    /// requirement over both directions of every element.
    pub fn aggregate_mode(&self) -> BufferMode {
        self.elements
            .iter()
            .flat_map(|e| [e.request_mode(), e.response_mode()])
            .max()
            .unwrap_or(BufferMode::StreamingWithBuffering)
    }

    /// Run the pipeline for the packet's direction. Drop short-circuits;
    /// an element error is logged and becomes a Drop for this RPC.
    pub fn run(&self, packet: &mut BufferedPacket) -> Verdict {
        let direction = Direction::from_packet_type(packet.packet_type());
        let mut ctx = ElementContext::new(packet.rpc_id(), direction);

        let mut process = |element: &Arc<dyn Element>| -> Verdict {
            let result = match direction {
                Direction::Request => element.process_request(&mut ctx, packet),
                Direction::Response => element.process_response(&mut ctx, packet),
            };
            match result {
                Ok(verdict) => verdict,
                Err(e) => {
                    log::warn!(
                        "[chain] element {} failed for rpc {}: {} (dropping)",
                        element.name(),
                        ctx.rpc_id,
                        e
                    );
                    Verdict::Drop
                }
            }
        };

        match direction {
            Direction::Request => {
                for element in &self.elements {
                    if process(element) == Verdict::Drop {
                        return Verdict::Drop;
                    }
                }
            }
            Direction::Response => {
                for element in self.elements.iter().rev() {
                    if process(element) == Verdict::Drop {
                        return Verdict::Drop;
                    }
                }
            }
        }
        Verdict::Pass
    }
}
