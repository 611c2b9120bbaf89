// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Proxy daemon core: UDP listeners, per-datagram tasks, and the reaper.

use crate::config::{ConfigError, ServerConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};
use udprox::engine::reaper_interval;
use udprox::protocol::{classify, PacketClass};
use udprox::stats::ProxyStats;
use udprox::{refragment, BufferedPacket, Decision, ProxyEngine, Verdict};

/// Datagrams can legally be at most one MTU, but the receive buffer is
/// sized so oversized out-of-contract input is read whole and rejected by
/// validation instead of being silently truncated.
const RECV_BUF_LEN: usize = 64 * 1024;

/// Transparent UDP proxy server.
///
/// Binds one socket per configured port; every received datagram gets its
/// own task driving the engine and writing whatever comes out. A reaper
/// task expires stale fragment states and verdicts every half TTL.
#[derive(Clone)]
pub struct ProxyServer {
    config: Arc<ServerConfig>,
    engine: Arc<ProxyEngine>,
    shutdown: Arc<Notify>,
}

impl ProxyServer {
    pub fn new(config: ServerConfig) -> Result<Self, ServerError> {
        config.validate().map_err(ServerError::Config)?;
        let chain = config.build_chain();
        let engine = Arc::new(ProxyEngine::new(config.proxy_config(), chain));
        Ok(Self {
            config: Arc::new(config),
            engine,
            shutdown: Arc::new(Notify::new()),
        })
    }

    pub fn engine(&self) -> &Arc<ProxyEngine> {
        &self.engine
    }

    /// Signal every loop to stop.
    pub fn shutdown(&self) {
        self.shutdown.notify_waiters();
    }

    /// Bind the configured ports and serve until shutdown.
    pub async fn run(&self) -> Result<(), ServerError> {
        let mut sockets = Vec::with_capacity(self.config.ports.len());
        for port in &self.config.ports {
            let addr = SocketAddr::new(self.config.bind_address, *port);
            let socket = UdpSocket::bind(addr)
                .await
                .map_err(|e| ServerError::Bind(format!("{}: {}", addr, e)))?;
            info!("listening on udp://{}", addr);
            sockets.push(Arc::new(socket));
        }

        // Reaper: expire fragment states and verdicts past the TTL.
        let engine = Arc::clone(&self.engine);
        let shutdown = Arc::clone(&self.shutdown);
        let interval = reaper_interval(self.config.buffer_ttl());
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        engine.reap_expired();
                    }
                    _ = shutdown.notified() => {
                        debug!("reaper shutting down");
                        break;
                    }
                }
            }
        });

        let mut handles = Vec::with_capacity(sockets.len());
        for socket in sockets {
            handles.push(tokio::spawn(Self::recv_loop(
                socket,
                Arc::clone(&self.engine),
                Arc::clone(&self.shutdown),
            )));
        }
        for handle in handles {
            let _ = handle.await;
        }

        let stats = self.engine.stats().snapshot();
        info!(
            "proxy stopped: {} received, {} forwarded, {} dropped, {} malformed",
            stats.datagrams_received,
            stats.datagrams_forwarded,
            stats.dropped_by_verdict,
            stats.malformed
        );
        Ok(())
    }

    async fn recv_loop(socket: Arc<UdpSocket>, engine: Arc<ProxyEngine>, shutdown: Arc<Notify>) {
        let mut buf = vec![0u8; RECV_BUF_LEN];
        loop {
            tokio::select! {
                result = socket.recv_from(&mut buf) => match result {
                    Ok((len, peer)) => {
                        let datagram = buf[..len].to_vec();
                        let engine = Arc::clone(&engine);
                        let socket = Arc::clone(&socket);
                        tokio::spawn(async move {
                            Self::handle_datagram(engine, socket, datagram, peer).await;
                        });
                    }
                    Err(e) => {
                        error!("recv error: {}", e);
                    }
                },
                _ = shutdown.notified() => {
                    debug!("receive loop shutting down");
                    break;
                }
            }
        }
    }

    /// Drive one datagram through classification, the engine, the element
    /// chain, and the socket. Every failure is local: log, drop, continue.
    async fn handle_datagram(
        engine: Arc<ProxyEngine>,
        socket: Arc<UdpSocket>,
        datagram: Vec<u8>,
        peer: SocketAddr,
    ) {
        let class = match classify(&datagram) {
            Ok(class) => class,
            Err(e) => {
                ProxyStats::incr(&engine.stats().malformed);
                debug!("dropping malformed datagram from {}: {}", peer, e);
                return;
            }
        };

        let target = engine.config().target_addr;
        let route = match class {
            PacketClass::Error { rpc_id } => {
                // No routing tuple in an error packet; it goes verbatim to
                // the fallback or nowhere.
                match target {
                    Some(dest) => Self::send_raw(&engine, &socket, &datagram, dest).await,
                    None => debug!("dropping error packet rpc={}: no TARGET_ADDR", rpc_id),
                }
                return;
            }
            PacketClass::Data(route) => route,
        };

        if !engine.config().buffering_enabled {
            // Passthrough mode: original bytes, untouched.
            match route.destination(target) {
                Some(dest) => Self::send_raw(&engine, &socket, &datagram, dest).await,
                None => debug!("dropping packet rpc={}: no destination", route.rpc_id),
            }
            return;
        }

        match engine.process_packet(&datagram, peer) {
            Err(e) => {
                debug!("dropping datagram from {}: {}", peer, e);
            }
            Ok(Decision::Buffered) => {}
            Ok(Decision::Forward(_, Some(Verdict::Drop))) => {
                ProxyStats::incr(&engine.stats().dropped_by_verdict);
            }
            Ok(Decision::Forward(bp, Some(Verdict::Pass))) => {
                Self::write_packet(&engine, &socket, &bp).await;
            }
            Ok(Decision::Forward(mut bp, None)) => {
                if engine.run_chain(&mut bp) == Verdict::Drop {
                    debug!(
                        "chain dropped rpc={} ({:?})",
                        bp.rpc_id(),
                        bp.packet_type()
                    );
                    return;
                }

                let last_used = bp.last_used_seq();
                let source = bp.source;
                let route = bp.route;
                let total_packets = bp.total_packets;

                // Re-join the private bytes that shared a fragment with the
                // public prefix, then emit the head.
                bp.merge_private_tail();
                Self::write_packet(&engine, &socket, &bp).await;

                if let Some(up_to) = last_used {
                    engine.cleanup_used_fragments(source, route.rpc_id, up_to);
                    for tail in engine.drain_remaining(
                        source,
                        route.rpc_id,
                        route.packet_type,
                        route,
                        total_packets,
                    ) {
                        Self::write_packet(&engine, &socket, &tail).await;
                    }
                }
            }
        }
    }

    /// Refragment to the MTU and write toward the header destination.
    async fn write_packet(engine: &ProxyEngine, socket: &UdpSocket, bp: &BufferedPacket) {
        let Some(dest) = bp.route.destination(engine.config().target_addr) else {
            warn!("no destination for rpc={}, dropping", bp.rpc_id());
            return;
        };
        for wire in refragment(bp) {
            match socket.send_to(&wire, dest).await {
                Ok(_) => ProxyStats::incr(&engine.stats().datagrams_forwarded),
                Err(e) => {
                    ProxyStats::incr(&engine.stats().write_errors);
                    warn!("write to {} failed: {}", dest, e);
                }
            }
        }
    }

    async fn send_raw(engine: &ProxyEngine, socket: &UdpSocket, datagram: &[u8], dest: SocketAddr) {
        match socket.send_to(datagram, dest).await {
            Ok(_) => ProxyStats::incr(&engine.stats().datagrams_forwarded),
            Err(e) => {
                ProxyStats::incr(&engine.stats().write_errors);
                warn!("write to {} failed: {}", dest, e);
            }
        }
    }
}

/// Server error types.
#[derive(Debug)]
pub enum ServerError {
    Config(ConfigError),
    Bind(String),
    Io(String),
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(e) => write!(f, "Configuration error: {}", e),
            Self::Bind(s) => write!(f, "Bind error: {}", s),
            Self::Io(s) => write!(f, "I/O error: {}", s),
        }
    }
}

impl std::error::Error for ServerError {}

impl From<std::io::Error> for ServerError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}
