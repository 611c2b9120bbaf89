// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! udproxd - transparent in-path proxy for datagram RPC traffic.
//!
//! The host packet filter redirects application UDP traffic to this
//! daemon; it reassembles enough of each RPC to run the configured element
//! chain and forwards the verdict's survivors to their true destination.
//!
//! # Usage
//!
//! ```bash
//! # Listen on the default ports (15002, 15006)
//! udproxd
//!
//! # Custom ports and a JSON element-chain config
//! udproxd --port 15002 --port 15010 --config proxy.json
//!
//! # Structured logs for a collector
//! LOG_FORMAT=json udproxd
//! ```

use clap::Parser;
use std::net::IpAddr;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;
mod server;

pub use config::{LogFormat, ServerConfig};
pub use server::ProxyServer;

/// udprox proxy daemon - transparent element-chain proxy for UDP RPC traffic
#[derive(Parser, Debug)]
#[command(name = "udproxd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// UDP port to listen on (repeat for multiple ports)
    #[arg(short, long = "port")]
    ports: Vec<u16>,

    /// Bind address (0.0.0.0 for all interfaces)
    #[arg(short, long)]
    bind: Option<IpAddr>,

    /// Configuration file (JSON format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Log format (console, json)
    #[arg(long)]
    log_format: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Defaults, then file, then environment, then flags.
    let mut config = match &args.config {
        Some(path) => ServerConfig::from_file(path)?,
        None => ServerConfig::default(),
    };
    config.apply_env()?;
    if !args.ports.is_empty() {
        config.ports = args.ports.clone();
    }
    if let Some(bind) = args.bind {
        config.bind_address = bind;
    }
    if let Some(level) = args.log_level {
        config.log_level = level;
    }
    if let Some(format) = &args.log_format {
        config.log_format = format.parse()?;
    }

    init_tracing(&config);

    if let Some(path) = &args.config {
        info!("loaded config from {:?}", path);
    }
    banner(&config);

    let server = ProxyServer::new(config)?;

    let server_handle = server.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("shutdown signal received, stopping proxy...");
        server_handle.shutdown();
    });

    server.run().await?;
    info!("proxy stopped");
    Ok(())
}

fn init_tracing(config: &ServerConfig) {
    let filter =
        EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    match config.log_format {
        LogFormat::Console => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
    }
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!("SIGTERM handler unavailable ({}), SIGINT only", e);
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.ok();
    }
}

fn banner(config: &ServerConfig) {
    info!("+----------------------------------------------------+");
    info!(
        "|        udproxd v{:<35} |",
        env!("CARGO_PKG_VERSION")
    );
    info!("+----------------------------------------------------+");
    info!("|  Bind:      {:38} |", config.bind_address);
    info!(
        "|  Ports:     {:38} |",
        config
            .ports
            .iter()
            .map(u16::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    );
    info!(
        "|  Buffering: {:38} |",
        if config.buffering_enabled {
            format!("enabled (ttl {:?})", config.buffer_ttl())
        } else {
            "passthrough".to_string()
        }
    );
    info!("|  Elements:  {:38} |", config.elements.len());
    info!(
        "|  Target:    {:38} |",
        config
            .target_addr
            .map_or_else(|| "header-routed".to_string(), |a| a.to_string())
    );
    info!("+----------------------------------------------------+");
}
