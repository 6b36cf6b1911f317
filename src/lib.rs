//! MCP Registry
//!
//! Gateway and registry for Model Context Protocol (MCP) servers: reverse
//! proxy with auth delegation, OIDC-backed scope resolution, a disk-backed
//! service catalog, periodic health probing, and semantic tool search.
//!
//! # Components
//!
//! - **Edge Router**: path-prefix reverse proxy with auth delegation
//! - **Auth Resolver**: OIDC/JWT validation and group -> scope -> access mapping
//! - **Registry Store**: in-memory, disk-persisted Service/Tool catalog
//! - **Health Monitor**: periodic MCP handshake probes through the router
//! - **Tool Index**: embedding-based semantic search over tool metadata
//!
//! # Protocol Version
//!
//! Speaks MCP protocol version 2024-11-05 when probing upstream servers.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod app;
pub mod auth;
pub mod cli;
pub mod config;
pub mod error;
pub mod health;
pub mod index;
pub mod protocol;
pub mod ranking;
pub mod registry;
pub mod router;
pub mod transport;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// MCP protocol version spoken when probing upstream servers.
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber.with(fmt::layer().json()).init();
        }
        _ => {
            subscriber.with(fmt::layer()).init();
        }
    }

    Ok(())
}
