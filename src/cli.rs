//! Command-line interface

use std::path::PathBuf;

use clap::Parser;

/// MCP Registry - gateway and registry for Model Context Protocol servers
#[derive(Parser, Debug)]
#[command(name = "mcp-registry")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "MCP_REGISTRY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "MCP_REGISTRY_SERVER__PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "MCP_REGISTRY_SERVER__HOST")]
    pub host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "MCP_REGISTRY_LOG_LEVEL")]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "MCP_REGISTRY_LOG_FORMAT")]
    pub log_format: Option<String>,
}
