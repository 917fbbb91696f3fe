//! Nodehost - runs a peer-to-peer node with the bundled `net` service.
//!
//! Prints `HTTP_ENDPOINT=<addr>` and `WS_ENDPOINT=<addr>` on stdout once the
//! node is up, so supervising processes can discover ports chosen with `0`.

mod net_service;

use anyhow::Result;
use clap::Parser;
use net_service::NetService;
use nodehost_core::defaults::{default_config, DEFAULT_HTTP_HOST, DEFAULT_WS_HOST};
use nodehost_core::rpc::split_and_trim;
use nodehost_core::{Config, DatadirConfig, Node};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const DEFAULT_NETWORK_ID: u64 = 1;

#[derive(Parser, Debug)]
#[command(name = "nodehost")]
#[command(about = "Peer-to-peer node host")]
struct Args {
    /// Data directory for keys, databases and the instance lock
    #[arg(long)]
    datadir: Option<PathBuf>,

    /// Run without a data directory; all state is discarded on exit
    #[arg(long, conflicts_with = "datadir")]
    ephemeral: bool,

    /// Instance name (defaults to the executable name)
    #[arg(long)]
    name: Option<String>,

    /// Custom node name suffix
    #[arg(long)]
    identity: Option<String>,

    /// Network identifier reported by net_version
    #[arg(long, default_value_t = DEFAULT_NETWORK_ID)]
    networkid: u64,

    /// P2P listen address (empty disables inbound connections)
    #[arg(long)]
    listen: Option<String>,

    /// Maximum number of peers
    #[arg(long)]
    maxpeers: Option<usize>,

    /// Enable the HTTP-RPC server
    #[arg(long)]
    http: bool,

    #[arg(long = "http.addr", default_value = DEFAULT_HTTP_HOST)]
    http_addr: String,

    #[arg(long = "http.port")]
    http_port: Option<u16>,

    /// Comma separated list of APIs offered over HTTP
    #[arg(long = "http.api")]
    http_api: Option<String>,

    /// Comma separated list of domains to accept cross origin requests from
    #[arg(long = "http.corsdomain")]
    http_corsdomain: Option<String>,

    /// Comma separated list of accepted virtual hostnames
    #[arg(long = "http.vhosts")]
    http_vhosts: Option<String>,

    /// Enable the WS-RPC server
    #[arg(long)]
    ws: bool,

    #[arg(long = "ws.addr", default_value = DEFAULT_WS_HOST)]
    ws_addr: String,

    #[arg(long = "ws.port")]
    ws_port: Option<u16>,

    /// Comma separated list of APIs offered over WebSocket
    #[arg(long = "ws.api")]
    ws_api: Option<String>,

    /// Origins from which to accept WebSocket requests
    #[arg(long = "ws.origins")]
    ws_origins: Option<String>,

    /// Offer every API over WebSocket when no API list is given
    #[arg(long = "ws.exposeall")]
    ws_expose_all: bool,

    /// IPC socket/pipe path (a bare name is placed in the data directory)
    #[arg(long)]
    ipcpath: Option<String>,

    /// Disable the IPC-RPC server
    #[arg(long)]
    ipcdisable: bool,

    /// Seconds to wait for in-flight HTTP/WS requests on shutdown (waits
    /// indefinitely when unset)
    #[arg(long)]
    shutdown_timeout: Option<u64>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

impl Args {
    fn into_config(self) -> Config {
        let mut config = default_config();

        if self.ephemeral {
            config.data_dir = None;
        } else if let Some(dir) = self.datadir {
            config.data_dir = Some(dir);
        }
        if let Some(name) = self.name {
            config.name = name;
        }
        if let Some(identity) = self.identity {
            config.user_ident = identity;
        }
        config.version = env!("CARGO_PKG_VERSION").to_string();

        if let Some(listen) = self.listen {
            config.p2p.listen_addr = listen;
        }
        if let Some(max_peers) = self.maxpeers {
            config.p2p.max_peers = max_peers;
        }

        if self.http {
            config.http_host = Some(self.http_addr);
        }
        if let Some(port) = self.http_port {
            config.http_port = port;
        }
        if let Some(api) = self.http_api {
            config.http_modules = split_and_trim(&api);
        }
        if let Some(cors) = self.http_corsdomain {
            config.http_cors = split_and_trim(&cors);
        }
        if let Some(vhosts) = self.http_vhosts {
            config.http_virtual_hosts = split_and_trim(&vhosts);
        }

        if self.ws {
            config.ws_host = Some(self.ws_addr);
        }
        if let Some(port) = self.ws_port {
            config.ws_port = port;
        }
        if let Some(api) = self.ws_api {
            config.ws_modules = split_and_trim(&api);
        }
        if let Some(origins) = self.ws_origins {
            config.ws_origins = split_and_trim(&origins);
        }
        config.ws_expose_all = self.ws_expose_all;

        if !self.ipcdisable {
            let stem = if config.name.is_empty() { "nodehost" } else { config.name.as_str() };
            let fallback = format!("{}{}", stem, DatadirConfig::IPC_SUFFIX);
            config.ipc_path = Some(self.ipcpath.unwrap_or(fallback));
        }
        config.rpc_shutdown_timeout = self.shutdown_timeout.map(Duration::from_secs);
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr; stdout carries the endpoint lines.
    let default_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();

    let network_id = args.networkid;
    let node = Node::new(args.into_config())?;
    node.register(move |_| Ok(NetService::new(network_id))).await?;
    node.start().await?;
    info!("Node started: name={}", node.config().node_name());

    if let Some(http) = node.http_endpoint().await {
        println!("HTTP_ENDPOINT={}", http);
    }
    if let Some(ws) = node.ws_endpoint().await {
        println!("WS_ENDPOINT={}", ws);
    }

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("Shutdown signal received, stopping node");
        }
        _ = node.wait() => info!("Node stopped"),
    }

    if let Err(e) = node.close().await {
        error!("Error during shutdown: {}", e);
        return Err(e.into());
    }
    Ok(())
}
