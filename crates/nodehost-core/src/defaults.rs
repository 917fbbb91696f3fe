//! Default configuration values.

use crate::config::Config;
use crate::p2p::P2pConfig;
use std::path::PathBuf;

pub const DEFAULT_HTTP_HOST: &str = "localhost";
pub const DEFAULT_HTTP_PORT: u16 = 8545;
pub const DEFAULT_WS_HOST: &str = "localhost";
pub const DEFAULT_WS_PORT: u16 = 8546;

pub const DEFAULT_P2P_LISTEN_ADDR: &str = "0.0.0.0:30303";
pub const DEFAULT_MAX_PEERS: usize = 50;

/// Namespaces exposed over HTTP and WebSocket unless configured otherwise.
pub const DEFAULT_MODULES: &[&str] = &["net", "web3"];

pub const DEFAULT_VIRTUAL_HOSTS: &[&str] = &["localhost"];

/// Directory name used under the platform data directory.
const DATA_DIR_NAME: &str = "Nodehost";

/// The default node configuration: default data directory, RPC ports and
/// modules, and a listening peer transport. HTTP and WebSocket stay disabled
/// until a host is set.
pub fn default_config() -> Config {
    Config {
        data_dir: default_data_dir(),
        http_port: DEFAULT_HTTP_PORT,
        http_modules: to_strings(DEFAULT_MODULES),
        http_virtual_hosts: to_strings(DEFAULT_VIRTUAL_HOSTS),
        ws_port: DEFAULT_WS_PORT,
        ws_modules: to_strings(DEFAULT_MODULES),
        p2p: P2pConfig {
            listen_addr: DEFAULT_P2P_LISTEN_ADDR.to_string(),
            max_peers: DEFAULT_MAX_PEERS,
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Platform data directory for node databases and keystores.
///
/// - Linux: `~/.nodehost`
/// - macOS: `~/Library/Nodehost`
/// - Windows: `%APPDATA%\Nodehost`
pub fn default_data_dir() -> Option<PathBuf> {
    if cfg!(target_os = "macos") {
        dirs::home_dir().map(|home| home.join("Library").join(DATA_DIR_NAME))
    } else if cfg!(windows) {
        dirs::data_dir().map(|appdata| appdata.join(DATA_DIR_NAME))
    } else {
        dirs::home_dir().map(|home| home.join(format!(".{}", DATA_DIR_NAME.to_lowercase())))
    }
}

/// IPC endpoint for `client_identifier` in the default data directory.
///
/// An empty identifier falls back to the executable name.
pub fn default_ipc_endpoint(client_identifier: &str) -> Option<String> {
    let client = if client_identifier.is_empty() {
        executable_name()?
    } else {
        client_identifier.to_string()
    };
    let config = Config {
        data_dir: default_data_dir(),
        ipc_path: Some(format!("{}.ipc", client)),
        ..Default::default()
    };
    config.ipc_endpoint()
}

/// File stem of the running executable.
pub(crate) fn executable_name() -> Option<String> {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.file_stem().map(|s| s.to_string_lossy().into_owned()))
        .filter(|name| !name.is_empty())
}

fn to_strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = default_config();
        assert_eq!(config.http_port, 8545);
        assert_eq!(config.ws_port, 8546);
        assert_eq!(config.http_modules, vec!["net", "web3"]);
        assert_eq!(config.http_virtual_hosts, vec!["localhost"]);
        assert!(config.http_host.is_none());
        assert!(config.ws_host.is_none());
        assert_eq!(config.p2p.max_peers, 50);
        assert_eq!(config.p2p.listen_addr, "0.0.0.0:30303");
    }

    #[test]
    fn test_default_ipc_endpoint_named_after_client() {
        if let Some(endpoint) = default_ipc_endpoint("mynode") {
            assert!(endpoint.contains("mynode.ipc"));
        }
    }
}
