//! Node configuration.
//!
//! [`Config`] holds everything a [`Node`](crate::Node) needs: the data
//! directory layout, peer transport settings and the RPC endpoints. Most
//! fields are plain data; the methods below derive resolved paths and
//! endpoint addresses from them.

use crate::defaults;
use crate::error::{NodeError, Result};
use crate::p2p::{NodeKey, P2pConfig, PeerAddr};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{error, warn};

/// File names inside the instance directory.
pub struct DatadirConfig;

impl DatadirConfig {
    pub const PRIVATE_KEY: &'static str = "nodekey";
    pub const DEFAULT_KEYSTORE: &'static str = "keystore";
    pub const STATIC_NODES: &'static str = "static-nodes.json";
    pub const TRUSTED_NODES: &'static str = "trusted-nodes.json";
    pub const NODE_DATABASE: &'static str = "nodes";
    pub const IPC_SUFFIX: &'static str = ".ipc";
}

/// Prefix of Windows named pipe paths.
pub const WINDOWS_PIPE_PREFIX: &str = r"\\.\pipe\";

/// Client name that used to keep its resources directly in the data directory.
const LEGACY_LAYOUT_NAME: &str = "nodehost";

/// Fallback client name when neither a name is configured nor the
/// executable name can be determined.
const FALLBACK_CLIENT_NAME: &str = "nodehost";

/// Resources that may still sit in the legacy location. The flag says
/// whether finding one there is worth a deprecation warning.
const LEGACY_RESOURCES: &[(&str, bool)] = &[
    (DatadirConfig::NODE_DATABASE, true),
    (DatadirConfig::PRIVATE_KEY, true),
    (DatadirConfig::STATIC_NODES, false),
    (DatadirConfig::TRUSTED_NODES, false),
];

/// One-shot flags for deprecation warnings. A node owns one set, so each
/// warning is logged at most once per node.
#[derive(Debug, Default)]
pub struct DeprecationWarnings {
    static_nodes: AtomicBool,
    trusted_nodes: AtomicBool,
    legacy_resource: AtomicBool,
    emitted: AtomicUsize,
}

impl DeprecationWarnings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of warnings logged so far.
    pub fn emitted(&self) -> usize {
        self.emitted.load(Ordering::SeqCst)
    }

    fn warn_once(&self, flag: &AtomicBool, message: impl FnOnce() -> String) {
        if !flag.swap(true, Ordering::SeqCst) {
            self.emitted.fetch_add(1, Ordering::SeqCst);
            warn!("{}", message());
        }
    }
}

/// Node configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Instance name. Determines the instance directory under `data_dir`
    /// and defaults to the executable name.
    pub name: String,

    /// Extra identifier appended to the advertised node name.
    pub user_ident: String,

    /// Version string appended to the advertised node name.
    pub version: String,

    /// Root of all persistent data. `None` runs the node ephemerally.
    pub data_dir: Option<PathBuf>,

    pub p2p: P2pConfig,

    /// Keystore location. Relative paths resolve against the working directory.
    pub keystore_dir: Option<PathBuf>,

    /// URL of an external signer that replaces the local keystore.
    pub external_signer: Option<String>,

    pub insecure_unlock_allowed: bool,

    /// IPC socket file or named pipe. A bare file name is placed inside
    /// the data directory.
    pub ipc_path: Option<String>,

    pub http_host: Option<String>,
    pub http_port: u16,
    pub http_cors: Vec<String>,
    pub http_virtual_hosts: Vec<String>,
    pub http_modules: Vec<String>,

    pub ws_host: Option<String>,
    pub ws_port: u16,
    pub ws_origins: Vec<String>,
    pub ws_modules: Vec<String>,
    pub ws_expose_all: bool,

    /// Upper bound on draining in-flight HTTP/WS requests during shutdown.
    /// `None` waits for them indefinitely.
    pub rpc_shutdown_timeout: Option<Duration>,
}

impl Config {
    /// Check the instance name and make the data directory absolute.
    pub(crate) fn validate(&mut self) -> Result<()> {
        if let Some(dir) = &self.data_dir {
            if !dir.is_absolute() {
                let cwd = std::env::current_dir()?;
                self.data_dir = Some(cwd.join(dir));
            }
        }
        if self.name.contains('/') || self.name.contains('\\') {
            return Err(NodeError::config(
                "Config.Name must not contain '/' or '\\'",
            ));
        }
        if self.name == DatadirConfig::DEFAULT_KEYSTORE {
            return Err(NodeError::config(format!(
                "Config.Name cannot be \"{}\"",
                DatadirConfig::DEFAULT_KEYSTORE
            )));
        }
        if self.name.ends_with(DatadirConfig::IPC_SUFFIX) {
            return Err(NodeError::config(format!(
                "Config.Name cannot end in \"{}\"",
                DatadirConfig::IPC_SUFFIX
            )));
        }
        Ok(())
    }

    /// Resolved IPC endpoint, or `None` when IPC is disabled.
    pub fn ipc_endpoint(&self) -> Option<String> {
        let path = self.ipc_path.as_deref().filter(|p| !p.is_empty())?;

        if cfg!(windows) {
            if path.starts_with(WINDOWS_PIPE_PREFIX) {
                return Some(path.to_string());
            }
            return Some(format!("{}{}", WINDOWS_PIPE_PREFIX, path));
        }

        let is_bare_name = Path::new(path)
            .file_name()
            .map(|name| name == Path::new(path).as_os_str())
            .unwrap_or(false);
        if is_bare_name {
            let base = self.data_dir.clone().unwrap_or_else(std::env::temp_dir);
            return Some(base.join(path).to_string_lossy().into_owned());
        }
        Some(path.to_string())
    }

    /// `host:port` of the HTTP endpoint, or `None` when HTTP is disabled.
    pub fn http_endpoint(&self) -> Option<String> {
        self.http_host
            .as_deref()
            .filter(|h| !h.is_empty())
            .map(|host| format!("{}:{}", host, self.http_port))
    }

    /// `host:port` of the WebSocket endpoint, or `None` when WS is disabled.
    pub fn ws_endpoint(&self) -> Option<String> {
        self.ws_host
            .as_deref()
            .filter(|h| !h.is_empty())
            .map(|host| format!("{}:{}", host, self.ws_port))
    }

    /// Whether any RPC endpoint reachable from outside the process is enabled.
    pub fn ext_rpc_enabled(&self) -> bool {
        self.http_endpoint().is_some() || self.ws_endpoint().is_some()
    }

    /// Name advertised to peers and returned by `web3_clientVersion`:
    /// `name[/user_ident][/vVERSION]/os-arch/rust`.
    pub fn node_name(&self) -> String {
        let mut name = self.client_name();
        if name == LEGACY_LAYOUT_NAME {
            name = "Nodehost".to_string();
        }
        if !self.user_ident.is_empty() {
            name.push('/');
            name.push_str(&self.user_ident);
        }
        if !self.version.is_empty() {
            name.push_str("/v");
            name.push_str(&self.version);
        }
        name.push_str(&format!(
            "/{}-{}/rust",
            std::env::consts::OS,
            std::env::consts::ARCH
        ));
        name
    }

    pub(crate) fn client_name(&self) -> String {
        if !self.name.is_empty() {
            return self.name.clone();
        }
        defaults::executable_name().unwrap_or_else(|| FALLBACK_CLIENT_NAME.to_string())
    }

    /// Per-instance directory under the data directory.
    pub fn instance_dir(&self) -> Option<PathBuf> {
        self.data_dir
            .as_ref()
            .map(|dir| dir.join(self.client_name()))
    }

    /// Resolve `path` against the instance directory.
    ///
    /// Absolute paths are returned unchanged. Relative paths need a data
    /// directory; without one this returns `None`. Use of a legacy resource
    /// location is reported through `warnings`.
    pub fn resolve_path(
        &self,
        path: impl AsRef<Path>,
        warnings: &DeprecationWarnings,
    ) -> Option<PathBuf> {
        let path = path.as_ref();
        if path.is_absolute() {
            return Some(path.to_path_buf());
        }
        let data_dir = self.data_dir.as_ref()?;

        let legacy = LEGACY_RESOURCES
            .iter()
            .find(|(name, _)| Path::new(name) == path);
        if let Some((_, should_warn)) = legacy {
            if self.client_name() == LEGACY_LAYOUT_NAME {
                let old_path = data_dir.join(path);
                if old_path.exists() {
                    if *should_warn {
                        warnings.warn_once(&warnings.legacy_resource, || {
                            format!(
                                "Using deprecated resource file {}, please move this file to the '{}' subdirectory of datadir.",
                                old_path.display(),
                                LEGACY_LAYOUT_NAME
                            )
                        });
                    }
                    return Some(old_path);
                }
            }
        }
        self.instance_dir().map(|dir| dir.join(path))
    }

    /// The node identity key.
    ///
    /// A configured key wins. Otherwise the key is loaded from the instance
    /// directory, or generated and persisted there. Without a data directory
    /// an ephemeral key is returned.
    pub fn node_key(&self, warnings: &DeprecationWarnings) -> NodeKey {
        if let Some(key) = &self.p2p.private_key {
            return key.clone();
        }
        let Some(data_dir) = &self.data_dir else {
            return NodeKey::generate();
        };

        if let Some(keyfile) = self.resolve_path(DatadirConfig::PRIVATE_KEY, warnings) {
            if let Ok(key) = NodeKey::load(&keyfile) {
                return key;
            }
        }

        let key = NodeKey::generate();
        let instance_dir = data_dir.join(self.client_name());
        if let Err(e) = std::fs::create_dir_all(&instance_dir) {
            error!("Failed to persist node key: {}", e);
            return key;
        }
        if let Err(e) = key.save(&instance_dir.join(DatadirConfig::PRIVATE_KEY)) {
            error!("Failed to persist node key: {}", e);
        }
        key
    }

    /// Static peers from the legacy `static-nodes.json` file.
    pub fn static_nodes(&self, warnings: &DeprecationWarnings) -> Vec<PeerAddr> {
        self.parse_persistent_nodes(warnings, &warnings.static_nodes, DatadirConfig::STATIC_NODES)
    }

    /// Trusted peers from the legacy `trusted-nodes.json` file.
    pub fn trusted_nodes(&self, warnings: &DeprecationWarnings) -> Vec<PeerAddr> {
        self.parse_persistent_nodes(warnings, &warnings.trusted_nodes, DatadirConfig::TRUSTED_NODES)
    }

    fn parse_persistent_nodes(
        &self,
        warnings: &DeprecationWarnings,
        flag: &AtomicBool,
        file: &str,
    ) -> Vec<PeerAddr> {
        if self.data_dir.is_none() {
            return Vec::new();
        }
        let Some(path) = self.resolve_path(file, warnings) else {
            return Vec::new();
        };
        if !path.exists() {
            return Vec::new();
        }
        warnings.warn_once(flag, || {
            format!(
                "Found deprecated node list file {}, please use the config file instead.",
                path.display()
            )
        });

        let urls: Vec<String> = match std::fs::read_to_string(&path)
            .map_err(NodeError::from)
            .and_then(|text| serde_json::from_str(&text).map_err(NodeError::from))
        {
            Ok(urls) => urls,
            Err(e) => {
                error!("Can't load node list file: {}", e);
                return Vec::new();
            }
        };

        urls.iter()
            .filter(|url| !url.is_empty())
            .filter_map(|url| match url.parse::<PeerAddr>() {
                Ok(node) => Some(node),
                Err(e) => {
                    error!("Node URL {}: {}", url, e);
                    None
                }
            })
            .collect()
    }

    /// Directory of the known-nodes database, or `None` for in-memory.
    pub fn node_db(&self, warnings: &DeprecationWarnings) -> Option<PathBuf> {
        self.data_dir.as_ref()?;
        self.resolve_path(DatadirConfig::NODE_DATABASE, warnings)
    }

    /// Keystore directory, or `None` when an ephemeral one should be used.
    pub fn account_config(&self) -> Result<Option<PathBuf>> {
        let keystore = self
            .keystore_dir
            .as_ref()
            .filter(|dir| !dir.as_os_str().is_empty());
        match (keystore, &self.data_dir) {
            (Some(dir), _) if dir.is_absolute() => Ok(Some(dir.clone())),
            (None, Some(data_dir)) => Ok(Some(data_dir.join(DatadirConfig::DEFAULT_KEYSTORE))),
            (Some(dir), _) => Ok(Some(std::env::current_dir()?.join(dir))),
            (None, None) => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config_in(dir: &Path) -> Config {
        Config {
            name: "testnode".to_string(),
            data_dir: Some(dir.to_path_buf()),
            ..Default::default()
        }
    }

    #[test]
    fn test_validate_rejects_bad_names() {
        for name in ["a/b", "a\\b", "keystore", "node.ipc"] {
            let mut config = Config {
                name: name.to_string(),
                ..Default::default()
            };
            assert!(
                matches!(config.validate(), Err(NodeError::ConfigValidation { .. })),
                "name {:?} should be rejected",
                name
            );
        }
    }

    #[test]
    fn test_validate_makes_data_dir_absolute() {
        let mut config = Config {
            name: "testnode".to_string(),
            data_dir: Some(PathBuf::from("relative-dir")),
            ..Default::default()
        };
        config.validate().unwrap();
        assert!(config.data_dir.unwrap().is_absolute());
    }

    #[test]
    fn test_endpoints() {
        let config = Config {
            http_host: Some("127.0.0.1".to_string()),
            http_port: 8545,
            ..Default::default()
        };
        assert_eq!(config.http_endpoint().as_deref(), Some("127.0.0.1:8545"));
        assert!(config.ws_endpoint().is_none());
        assert!(config.ext_rpc_enabled());
        assert!(!Config::default().ext_rpc_enabled());
    }

    #[cfg(unix)]
    #[test]
    fn test_ipc_endpoint_bare_name_goes_to_data_dir() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = config_in(temp_dir.path());
        config.ipc_path = Some("node.ipc".to_string());
        let endpoint = config.ipc_endpoint().unwrap();
        assert_eq!(PathBuf::from(endpoint), temp_dir.path().join("node.ipc"));

        config.ipc_path = Some("/tmp/other/node.ipc".to_string());
        assert_eq!(config.ipc_endpoint().unwrap(), "/tmp/other/node.ipc");

        config.ipc_path = None;
        assert!(config.ipc_endpoint().is_none());
    }

    #[test]
    fn test_resolve_path() {
        let temp_dir = TempDir::new().unwrap();
        let config = config_in(temp_dir.path());
        let warnings = DeprecationWarnings::new();

        assert_eq!(
            config.resolve_path("chain", &warnings),
            Some(temp_dir.path().join("testnode").join("chain"))
        );
        let abs = temp_dir.path().join("elsewhere");
        assert_eq!(config.resolve_path(&abs, &warnings), Some(abs.clone()));

        let ephemeral = Config::default();
        assert!(ephemeral.resolve_path("chain", &warnings).is_none());
        assert_eq!(warnings.emitted(), 0);
    }

    #[test]
    fn test_resolve_path_honours_legacy_layout() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join(DatadirConfig::PRIVATE_KEY), "00").unwrap();

        let mut config = config_in(temp_dir.path());
        config.name = LEGACY_LAYOUT_NAME.to_string();
        let warnings = DeprecationWarnings::new();
        assert_eq!(
            config.resolve_path(DatadirConfig::PRIVATE_KEY, &warnings),
            Some(temp_dir.path().join(DatadirConfig::PRIVATE_KEY))
        );
        // Repeated lookups only warn once.
        config.resolve_path(DatadirConfig::PRIVATE_KEY, &warnings);
        assert_eq!(warnings.emitted(), 1);
    }

    #[test]
    fn test_node_key_is_persisted() {
        let temp_dir = TempDir::new().unwrap();
        let config = config_in(temp_dir.path());
        let warnings = DeprecationWarnings::new();

        let first = config.node_key(&warnings);
        let second = config.node_key(&warnings);
        assert_eq!(first.id(), second.id());
        assert!(temp_dir
            .path()
            .join("testnode")
            .join(DatadirConfig::PRIVATE_KEY)
            .exists());
    }

    #[test]
    fn test_node_key_prefers_configured_key() {
        let key = NodeKey::generate();
        let mut config = Config::default();
        config.p2p.private_key = Some(key.clone());
        assert_eq!(config.node_key(&DeprecationWarnings::new()).id(), key.id());
    }

    #[test]
    fn test_static_nodes_skips_invalid_entries() {
        let temp_dir = TempDir::new().unwrap();
        let config = config_in(temp_dir.path());
        let instance_dir = config.instance_dir().unwrap();
        std::fs::create_dir_all(&instance_dir).unwrap();

        let good = format!("enode://{}@127.0.0.1:30303", NodeKey::generate().id());
        let list = serde_json::json!([good, "", "enode://bad"]);
        std::fs::write(
            instance_dir.join(DatadirConfig::STATIC_NODES),
            list.to_string(),
        )
        .unwrap();

        let warnings = DeprecationWarnings::new();
        let nodes = config.static_nodes(&warnings);
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].to_string(), good);
        assert_eq!(warnings.emitted(), 1);
        assert!(config.trusted_nodes(&warnings).is_empty());
    }

    #[test]
    fn test_legacy_node_list_warns_once_per_owner() {
        let temp_dir = TempDir::new().unwrap();
        let config = config_in(temp_dir.path());
        let instance_dir = config.instance_dir().unwrap();
        std::fs::create_dir_all(&instance_dir).unwrap();
        std::fs::write(instance_dir.join(DatadirConfig::STATIC_NODES), "[]").unwrap();

        let warnings = DeprecationWarnings::new();
        config.static_nodes(&warnings);
        config.static_nodes(&warnings);
        assert_eq!(warnings.emitted(), 1);

        // A clone of the config shares nothing; a second owner warns again.
        let other = DeprecationWarnings::new();
        config.clone().static_nodes(&other);
        assert_eq!(other.emitted(), 1);
        assert_eq!(warnings.emitted(), 1);
    }

    #[test]
    fn test_account_config() {
        let temp_dir = TempDir::new().unwrap();
        let config = config_in(temp_dir.path());
        assert_eq!(
            config.account_config().unwrap(),
            Some(temp_dir.path().join("keystore"))
        );

        let abs = temp_dir.path().join("keys");
        let config = Config {
            keystore_dir: Some(abs.clone()),
            ..Default::default()
        };
        assert_eq!(config.account_config().unwrap(), Some(abs));

        assert_eq!(Config::default().account_config().unwrap(), None);
    }

    #[test]
    fn test_node_name() {
        let config = Config {
            name: "mynode".to_string(),
            user_ident: "alice".to_string(),
            version: "1.2.3".to_string(),
            ..Default::default()
        };
        let name = config.node_name();
        assert!(name.starts_with("mynode/alice/v1.2.3/"));
        assert!(name.ends_with("/rust"));
    }
}
