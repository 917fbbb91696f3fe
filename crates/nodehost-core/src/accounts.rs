//! Account manager handle.
//!
//! Key storage itself lives outside this crate. The node only decides where
//! the keystore is, creates a throwaway one when none is configured, and
//! checks that a configured external signer answers.

use crate::config::Config;
use crate::error::{NodeError, Result};
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tempfile::TempDir;
use tracing::{debug, info};
use url::Url;

const EPHEMERAL_KEYSTORE_PREFIX: &str = "nodehost-keystore";
const SIGNER_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug)]
pub struct AccountManager {
    keydir: PathBuf,
    ephemeral: Mutex<Option<TempDir>>,
    external_signer: Option<String>,
    insecure_unlock_allowed: bool,
    closed: AtomicBool,
}

impl AccountManager {
    /// Resolve the keystore directory from `config` and prepare it.
    ///
    /// # Errors
    ///
    /// Fails if the keystore directory cannot be created, or with
    /// `NodeError::ExternalSigner` if the configured signer is unreachable.
    pub fn new(config: &Config) -> Result<Self> {
        let (keydir, ephemeral) = match config.account_config()? {
            Some(dir) => {
                create_keydir(&dir)?;
                (dir, None)
            }
            None => {
                let temp = tempfile::Builder::new()
                    .prefix(EPHEMERAL_KEYSTORE_PREFIX)
                    .tempdir()?;
                (temp.path().to_path_buf(), Some(temp))
            }
        };

        let external_signer = config
            .external_signer
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        if let Some(signer) = &external_signer {
            info!("Using external signer: url={}", signer);
            check_external_signer(signer)?;
        }

        Ok(Self {
            keydir,
            ephemeral: Mutex::new(ephemeral),
            external_signer,
            insecure_unlock_allowed: config.insecure_unlock_allowed,
            closed: AtomicBool::new(false),
        })
    }

    pub fn keydir(&self) -> &Path {
        &self.keydir
    }

    /// Whether the keystore is a temporary directory removed on stop.
    pub fn is_ephemeral(&self) -> bool {
        self.ephemeral
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn external_signer(&self) -> Option<&str> {
        self.external_signer.as_deref()
    }

    pub fn insecure_unlock_allowed(&self) -> bool {
        self.insecure_unlock_allowed
    }

    /// Delete the ephemeral keystore, if one was created.
    pub fn remove_ephemeral_keystore(&self) -> std::io::Result<()> {
        let temp = self
            .ephemeral
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match temp {
            Some(temp) => {
                debug!("Removing ephemeral keystore {}", temp.path().display());
                temp.close()
            }
            None => Ok(()),
        }
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

fn create_keydir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir).map_err(|e| NodeError::io_with_path(e, dir))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))
            .map_err(|e| NodeError::io_with_path(e, dir))?;
    }
    Ok(())
}

/// Network signers must accept a TCP connection; anything that is not a URL
/// is treated as an IPC path and must exist.
fn check_external_signer(endpoint: &str) -> Result<()> {
    let signer_error = |message: String| NodeError::ExternalSigner {
        url: endpoint.to_string(),
        message,
    };

    match Url::parse(endpoint) {
        Ok(url) if matches!(url.scheme(), "http" | "https" | "ws" | "wss") => {
            let addrs = url
                .socket_addrs(|| None)
                .map_err(|e| signer_error(e.to_string()))?;
            let mut last_error = None;
            for addr in addrs {
                match TcpStream::connect_timeout(&addr, SIGNER_CONNECT_TIMEOUT) {
                    Ok(_) => return Ok(()),
                    Err(e) => last_error = Some(e),
                }
            }
            Err(signer_error(
                last_error
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "no address".to_string()),
            ))
        }
        Ok(url) if url.scheme() != "file" && url.scheme().len() > 1 => {
            Err(signer_error(format!("unsupported scheme {}", url.scheme())))
        }
        _ => {
            let path = endpoint.strip_prefix("file://").unwrap_or(endpoint);
            if Path::new(path).exists() {
                Ok(())
            } else {
                Err(signer_error("no such IPC endpoint".to_string()))
            }
        }
    }
}
