//! Local socket RPC endpoint.
//!
//! Unix domain sockets on Unix, named pipes on Windows. Every API is served:
//! access to the socket implies the same trust as the hosting process.
//! Frames use the length-prefixed codec from [`super::codec`].
//!
//! # Thread Safety
//!
//! The accept loop and each connection run in their own spawned tasks.
//! Responses and subscription notifications share one writer task per
//! connection.

use super::codec::{read_frame, write_frame};
use super::error::RpcError;
use super::server::{CallContext, Notifier, RpcServer};
use super::types::JsonRpcResponse;
use super::{register_all, RpcApi};
use crate::cancel::CancellationToken;
use crate::error::{NodeError, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Handle to a running IPC endpoint.
pub struct IpcHandle {
    endpoint: String,
    server: Arc<RpcServer>,
    shutdown: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for IpcHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IpcHandle")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl IpcHandle {
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Stop accepting, close open connections and remove the socket file.
    pub async fn stop(mut self) {
        self.shutdown.cancel();
        self.server.stop();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        #[cfg(unix)]
        {
            let _ = std::fs::remove_file(&self.endpoint);
        }
        info!("IPC endpoint closed: url={}", self.endpoint);
    }
}

impl Drop for IpcHandle {
    fn drop(&mut self) {
        self.shutdown.cancel();
        self.server.stop();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Register `apis` and start serving them on `endpoint`.
pub async fn start_ipc_endpoint(endpoint: &str, apis: &[RpcApi]) -> Result<IpcHandle> {
    let server = Arc::new(RpcServer::new());
    register_all(apis, &server)?;

    let bind_error = |source: std::io::Error| NodeError::EndpointBind {
        endpoint: endpoint.to_string(),
        source,
    };
    let shutdown = CancellationToken::new();

    #[cfg(unix)]
    let task = {
        let listener = bind_unix(endpoint).map_err(bind_error)?;
        tokio::spawn(accept_loop(listener, server.clone(), shutdown.clone()))
    };

    #[cfg(windows)]
    let task = {
        let pipe = tokio::net::windows::named_pipe::ServerOptions::new()
            .first_pipe_instance(true)
            .create(endpoint)
            .map_err(bind_error)?;
        tokio::spawn(accept_loop(
            endpoint.to_string(),
            pipe,
            server.clone(),
            shutdown.clone(),
        ))
    };

    info!("IPC endpoint opened: url={}", endpoint);
    Ok(IpcHandle {
        endpoint: endpoint.to_string(),
        server,
        shutdown,
        task: Some(task),
    })
}

#[cfg(unix)]
fn bind_unix(endpoint: &str) -> std::io::Result<tokio::net::UnixListener> {
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    let path = Path::new(endpoint);
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    // A stale socket from an unclean shutdown blocks the bind.
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    let listener = tokio::net::UnixListener::bind(path)?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(listener)
}

#[cfg(unix)]
async fn accept_loop(
    listener: tokio::net::UnixListener,
    server: Arc<RpcServer>,
    shutdown: CancellationToken,
) {
    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, _)) => {
                debug!("Accepted IPC connection");
                tokio::spawn(serve_connection(stream, server.clone()));
            }
            Err(e) => {
                error!("IPC accept error: {}", e);
                tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
            }
        }
    }
}

#[cfg(windows)]
async fn accept_loop(
    endpoint: String,
    mut pipe: tokio::net::windows::named_pipe::NamedPipeServer,
    server: Arc<RpcServer>,
    shutdown: CancellationToken,
) {
    use tokio::net::windows::named_pipe::ServerOptions;

    loop {
        let connected = tokio::select! {
            _ = shutdown.cancelled() => break,
            connected = pipe.connect() => connected,
        };
        if let Err(e) = connected {
            error!("IPC accept error: {}", e);
            tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
            continue;
        }
        let next = match ServerOptions::new().create(&endpoint) {
            Ok(next) => next,
            Err(e) => {
                error!("Failed to create IPC pipe instance: {}", e);
                break;
            }
        };
        let stream = std::mem::replace(&mut pipe, next);
        debug!("Accepted IPC connection");
        tokio::spawn(serve_connection(stream, server.clone()));
    }
}

/// Serve JSON-RPC frames on one connection until EOF or server shutdown.
pub(crate) async fn serve_connection<S>(stream: S, server: Arc<RpcServer>)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut reader, mut writer) = tokio::io::split(stream);
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let notifier = Notifier::new(tx.clone());
    let cx = CallContext::with_notifier(notifier.clone());
    let shutdown = server.shutdown_token();

    let writer_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if let Err(e) = write_frame(&mut writer, message.as_bytes()).await {
                debug!("IPC write failed: {}", e);
                break;
            }
        }
    });

    loop {
        let frame = tokio::select! {
            result = read_frame(&mut reader) => match result {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    debug!("IPC connection ended: {}", e);
                    break;
                }
            },
            _ = shutdown.cancelled() => break,
        };

        let reply = match String::from_utf8(frame) {
            Ok(text) => server.handle_message(&text, &cx).await,
            Err(_) => serde_json::to_string(&JsonRpcResponse::from_result(
                None,
                Err(RpcError::Parse("invalid UTF-8 in IPC frame".to_string())),
            ))
            .unwrap_or_default(),
        };
        if tx.send(reply).is_err() {
            break;
        }
        notifier.activate();
    }

    notifier.close();
    drop(cx);
    drop(notifier);
    drop(tx);
    let _ = writer_task.await;
}
