//! Integration tests for the `nodehost` binary.
//!
//! Each test spawns the daemon on an ephemeral HTTP port, reads the
//! `HTTP_ENDPOINT=` line from stdout and talks JSON-RPC to it.

use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::AsyncBufReadExt;

/// Make an RPC call and return the `result` member.
async fn rpc_call(addr: &str, method: &str, params: Value) -> Result<Value, String> {
    let json = rpc_call_raw(addr, method, params).await?;
    if let Some(error) = json.get("error") {
        return Err(error.to_string());
    }
    Ok(json.get("result").cloned().unwrap_or(Value::Null))
}

/// Make an RPC call and return the full JSON-RPC payload.
async fn rpc_call_raw(addr: &str, method: &str, params: Value) -> Result<Value, String> {
    let response = reqwest::Client::new()
        .post(format!("http://{}/", addr))
        .json(&json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        }))
        .timeout(Duration::from_secs(10))
        .send()
        .await
        .map_err(|e| e.to_string())?;

    response.json::<Value>().await.map_err(|e| e.to_string())
}

/// The HTTP endpoint answers plain GETs once it is serving.
async fn check_health(addr: &str) -> bool {
    reqwest::Client::new()
        .get(format!("http://{}/", addr))
        .timeout(Duration::from_secs(5))
        .send()
        .await
        .map(|response| response.status().is_success())
        .unwrap_or(false)
}

async fn wait_for_server(addr: &str, timeout_secs: u64) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < Duration::from_secs(timeout_secs) {
        if check_health(addr).await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    false
}

struct DaemonHandle {
    child: tokio::process::Child,
    http: String,
    stdout_drain: Option<tokio::task::JoinHandle<()>>,
}

impl DaemonHandle {
    async fn stop(mut self) {
        if let Some(drain) = self.stdout_drain.take() {
            drain.abort();
        }
        let _ = self.child.kill().await;
        let _ = self.child.wait().await;
    }
}

impl Drop for DaemonHandle {
    fn drop(&mut self) {
        if let Some(drain) = self.stdout_drain.take() {
            drain.abort();
        }
        let _ = self.child.start_kill();
    }
}

fn daemon_binary() -> Result<PathBuf, String> {
    if let Ok(path) = std::env::var("CARGO_BIN_EXE_nodehost") {
        return Ok(PathBuf::from(path));
    }
    let current_exe = std::env::current_exe()
        .map_err(|e| format!("failed to resolve current_exe for fallback: {e}"))?;
    let target_debug_dir = current_exe
        .parent()
        .and_then(|p| p.parent())
        .ok_or_else(|| "failed to resolve target/debug directory for fallback".to_string())?;

    let mut fallback = target_debug_dir.join("nodehost");
    if cfg!(target_os = "windows") {
        fallback.set_extension("exe");
    }
    if !fallback.exists() {
        return Err(format!(
            "CARGO_BIN_EXE_nodehost not set and fallback binary not found at {}",
            fallback.display()
        ));
    }
    Ok(fallback)
}

/// Start the daemon with HTTP on an ephemeral port and wait until it serves.
async fn start_daemon(data_dir: &Path, extra: &[&str]) -> Result<DaemonHandle, String> {
    let mut child = tokio::process::Command::new(daemon_binary()?)
        .arg("--datadir")
        .arg(data_dir)
        .args(["--name", "itest", "--networkid", "1337", "--listen="])
        .args(["--http", "--http.addr", "127.0.0.1", "--http.port", "0"])
        .args(extra)
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| format!("failed to spawn nodehost: {e}"))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| "failed to capture stdout".to_string())?;
    let mut lines = tokio::io::BufReader::new(stdout).lines();

    let mut discovered: Option<String> = None;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(20);
    while tokio::time::Instant::now() < deadline {
        match tokio::time::timeout(Duration::from_millis(250), lines.next_line()).await {
            Ok(Ok(Some(line))) => {
                if let Some(value) = line.strip_prefix("HTTP_ENDPOINT=") {
                    discovered = Some(value.trim().to_string());
                    break;
                }
            }
            Ok(Ok(None)) => break,
            Ok(Err(err)) => return Err(format!("failed to read nodehost stdout: {err}")),
            Err(_) => continue,
        }
    }

    let http = discovered.ok_or_else(|| "HTTP_ENDPOINT line not emitted by nodehost".to_string())?;
    if !wait_for_server(&http, 15).await {
        return Err(format!("nodehost failed health check on {http}"));
    }

    let stdout_drain =
        tokio::spawn(async move { while let Ok(Some(_)) = lines.next_line().await {} });

    Ok(DaemonHandle {
        child,
        http,
        stdout_drain: Some(stdout_drain),
    })
}

#[tokio::test]
async fn test_default_namespaces() {
    let temp_dir = TempDir::new().unwrap();
    let daemon = start_daemon(temp_dir.path(), &[]).await.unwrap();

    let modules = rpc_call(&daemon.http, "rpc_modules", Value::Null).await.unwrap();
    let mut names: Vec<&String> = modules.as_object().unwrap().keys().collect();
    names.sort();
    assert_eq!(names, vec!["net", "web3"]);

    let version = rpc_call(&daemon.http, "net_version", Value::Null).await.unwrap();
    assert_eq!(version, "1337");

    let client = rpc_call(&daemon.http, "web3_clientVersion", Value::Null)
        .await
        .unwrap();
    assert!(client.as_str().unwrap().starts_with("itest/v"));

    // admin is not in the default whitelist
    let raw = rpc_call_raw(&daemon.http, "admin_nodeInfo", Value::Null)
        .await
        .unwrap();
    assert_eq!(raw["error"]["code"], -32601);

    daemon.stop().await;
}

#[tokio::test]
async fn test_http_api_flag_exposes_admin() {
    let temp_dir = TempDir::new().unwrap();
    let daemon = start_daemon(temp_dir.path(), &["--http.api", "admin,net"])
        .await
        .unwrap();

    let datadir = rpc_call(&daemon.http, "admin_datadir", Value::Null).await.unwrap();
    assert_eq!(datadir, json!(temp_dir.path()));

    let info = rpc_call(&daemon.http, "admin_nodeInfo", Value::Null).await.unwrap();
    assert!(info["enode"].as_str().unwrap().starts_with("enode://"));

    let peers = rpc_call(&daemon.http, "net_peerCount", Value::Null).await.unwrap();
    assert_eq!(peers, "0x0");

    daemon.stop().await;
}

#[tokio::test]
async fn test_datadir_holds_lock_and_key() {
    let temp_dir = TempDir::new().unwrap();
    let daemon = start_daemon(temp_dir.path(), &[]).await.unwrap();

    let instance = temp_dir.path().join("itest");
    assert!(instance.join("LOCK").exists());
    assert!(instance.join("nodekey").exists());

    // A second daemon on the same data directory must refuse to start.
    let second = start_daemon(temp_dir.path(), &[]).await;
    assert!(second.is_err());

    daemon.stop().await;
}

#[tokio::test]
async fn test_malformed_request_gets_parse_error() {
    let temp_dir = TempDir::new().unwrap();
    let daemon = start_daemon(temp_dir.path(), &[]).await.unwrap();

    let response = reqwest::Client::new()
        .post(format!("http://{}/", daemon.http))
        .header(reqwest::header::CONTENT_TYPE, "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], -32700);

    daemon.stop().await;
}
