//! # banter-gateway
//!
//! Banter gateway server binary — wires the message store, responder, and
//! authenticator together and starts the HTTP/WebSocket server.

#![deny(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use banter_responder::CannedResponder;
use banter_server::{GatewayServer, ServerConfig, StaticAuthenticator};
use banter_store::{ConnectionConfig, SqliteMessageStore};
use clap::Parser;
use tracing_subscriber::EnvFilter;

/// Banter chat gateway server.
#[derive(Parser, Debug)]
#[command(name = "banter-gateway", about = "Banter chat gateway server")]
struct Cli {
    /// Host to bind (overrides the config file if specified).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (overrides the config file if specified; 0 for auto-assign).
    #[arg(long)]
    port: Option<u16>,

    /// Path to the `SQLite` message database.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Path to a JSON configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Emit logs as JSON (for log collectors).
    #[arg(long)]
    json_logs: bool,
}

impl Cli {
    fn default_db_path() -> PathBuf {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
        PathBuf::from(home).join(".banter").join("messages.db")
    }
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    Ok(())
}

/// Initialize the tracing subscriber. `RUST_LOG` wins when set; the
/// default level is `info`.
fn init_tracing(json_logs: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.json_logs);

    // Config: defaults ← file ← BANTER_* env, then CLI flags on top.
    let mut config =
        ServerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }

    // Message store (migrations run on open).
    let db_path = args.db_path.unwrap_or_else(Cli::default_db_path);
    ensure_parent_dir(&db_path)?;
    let pool = banter_store::new_file(&db_path.to_string_lossy(), &ConnectionConfig::default())
        .context("Failed to open database")?;
    let store =
        Arc::new(SqliteMessageStore::new(pool).context("Failed to run database migrations")?);
    tracing::info!(path = %db_path.display(), "message store ready");

    // Collaborators: the canned responder and static authenticator stand in
    // for the model backend and the identity service.
    let server = GatewayServer::new(
        config,
        store,
        Arc::new(CannedResponder::default()),
        Arc::new(StaticAuthenticator::default()),
    );

    let (addr, handle) = server.listen().await.context("Failed to bind server")?;
    tracing::info!("Banter gateway listening on http://{addr}");

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    server.shutdown();
    let _ = handle.await;

    tracing::info!("Shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use banter_store::new_in_memory;

    fn test_server() -> GatewayServer {
        let pool = new_in_memory(&ConnectionConfig::default()).unwrap();
        let store = Arc::new(SqliteMessageStore::new(pool).unwrap());
        GatewayServer::new(
            ServerConfig::default(),
            store,
            Arc::new(CannedResponder::default()),
            Arc::new(StaticAuthenticator::default()),
        )
    }

    #[test]
    fn cli_host_and_port_default_to_config() {
        let cli = Cli::parse_from(["banter-gateway"]);
        assert_eq!(cli.host, None);
        assert_eq!(cli.port, None);
    }

    #[test]
    fn cli_custom_host_and_port() {
        let cli = Cli::parse_from(["banter-gateway", "--host", "0.0.0.0", "--port", "8080"]);
        assert_eq!(cli.host.as_deref(), Some("0.0.0.0"));
        assert_eq!(cli.port, Some(8080));
    }

    #[test]
    fn cli_db_path() {
        let cli = Cli::parse_from(["banter-gateway", "--db-path", "/tmp/test.db"]);
        assert_eq!(cli.db_path, Some(PathBuf::from("/tmp/test.db")));
    }

    #[test]
    fn cli_json_logs_off_by_default() {
        let cli = Cli::parse_from(["banter-gateway"]);
        assert!(!cli.json_logs);
    }

    #[test]
    fn default_db_path_under_banter_dir() {
        let path = Cli::default_db_path();
        assert!(path.to_string_lossy().contains(".banter"));
        assert!(path.to_string_lossy().ends_with("messages.db"));
    }

    #[test]
    fn ensure_parent_dir_creates_nested() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a").join("b").join("messages.db");
        ensure_parent_dir(&path).unwrap();
        assert!(path.parent().unwrap().exists());
    }

    #[tokio::test]
    async fn server_boots_and_serves_health() {
        let server = test_server();
        let (addr, handle) = server.listen().await.unwrap();

        let body: serde_json::Value = reqwest::get(format!("http://{addr}/health"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["status"], "ok");

        server.shutdown();
        let _ = handle.await;
    }

    #[tokio::test]
    async fn server_drains_within_deadline() {
        let server = test_server();
        let (_addr, handle) = server.listen().await.unwrap();
        server.shutdown();
        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .expect("server did not drain in time")
            .unwrap();
    }

    #[tokio::test]
    async fn file_backed_store_boots() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("nested").join("gateway.db");
        ensure_parent_dir(&db_path).unwrap();
        let pool =
            banter_store::new_file(&db_path.to_string_lossy(), &ConnectionConfig::default())
                .unwrap();
        let store = Arc::new(SqliteMessageStore::new(pool).unwrap());
        let server = GatewayServer::new(
            ServerConfig::default(),
            store,
            Arc::new(CannedResponder::default()),
            Arc::new(StaticAuthenticator::default()),
        );
        let (addr, handle) = server.listen().await.unwrap();

        let resp = reqwest::get(format!("http://{addr}/health")).await.unwrap();
        assert!(resp.status().is_success());

        server.shutdown();
        let _ = handle.await;
        assert!(db_path.exists());
    }
}
