//! Shared utilities for integration testing.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use mux_mgmt::config::ServerConfig;
use mux_mgmt::control::{ConfigChannel, ConfigDocument};
use mux_mgmt::server::ManagementServer;
use mux_mgmt::stats::StatRegistry;

/// Server configuration bound to an ephemeral port.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        port: 0,
        read_timeout_secs: 5,
        getptree_timeout_secs: 5,
        ..ServerConfig::default()
    }
}

/// Start a management server with an empty registry.
pub fn start_server(config: ServerConfig) -> (Arc<ManagementServer>, SocketAddr) {
    let server = Arc::new(ManagementServer::new(
        config,
        Arc::new(StatRegistry::default()),
        Arc::new(ConfigChannel::with_document(ConfigDocument::new())),
    ));
    let addr = server.start().unwrap();
    (server, addr)
}

/// Connect, send `lines`, and return the banner and everything sent after it.
pub async fn run_command(addr: SocketAddr, lines: &[&str]) -> (String, String) {
    let stream = TcpStream::connect(addr).await.unwrap();
    let (read_half, mut writer) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let mut banner = String::new();
    reader.read_line(&mut banner).await.unwrap();

    for line in lines {
        writer.write_all(line.as_bytes()).await.unwrap();
        writer.write_all(b"\n").await.unwrap();
    }

    let mut body = String::new();
    tokio::time::timeout(Duration::from_secs(10), reader.read_to_string(&mut body))
        .await
        .expect("server did not close the connection")
        .unwrap();
    (banner, body)
}

/// Poll `condition` until it holds or `timeout` elapses.
#[allow(dead_code)]
pub fn wait_until<F: Fn() -> bool>(timeout: Duration, condition: F) -> bool {
    let deadline = std::time::Instant::now() + timeout;
    while std::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}
