use std::io::Write;
use std::net::TcpListener;
use std::path::Path;
use std::time::Duration;

use reqwest::Client;
use tempfile::{NamedTempFile, TempDir};
use tokio::time::{sleep, timeout};

/// Find an available port
fn get_available_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// Create a minimal valid config with storage under `root`
fn minimal_config(port: u16, root: &Path) -> String {
    format!(
        r#"
[auth]
method = "none"

[server]
host = "127.0.0.1"
port = {}

[storage]
scratch_dir = "{}"
public_dir = "{}"
"#,
        port,
        root.join("scratch").display(),
        root.join("public").display(),
    )
}

fn write_config(content: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(content.as_bytes()).unwrap();
    temp_file.flush().unwrap();
    temp_file
}

/// Spawn the server and return a handle
async fn spawn_server(config_path: &Path) -> tokio::process::Child {
    spawn_server_with_env(config_path, &[]).await
}

async fn spawn_server_with_env(config_path: &Path, env: &[(&str, String)]) -> tokio::process::Child {
    let mut command = tokio::process::Command::new(env!("CARGO_BIN_EXE_convertly"));
    command
        .env("CONVERTLY_CONFIG", config_path)
        .env("RUST_LOG", "error") // Quiet logs during tests
        .env_remove("PORT")
        .env_remove("CONVERTLY_SERVER__PORT")
        .kill_on_drop(true);
    for (name, value) in env {
        command.env(name, value);
    }
    command.spawn().expect("Failed to spawn server")
}

/// Wait for server to be ready
async fn wait_for_server(port: u16, max_attempts: u32) -> bool {
    let client = Client::new();
    for _ in 0..max_attempts {
        if client
            .get(format!("http://127.0.0.1:{}/api/health", port))
            .send()
            .await
            .is_ok()
        {
            return true;
        }
        sleep(Duration::from_millis(50)).await;
    }
    false
}

#[tokio::test]
async fn test_health_endpoint() {
    let port = get_available_port();
    let root = TempDir::new().unwrap();
    let config = write_config(&minimal_config(port, root.path()));

    let mut server = spawn_server(config.path()).await;
    assert!(
        wait_for_server(port, 100).await,
        "Server did not start in time"
    );

    let client = Client::new();
    let response = client
        .get(format!("http://127.0.0.1:{}/api/health", port))
        .send()
        .await
        .expect("Failed to send request");

    assert!(response.status().is_success());
    let json: serde_json::Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(json["status"], "ok");

    // Storage was prepared on startup
    assert!(root.path().join("scratch").is_dir());
    assert!(root.path().join("public").is_dir());

    server.kill().await.ok();
}

#[tokio::test]
async fn test_port_env_overrides_config_port() {
    let config_port = get_available_port();
    let env_port = loop {
        let port = get_available_port();
        if port != config_port {
            break port;
        }
    };
    let root = TempDir::new().unwrap();
    let config = write_config(&minimal_config(config_port, root.path()));

    let mut server = spawn_server_with_env(config.path(), &[("PORT", env_port.to_string())]).await;
    assert!(
        wait_for_server(env_port, 100).await,
        "Server did not start on PORT"
    );
    assert!(Client::new()
        .get(format!("http://127.0.0.1:{}/api/health", config_port))
        .send()
        .await
        .is_err());

    server.kill().await.ok();
}

#[tokio::test]
async fn test_startup_sweeps_stale_scratch() {
    let port = get_available_port();
    let root = TempDir::new().unwrap();
    let stale = root.path().join("scratch").join("deadbeef");
    std::fs::create_dir_all(&stale).unwrap();
    std::fs::write(stale.join("deadbeef-000000000000.mp4"), b"left over").unwrap();
    let config = write_config(&minimal_config(port, root.path()));

    let mut server = spawn_server(config.path()).await;
    assert!(
        wait_for_server(port, 100).await,
        "Server did not start in time"
    );
    assert!(!stale.exists());

    server.kill().await.ok();
}

#[tokio::test]
async fn test_text_to_speech_over_tcp() {
    let port = get_available_port();
    let root = TempDir::new().unwrap();
    let config = write_config(&minimal_config(port, root.path()));

    let mut server = spawn_server(config.path()).await;
    assert!(
        wait_for_server(port, 100).await,
        "Server did not start in time"
    );

    let response = Client::new()
        .post(format!("http://127.0.0.1:{}/api/text-to-speech", port))
        .json(&serde_json::json!({ "text": "Hello world" }))
        .send()
        .await
        .expect("Failed to send request");

    assert!(response.status().is_success());
    let json: serde_json::Value = response.json().await.unwrap();
    assert_eq!(json["type"], "inline");
    assert!(json["payload"]["audio_url"]
        .as_str()
        .unwrap()
        .contains("translate_tts"));

    server.kill().await.ok();
}

#[tokio::test]
async fn test_missing_config_file_exits_with_error() {
    let result = timeout(
        Duration::from_secs(5),
        tokio::process::Command::new(env!("CARGO_BIN_EXE_convertly"))
            .env("CONVERTLY_CONFIG", "/nonexistent/config.toml")
            .env("RUST_LOG", "error")
            .output(),
    )
    .await
    .expect("Command timed out")
    .expect("Failed to execute command");

    assert!(!result.status.success());
}

#[tokio::test]
async fn test_missing_auth_section_exits_with_error() {
    let config = write_config(
        r#"
[server]
port = 8080
"#,
    );

    let result = timeout(
        Duration::from_secs(5),
        tokio::process::Command::new(env!("CARGO_BIN_EXE_convertly"))
            .env("CONVERTLY_CONFIG", config.path())
            .env("RUST_LOG", "error")
            .output(),
    )
    .await
    .expect("Command timed out")
    .expect("Failed to execute command");

    assert!(!result.status.success());
}

#[tokio::test]
async fn test_api_key_without_key_exits_with_error() {
    let config = write_config(
        r#"
[auth]
method = "api_key"
"#,
    );

    let result = timeout(
        Duration::from_secs(5),
        tokio::process::Command::new(env!("CARGO_BIN_EXE_convertly"))
            .env("CONVERTLY_CONFIG", config.path())
            .env("RUST_LOG", "error")
            .output(),
    )
    .await
    .expect("Command timed out")
    .expect("Failed to execute command");

    assert!(!result.status.success());
}
