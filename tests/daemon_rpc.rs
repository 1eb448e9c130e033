//! End-to-end daemon tests over a real Unix socket: RPC surface,
//! debounced auto-flush, auto-import, and graceful shutdown.

mod common;

use beads_core::config::{init_workspace, CliOverrides, Config};
use beads_core::daemon::{Client, Daemon};
use beads_core::storage::BackendKind;
use serde_json::json;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

const RPC_TIMEOUT: Duration = Duration::from_secs(5);

fn test_config(workspace: &Path) -> Config {
    init_workspace(workspace, "bd", BackendKind::Sqlite).unwrap();
    let overrides = CliOverrides {
        actor: Some("rpc-test".to_string()),
        flush_debounce: Some(Duration::from_millis(100)),
        ..CliOverrides::default()
    };
    Config::resolve(workspace, &overrides).unwrap()
}

/// Start a daemon for the workspace and wait for its socket to answer.
fn start_daemon(config: Config) -> thread::JoinHandle<()> {
    let socket = config.socket_path();
    let handle = thread::spawn(move || {
        Daemon::new(config).unwrap().run().unwrap();
    });

    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        if socket.exists() {
            if let Ok(mut client) = Client::connect(&socket, RPC_TIMEOUT) {
                if client.handshake().is_ok() {
                    break;
                }
            }
        }
        assert!(Instant::now() < deadline, "daemon did not come up");
        thread::sleep(Duration::from_millis(20));
    }
    handle
}

#[test]
fn daemon_full_session() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let socket = config.socket_path();
    let jsonl = config.jsonl_path();
    let pid_file = config.pid_file_path();

    let handle = start_daemon(config);
    let mut client = Client::connect(&socket, RPC_TIMEOUT).unwrap();

    // Status reports the workspace and a live PID.
    let status = client.status().unwrap();
    assert_eq!(status.pid, std::process::id());
    assert!(status.uptime_seconds >= 0.0);
    assert!(!status.exclusive_lock_active);

    // Mutations: three creates spaced inside the debounce window.
    for n in 1..=3 {
        let issue = json!({
            "id": "",
            "title": format!("issue {n}"),
            "created_at": chrono::Utc::now().to_rfc3339(),
            "updated_at": chrono::Utc::now().to_rfc3339(),
        });
        let created = client
            .request("create_issue", json!({"issue": issue}))
            .unwrap();
        assert_eq!(created["id"], format!("bd-{n}"));
        thread::sleep(Duration::from_millis(30));
    }

    // A read answers while the flush is still pending.
    let fetched = client.request("get_issue", json!({"id": "bd-2"})).unwrap();
    assert_eq!(fetched["title"], "issue 2");

    // Absent issue is a successful null, not an error.
    let absent = client.request("get_issue", json!({"id": "bd-99"})).unwrap();
    assert!(absent.is_null());

    // Unknown update keys are rejected at the boundary.
    let err = client
        .request(
            "update_issue",
            json!({"id": "bd-1", "fields": {"sprint": "7"}}),
        )
        .unwrap_err();
    assert_eq!(err.exit_code(), 3);

    // Graph queries over the socket.
    client
        .request(
            "create_dependency",
            json!({"issue_id": "bd-1", "depends_on_id": "bd-2", "type": "blocks"}),
        )
        .unwrap();
    let ready = client.request("ready_work", serde_json::Value::Null).unwrap();
    let ready_ids: Vec<&str> = ready
        .as_array()
        .unwrap()
        .iter()
        .map(|i| i["id"].as_str().unwrap())
        .collect();
    assert!(!ready_ids.contains(&"bd-1"), "bd-1 is blocked: {ready_ids:?}");

    // Debounced auto-flush: wait out the quiet period.
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let dirty = client
            .request("get_dirty_issues", serde_json::Value::Null)
            .unwrap();
        if dirty.as_array().is_some_and(Vec::is_empty) && jsonl.exists() {
            break;
        }
        assert!(Instant::now() < deadline, "auto-flush never ran");
        thread::sleep(Duration::from_millis(50));
    }

    let content = std::fs::read_to_string(&jsonl).unwrap();
    assert_eq!(content.lines().count(), 3);

    // The artifact hash is recorded so re-import is a no-op.
    let hash = client
        .request("get_metadata", json!({"key": "last_import_hash"}))
        .unwrap();
    assert_eq!(
        hash.as_str().unwrap(),
        beads_core::sync::compute_jsonl_hash(&jsonl).unwrap()
    );

    // Synchronous flush is a no-op now but must still answer.
    client.request("flush", serde_json::Value::Null).unwrap();

    // Graceful shutdown removes the runtime files.
    client.shutdown().unwrap();
    handle.join().unwrap();
    assert!(!socket.exists());
    assert!(!pid_file.exists());
}

#[test]
fn daemon_imports_existing_artifact_on_start() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let socket = config.socket_path();

    // Seed the artifact before the daemon ever runs.
    std::fs::write(
        config.jsonl_path(),
        "{\"id\":\"bd-7\",\"title\":\"from artifact\",\"created_at\":\"2026-01-01T00:00:00Z\",\"updated_at\":\"2026-01-01T00:00:00Z\"}\n",
    )
    .unwrap();

    let handle = start_daemon(config);
    let mut client = Client::connect(&socket, RPC_TIMEOUT).unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let got = client.request("get_issue", json!({"id": "bd-7"})).unwrap();
        if got["title"] == "from artifact" {
            break;
        }
        assert!(Instant::now() < deadline, "auto-import never landed");
        thread::sleep(Duration::from_millis(50));
    }

    // The counter learned from the imported ID.
    let issue = json!({
        "id": "",
        "title": "after import",
        "created_at": chrono::Utc::now().to_rfc3339(),
        "updated_at": chrono::Utc::now().to_rfc3339(),
    });
    let created = client
        .request("create_issue", json!({"issue": issue}))
        .unwrap();
    assert_eq!(created["id"], "bd-8");

    client.shutdown().unwrap();
    handle.join().unwrap();
}

#[test]
fn stale_socket_is_cleaned_up() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());

    // A dead daemon left its socket and PID file behind.
    std::fs::write(config.socket_path(), "").unwrap();
    std::fs::write(config.pid_file_path(), (u32::MAX - 1).to_string()).unwrap();

    let socket = config.socket_path();
    let handle = start_daemon(config);
    let mut client = Client::connect(&socket, RPC_TIMEOUT).unwrap();
    client.handshake().unwrap();
    client.shutdown().unwrap();
    handle.join().unwrap();
}

#[test]
fn connect_to_absent_daemon_fails_with_transport_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = Client::connect(&dir.path().join("bd.sock"), RPC_TIMEOUT).unwrap_err();
    assert_eq!(err.exit_code(), 5);
}
