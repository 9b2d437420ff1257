//! Multi-process checks over a real hub socket.

#![cfg(unix)]

use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

fn jacbus() -> Command {
    Command::new(env!("CARGO_BIN_EXE_jacbus"))
}

fn make_sock_path(tag: &str) -> PathBuf {
    let dir = PathBuf::from(format!(
        "/tmp/jacbus-cli-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir.join("bus.sock")
}

fn wait_for_socket(path: &PathBuf, timeout: Duration) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if path.exists() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    false
}

struct KillOnDrop(Child);

impl Drop for KillOnDrop {
    fn drop(&mut self) {
        let _ = self.0.kill();
        let _ = self.0.wait();
    }
}

#[test]
fn devices_sees_another_node_through_the_bridge() {
    let sock = make_sock_path("devices");

    let bridge = KillOnDrop(
        jacbus()
            .args(["bridge"])
            .arg(&sock)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("bridge should start"),
    );
    assert!(wait_for_socket(&sock, Duration::from_secs(5)), "hub socket");

    let listener = KillOnDrop(
        jacbus()
            .args(["listen"])
            .arg(&sock)
            .args(["--device-id", "0xabcdef", "--count", "100000"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("listener should start"),
    );

    let out = jacbus()
        .args(["devices"])
        .arg(&sock)
        .args(["--wait-ms", "1500", "--format", "json"])
        .output()
        .expect("devices should run");
    assert!(
        out.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&out.stderr)
    );

    let json: serde_json::Value = serde_json::from_slice(&out.stdout).expect("json output");
    let entries = json.as_array().expect("array");
    assert!(
        entries.iter().any(|e| e["device_id"] == "0000000000abcdef"),
        "listener node should be announced: {entries:?}"
    );

    drop(listener);
    drop(bridge);
    if let Some(parent) = sock.parent() {
        let _ = std::fs::remove_dir_all(parent);
    }
}
