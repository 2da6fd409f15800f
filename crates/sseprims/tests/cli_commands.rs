#![cfg(feature = "cli")]

use std::io::{BufRead, BufReader};
use std::process::{Child, Command, Stdio};

struct DemoServer {
    child: Child,
    base: String,
}

impl DemoServer {
    fn start() -> Self {
        let mut child = Command::new(env!("CARGO_BIN_EXE_sseprims"))
            .args(["--log-level", "error", "serve", "--addr", "127.0.0.1:0"])
            .args(["--interval", "20ms"])
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .expect("serve command should start");

        let stdout = child.stdout.take().expect("serve stdout should be piped");
        let mut line = String::new();
        BufReader::new(stdout)
            .read_line(&mut line)
            .expect("serve should announce its address");
        let base = line
            .trim()
            .strip_prefix("listening on ")
            .unwrap_or_else(|| panic!("unexpected serve output: {line:?}"))
            .to_string();

        Self { child, base }
    }

    fn url(&self, route: &str) -> String {
        format!("{}{route}", self.base)
    }
}

impl Drop for DemoServer {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn subscribe(args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_sseprims"))
        .args(["--log-level", "error"])
        .arg("subscribe")
        .args(args)
        .output()
        .expect("subscribe should run")
}

#[test]
fn version_prints_package_version() {
    let output = Command::new(env!("CARGO_BIN_EXE_sseprims"))
        .arg("version")
        .output()
        .expect("version should run");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(
        stdout.trim(),
        format!("sseprims {}", env!("CARGO_PKG_VERSION"))
    );
}

#[test]
fn subscribe_prints_countdown_as_json_lines() {
    let server = DemoServer::start();
    let output = subscribe(&[
        &server.url("/api/countdown"),
        "--json",
        "3",
        "--format",
        "json",
        "--timeout",
        "10s",
    ]);

    assert!(output.status.success(), "{output:?}");
    let stdout = String::from_utf8_lossy(&output.stdout);
    let values: Vec<serde_json::Value> = stdout
        .lines()
        .map(|line| serde_json::from_str::<serde_json::Value>(line).expect("json line"))
        .map(|line| line["data"].clone())
        .collect();
    assert_eq!(values, vec![3, 2, 1, 0]);
}

#[test]
fn subscribe_count_stops_an_endless_stream() {
    let server = DemoServer::start();
    let output = subscribe(&[
        &server.url("/api/counter"),
        "--count",
        "2",
        "--format",
        "raw",
        "--timeout",
        "10s",
    ]);

    assert!(output.status.success(), "{output:?}");
    assert_eq!(String::from_utf8_lossy(&output.stdout), "0\n1\n");
}

#[test]
fn rejected_input_exits_60() {
    let server = DemoServer::start();
    let output = subscribe(&[&server.url("/api/countdown"), "--json", "-1"]);

    assert_eq!(output.status.code(), Some(60));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("minimum"), "{stderr}");
}

#[test]
fn timeout_exits_124() {
    let server = DemoServer::start();
    let output = subscribe(&[
        &server.url("/api/counter"),
        "--format",
        "raw",
        "--timeout",
        "100ms",
    ]);

    assert_eq!(output.status.code(), Some(124));
}

#[test]
fn invalid_json_input_is_usage_error() {
    let output = subscribe(&["http://127.0.0.1:9/api/countdown", "--json", "{nope"]);
    assert_eq!(output.status.code(), Some(64));
}
