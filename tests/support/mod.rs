#![allow(dead_code)]

use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

pub fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

pub fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .expect("bind ephemeral port")
        .local_addr()
        .expect("local addr")
        .port()
}

/// A base URL nothing listens on.
pub fn dead_api_url() -> String {
    format!("http://127.0.0.1:{}", free_port())
}

pub struct Sidecar {
    child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    next_id: u64,
}

pub fn spawn_sidecar(api_url: &str) -> Sidecar {
    let exe = env!("CARGO_BIN_EXE_coachd");
    let mut child = Command::new(exe)
        .env("COACH_API_URL", api_url)
        .env("COACH_API_TIMEOUT_SECS", "5")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn coachd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    Sidecar {
        child,
        stdin,
        reader: BufReader::new(stdout),
        next_id: 0,
    }
}

impl Sidecar {
    pub fn send_raw(&mut self, line: &str) -> Value {
        writeln!(self.stdin, "{}", line).expect("write request");
        self.stdin.flush().expect("flush request");
        let mut out = String::new();
        self.reader.read_line(&mut out).expect("read response line");
        assert!(!out.trim().is_empty(), "empty response");
        serde_json::from_str(out.trim()).expect("parse response json")
    }

    pub fn request(&mut self, method: &str, params: Value) -> Value {
        self.next_id += 1;
        let id = self.next_id.to_string();
        let payload = json!({ "id": id, "method": method, "params": params });
        let value = self.send_raw(&payload.to_string());
        assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id.as_str()));
        value
    }

    pub fn request_ok(&mut self, method: &str, params: Value) -> Value {
        let value = self.request(method, params);
        assert_eq!(
            value.get("ok").and_then(|v| v.as_bool()),
            Some(true),
            "{} failed: {}",
            method,
            value
        );
        value.get("result").cloned().unwrap_or(Value::Null)
    }

    pub fn request_err(&mut self, method: &str, params: Value) -> String {
        let value = self.request(method, params);
        assert_eq!(
            value.get("ok").and_then(|v| v.as_bool()),
            Some(false),
            "{} unexpectedly succeeded: {}",
            method,
            value
        );
        value["error"]["code"].as_str().unwrap_or("").to_string()
    }

    pub fn select(&mut self, workspace: &Path) -> Value {
        self.request_ok(
            "workspace.select",
            json!({ "path": workspace.to_string_lossy() }),
        )
    }
}

impl Drop for Sidecar {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

pub struct DirectoryServer {
    child: Child,
    pub base_url: String,
    pub database_file: PathBuf,
}

impl Drop for DirectoryServer {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Starts `coach-server` on a free port and waits until it accepts
/// connections.
pub fn spawn_server(dir: &Path, seed: Option<&Value>) -> DirectoryServer {
    let port = free_port();
    let database_file = dir.join("coaching-center.db");
    let seed_file = dir.join("seed_data.json");
    if let Some(seed) = seed {
        std::fs::write(&seed_file, seed.to_string()).expect("write seed");
    }
    let child = Command::new(env!("CARGO_BIN_EXE_coach-server"))
        .env("PORT", port.to_string())
        .env("HOST", "127.0.0.1")
        .env("DATABASE_FILE", &database_file)
        .env("SEED_FILE", &seed_file)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn coach-server");

    let deadline = Instant::now() + Duration::from_secs(10);
    while TcpStream::connect(("127.0.0.1", port)).is_err() {
        assert!(Instant::now() < deadline, "coach-server did not start");
        std::thread::sleep(Duration::from_millis(50));
    }
    DirectoryServer {
        child,
        base_url: format!("http://127.0.0.1:{}", port),
        database_file,
    }
}

pub fn student_profile(name: &str, username: &str) -> Value {
    json!({
        "name": name,
        "class": "10th",
        "username": username,
        "password": "secret1",
        "phone": "9876543210",
        "email": format!("{}@example.org", username),
        "address": "12 Park Street"
    })
}
