#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use std::time::{SystemTime, UNIX_EPOCH};

use crossbeam_channel::{Receiver, Sender, unbounded};
use serde_json::json;

use timeline_sync::core::errors::Result;
use timeline_sync::fetch::fixture::FixtureSource;
use timeline_sync::fetch::source::{Page, PageRequest, PageSource};
use timeline_sync::timeline::entity::{Notification, Status};

pub struct CmdResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub log_path: PathBuf,
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis())
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn resolve_bin_path() -> PathBuf {
    if let Ok(path) = std::env::var("CARGO_BIN_EXE_tlsync") {
        return PathBuf::from(path);
    }

    let exe_name = if cfg!(windows) { "tlsync.exe" } else { "tlsync" };
    let fallback = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(PathBuf::from))
        .and_then(|deps| deps.parent().map(PathBuf::from))
        .map(|debug_dir| debug_dir.join(exe_name));

    match fallback {
        Some(path) if path.exists() => path,
        _ => panic!("unable to resolve tlsync binary path for integration test"),
    }
}

/// Run the binary with `home` as `$HOME`, so default config and data paths
/// land in a scratch directory.
pub fn run_cli_case(case_name: &str, home: &Path, args: &[&str]) -> CmdResult {
    let root = std::env::temp_dir().join("tlsync-test-logs");
    fs::create_dir_all(&root).expect("create temp test log dir");

    let log_path = root.join(format!("{}-{}.log", sanitize(case_name), now_millis()));
    let bin_path = resolve_bin_path();

    let output = Command::new(&bin_path)
        .args(args)
        .env("HOME", home)
        .env_remove("TLSYNC_OUTPUT_FORMAT")
        .env("RUST_BACKTRACE", "1")
        .output()
        .expect("execute tlsync command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    let mut log_content = String::new();
    log_content.push_str(&format!("case={case_name}\n"));
    log_content.push_str(&format!("bin={}\n", bin_path.display()));
    log_content.push_str(&format!("args={args:?}\n"));
    log_content.push_str(&format!("status={}\n", output.status));
    log_content.push_str("----- stdout -----\n");
    log_content.push_str(&stdout);
    log_content.push('\n');
    log_content.push_str("----- stderr -----\n");
    log_content.push_str(&stderr);
    log_content.push('\n');
    fs::write(&log_path, log_content).expect("write test log");

    CmdResult {
        status: output.status,
        stdout,
        stderr,
        log_path,
    }
}

// ──────────────────── entities ────────────────────

pub fn status_json(id: u32, account: &str, domain: &str) -> serde_json::Value {
    json!({
        "id": id.to_string(),
        "created_at": "2026-05-01T12:00:00Z",
        "content": format!("<p>post number {id}</p>"),
        "account": {
            "id": account,
            "username": format!("user{account}"),
            "acct": format!("user{account}@{domain}"),
            "url": format!("https://{domain}/@user{account}"),
        },
    })
}

pub fn status(id: u32) -> Status {
    serde_json::from_value(status_json(id, "1", "social.example")).expect("valid status")
}

pub fn statuses(ids: impl IntoIterator<Item = u32>) -> Vec<Status> {
    ids.into_iter().map(status).collect()
}

pub fn notification(id: u32) -> Notification {
    let value = json!({
        "id": id.to_string(),
        "type": "favourite",
        "created_at": "2026-05-01T12:00:00Z",
        "account": {
            "id": "42",
            "username": "fan",
            "acct": "fan@other.example",
            "url": "https://other.example/@fan",
        },
        "status": status_json(id + 1000, "1", "social.example"),
    });
    serde_json::from_value(value).expect("valid notification")
}

/// Write a status fixture file the `replay` command can read.
pub fn write_status_fixture(dir: &Path, ids: impl IntoIterator<Item = u32>) -> PathBuf {
    let items: Vec<serde_json::Value> = ids
        .into_iter()
        .map(|id| status_json(id, "1", "social.example"))
        .collect();
    let path = dir.join("statuses.json");
    let body = json!({ "style": "item_id", "items": items });
    fs::write(&path, serde_json::to_string_pretty(&body).expect("json")).expect("write fixture");
    path
}

// ──────────────────── gated source ────────────────────

/// Page source that holds every response until the test releases it.
pub struct GatedSource<T> {
    inner: FixtureSource<T>,
    permits_tx: Sender<()>,
    permits_rx: Receiver<()>,
    entered: AtomicUsize,
}

impl<T: timeline_sync::timeline::item::FeedEntry> GatedSource<T> {
    pub fn new(inner: FixtureSource<T>) -> Self {
        let (permits_tx, permits_rx) = unbounded();
        Self {
            inner,
            permits_tx,
            permits_rx,
            entered: AtomicUsize::new(0),
        }
    }

    /// Let `n` held (or future) requests through.
    pub fn release(&self, n: usize) {
        for _ in 0..n {
            self.permits_tx.send(()).expect("gate open");
        }
    }

    pub fn inner(&self) -> &FixtureSource<T> {
        &self.inner
    }

    /// Block until `n` requests have reached the gate.
    pub fn wait_entered(&self, n: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while self.entered.load(Ordering::SeqCst) < n {
            assert!(Instant::now() < deadline, "requests never reached the gate");
            std::thread::sleep(Duration::from_millis(2));
        }
    }
}

impl<T: timeline_sync::timeline::item::FeedEntry + Sync> PageSource<T> for GatedSource<T> {
    fn fetch_page(&self, request: &PageRequest) -> Result<Page<T>> {
        self.entered.fetch_add(1, Ordering::SeqCst);
        let _ = self.permits_rx.recv();
        self.inner.fetch_page(request)
    }

    fn name(&self) -> &str {
        "gated"
    }
}
