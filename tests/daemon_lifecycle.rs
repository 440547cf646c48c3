//! Integration tests for the daemon lifecycle: start/run/stop/status,
//! refusal cases, and shutdown cleanup.

use std::fs;
use std::io::Write;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::process::{Child, Command as StdCommand, Stdio};
use std::time::{Duration, Instant};

use assert_cmd::prelude::*;
use tempfile::TempDir;

const DAEMON_BIN: &str = env!("CARGO_BIN_EXE_fsmonitor--daemon");

// =============================================================================
// Test fixture
// =============================================================================

struct WorktreeFixture {
    dir: TempDir,
    daemon: Option<Child>,
}

impl WorktreeFixture {
    fn new() -> Self {
        let dir = TempDir::new().expect("create worktree dir");
        scaffold_gitdir(&dir.path().join(".git"));
        Self { dir, daemon: None }
    }

    fn worktree(&self) -> &Path {
        self.dir.path()
    }

    fn socket_path(&self) -> PathBuf {
        self.dir.path().join(".git").join("fsmonitor--daemon.ipc")
    }

    fn cli(&self) -> StdCommand {
        let mut cmd = StdCommand::new(DAEMON_BIN);
        cmd.current_dir(self.worktree());
        cmd.env("FSMONITOR_TOKEN_TEST", "1");
        cmd
    }

    /// Run the daemon as a foreground child of the test process.
    fn spawn_daemon(&mut self) {
        let child = self
            .cli()
            .args(["run", "--ipc-threads", "2"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn daemon");
        self.daemon = Some(child);
        self.wait_listening();
    }

    fn listening(&self) -> bool {
        UnixStream::connect(self.socket_path()).is_ok()
    }

    fn wait_listening(&self) {
        let deadline = Instant::now() + Duration::from_secs(15);
        while Instant::now() < deadline {
            if self.listening() {
                return;
            }
            std::thread::sleep(Duration::from_millis(25));
        }
        panic!("daemon did not start listening in time");
    }

    fn wait_not_listening(&self, within: Duration) -> bool {
        let deadline = Instant::now() + within;
        while Instant::now() < deadline {
            if !self.listening() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(25));
        }
        false
    }
}

impl Drop for WorktreeFixture {
    fn drop(&mut self) {
        // Best effort: ask any listener to quit, then reap our child.
        if let Ok(mut stream) = UnixStream::connect(self.socket_path()) {
            let _ = stream.write_all(b"quit\0");
        }
        if let Some(mut child) = self.daemon.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

/// Minimal on-disk layout git recognises as a metadata directory.
fn scaffold_gitdir(gitdir: &Path) {
    fs::create_dir_all(gitdir.join("objects")).expect("objects");
    fs::create_dir_all(gitdir.join("refs")).expect("refs");
    fs::write(gitdir.join("HEAD"), "ref: refs/heads/main\n").expect("HEAD");
}

// =============================================================================
// Tests
// =============================================================================

#[test]
fn start_stop_lifecycle() {
    let fixture = WorktreeFixture::new();

    fixture
        .cli()
        .args(["start", "--start-timeout", "15"])
        .assert()
        .success();
    fixture.wait_listening();

    fixture
        .cli()
        .arg("status")
        .assert()
        .success()
        .stdout(predicates::str::contains("is watching"));

    fixture.cli().arg("stop").assert().success();

    assert!(
        fixture.wait_not_listening(Duration::from_secs(1)),
        "endpoint should go quiet within a second of stop returning"
    );
    fixture
        .cli()
        .arg("status")
        .assert()
        .code(1)
        .stdout(predicates::str::contains("is not watching"));
}

#[test]
fn status_reports_not_watching_without_a_daemon() {
    let fixture = WorktreeFixture::new();
    fixture
        .cli()
        .arg("status")
        .assert()
        .code(1)
        .stdout(predicates::str::contains("is not watching"));
}

#[test]
fn run_refuses_when_already_listening() {
    let mut fixture = WorktreeFixture::new();
    fixture.spawn_daemon();

    fixture
        .cli()
        .arg("run")
        .assert()
        .failure()
        .stderr(predicates::str::contains("already running"));
}

#[test]
fn start_refuses_when_already_listening() {
    let mut fixture = WorktreeFixture::new();
    fixture.spawn_daemon();

    fixture
        .cli()
        .arg("start")
        .assert()
        .failure()
        .stderr(predicates::str::contains("already running"));
}

#[test]
fn stop_without_a_daemon_fails() {
    let fixture = WorktreeFixture::new();
    fixture
        .cli()
        .arg("stop")
        .assert()
        .failure()
        .stderr(predicates::str::contains("not running"));
}

#[test]
fn bare_repositories_are_refused() {
    let dir = TempDir::new().expect("create bare dir");
    scaffold_gitdir(dir.path());
    fs::write(dir.path().join("config"), "[core]\n\tbare = true\n").expect("config");

    StdCommand::new(DAEMON_BIN)
        .current_dir(dir.path())
        .arg("run")
        .assert()
        .failure()
        .stderr(predicates::str::contains("bare"));
}

#[test]
fn sigterm_shuts_down_and_removes_the_socket() {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let mut fixture = WorktreeFixture::new();
    fixture.spawn_daemon();
    let pid = fixture.daemon.as_ref().expect("daemon child").id();

    kill(Pid::from_raw(pid as i32), Signal::SIGTERM).expect("send SIGTERM");

    let deadline = Instant::now() + Duration::from_secs(5);
    let mut exited = false;
    while Instant::now() < deadline {
        let child = fixture.daemon.as_mut().expect("daemon child");
        if child.try_wait().expect("try_wait").is_some() {
            exited = true;
            break;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    assert!(exited, "daemon should exit after SIGTERM");

    assert!(
        fixture.wait_not_listening(Duration::from_secs(1)),
        "socket should be released after graceful shutdown"
    );
    assert!(
        !fixture.socket_path().exists(),
        "socket file should be removed after graceful shutdown"
    );
}
