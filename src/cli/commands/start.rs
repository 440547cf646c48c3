use std::process::{Command, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::daemon::DaemonError;
use crate::daemon::ipc::{IpcState, get_state};
use crate::paths;
use crate::repo::Repo;

/// How often we re-probe the endpoint while the child starts up.
const STARTUP_POLL: Duration = Duration::from_millis(50);

/// Spawn a fully detached background daemon and wait for its endpoint.
/// The child calls `setsid` itself (via `--detach`): a fresh child is not a
/// process-group leader yet, which is the one state where that call works.
pub fn run(repo: &Repo, config: &Config) -> crate::Result<u8> {
    let socket = paths::socket_path(&repo.gitdir);

    // Probe before spawning: the child could only report spawn success, not
    // whether it immediately lost the socket to a running daemon.
    if get_state(&socket) == IpcState::Listening {
        return Err(DaemonError::AlreadyRunning(repo.worktree.display().to_string()).into());
    }

    println!("starting fsmonitor-daemon in '{}'", repo.worktree.display());

    let exe = std::env::current_exe().map_err(DaemonError::Spawn)?;
    let mut child = Command::new(exe)
        .arg("run")
        .arg("--detach")
        .arg(format!("--ipc-threads={}", config.ipc_threads))
        .current_dir(&repo.worktree)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(DaemonError::Spawn)?;

    // Wait for the child to come online; fail fast if it dies first.
    let deadline = Instant::now() + config.start_timeout;
    loop {
        if let Some(_status) = child.try_wait().map_err(DaemonError::Spawn)? {
            // The child shut down while starting. Another daemon may have
            // raced us onto the socket; any listener satisfies the caller.
            return if get_state(&socket) == IpcState::Listening {
                Ok(0)
            } else {
                Err(DaemonError::StartFailed.into())
            };
        }
        if get_state(&socket) == IpcState::Listening {
            return Ok(0);
        }
        if Instant::now() >= deadline {
            return Err(DaemonError::StartTimeout.into());
        }
        sleep(STARTUP_POLL);
    }
}
