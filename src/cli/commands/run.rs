use crate::config::Config;
use crate::daemon::ipc::{IpcState, get_state};
use crate::daemon::{DaemonError, run_daemon};
use crate::paths;
use crate::repo::Repo;

/// Run the daemon inline in the calling process.
///
/// With `detach` (set by `start` on the background child) the process moves
/// into a new session first, severing the controlling terminal so no
/// terminal-driven signal can reach the daemon.
pub fn run(repo: &Repo, config: Config, detach: bool) -> crate::Result<u8> {
    if detach {
        // A spawned child is not a process-group leader, so this succeeds
        // in the normal case; a failure leaves us in the caller's session,
        // which is survivable.
        if let Err(err) = nix::unistd::setsid() {
            tracing::warn!(error = %err, "setsid failed");
        }
    }

    // The daemon would fail the bind anyway; probing first gives the nicer
    // message for a common mistake.
    if get_state(&paths::socket_path(&repo.gitdir)) == IpcState::Listening {
        return Err(DaemonError::AlreadyRunning(repo.worktree.display().to_string()).into());
    }

    println!("running fsmonitor-daemon in '{}'", repo.worktree.display());
    run_daemon(repo, config)?;
    Ok(0)
}
