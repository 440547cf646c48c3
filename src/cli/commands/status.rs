use crate::daemon::ipc::{IpcState, get_state};
use crate::paths;
use crate::repo::Repo;

/// Probe the endpoint; exit 0 when a daemon is watching this worktree.
pub fn run(repo: &Repo) -> crate::Result<u8> {
    match get_state(&paths::socket_path(&repo.gitdir)) {
        IpcState::Listening => {
            println!("fsmonitor-daemon is watching '{}'", repo.worktree.display());
            Ok(0)
        }
        IpcState::NotListening => {
            println!(
                "fsmonitor-daemon is not watching '{}'",
                repo.worktree.display()
            );
            Ok(1)
        }
    }
}
