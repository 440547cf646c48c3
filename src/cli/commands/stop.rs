use std::thread::sleep;
use std::time::Duration;

use crate::daemon::ipc::{IpcState, get_state, send_command};
use crate::paths;
use crate::repo::Repo;

/// How often we re-probe the endpoint while the daemon winds down.
const EXIT_POLL: Duration = Duration::from_millis(50);

/// Send `quit` and wait for the endpoint to go quiet.
pub fn run(repo: &Repo) -> crate::Result<u8> {
    let socket = paths::socket_path(&repo.gitdir);

    // The quit command returns no response data.
    send_command(&socket, "quit")?;

    while get_state(&socket) == IpcState::Listening {
        sleep(EXIT_POLL);
    }
    Ok(0)
}
