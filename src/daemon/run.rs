//! Daemon lifecycle.
//!
//! Boot order matters: platform watch resources are created before any
//! thread exists (so a kernel refusal fails cleanly), the IPC endpoint goes
//! live before the listener thread starts posting events, and teardown joins
//! every thread before the process exits.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use thiserror::Error;

use crate::config::Config;
use crate::daemon::ipc::{self, IpcState};
use crate::daemon::listener::FsListener;
use crate::daemon::server::IpcServer;
use crate::daemon::state::DaemonState;
use crate::paths;
use crate::repo::Repo;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum DaemonError {
    #[error("fsmonitor--daemon is already running in '{0}'")]
    AlreadyRunning(String),

    #[error("could not initialize filesystem listener: {0}")]
    ListenerInit(#[from] notify::Error),

    #[error("could not start IPC server: {0}")]
    ServerInit(std::io::Error),

    #[error("could not spawn thread: {0}")]
    ThreadSpawn(std::io::Error),

    #[error("could not spawn fsmonitor--daemon in the background: {0}")]
    Spawn(std::io::Error),

    #[error("fsmonitor--daemon failed to start")]
    StartFailed,

    #[error("fsmonitor--daemon not online yet")]
    StartTimeout,

    #[error("daemon exited with error code {0}")]
    Failed(i32),
}

/// Run the daemon in the current process until a `quit` command or a
/// termination signal arrives.
pub fn run_daemon(repo: &Repo, config: Config) -> Result<(), DaemonError> {
    let socket = paths::socket_path(&repo.gitdir);
    if ipc::get_state(&socket) == IpcState::Listening {
        return Err(DaemonError::AlreadyRunning(
            repo.worktree.display().to_string(),
        ));
    }

    // Platform watch resources first: if the kernel refuses, nothing needs
    // unwinding.
    let listener = FsListener::new(&repo.worktree, repo.external_gitdir())?;
    let stop = listener.stop_handle();

    let state = Arc::new(DaemonState::new(repo, config));
    tracing::info!(
        worktree = %state.worktree.display(),
        token_id = state.log().token_id(),
        "daemon starting"
    );

    let shutdown = Arc::new(AtomicBool::new(false));
    let _ = signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&shutdown));
    let _ = signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&shutdown));

    // IPC server before the listener thread, so the endpoint is live before
    // any event could need it.
    let server = IpcServer::start(
        &socket,
        state.config.ipc_threads,
        Arc::clone(&state),
        Arc::clone(&shutdown),
    )
    .map_err(DaemonError::ServerInit)?;

    let listener_thread = {
        let state = Arc::clone(&state);
        match std::thread::Builder::new()
            .name(String::from("fsm-listen"))
            .spawn(move || listener.run(state))
        {
            Ok(handle) => handle,
            Err(err) => {
                server.stop_async();
                server.await_shutdown();
                return Err(DaemonError::ThreadSpawn(err));
            }
        }
    };

    // Fully functional; block until a quit command or signal.
    server.await_shutdown();

    // The listener may already have seen the shutdown, but telling it again
    // is harmless. Join before teardown.
    stop.stop();
    let _ = listener_thread.join();

    tracing::info!("daemon stopped");
    match state.error_code() {
        0 => Ok(()),
        code => Err(DaemonError::Failed(code)),
    }
}
