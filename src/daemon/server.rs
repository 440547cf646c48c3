//! IPC server: accept loop, worker pool, and the client command handler.
//!
//! One accept thread feeds accepted connections into a channel drained by a
//! pool of worker threads. Each connection carries a single request and gets
//! a single response. `quit` flips the shared shutdown flag; the accept loop
//! notices within one poll interval, stops taking work, and the workers
//! drain what is already queued.

use std::fs;
use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam::channel::{Receiver, Sender, unbounded};

use crate::daemon::classify::COOKIE_PREFIX;
use crate::daemon::ipc::{self, IpcError, IpcState};
use crate::daemon::state::DaemonState;
use crate::paths;

/// How often the accept loop re-checks the shutdown flag.
const ACCEPT_POLL: Duration = Duration::from_millis(50);

/// Upper bound on waiting for a sync cookie to round-trip the kernel. On
/// expiry the query proceeds with whatever has been delivered so far.
const COOKIE_WAIT: Duration = Duration::from_secs(2);

pub struct IpcServer {
    accept: JoinHandle<()>,
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    socket: PathBuf,
}

impl IpcServer {
    /// Bind the endpoint and start the accept loop plus `nr_threads`
    /// workers. The endpoint is live when this returns.
    pub fn start(
        socket: &Path,
        nr_threads: usize,
        state: Arc<DaemonState>,
        shutdown: Arc<AtomicBool>,
    ) -> std::io::Result<IpcServer> {
        // A connectable socket means another daemon owns this worktree.
        if ipc::get_state(socket) == IpcState::Listening {
            return Err(std::io::Error::new(
                std::io::ErrorKind::AddrInUse,
                format!("endpoint already in use: {}", socket.display()),
            ));
        }
        // Leftover from a crashed daemon; nobody answered the probe.
        let _ = fs::remove_file(socket);

        let listener = UnixListener::bind(socket)?;
        restrict_socket_permissions(socket)?;
        listener.set_nonblocking(true)?;

        let (conn_tx, conn_rx) = unbounded::<UnixStream>();

        let mut workers = Vec::with_capacity(nr_threads);
        for nr in 0..nr_threads {
            let conn_rx = conn_rx.clone();
            let state = Arc::clone(&state);
            let shutdown = Arc::clone(&shutdown);
            let spawned = std::thread::Builder::new()
                .name(format!("fsm-ipc-{nr}"))
                .spawn(move || worker_loop(conn_rx, state, shutdown));
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(err) => {
                    // Closing the channel unblocks the workers already
                    // spawned; join them before reporting the failure.
                    drop(conn_tx);
                    for worker in workers {
                        let _ = worker.join();
                    }
                    let _ = fs::remove_file(socket);
                    return Err(err);
                }
            }
        }

        let accept = {
            let shutdown = Arc::clone(&shutdown);
            let socket_path = socket.to_path_buf();
            let spawned = std::thread::Builder::new()
                .name(String::from("fsm-accept"))
                .spawn(move || accept_loop(listener, conn_tx, shutdown, socket_path));
            match spawned {
                Ok(handle) => handle,
                Err(err) => {
                    // A failed spawn drops its closure, and conn_tx with
                    // it, so the workers are already unblocking.
                    for worker in workers {
                        let _ = worker.join();
                    }
                    let _ = fs::remove_file(socket);
                    return Err(err);
                }
            }
        };

        tracing::info!(socket = %socket.display(), threads = nr_threads, "ipc server listening");
        Ok(IpcServer {
            accept,
            workers,
            shutdown,
            socket: socket.to_path_buf(),
        })
    }

    /// Ask the server to wind down without waiting for it.
    pub fn stop_async(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Block until the server has shut down and every thread is joined.
    pub fn await_shutdown(self) {
        let _ = self.accept.join();
        for worker in self.workers {
            let _ = worker.join();
        }
        let _ = fs::remove_file(&self.socket);
        tracing::info!("ipc server stopped");
    }
}

fn accept_loop(
    listener: UnixListener,
    conn_tx: Sender<UnixStream>,
    shutdown: Arc<AtomicBool>,
    socket: PathBuf,
) {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                // Accepted streams inherit the listener's non-blocking mode.
                let _ = stream.set_nonblocking(false);
                if conn_tx.send(stream).is_err() {
                    break;
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(ACCEPT_POLL);
            }
            Err(err) => {
                // Accept errors like EMFILE recur until fds free up; pace
                // the retries or this thread spins hot for as long as the
                // condition lasts.
                tracing::error!(error = %err, "accept error");
                std::thread::sleep(ACCEPT_POLL);
            }
        }
    }
    // Remove the socket file early so stop-pollers see the endpoint go
    // quiet while the workers drain. Dropping conn_tx ends the workers.
    let _ = fs::remove_file(&socket);
}

fn worker_loop(conn_rx: Receiver<UnixStream>, state: Arc<DaemonState>, shutdown: Arc<AtomicBool>) {
    while let Ok(stream) = conn_rx.recv() {
        match handle_client(stream, &state, &shutdown) {
            Ok(()) => {}
            Err(err @ IpcError::TrailingBytes) => {
                // Framing disagreed with the payload. Clients are local, so
                // this is a bug, not noise; shut down rather than guess.
                tracing::error!(error = %err, "protocol violation from local client");
                state.record_error(1);
                shutdown.store(true, Ordering::SeqCst);
            }
            Err(err) => {
                // Transient client I/O; other clients are unaffected.
                tracing::warn!(error = %err, "client error");
            }
        }
    }
}

fn handle_client(
    mut stream: UnixStream,
    state: &DaemonState,
    shutdown: &AtomicBool,
) -> Result<(), IpcError> {
    let mut frame = Vec::new();
    stream.read_to_end(&mut frame)?;
    if frame.is_empty() {
        // Probe connections (`status` subcommand, startup polls) just
        // connect and hang up.
        return Ok(());
    }

    let command = ipc::decode_request(&frame)?;
    tracing::debug!(request = command, "client request");

    let reply: Vec<u8> = match command {
        "quit" => {
            shutdown.store(true, Ordering::SeqCst);
            Vec::new()
        }
        "flush" => {
            state.resync("flush");
            Vec::new()
        }
        "status" => status_reply(state),
        token if token.starts_with("builtin:") => query_reply(state, token),
        other => format!("error: unrecognized command '{other}'").into_bytes(),
    };

    stream.write_all(&reply)?;
    stream.flush()?;
    Ok(())
}

/// Diagnostic summary; shape is specific to this command.
fn status_reply(state: &DaemonState) -> Vec<u8> {
    let mut reply = serde_json::to_vec(&serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "pid": process::id(),
        "worktree": state.worktree.display().to_string(),
        "token": state.log().current_token(),
    }))
    .unwrap_or_default();
    reply.push(b'\n');
    reply
}

/// Answer a token query: sync with the kernel via a cookie, freeze the head,
/// and serialise the union of unseen batches outside the lock.
fn query_reply(state: &DaemonState, client_token: &str) -> Vec<u8> {
    let stale = {
        let log = state.log();
        crate::daemon::token::parse_token(client_token)
            .map(|(id, _)| id != log.token_id())
            .unwrap_or(true)
    };
    if !stale {
        // Only a non-trivial reply enumerates events, so only it needs the
        // barrier guaranteeing prior events have drained.
        sync_with_kernel(state);
    }

    let reply = state.log().query(client_token);

    let mut out = Vec::with_capacity(64);
    out.extend_from_slice(reply.token.as_bytes());
    out.push(b'\n');
    if reply.trivial {
        // "Assume everything changed": a relative path can never be `/`.
        out.extend_from_slice(b"/\n");
    } else {
        for path in reply.paths() {
            out.extend_from_slice(path.as_bytes());
            out.push(b'\n');
        }
    }
    out
}

/// Drop a cookie file into the metadata directory and wait for it to come
/// back through the event stream. A hit proves every event from before the
/// cookie's creation has been delivered.
fn sync_with_kernel(state: &DaemonState) {
    static COOKIE_SERIAL: AtomicU64 = AtomicU64::new(0);

    let serial = COOKIE_SERIAL.fetch_add(1, Ordering::Relaxed);
    let name = format!("{COOKIE_PREFIX}{}-{serial}", process::id());
    let path = paths::cookie_path(&state.gitdir, &name);

    // Register first: the event may arrive before `write` returns.
    state.cookies.register(&name);
    if let Err(err) = fs::write(&path, b"") {
        tracing::warn!(error = %err, "could not create sync cookie");
        state.cookies.unregister(&name);
        return;
    }
    if !state.cookies.wait_observed(&name, COOKIE_WAIT) {
        tracing::warn!(cookie = %name, "sync cookie not observed in time");
        state.cookies.unregister(&name);
    }
    let _ = fs::remove_file(&path);
}

fn restrict_socket_permissions(socket: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(socket, fs::Permissions::from_mode(0o600))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use crate::config::Config;
    use crate::repo::Repo;

    fn state() -> DaemonState {
        let repo = Repo {
            worktree: PathBuf::from("/w"),
            gitdir: PathBuf::from("/w/.git"),
            nr_paths_watching: 1,
        };
        DaemonState::new(&repo, Config::default())
    }

    #[test]
    fn stale_token_reply_is_token_plus_rescan_marker() {
        let state = state();
        let reply = query_reply(&state, "builtin:old:0");
        let text = String::from_utf8(reply).expect("utf8");
        let mut lines = text.lines();
        let token = lines.next().expect("token line");
        assert!(token.starts_with("builtin:"));
        assert!(!token.contains(":old:"));
        assert_eq!(lines.next(), Some("/"));
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn status_reply_is_one_json_line() {
        let state = state();
        let reply = status_reply(&state);
        let value: serde_json::Value =
            serde_json::from_slice(&reply).expect("valid json");
        assert_eq!(value["worktree"], "/w");
        assert!(value["token"].as_str().expect("token").starts_with("builtin:"));
    }
}
