//! Daemon internals.
//!
//! Provides:
//! - Token-versioned batch log of filesystem changes
//! - Path classifier and sync-cookie registry
//! - Filesystem listener thread
//! - IPC server (thread pool) over a Unix socket
//! - Lifecycle wiring (boot order, shutdown, error roll-up)

pub mod batch;
pub mod classify;
pub mod cookies;
pub mod ipc;
pub mod listener;
pub mod run;
pub mod server;
pub mod state;
pub mod token;

pub use classify::{COOKIE_PREFIX, PathKind};
pub use ipc::{IpcError, IpcState, get_state, send_command};
pub use run::{DaemonError, run_daemon};
pub use state::DaemonState;
