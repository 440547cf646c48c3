use thiserror::Error;

use crate::config::ConfigError;
use crate::daemon::{DaemonError, IpcError};
use crate::repo::RepoError;

/// Crate-level convenience error.
///
/// Not a "god error": it is a thin wrapper over the per-concern errors.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Repo(#[from] RepoError),

    #[error(transparent)]
    Ipc(#[from] IpcError),

    #[error(transparent)]
    Daemon(#[from] DaemonError),
}
