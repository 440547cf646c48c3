//! Locations derived from the repository metadata directory.
//!
//! Everything the daemon touches on disk lives inside the gitdir: the IPC
//! socket, short-lived sync cookies, and the optional config file. Nothing
//! here is persisted state; each location is recreated on boot.

use std::path::{Path, PathBuf};

/// The Unix-domain socket the daemon serves on.
pub fn socket_path(gitdir: &Path) -> PathBuf {
    gitdir.join("fsmonitor--daemon.ipc")
}

/// Optional daemon configuration file.
pub fn config_path(gitdir: &Path) -> PathBuf {
    gitdir.join("fsmonitor--daemon.toml")
}

/// A sync-cookie file; `name` carries the cookie prefix.
pub fn cookie_path(gitdir: &Path, name: &str) -> PathBuf {
    gitdir.join(name)
}
