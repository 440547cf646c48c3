//! Daemon configuration.
//!
//! Two knobs: the IPC worker count and the background-startup timeout.
//! Defaults, then the optional config file in the metadata directory, then
//! CLI flag overrides. Unknown file keys belong to the host tooling and are
//! ignored.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::paths;

pub const DEFAULT_IPC_THREADS: usize = 8;
pub const DEFAULT_START_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct Config {
    /// IPC worker threads; at least 1.
    pub ipc_threads: usize,
    /// How long `start` waits for the background daemon to come online.
    pub start_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ipc_threads: DEFAULT_IPC_THREADS,
            start_timeout: DEFAULT_START_TIMEOUT,
        }
    }
}

/// On-disk shape; every key optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    ipc_threads: Option<u64>,
    start_timeout: Option<u64>,
}

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("could not read {}: {source}", .path.display())]
    Read {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    #[error("could not parse {}: {source}", .path.display())]
    Parse {
        path: std::path::PathBuf,
        source: toml::de::Error,
    },

    #[error("value of 'ipc-threads' out of range: {0}")]
    IpcThreadsOutOfRange(u64),
}

impl Config {
    /// Resolve the effective configuration for a repository.
    pub fn resolve(
        gitdir: &Path,
        ipc_threads_flag: Option<u64>,
        start_timeout_flag: Option<u64>,
    ) -> Result<Config, ConfigError> {
        let path = paths::config_path(gitdir);
        let file = if path.exists() {
            let contents = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
                path: path.clone(),
                source,
            })?;
            toml::from_str(&contents).map_err(|source| ConfigError::Parse { path, source })?
        } else {
            ConfigFile::default()
        };

        let ipc_threads = ipc_threads_flag
            .or(file.ipc_threads)
            .unwrap_or(DEFAULT_IPC_THREADS as u64);
        if ipc_threads < 1 {
            return Err(ConfigError::IpcThreadsOutOfRange(ipc_threads));
        }

        let start_timeout = start_timeout_flag
            .or(file.start_timeout)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_START_TIMEOUT);

        Ok(Config {
            ipc_threads: ipc_threads as usize,
            start_timeout,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_without_a_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = Config::resolve(dir.path(), None, None).expect("resolve");
        assert_eq!(config.ipc_threads, 8);
        assert_eq!(config.start_timeout, Duration::from_secs(60));
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(
            paths::config_path(dir.path()),
            "ipc_threads = 3\nstart_timeout = 5\n",
        )
        .expect("write config");
        let config = Config::resolve(dir.path(), None, None).expect("resolve");
        assert_eq!(config.ipc_threads, 3);
        assert_eq!(config.start_timeout, Duration::from_secs(5));
    }

    #[test]
    fn flags_override_the_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(paths::config_path(dir.path()), "ipc_threads = 3\n").expect("write config");
        let config = Config::resolve(dir.path(), Some(2), Some(0)).expect("resolve");
        assert_eq!(config.ipc_threads, 2);
        assert_eq!(config.start_timeout, Duration::ZERO);
    }

    #[test]
    fn zero_threads_is_refused() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(matches!(
            Config::resolve(dir.path(), Some(0), None),
            Err(ConfigError::IpcThreadsOutOfRange(0))
        ));
    }

    #[test]
    fn unknown_file_keys_are_ignored() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(
            paths::config_path(dir.path()),
            "ipc_threads = 4\nsomething_else = \"yes\"\n",
        )
        .expect("write config");
        let config = Config::resolve(dir.path(), None, None).expect("resolve");
        assert_eq!(config.ipc_threads, 4);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(paths::config_path(dir.path()), "ipc_threads = [").expect("write config");
        assert!(matches!(
            Config::resolve(dir.path(), None, None),
            Err(ConfigError::Parse { .. })
        ));
    }
}
