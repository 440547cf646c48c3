//! Shared daemon state.
//!
//! One value of [`DaemonState`] lives for the whole daemon run, reached via
//! `Arc` from the listener thread and every IPC worker. The batch log sits
//! behind the single coordinating mutex; appends, freezes, and resyncs all
//! happen under it. Response serialisation does not: queries clone the
//! `Arc<Batch>`es they need and release the lock first.

use std::path::PathBuf;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::config::Config;
use crate::daemon::batch::BatchLog;
use crate::daemon::classify::{self, PathKind};
use crate::daemon::cookies::CookieRegistry;
use crate::daemon::token;
use crate::repo::Repo;

pub struct DaemonState {
    /// Absolute, canonical worktree root.
    pub worktree: PathBuf,
    /// Absolute, canonical metadata directory.
    pub gitdir: PathBuf,
    /// 2 when the metadata directory lives outside the worktree cone.
    pub nr_paths_watching: usize,
    pub config: Config,
    pub cookies: CookieRegistry,
    log: Mutex<BatchLog>,
    /// First non-zero error code wins; rolled into the process exit code.
    error_code: AtomicI32,
    // String forms of the roots, precomputed for the classifier.
    worktree_str: String,
    gitdir_str: String,
}

impl DaemonState {
    pub fn new(repo: &Repo, config: Config) -> Self {
        let worktree_str = repo.worktree.to_string_lossy().into_owned();
        let gitdir_str = repo.gitdir.to_string_lossy().into_owned();
        Self {
            worktree: repo.worktree.clone(),
            gitdir: repo.gitdir.clone(),
            nr_paths_watching: repo.nr_paths_watching,
            config,
            cookies: CookieRegistry::new(),
            log: Mutex::new(BatchLog::new(token::mint_token_id())),
            error_code: AtomicI32::new(0),
            worktree_str,
            gitdir_str,
        }
    }

    /// The coordinating mutex. A poisoned lock is recovered: the log is
    /// always internally consistent between mutations.
    pub fn log(&self) -> MutexGuard<'_, BatchLog> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Classify an absolute path against the watch roots.
    pub fn classify(&self, path: &str) -> PathKind {
        let gitdir = (self.nr_paths_watching > 1).then_some(self.gitdir_str.as_str());
        classify::classify_absolute(path, &self.worktree_str, gitdir)
    }

    /// Strip the worktree root, yielding the wire-form relative path.
    pub fn worktree_relative<'a>(&self, path: &'a str) -> Option<&'a str> {
        let rest = path.strip_prefix(self.worktree_str.as_str())?;
        rest.strip_prefix('/')
    }

    /// Replace the token data with a fresh token id and an empty chain.
    pub fn resync(&self, reason: &str) {
        let mut log = self.log();
        log.resync();
        tracing::info!(reason, token_id = log.token_id(), "resynced");
    }

    /// Record a fatal error; the first non-zero code is kept.
    pub fn record_error(&self, code: i32) {
        let _ = self
            .error_code
            .compare_exchange(0, code, Ordering::SeqCst, Ordering::SeqCst);
    }

    pub fn error_code(&self) -> i32 {
        self.error_code.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> DaemonState {
        let repo = Repo {
            worktree: PathBuf::from("/w"),
            gitdir: PathBuf::from("/w/.git"),
            nr_paths_watching: 1,
        };
        DaemonState::new(&repo, Config::default())
    }

    #[test]
    fn first_recorded_error_wins() {
        let state = state();
        assert_eq!(state.error_code(), 0);
        state.record_error(3);
        state.record_error(7);
        assert_eq!(state.error_code(), 3);
    }

    #[test]
    fn resync_replaces_the_token_id() {
        let state = state();
        let before = state.log().token_id().to_string();
        state.resync("test");
        assert_ne!(state.log().token_id(), before);
    }

    #[test]
    fn relative_paths_drop_the_root_prefix() {
        let state = state();
        assert_eq!(state.worktree_relative("/w/a/b.txt"), Some("a/b.txt"));
        assert_eq!(state.worktree_relative("/w"), None);
        assert_eq!(state.worktree_relative("/other"), None);
    }
}
