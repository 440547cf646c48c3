//! Filesystem listener.
//!
//! Wraps the platform watcher and turns raw kernel events into batch-log
//! appends, cookie observations, or resync requests. One thread consumes
//! the watcher's channel until the controller asks it to stop; pending
//! events are drained before exit.

use std::path::Path;
use std::sync::Arc;

use crossbeam::channel::{Receiver, Sender, bounded, unbounded};
use notify::{
    Config as WatcherConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher,
};

use crate::daemon::classify::PathKind;
use crate::daemon::cookies::CookieMark;
use crate::daemon::state::DaemonState;

/// Where a single kernel event path ends up.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Route {
    /// Outside the cone, private metadata churn, or the worktree root
    /// itself: not reportable.
    Drop,
    /// Reportable change; worktree-relative forward-slash path.
    Report(String),
    /// Sync-cookie filename for the registry.
    Cookie(String),
    /// The metadata directory itself changed; the view of the world is no
    /// longer trustworthy.
    Resync,
}

pub struct FsListener {
    /// Never read, but must stay alive: dropping the watcher deregisters
    /// the OS watches and stops all event delivery.
    _watcher: RecommendedWatcher,
    events: Receiver<notify::Result<Event>>,
    shutdown_tx: Sender<()>,
    shutdown_rx: Receiver<()>,
}

/// Cloneable handle asking the listener thread to exit.
#[derive(Clone)]
pub struct StopHandle(Sender<()>);

impl StopHandle {
    /// Idempotent; telling an already-stopped listener again is harmless.
    pub fn stop(&self) {
        let _ = self.0.try_send(());
    }
}

impl FsListener {
    /// Create the platform watch resources for the given roots.
    ///
    /// This runs on the controller thread before anything else is spawned:
    /// when the kernel refuses a watch, daemon boot fails cleanly with no
    /// threads to unwind.
    pub fn new(worktree: &Path, gitdir: Option<&Path>) -> notify::Result<Self> {
        let (tx, events) = unbounded();
        let mut watcher = RecommendedWatcher::new(
            move |result: notify::Result<Event>| {
                let _ = tx.send(result);
            },
            WatcherConfig::default(),
        )?;
        watcher.watch(worktree, RecursiveMode::Recursive)?;
        if let Some(gitdir) = gitdir {
            watcher.watch(gitdir, RecursiveMode::Recursive)?;
        }

        let (shutdown_tx, shutdown_rx) = bounded(1);
        Ok(Self {
            _watcher: watcher,
            events,
            shutdown_tx,
            shutdown_rx,
        })
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle(self.shutdown_tx.clone())
    }

    /// Consume kernel events until a stop request arrives.
    pub fn run(self, state: Arc<DaemonState>) {
        tracing::info!(worktree = %state.worktree.display(), "listener watching worktree");
        if state.nr_paths_watching > 1 {
            tracing::info!(gitdir = %state.gitdir.display(), "listener watching gitdir");
        }

        let shutdown_rx = &self.shutdown_rx;
        let events = &self.events;
        loop {
            crossbeam::select! {
                recv(shutdown_rx) -> _ => break,
                recv(events) -> message => match message {
                    Ok(Ok(event)) => handle_event(&state, event),
                    Ok(Err(err)) => {
                        tracing::warn!(error = %err, "watcher error");
                        state.resync("watcher-error");
                    }
                    Err(_) => break, // watcher hung up
                },
            }
        }

        // Drain whatever the watcher delivered before the stop request.
        while let Ok(message) = self.events.try_recv() {
            if let Ok(event) = message {
                handle_event(&state, event);
            }
        }

        tracing::info!("listener stopped");
        // Dropping self releases the platform watch handles.
    }
}

fn handle_event(state: &DaemonState, event: Event) {
    if event.need_rescan() {
        tracing::warn!("kernel event queue overflowed");
        state.resync("overflow");
        return;
    }
    if !is_reportable_kind(&event.kind) {
        return;
    }
    for path in &event.paths {
        match route_path(state, path) {
            Route::Drop => {}
            Route::Report(rel) => {
                tracing::trace!(path = %rel, "event");
                state.log().append(rel);
            }
            Route::Cookie(name) => {
                if state.cookies.observe(&name) == CookieMark::Miss {
                    tracing::trace!(cookie = %name, "cookie event for an unknown name");
                }
            }
            Route::Resync => {
                tracing::warn!(path = %path.display(), "metadata directory changed");
                state.resync("metadata-root");
            }
        }
    }
}

/// Access-only events never change content; everything else that touches a
/// path is treated as a potential change.
fn is_reportable_kind(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Any | EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

fn route_path(state: &DaemonState, path: &Path) -> Route {
    let abs = path.to_string_lossy();
    match state.classify(&abs) {
        PathKind::OutsideCone => Route::Drop,
        // Private metadata churn must never surface as a reportable change.
        PathKind::InsideDotGit | PathKind::InsideGitdir => Route::Drop,
        PathKind::InsideDotGitWithCookiePrefix | PathKind::InsideGitdirWithCookiePrefix => {
            match path.file_name() {
                Some(name) => Route::Cookie(name.to_string_lossy().into_owned()),
                None => Route::Drop,
            }
        }
        PathKind::DotGit | PathKind::Gitdir => Route::Resync,
        PathKind::WorkdirPath => match state.worktree_relative(&abs) {
            Some(rel) if !rel.is_empty() => Route::Report(rel.to_string()),
            // The worktree root itself is not a reportable change.
            _ => Route::Drop,
        },
    }
}
