//! Sync-cookie registry.
//!
//! The daemon drops short-lived cookie files into the metadata directory and
//! waits for them to come back through the kernel event stream. A cookie hit
//! is a barrier: every event from before the cookie's creation has been
//! delivered. The registry tracks outstanding cookie filenames; the query
//! path registers and waits, the listener observes.

use std::collections::HashSet;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Result of the listener reporting a cookie-prefixed filename.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CookieMark {
    /// The name was outstanding; waiters have been woken.
    Hit,
    /// Unknown name, e.g. a leftover from a previous daemon instance.
    Miss,
}

#[derive(Debug, Default)]
pub struct CookieRegistry {
    pending: Mutex<HashSet<String>>,
    seen: Condvar,
}

impl CookieRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track an outstanding cookie filename. Call before creating the file,
    /// or the event may race past the registration.
    pub fn register(&self, name: &str) {
        self.lock().insert(name.to_string());
    }

    /// Report a cookie-prefixed filename seen in the event stream.
    pub fn observe(&self, name: &str) -> CookieMark {
        let mut pending = self.lock();
        if pending.remove(name) {
            self.seen.notify_all();
            CookieMark::Hit
        } else {
            CookieMark::Miss
        }
    }

    /// Stop tracking a cookie that will no longer be waited for.
    pub fn unregister(&self, name: &str) {
        self.lock().remove(name);
    }

    /// Block until the listener observes `name` or the timeout expires.
    /// Returns `true` when the cookie round-tripped the kernel.
    pub fn wait_observed(&self, name: &str, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut pending = self.lock();
        while pending.contains(name) {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self
                .seen
                .wait_timeout(pending, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            pending = guard;
        }
        true
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<String>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn observing_a_registered_cookie_is_a_hit_once() {
        let registry = CookieRegistry::new();
        registry.register(".fsmonitor-daemon-1-0");
        assert_eq!(registry.observe(".fsmonitor-daemon-1-0"), CookieMark::Hit);
        assert_eq!(registry.observe(".fsmonitor-daemon-1-0"), CookieMark::Miss);
    }

    #[test]
    fn unknown_names_are_misses() {
        let registry = CookieRegistry::new();
        assert_eq!(registry.observe(".fsmonitor-daemon-9-9"), CookieMark::Miss);
    }

    #[test]
    fn unregistered_cookies_are_forgotten() {
        let registry = CookieRegistry::new();
        registry.register("c");
        registry.unregister("c");
        assert_eq!(registry.observe("c"), CookieMark::Miss);
    }

    #[test]
    fn wait_returns_once_the_cookie_is_observed() {
        let registry = Arc::new(CookieRegistry::new());
        registry.register("c");

        let observer = {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                registry.observe("c")
            })
        };

        assert!(registry.wait_observed("c", Duration::from_secs(5)));
        assert_eq!(observer.join().expect("observer thread"), CookieMark::Hit);
    }

    #[test]
    fn wait_times_out_when_nothing_observes() {
        let registry = CookieRegistry::new();
        registry.register("never");
        assert!(!registry.wait_observed("never", Duration::from_millis(10)));
    }

    #[test]
    fn wait_on_an_already_observed_cookie_returns_immediately() {
        let registry = CookieRegistry::new();
        registry.register("c");
        registry.observe("c");
        assert!(registry.wait_observed("c", Duration::from_millis(1)));
    }
}
