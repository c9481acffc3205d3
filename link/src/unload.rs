//! The navigation unload guard.
//!
//! A process-wide registry of live sessions is consulted after every sent and
//! received frame: when any session reports pending work under its configured
//! policy, the navigation guard is installed; when none does, it is removed.
//! Strictly level-triggered — install/remove happen on edges only, and
//! nothing polls.

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// Host hook that intercepts navigation while work is in flight. In a browser
/// embedding this maps to the beforeunload prompt; native hosts supply their
/// own.
pub trait NavigationGuard: Send + Sync {
    fn install(&self);
    fn remove(&self);
}

/// A session's view into the guard predicate.
pub(crate) trait PendingReporter: Send + Sync {
    fn reports_pending(&self) -> bool;
}

static LIVE_SESSIONS: Lazy<Mutex<Vec<Weak<dyn PendingReporter>>>> =
    Lazy::new(|| Mutex::new(Vec::new()));
static GUARD: Lazy<Mutex<Option<Arc<dyn NavigationGuard>>>> = Lazy::new(|| Mutex::new(None));
static GUARD_INSTALLED: AtomicBool = AtomicBool::new(false);

/// Install the process-wide navigation guard implementation.
pub fn set_navigation_guard(guard: Option<Arc<dyn NavigationGuard>>) {
    *GUARD.lock() = guard;
}

pub(crate) fn register_session(session: Weak<dyn PendingReporter>) {
    LIVE_SESSIONS.lock().push(session);
}

/// Re-evaluate the guard predicate across all live sessions and
/// install/remove the handler on the observed edge.
pub(crate) fn reevaluate() {
    let any_pending = {
        let mut sessions = LIVE_SESSIONS.lock();
        sessions.retain(|weak| weak.strong_count() > 0);
        sessions
            .iter()
            .filter_map(Weak::upgrade)
            .any(|session| session.reports_pending())
    };

    if any_pending {
        if !GUARD_INSTALLED.swap(true, Ordering::SeqCst) {
            if let Some(guard) = GUARD.lock().as_ref() {
                guard.install();
            }
        }
    } else if GUARD_INSTALLED.swap(false, Ordering::SeqCst) {
        if let Some(guard) = GUARD.lock().as_ref() {
            guard.remove();
        }
    }
}

/// Whether the guard is currently installed. Exposed for hosts and tests.
pub fn guard_installed() -> bool {
    GUARD_INSTALLED.load(Ordering::SeqCst)
}
