//! Listener fan-out.
//!
//! Every new [`AssignmentsState`] is handed to each registered listener in
//! registration order. There is no coalescing: one published state, one call
//! per listener.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use modsync_core::model::AssignmentsState;

/// Callback invoked with each new state.
pub type Listener = Arc<dyn Fn(&Arc<AssignmentsState>) + Send + Sync>;

/// Handle returned by [`Listeners::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// Shared, cloneable listener set.
#[derive(Clone, Default)]
pub struct Listeners {
    next_id: Arc<AtomicU64>,
    entries: Arc<Mutex<Vec<(ListenerId, Listener)>>>,
}

impl fmt::Debug for Listeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listeners")
            .field("count", &self.len())
            .finish()
    }
}

impl Listeners {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().push((id, listener));
        id
    }

    /// Returns whether `id` was registered.
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|(existing, _)| *existing != id);
        entries.len() != before
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Call every listener with `state`.
    ///
    /// The set is copied first, so a listener may add or remove listeners
    /// (itself included) without deadlocking; such changes apply from the
    /// next notification on.
    pub fn notify(&self, state: &Arc<AssignmentsState>) {
        let current: Vec<Listener> = self
            .lock()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in current {
            listener(state);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(ListenerId, Listener)>> {
        // a panicking listener never runs under this lock
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
