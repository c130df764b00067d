//! Progress reporting for fetch cycles.
//!
//! Listeners live in a [`ProgressNotifier`] shared by a factory and every sink
//! it creates. Each notification iterates a snapshot of the registry taken at
//! call time, so listeners may be added or removed from any thread (including
//! from inside a callback) without disturbing a notification in progress.
//!
//! Percentages are tracked per fetch cycle by a [`ProgressTracker`], which only
//! lets strictly increasing values through.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::factory::FactoryId;

/// Receives progress notifications.
///
/// Callbacks run on whichever thread drives the fetch cycle and must not
/// assume exclusive access to the factory.
pub trait ProgressListener: Send + Sync {
    /// Called with the factory reporting progress and the completed percentage.
    fn progress(&self, factory: FactoryId, percent: u32);
}

impl<F> ProgressListener for F
where
    F: Fn(FactoryId, u32) + Send + Sync,
{
    fn progress(&self, factory: FactoryId, percent: u32) {
        self(factory, percent)
    }
}

/// Handle identifying a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Ordered registry of progress listeners.
#[derive(Default)]
pub struct ProgressNotifier {
    listeners: RwLock<Vec<(ListenerId, Arc<dyn ProgressListener>)>>,
    next_id: AtomicU64,
}

impl ProgressNotifier {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener, returning the handle used to remove it.
    pub fn add(&self, listener: Arc<dyn ProgressListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, listener));
        id
    }

    /// Remove a listener. Returns false if it was not registered.
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    /// Remove every listener.
    pub fn clear(&self) {
        self.listeners.write().clear();
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    /// Returns true if nobody is listening.
    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }

    /// Notify every listener registered at call time.
    pub fn notify(&self, factory: FactoryId, percent: u32) {
        let snapshot: Vec<Arc<dyn ProgressListener>> =
            self.listeners.read().iter().map(|(_, l)| Arc::clone(l)).collect();

        for listener in snapshot {
            listener.progress(factory, percent);
        }
    }
}

impl std::fmt::Debug for ProgressNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressNotifier")
            .field("listeners", &self.len())
            .finish()
    }
}

/// Per-cycle percentage state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressTracker {
    last_percent: u32,
}

impl ProgressTracker {
    /// Start a cycle at 0%.
    pub fn new() -> Self {
        Self::default()
    }

    /// Last percentage let through.
    pub fn last_percent(&self) -> u32 {
        self.last_percent
    }

    /// Percentage for `rows` delivered out of `height`, if it is new.
    ///
    /// Returns `Some(percent)` only when the floor percentage strictly
    /// exceeds the last value returned. Values are clamped to 100.
    pub fn advance(&mut self, rows: u32, height: u32) -> Option<u32> {
        if height == 0 {
            return None;
        }
        let percent = ((100 * u64::from(rows)) / u64::from(height)).min(100) as u32;
        if percent > self.last_percent {
            self.last_percent = percent;
            Some(percent)
        } else {
            None
        }
    }
}
