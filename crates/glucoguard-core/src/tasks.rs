//! Tracking of spawned controller tasks.

use std::future::Future;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

/// Keeps the join handles of background tasks so shutdown can account for
/// them. Finished handles are pruned on every spawn.
#[derive(Debug, Default)]
pub struct TaskTracker {
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(future);
        let mut handles = self.handles.lock();
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
    }

    /// Take every tracked handle, leaving the tracker empty.
    pub fn drain(&self) -> Vec<JoinHandle<()>> {
        std::mem::take(&mut *self.handles.lock())
    }

    /// Number of tracked tasks that have not finished yet.
    pub fn pending(&self) -> usize {
        self.handles.lock().iter().filter(|h| !h.is_finished()).count()
    }
}
