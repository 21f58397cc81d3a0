//! Stopped-thread bookkeeping and current-thread resolution

use std::collections::HashSet;

/// Which threads are halted, and which thread commands apply to
///
/// The current thread is, in order of preference: the thread the user
/// selected, the thread that stopped most recently, the last thread the
/// adapter announced with a `thread` event, and finally a fixed sentinel id.
#[derive(Debug, Clone)]
pub struct ThreadTracker {
    stopped: HashSet<i64>,
    selected: Option<i64>,
    last_stopped: Option<i64>,
    last_reported: Option<i64>,
    sentinel: i64,
}

impl ThreadTracker {
    pub fn new(sentinel: i64) -> Self {
        Self {
            stopped: HashSet::new(),
            selected: None,
            last_stopped: None,
            last_reported: None,
            sentinel,
        }
    }

    pub fn mark_stopped(&mut self, thread_id: i64) {
        self.stopped.insert(thread_id);
        self.last_stopped = Some(thread_id);
    }

    pub fn mark_continued(&mut self, thread_id: i64) {
        self.stopped.remove(&thread_id);
    }

    /// Remember a thread announced by a `thread` event
    pub fn record_reported(&mut self, thread_id: i64) {
        self.last_reported = Some(thread_id);
    }

    pub fn forget_reported(&mut self) {
        self.last_reported = None;
    }

    pub fn select(&mut self, thread_id: Option<i64>) {
        self.selected = thread_id;
    }

    pub fn current(&self) -> i64 {
        self.selected
            .or(self.last_stopped)
            .or(self.last_reported)
            .unwrap_or(self.sentinel)
    }

    pub fn is_stopped(&self, thread_id: i64) -> bool {
        self.stopped.contains(&thread_id)
    }

    /// Stopped thread ids in ascending order
    pub fn stopped(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.stopped.iter().copied().collect();
        ids.sort_unstable();
        ids
    }
}
