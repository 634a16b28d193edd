//! Completion queue and listen-side processing list.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::error::Result;
use crate::handle::Handle;

/// One completed call awaiting user-callback dispatch.
pub(crate) struct CompletionEntry {
    pub handle: Handle,
    pub ret: Result<()>,
}

/// Per-context ordered queue of completed handles.
///
/// Entries are pushed at the head and popped from the tail, so dispatch
/// order is the order in which calls completed.
pub(crate) struct CompletionQueue {
    queue: Mutex<VecDeque<CompletionEntry>>,
    cond: Condvar,
}

impl CompletionQueue {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            cond: Condvar::new(),
        }
    }

    /// Push at the head and signal waiters while holding the lock.
    pub fn push(&self, entry: CompletionEntry) {
        let mut queue = self.queue.lock();
        queue.push_front(entry);
        self.cond.notify_one();
    }

    /// Pop the tail without waiting.
    pub fn try_pop(&self) -> Option<CompletionEntry> {
        self.queue.lock().pop_back()
    }

    /// Pop the tail, waiting up to `timeout` while the queue is empty.
    pub fn pop_wait(&self, timeout: Duration) -> Option<CompletionEntry> {
        let mut queue = self.queue.lock();
        if let Some(entry) = queue.pop_back() {
            return Some(entry);
        }
        let deadline = Instant::now() + timeout;
        loop {
            if self.cond.wait_until(&mut queue, deadline).timed_out() {
                return queue.pop_back();
            }
            if let Some(entry) = queue.pop_back() {
                return Some(entry);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }
}

/// Backlog of handles posted as unexpected receives on the listen side.
pub(crate) struct ProcessingList {
    list: Mutex<Vec<Handle>>,
}

impl ProcessingList {
    pub fn new() -> Self {
        Self {
            list: Mutex::new(Vec::new()),
        }
    }

    /// Hold the list lock while refilling the backlog.
    pub fn lock(&self) -> MutexGuard<'_, Vec<Handle>> {
        self.list.lock()
    }

    pub fn len(&self) -> usize {
        self.list.lock().len()
    }

    /// Remove by identity; false when the handle is not on the list.
    pub fn remove(&self, handle: &Handle) -> bool {
        let mut list = self.list.lock();
        match list.iter().position(|h| Handle::ptr_eq(h, handle)) {
            Some(i) => {
                list.remove(i);
                true
            }
            None => false,
        }
    }

    /// Take every handle off the list.
    pub fn drain(&self) -> Vec<Handle> {
        std::mem::take(&mut *self.list.lock())
    }
}
