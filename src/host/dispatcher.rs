//! Deferred callbacks on the worker's event loop.

use slab::Slab;
use std::cell::RefCell;
use std::rc::{Rc, Weak};

/// A callback that can be scheduled to run on a later loop iteration.
///
/// Dropping the handle cancels any pending run.
pub trait SchedulableCallback {
    /// Run the callback on the next loop iteration. No-op if already
    /// scheduled.
    fn schedule_callback_next_iteration(&self);

    /// Unschedule the callback.
    fn cancel(&self);

    /// Returns true while a run is pending.
    fn enabled(&self) -> bool;
}

/// The worker's event loop, as seen by sockets.
pub trait Dispatcher {
    fn create_schedulable_callback(&self, cb: Box<dyn FnMut()>) -> Box<dyn SchedulableCallback>;
}

struct Slot {
    /// Distinguishes a slot from a later occupant of the same key.
    id: u64,
    /// Taken out while the callback runs.
    cb: Option<Box<dyn FnMut()>>,
    /// Schedule epoch of the pending run, if any.
    armed: Option<u64>,
}

#[derive(Default)]
struct RunQueue {
    slots: Slab<Slot>,
    next: Vec<(usize, u64, u64)>,
    next_id: u64,
    next_epoch: u64,
    iteration: u64,
}

/// Single-threaded run queue.
///
/// Callbacks scheduled during an iteration run in the following one, in the
/// order they were scheduled.
#[derive(Clone, Default)]
pub struct LocalDispatcher {
    queue: Rc<RefCell<RunQueue>>,
}

impl LocalDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run one loop iteration. Returns the number of callbacks invoked.
    pub fn run_iteration(&self) -> usize {
        let batch = {
            let mut queue = self.queue.borrow_mut();
            queue.iteration += 1;
            std::mem::take(&mut queue.next)
        };

        let mut ran = 0;
        for (key, id, epoch) in batch {
            let cb = {
                let mut queue = self.queue.borrow_mut();
                match queue.slots.get_mut(key) {
                    Some(slot) if slot.id == id && slot.armed == Some(epoch) => {
                        slot.armed = None;
                        slot.cb.take()
                    }
                    _ => None,
                }
            };
            let Some(mut cb) = cb else {
                continue;
            };

            // no borrow held: the callback may schedule or drop callbacks
            cb();
            ran += 1;

            let mut queue = self.queue.borrow_mut();
            if let Some(slot) = queue.slots.get_mut(key)
                && slot.id == id
            {
                slot.cb = Some(cb);
            }
        }
        ran
    }

    /// Number of callbacks waiting for the next iteration.
    pub fn pending(&self) -> usize {
        let queue = self.queue.borrow();
        queue
            .next
            .iter()
            .filter(|(key, id, epoch)| {
                queue
                    .slots
                    .get(*key)
                    .is_some_and(|s| s.id == *id && s.armed == Some(*epoch))
            })
            .count()
    }

    /// Number of completed iterations.
    pub fn iteration(&self) -> u64 {
        self.queue.borrow().iteration
    }
}

impl Dispatcher for LocalDispatcher {
    fn create_schedulable_callback(&self, cb: Box<dyn FnMut()>) -> Box<dyn SchedulableCallback> {
        let mut queue = self.queue.borrow_mut();
        let id = queue.next_id;
        queue.next_id += 1;
        let key = queue.slots.insert(Slot {
            id,
            cb: Some(cb),
            armed: None,
        });
        Box::new(LocalCallback {
            queue: Rc::downgrade(&self.queue),
            key,
            id,
        })
    }
}

struct LocalCallback {
    queue: Weak<RefCell<RunQueue>>,
    key: usize,
    id: u64,
}

impl LocalCallback {
    fn with_slot<T>(&self, f: impl FnOnce(&mut RunQueue) -> T) -> Option<T> {
        let queue = self.queue.upgrade()?;
        let mut queue = queue.borrow_mut();
        if queue.slots.get(self.key).is_some_and(|s| s.id == self.id) {
            Some(f(&mut *queue))
        } else {
            None
        }
    }
}

impl SchedulableCallback for LocalCallback {
    fn schedule_callback_next_iteration(&self) {
        let (key, id) = (self.key, self.id);
        self.with_slot(|queue| {
            if queue.slots[key].armed.is_some() {
                return;
            }
            let epoch = queue.next_epoch;
            queue.next_epoch += 1;
            queue.slots[key].armed = Some(epoch);
            queue.next.push((key, id, epoch));
        });
    }

    fn cancel(&self) {
        let key = self.key;
        self.with_slot(|queue| queue.slots[key].armed = None);
    }

    fn enabled(&self) -> bool {
        let key = self.key;
        self.with_slot(|queue| queue.slots[key].armed.is_some())
            .unwrap_or(false)
    }
}

impl Drop for LocalCallback {
    fn drop(&mut self) {
        let key = self.key;
        // the callback may be running: free the slot only after the borrow
        // ends, so the closure itself is dropped without the queue borrowed
        let removed = self.with_slot(|queue| queue.slots.remove(key));
        drop(removed);
    }
}
