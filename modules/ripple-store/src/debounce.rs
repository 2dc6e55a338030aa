//! Debounced notification.
//!
//! Every debounced function runs at most once per tick no matter how often it
//! was triggered, and not at all if it was not triggered. `flush` runs pending
//! functions immediately.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::scheduler::Scheduler;

struct Debounced {
    pending: Cell<bool>,
    cancelled: Cell<bool>,
    callback: Box<dyn Fn()>,
}

impl Debounced {
    fn run(&self) {
        // Cleared before invoking, never after
        if self.pending.replace(false) && !self.cancelled.get() {
            (self.callback)();
        }
    }
}

/// Coalesces triggers into one callback invocation per tick.
pub struct Debouncer {
    scheduler: Scheduler,
    callbacks: RefCell<Vec<Rc<Debounced>>>,
}

impl Debouncer {
    pub fn new(scheduler: Scheduler) -> Self {
        Self {
            scheduler,
            callbacks: RefCell::new(Vec::new()),
        }
    }

    /// Wrap `callback`; the returned trigger schedules it for the next tick.
    pub fn debounce(&self, callback: impl Fn() + 'static) -> Trigger {
        let entry = Rc::new(Debounced {
            pending: Cell::new(false),
            cancelled: Cell::new(false),
            callback: Box::new(callback),
        });
        let mut callbacks = self.callbacks.borrow_mut();
        callbacks.retain(|entry| !entry.cancelled.get());
        callbacks.push(entry.clone());
        Trigger {
            entry,
            scheduler: self.scheduler.clone(),
        }
    }

    /// Run every callback with a pending trigger now, in registration order.
    /// Callbacks registered while flushing wait for the next flush or tick.
    pub fn flush(&self) {
        self.callbacks
            .borrow_mut()
            .retain(|entry| !entry.cancelled.get());
        let registered = self.callbacks.borrow().len();
        for index in 0..registered {
            let entry = self.callbacks.borrow()[index].clone();
            entry.run();
        }
    }

    /// Callbacks still registered, cancelled ones not yet dropped included.
    pub fn registered(&self) -> usize {
        self.callbacks.borrow().len()
    }
}

/// Trigger side of a debounced function.
#[derive(Clone)]
pub struct Trigger {
    entry: Rc<Debounced>,
    scheduler: Scheduler,
}

impl Trigger {
    pub fn trigger(&self) {
        if self.entry.cancelled.get() {
            return;
        }
        if !self.entry.pending.replace(true) {
            let entry = self.entry.clone();
            self.scheduler.defer(move || entry.run());
        }
    }

    pub fn is_pending(&self) -> bool {
        self.entry.pending.get()
    }

    /// Never run the callback again. The debouncer drops it on its next
    /// flush or registration.
    pub fn cancel(&self) {
        self.entry.cancelled.set(true);
        self.entry.pending.set(false);
    }
}
