//! One-shot waiters resolved against the live dispatch stream.

use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::channel::oneshot;
use futures::FutureExt;

use crate::action::{Action, ActionTest};
use crate::error::{StoreError, StoreResult};

struct Waiter {
    test: ActionTest,
    resolve: oneshot::Sender<Action>,
}

/// Pending waiters, kept in registration order.
#[derive(Default)]
pub struct ActionMatcher {
    waiters: RefCell<Vec<Waiter>>,
}

impl ActionMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for the next dispatched action that passes `test`.
    pub fn register(&self, test: impl Into<ActionTest>) -> ActionWaiter {
        let (resolve, receiver) = oneshot::channel();
        self.waiters.borrow_mut().push(Waiter {
            test: test.into(),
            resolve,
        });
        ActionWaiter { receiver }
    }

    /// Resolve and remove every waiter whose test matches `action`. Waiters
    /// whose future was dropped are discarded without being tested. Returns
    /// the number resolved.
    pub fn dispatch(&self, action: &Action) -> usize {
        // Tests may register new waiters; those only see later dispatches.
        let waiters = std::mem::take(&mut *self.waiters.borrow_mut());
        let mut remaining = Vec::with_capacity(waiters.len());
        let mut resolved = 0;

        for waiter in waiters {
            if waiter.resolve.is_canceled() {
                continue;
            }
            if waiter.test.matches(action) {
                if waiter.resolve.send(action.clone()).is_ok() {
                    resolved += 1;
                }
            } else {
                remaining.push(waiter);
            }
        }

        let mut waiters = self.waiters.borrow_mut();
        remaining.append(&mut waiters);
        *waiters = remaining;
        resolved
    }

    pub fn pending(&self) -> usize {
        self.waiters.borrow().len()
    }
}

/// Resolves with the matching action. Fails with [`StoreError::Closed`] if
/// the matcher is dropped first.
#[must_use = "waiters do nothing unless awaited"]
pub struct ActionWaiter {
    receiver: oneshot::Receiver<Action>,
}

impl Future for ActionWaiter {
    type Output = StoreResult<Action>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.receiver
            .poll_unpin(cx)
            .map(|result| result.map_err(|_| StoreError::Closed))
    }
}
