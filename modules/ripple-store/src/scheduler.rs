//! Cooperative single-threaded scheduler.
//!
//! Stands in for the host event loop. A tick polls every task that was woken
//! before the tick started, then drains the deferred-callback queue (the
//! microtask phase). Tasks woken and tasks spawned while a tick runs are
//! polled in the next tick; callbacks deferred while draining run in the
//! same drain.
//!
//! Wakers are thread-safe, so futures may wait on host primitives such as
//! tokio timers. [`Scheduler::drive`] keeps ticking inside a tokio runtime.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};

use futures::future::{FutureExt, LocalBoxFuture};
use futures::task::{waker, ArcWake};
use tokio::sync::Notify;
use tracing::{trace, warn};

type TaskId = u64;

/// Ids of woken tasks, shared with wakers.
#[derive(Default)]
struct ReadyQueue {
    ids: Mutex<VecDeque<TaskId>>,
    notify: Notify,
}

impl ReadyQueue {
    fn push(&self, id: TaskId) {
        self.ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(id);
        self.notify.notify_one();
    }

    fn drain(&self) -> Vec<TaskId> {
        self.ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect()
    }

    fn is_empty(&self) -> bool {
        self.ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }
}

struct TaskWaker {
    id: TaskId,
    queued: AtomicBool,
    ready: Arc<ReadyQueue>,
}

impl ArcWake for TaskWaker {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        // At most one queue entry per task and tick
        if !arc_self.queued.swap(true, Ordering::AcqRel) {
            arc_self.ready.push(arc_self.id);
        }
    }
}

struct Task {
    label: &'static str,
    future: LocalBoxFuture<'static, ()>,
    waker: Arc<TaskWaker>,
}

#[derive(Default)]
struct SchedulerInner {
    next_id: Cell<TaskId>,
    tasks: RefCell<HashMap<TaskId, Task>>,
    ready: Arc<ReadyQueue>,
    deferred: RefCell<VecDeque<Box<dyn FnOnce()>>>,
}

/// Handle to a cooperative task queue. Cloning shares the queue.
#[derive(Clone, Default)]
pub struct Scheduler {
    inner: Rc<SchedulerInner>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a future to be first polled on the next tick.
    pub fn spawn<F>(&self, label: &'static str, future: F)
    where
        F: Future<Output = ()> + 'static,
    {
        let waker = self.new_waker();
        self.inner.tasks.borrow_mut().insert(
            waker.id,
            Task {
                label,
                future: future.boxed_local(),
                waker: waker.clone(),
            },
        );
        ArcWake::wake_by_ref(&waker);
    }

    /// Poll a fallible future once, right now.
    ///
    /// A future that finishes synchronously hands its result back to the
    /// caller. One that suspends is parked as a task; a failure after that
    /// point can only be reported, which happens through `tracing`.
    pub fn spawn_now<F>(&self, label: &'static str, future: F) -> anyhow::Result<()>
    where
        F: Future<Output = anyhow::Result<()>> + 'static,
    {
        let task_waker = self.new_waker();
        let waker = waker(task_waker.clone());
        let mut cx = Context::from_waker(&waker);
        let mut future = future.boxed_local();

        match future.as_mut().poll(&mut cx) {
            Poll::Ready(result) => result,
            Poll::Pending => {
                trace!(task = label, "Task suspended; parking");
                let detached = async move {
                    if let Err(err) = future.await {
                        warn!(task = label, error = %err, "Detached task failed");
                    }
                };
                self.inner.tasks.borrow_mut().insert(
                    task_waker.id,
                    Task {
                        label,
                        future: detached.boxed_local(),
                        waker: task_waker,
                    },
                );
                Ok(())
            }
        }
    }

    /// Run `callback` in the deferred phase of the next tick.
    pub fn defer(&self, callback: impl FnOnce() + 'static) {
        self.inner.deferred.borrow_mut().push_back(Box::new(callback));
        self.inner.ready.notify.notify_one();
    }

    /// Run one tick. Returns the number of tasks polled.
    pub fn tick(&self) -> usize {
        let mut polled = 0;

        for id in self.inner.ready.drain() {
            // Never hold the task map across a poll: tasks spawn tasks.
            let Some(mut task) = self.inner.tasks.borrow_mut().remove(&id) else {
                continue;
            };
            task.waker.queued.store(false, Ordering::Release);
            let waker = waker(task.waker.clone());
            let mut cx = Context::from_waker(&waker);
            polled += 1;

            match task.future.as_mut().poll(&mut cx) {
                Poll::Ready(()) => trace!(task = task.label, "Task finished"),
                Poll::Pending => {
                    self.inner.tasks.borrow_mut().insert(id, task);
                }
            }
        }

        self.run_deferred();
        polled
    }

    /// Tick until no task is ready and nothing is deferred. Tasks that keep
    /// waking themselves keep this looping.
    pub fn run_until_idle(&self) -> usize {
        let mut ticks = 0;
        while !self.is_idle() {
            self.tick();
            ticks += 1;
        }
        trace!(ticks, pending = self.pending_tasks(), "Scheduler idle");
        ticks
    }

    /// Keep ticking as wakeups arrive. Never returns; race it against a
    /// shutdown signal.
    pub async fn drive(&self) {
        loop {
            self.run_until_idle();
            self.inner.ready.notify.notified().await;
        }
    }

    pub fn is_idle(&self) -> bool {
        self.inner.ready.is_empty() && self.inner.deferred.borrow().is_empty()
    }

    /// Tasks parked or queued, finished ones excluded.
    pub fn pending_tasks(&self) -> usize {
        self.inner.tasks.borrow().len()
    }

    fn new_waker(&self) -> Arc<TaskWaker> {
        let id = self.inner.next_id.get();
        self.inner.next_id.set(id + 1);
        Arc::new(TaskWaker {
            id,
            queued: AtomicBool::new(false),
            ready: self.inner.ready.clone(),
        })
    }

    fn run_deferred(&self) {
        loop {
            let callback = self.inner.deferred.borrow_mut().pop_front();
            match callback {
                Some(callback) => callback(),
                None => break,
            }
        }
    }
}

/// Future that yields exactly once, resuming on the following tick.
#[derive(Debug, Default)]
pub struct NextTick {
    yielded: bool,
}

impl Future for NextTick {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            return Poll::Ready(());
        }
        self.yielded = true;
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}

pub fn next_tick() -> NextTick {
    NextTick::default()
}
