//! The base store contract and an in-memory implementation.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use serde_json::Value;
use tracing::debug;

use crate::action::{Action, INIT_ACTION};
use crate::error::StoreResult;

/// Called after every state change.
pub type Listener = Rc<dyn Fn()>;

/// The reducer a base store is created with.
pub type RootReducer = Box<dyn Fn(Value, &Action) -> StoreResult<Value>>;

/// State storage and change notification, delegated to by the enhancer.
pub trait BaseStore {
    /// Reduce `action` into the held state, then notify listeners.
    fn dispatch(&self, action: Action) -> StoreResult<Action>;

    fn get_state(&self) -> Value;

    fn subscribe(&self, listener: Listener) -> Subscription;
}

/// Builds a base store around a reducer.
pub trait StoreCreator {
    type Store: BaseStore + 'static;

    fn create_store(self, reducer: RootReducer) -> StoreResult<Self::Store>;
}

/// Returned by `subscribe`. Dropping it keeps the listener registered.
pub struct Subscription {
    cancel: Box<dyn FnOnce()>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + 'static) -> Self {
        Self {
            cancel: Box::new(cancel),
        }
    }

    pub fn unsubscribe(self) {
        (self.cancel)()
    }
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

struct MemoryStoreInner {
    state: RefCell<Value>,
    reducer: RootReducer,
    listeners: RefCell<Vec<(u64, Listener)>>,
    next_listener: Cell<u64>,
}

/// In-memory base store. Cloning shares the store.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Rc<MemoryStoreInner>,
}

impl MemoryStore {
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.borrow().len()
    }
}

impl BaseStore for MemoryStore {
    fn dispatch(&self, action: Action) -> StoreResult<Action> {
        // No borrow is held while user code runs: listeners may dispatch.
        let current = self.inner.state.borrow().clone();
        let next = (self.inner.reducer)(current, &action)?;
        *self.inner.state.borrow_mut() = next;

        let listeners: Vec<Listener> = self
            .inner
            .listeners
            .borrow()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener();
        }

        Ok(action)
    }

    fn get_state(&self) -> Value {
        self.inner.state.borrow().clone()
    }

    fn subscribe(&self, listener: Listener) -> Subscription {
        let id = self.inner.next_listener.get();
        self.inner.next_listener.set(id + 1);
        self.inner.listeners.borrow_mut().push((id, listener));

        let inner = Rc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = inner.upgrade() {
                inner.listeners.borrow_mut().retain(|(entry, _)| *entry != id);
            }
        })
    }
}

/// Creates [`MemoryStore`]s, optionally from preloaded state.
#[derive(Debug, Clone, Default)]
pub struct MemoryStoreCreator {
    preloaded: Option<Value>,
}

impl MemoryStoreCreator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_preloaded_state(mut self, state: Value) -> Self {
        self.preloaded = Some(state);
        self
    }
}

impl StoreCreator for MemoryStoreCreator {
    type Store = MemoryStore;

    /// Dispatches [`INIT_ACTION`] so the reducer can establish initial state.
    fn create_store(self, reducer: RootReducer) -> StoreResult<MemoryStore> {
        let store = MemoryStore {
            inner: Rc::new(MemoryStoreInner {
                state: RefCell::new(self.preloaded.unwrap_or(Value::Null)),
                reducer,
                listeners: RefCell::new(Vec::new()),
                next_listener: Cell::new(0),
            }),
        };
        debug!("Initializing memory store");
        store.dispatch(Action::new(INIT_ACTION))?;
        Ok(store)
    }
}
