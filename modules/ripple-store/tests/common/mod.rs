//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use ripple_store::Action;
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

/// Install a test-writer subscriber once per test binary. `RUST_LOG` applies.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Shared counter for listener and reducer call counts.
#[derive(Clone, Default)]
pub struct Calls(Rc<Cell<u32>>);

impl Calls {
    pub fn hit(&self) {
        self.0.set(self.0.get() + 1);
    }

    pub fn get(&self) -> u32 {
        self.0.get()
    }
}

/// Shared log of strings, in the order they were pushed.
#[derive(Clone, Default)]
pub struct Log(Rc<RefCell<Vec<String>>>);

impl Log {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.borrow_mut().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.borrow().clone()
    }
}

/// Increments `state[key]`, treating missing and non-numeric values as 0.
pub fn bump(state: Value, key: &str) -> Value {
    let n = state.get(key).and_then(Value::as_i64).unwrap_or(0);
    ripple_store::path::set(&state, &[key], json!(n + 1))
}

/// Id generator that uses the action type, for readable fingerprints.
pub fn type_as_id(action: &Action) -> String {
    action.action_type.clone()
}
