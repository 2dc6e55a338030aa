//! Put-state actions: replace the value at a path of the state.

use std::rc::Rc;

use serde_json::Value;

use crate::action::Action;
use crate::continuation::{Continuation, ReduceScope, Reducer};
use crate::error::StoreResult;
use crate::path;

/// Names put actions after the action that triggered them, and recognizes
/// put actions when reducing.
#[derive(Clone)]
pub struct PutActionConfig {
    action_type: Rc<dyn Fn(&Action) -> String>,
    test: Rc<dyn Fn(&Action) -> bool>,
}

impl PutActionConfig {
    /// Put actions are typed `"{trigger}{suffix}"` and recognized by their
    /// envelope.
    pub fn with_suffix(suffix: impl Into<String>) -> Self {
        let suffix = suffix.into();
        Self {
            action_type: Rc::new(move |trigger: &Action| {
                format!("{}{}", trigger.action_type, suffix)
            }),
            test: Rc::new(|action: &Action| action.put_payload().is_some()),
        }
    }

    /// Like [`with_suffix`](Self::with_suffix), but a put envelope is only
    /// applied when the type also ends with the suffix.
    pub fn suffix_test(suffix: impl Into<String>) -> Self {
        let suffix = suffix.into();
        let test_suffix = suffix.clone();
        Self {
            test: Rc::new(move |action: &Action| {
                action.put_payload().is_some() && action.action_type.ends_with(&test_suffix)
            }),
            ..Self::with_suffix(suffix)
        }
    }

    pub fn with_type(mut self, action_type: impl Fn(&Action) -> String + 'static) -> Self {
        self.action_type = Rc::new(action_type);
        self
    }

    pub fn with_test(mut self, test: impl Fn(&Action) -> bool + 'static) -> Self {
        self.test = Rc::new(test);
        self
    }

    pub fn action_type(&self, trigger: &Action) -> String {
        (self.action_type)(trigger)
    }

    pub fn is_put(&self, action: &Action) -> bool {
        (self.test)(action)
    }
}

impl Default for PutActionConfig {
    fn default() -> Self {
        Self::with_suffix("/PUT")
    }
}

/// Apply `action` to `state` if it is a recognized put action. Anything else
/// leaves `state` as it was.
pub fn reduce_put(state: Value, action: &Action, config: &PutActionConfig) -> Value {
    match action.put_payload() {
        Some(put) if config.is_put(action) => {
            path::set_owned(state, &put.keys, put.data.clone())
        }
        _ => state,
    }
}

/// Runs the inner reducer, then [`reduce_put`] on its result, so the inner
/// reducer still sets up initial state on the first dispatch.
pub struct PutStateReducer<R> {
    inner: R,
    config: PutActionConfig,
}

impl<R> PutStateReducer<R> {
    pub fn new(inner: R, config: PutActionConfig) -> Self {
        Self { inner, config }
    }
}

impl<R: Reducer<Value>> Reducer<Value> for PutStateReducer<R> {
    fn reduce(
        &self,
        state: Value,
        action: &Action,
        scope: ReduceScope,
    ) -> StoreResult<Continuation<Value>> {
        let continuation = self.inner.reduce(state, action, scope)?;
        Ok(continuation.map_state(|state| reduce_put(state, action, &self.config)))
    }
}
