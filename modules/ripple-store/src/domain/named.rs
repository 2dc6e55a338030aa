//! Named reducers and the targeted dispatches bound to them.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::rc::Rc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::action::Action;
use crate::enhancer::WeakStore;
use crate::error::{StoreError, StoreResult, UsageError};

/// Type of a targeted-dispatch action, from `(domain, reducer, payload)`.
pub type TargetedTypeFn = Rc<dyn Fn(&str, &str, &Value) -> String>;

type ErasedNamed = Rc<dyn Fn(Value, Value) -> StoreResult<Value>>;

/// One domain's named reducers, erased to JSON in and out.
#[derive(Default)]
pub(crate) struct NamedReducers {
    reducers: RefCell<HashMap<String, ErasedNamed>>,
    connected: Cell<bool>,
}

impl NamedReducers {
    pub(crate) fn is_connected(&self) -> bool {
        self.connected.get()
    }

    pub(crate) fn mark_connected(&self) {
        self.connected.set(true);
    }

    pub(crate) fn len(&self) -> usize {
        self.reducers.borrow().len()
    }

    fn insert(&self, name: String, reducer: ErasedNamed) {
        self.reducers.borrow_mut().insert(name, reducer);
    }

    /// Run the reducer registered as `reducer` over `slice`.
    pub(crate) fn reduce(
        &self,
        domain: &str,
        reducer: &str,
        slice: Value,
        payload: Value,
    ) -> StoreResult<Value> {
        if !self.is_connected() {
            return Err(UsageError::NotConnected(domain.to_string()).into());
        }
        let named = self.reducers.borrow().get(reducer).cloned().ok_or_else(|| {
            UsageError::UnknownReducer {
                domain: domain.to_string(),
                reducer: reducer.to_string(),
            }
        })?;
        named(slice, payload)
    }
}

/// What a domain's interface factory is given to build its interface.
/// Interfaces may keep a clone to read their slice later.
pub struct DomainBase<S> {
    name: String,
    store: WeakStore,
    named: Rc<NamedReducers>,
    targeted_type: TargetedTypeFn,
    _state: PhantomData<fn() -> S>,
}

impl<S> Clone for DomainBase<S> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            store: self.store.clone(),
            named: self.named.clone(),
            targeted_type: self.targeted_type.clone(),
            _state: PhantomData,
        }
    }
}

impl<S> DomainBase<S>
where
    S: Serialize + DeserializeOwned + 'static,
{
    pub(crate) fn new(
        name: String,
        store: WeakStore,
        named: Rc<NamedReducers>,
        targeted_type: TargetedTypeFn,
    ) -> Self {
        Self {
            name,
            store,
            named,
            targeted_type,
            _state: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// This domain's slice of the store state.
    pub fn get_state(&self) -> StoreResult<S> {
        let state = self.store.get_state().ok_or(StoreError::Closed)?;
        let slice = state.get(&self.name).cloned().unwrap_or(Value::Null);
        Ok(serde_json::from_value(slice)?)
    }

    /// Dispatch to the whole store. Unless `skip_handlers` is set, procs and
    /// every domain's handlers see the action too. From handler code the
    /// action is a consequence of the one being handled.
    pub fn dispatch(&self, action: Action, skip_handlers: bool) -> StoreResult<Action> {
        self.store.dispatch_in_scope(action, skip_handlers)
    }

    /// Register `reducer` under `name` and return the dispatch that targets it.
    pub fn reduce<P>(
        &self,
        name: impl Into<String>,
        reducer: impl Fn(S, P) -> S + 'static,
    ) -> TargetedDispatch<S, P>
    where
        P: Serialize + DeserializeOwned + 'static,
    {
        let name = name.into();
        self.named.insert(
            name.clone(),
            Rc::new(move |slice: Value, payload: Value| -> StoreResult<Value> {
                let state: S = serde_json::from_value(slice)?;
                let payload: P = serde_json::from_value(payload)?;
                Ok(serde_json::to_value(reducer(state, payload))?)
            }),
        );

        TargetedDispatch {
            domain: self.name.clone(),
            reducer: name,
            store: self.store.clone(),
            named: self.named.clone(),
            targeted_type: self.targeted_type.clone(),
            _marker: PhantomData,
        }
    }
}

/// Dispatches a payload straight to one named reducer of one domain.
pub struct TargetedDispatch<S, P> {
    domain: String,
    reducer: String,
    store: WeakStore,
    named: Rc<NamedReducers>,
    targeted_type: TargetedTypeFn,
    _marker: PhantomData<fn(P) -> S>,
}

impl<S, P> Clone for TargetedDispatch<S, P> {
    fn clone(&self) -> Self {
        Self {
            domain: self.domain.clone(),
            reducer: self.reducer.clone(),
            store: self.store.clone(),
            named: self.named.clone(),
            targeted_type: self.targeted_type.clone(),
            _marker: PhantomData,
        }
    }
}

impl<S, P: Serialize> TargetedDispatch<S, P> {
    pub fn reducer_name(&self) -> &str {
        &self.reducer
    }

    /// Fails with [`UsageError::NotConnected`] until the domain's interface
    /// has been built. Called from handler code, the dispatch inherits the
    /// handled action's lineage and notifications stay debounced.
    pub fn call(&self, payload: P) -> StoreResult<Action> {
        if !self.named.is_connected() {
            return Err(UsageError::NotConnected(self.domain.clone()).into());
        }
        let payload = serde_json::to_value(payload)?;
        let action_type = (self.targeted_type)(&self.domain, &self.reducer, &payload);
        self.store.dispatch_in_scope(
            Action::targeted(action_type, self.domain.clone(), self.reducer.clone(), payload),
            false,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unknown_reducer_is_a_usage_error() {
        let named = NamedReducers::default();
        named.mark_connected();

        let err = named.reduce("ducks", "quack", json!(0), json!(1)).unwrap_err();
        assert!(matches!(
            err,
            StoreError::Usage(UsageError::UnknownReducer { ref domain, ref reducer })
                if domain == "ducks" && reducer == "quack"
        ));
    }

    #[test]
    fn reducing_before_connect_is_a_usage_error() {
        let named = NamedReducers::default();
        let err = named.reduce("ducks", "add", json!(0), json!(1)).unwrap_err();
        assert!(matches!(
            err,
            StoreError::Usage(UsageError::NotConnected(ref domain)) if domain == "ducks"
        ));
    }
}
