//! Domains: state partitioned into named slices, each with its own handler
//! interface and named reducers reachable by targeted dispatch.
//!
//! A domain's interface is built once the store exists. Targeted dispatches
//! produce actions tagged with `(domain, reducer)`; the root reducer sends
//! each one to exactly that reducer and stores the result in the domain's
//! slice.

mod named;

pub use named::{DomainBase, TargetedDispatch, TargetedTypeFn};

use std::cell::RefCell;
use std::future::Future;
use std::rc::Rc;

use futures::future::{FutureExt, LocalBoxFuture};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::action::{Action, ActionTest, TargetedPayload};
use crate::continuation::{Continuation, ReduceScope, Reducer};
use crate::enhancer::{HandlerScope, WeakStore};
use crate::error::{StoreError, StoreResult, UsageError};
use crate::scheduler::Scheduler;

use named::NamedReducers;

type Handler<I> = Rc<dyn Fn(Action, Rc<I>) -> LocalBoxFuture<'static, anyhow::Result<()>>>;

struct DomainInner<S, I> {
    init: S,
    factory: Box<dyn Fn(&DomainBase<S>) -> I>,
    label: RefCell<String>,
    interface: RefCell<Option<Rc<I>>>,
    handlers: RefCell<Vec<(ActionTest, Handler<I>)>>,
    named: Rc<NamedReducers>,
}

/// A named slice of state with initial value `S` and handler interface `I`.
/// Cloning shares the domain.
pub struct Domain<S, I> {
    inner: Rc<DomainInner<S, I>>,
}

impl<S, I> Clone for Domain<S, I> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S, I> Domain<S, I>
where
    S: Serialize + DeserializeOwned + 'static,
    I: 'static,
{
    /// `factory` builds the handler interface when the domain is connected.
    pub fn new(init: S, factory: impl Fn(&DomainBase<S>) -> I + 'static) -> Self {
        Self {
            inner: Rc::new(DomainInner {
                init,
                factory: Box::new(factory),
                label: RefCell::new("unnamed".to_string()),
                interface: RefCell::new(None),
                handlers: RefCell::new(Vec::new()),
                named: Rc::new(NamedReducers::default()),
            }),
        }
    }

    /// Run `handler` for every dispatched action passing `test`.
    pub fn on<F, Fut>(self, test: impl Into<ActionTest>, handler: F) -> Self
    where
        F: Fn(Action, Rc<I>) -> Fut + 'static,
        Fut: Future<Output = anyhow::Result<()>> + 'static,
    {
        let boxed: Handler<I> = Rc::new(move |action: Action, interface: Rc<I>| {
            handler(action, interface).boxed_local()
        });
        self.inner.handlers.borrow_mut().push((test.into(), boxed));
        self
    }

    pub fn init_state(&self) -> &S {
        &self.inner.init
    }

    /// The handler interface, once connected.
    pub fn interface(&self) -> StoreResult<Rc<I>> {
        self.inner
            .interface
            .borrow()
            .clone()
            .ok_or_else(|| UsageError::NotConnected(self.inner.label.borrow().clone()).into())
    }

    pub fn is_connected(&self) -> bool {
        self.inner.named.is_connected()
    }
}

/// Type-erased view of a domain, as the store sees it.
trait ErasedDomain {
    fn init_value(&self) -> StoreResult<Value>;

    fn connect(&self, name: &str, store: &WeakStore, targeted_type: &TargetedTypeFn);

    fn reduce_named(
        &self,
        name: &str,
        reducer: &str,
        slice: Value,
        payload: Value,
    ) -> StoreResult<Value>;

    fn handle(&self, scheduler: &Scheduler, action: &Action, scope: &HandlerScope)
        -> StoreResult<()>;
}

impl<S, I> ErasedDomain for Domain<S, I>
where
    S: Serialize + DeserializeOwned + 'static,
    I: 'static,
{
    fn init_value(&self) -> StoreResult<Value> {
        Ok(serde_json::to_value(&self.inner.init)?)
    }

    fn connect(&self, name: &str, store: &WeakStore, targeted_type: &TargetedTypeFn) {
        *self.inner.label.borrow_mut() = name.to_string();
        let base = DomainBase::new(
            name.to_string(),
            store.clone(),
            self.inner.named.clone(),
            targeted_type.clone(),
        );

        let interface = (self.inner.factory)(&base);
        *self.inner.interface.borrow_mut() = Some(Rc::new(interface));
        self.inner.named.mark_connected();
        debug!(domain = name, reducers = self.inner.named.len(), "Domain connected");
    }

    fn reduce_named(
        &self,
        name: &str,
        reducer: &str,
        slice: Value,
        payload: Value,
    ) -> StoreResult<Value> {
        self.inner.named.reduce(name, reducer, slice, payload)
    }

    /// Start every matching handler in registration order. Handlers that
    /// suspend keep running on the scheduler; none waits for another.
    fn handle(
        &self,
        scheduler: &Scheduler,
        action: &Action,
        scope: &HandlerScope,
    ) -> StoreResult<()> {
        let interface = self.interface()?;
        let matching: Vec<Handler<I>> = self
            .inner
            .handlers
            .borrow()
            .iter()
            .filter(|(test, _)| test.matches(action))
            .map(|(_, handler)| handler.clone())
            .collect();

        for handler in matching {
            let run = scope
                .clone()
                .enter(handler(action.clone(), interface.clone()));
            scheduler
                .spawn_now("domain handler", run)
                .map_err(StoreError::from_proc)?;
        }
        Ok(())
    }
}

/// The domains of one store, by name.
#[derive(Clone, Default)]
pub struct DomainSet {
    domains: Vec<(String, Rc<dyn ErasedDomain>)>,
}

impl DomainSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `domain` under `name`, replacing any domain already there.
    pub fn with<S, I>(mut self, name: impl Into<String>, domain: Domain<S, I>) -> Self
    where
        S: Serialize + DeserializeOwned + 'static,
        I: 'static,
    {
        let name = name.into();
        self.domains.retain(|(existing, _)| *existing != name);
        self.domains.push((name, Rc::new(domain)));
        self
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.domains.iter().map(|(name, _)| name.as_str())
    }

    pub(crate) fn reducer<R>(&self, inner: R) -> DomainReducer<R> {
        DomainReducer {
            domains: self.clone(),
            inner,
        }
    }

    pub(crate) fn connect(&self, store: &WeakStore, targeted_type: TargetedTypeFn) {
        for (name, domain) in &self.domains {
            domain.connect(name, store, &targeted_type);
        }
    }

    pub(crate) fn handle(
        &self,
        scheduler: &Scheduler,
        action: &Action,
        scope: &HandlerScope,
    ) -> StoreResult<()> {
        for (_, domain) in &self.domains {
            domain.handle(scheduler, action, scope)?;
        }
        Ok(())
    }

    fn find(&self, name: &str) -> Option<&Rc<dyn ErasedDomain>> {
        self.domains
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, domain)| domain)
    }

    /// Give every domain without a slice its initial state.
    fn seed(&self, state: Value) -> StoreResult<Value> {
        let mut record = match state {
            Value::Object(record) => record,
            _ => Map::new(),
        };
        for (name, domain) in &self.domains {
            if !record.contains_key(name) {
                record.insert(name.clone(), domain.init_value()?);
            }
        }
        Ok(Value::Object(record))
    }

    fn route(&self, state: Value, targeted: &TargetedPayload) -> StoreResult<Value> {
        let domain = self
            .find(&targeted.domain)
            .ok_or_else(|| UsageError::UnknownDomain(targeted.domain.clone()))?;

        let mut record = match state {
            Value::Object(record) => record,
            _ => Map::new(),
        };
        let slice = record.remove(&targeted.domain).unwrap_or(Value::Null);
        let slice = domain.reduce_named(
            &targeted.domain,
            &targeted.reducer,
            slice,
            targeted.payload.clone(),
        )?;
        record.insert(targeted.domain.clone(), slice);
        Ok(Value::Object(record))
    }
}

/// Seeds domain slices and routes targeted dispatches, then runs the user
/// reducer over the result.
pub struct DomainReducer<R> {
    domains: DomainSet,
    inner: R,
}

impl<R: Reducer<Value>> Reducer<Value> for DomainReducer<R> {
    fn reduce(
        &self,
        state: Value,
        action: &Action,
        scope: ReduceScope,
    ) -> StoreResult<Continuation<Value>> {
        let state = self.domains.seed(state)?;
        let state = match action.targeted_payload() {
            Some(targeted) => self.domains.route(state, targeted)?,
            None => state,
        };
        self.inner.reduce(state, action, scope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ducks() -> DomainSet {
        DomainSet::new().with("ducks", Domain::new(0_i64, |_: &DomainBase<i64>| ()))
    }

    #[test]
    fn seed_fills_missing_slices_only() {
        let domains = ducks();
        assert_eq!(domains.seed(Value::Null).unwrap(), json!({ "ducks": 0 }));
        assert_eq!(
            domains.seed(json!({ "ducks": 4, "other": true })).unwrap(),
            json!({ "ducks": 4, "other": true })
        );
    }

    #[test]
    fn routing_to_unknown_domain_fails() {
        let targeted = TargetedPayload {
            domain: "geese".to_string(),
            reducer: "add".to_string(),
            payload: json!(1),
        };
        let err = ducks().route(json!({}), &targeted).unwrap_err();
        assert!(matches!(
            err,
            StoreError::Usage(UsageError::UnknownDomain(ref name)) if name == "geese"
        ));
    }

    #[test]
    fn later_domain_replaces_same_name() {
        let domains = ducks().with("ducks", Domain::new(7_i64, |_: &DomainBase<i64>| ()));
        assert_eq!(domains.names().collect::<Vec<_>>(), vec!["ducks"]);
        assert_eq!(domains.seed(json!({})).unwrap(), json!({ "ducks": 7 }));
    }

    #[test]
    fn interface_is_unavailable_before_connect() {
        let domain = Domain::new(0_i64, |_: &DomainBase<i64>| "iface");
        assert!(!domain.is_connected());
        assert!(matches!(
            domain.interface(),
            Err(StoreError::Usage(UsageError::NotConnected(_)))
        ));
    }
}
