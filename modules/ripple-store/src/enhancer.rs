//! The enhancer: wraps a base store's reducer, dispatch and subscribe.
//!
//! Dispatch → fingerprint → continuation loop → state stored → effects
//! scheduled → proc run with hooks → waiters resolved. Only dispatches made
//! from outside the store flush subscriber notifications before returning;
//! dispatches from procs and effects stay debounced.

use std::cell::RefCell;
use std::future::Future;
use std::rc::{Rc, Weak};

use futures::future::{FutureExt, LocalBoxFuture};
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::accessors::{StatePutter, StateReader};
use crate::action::{Action, ActionTest};
use crate::config::Config;
use crate::continuation::{ContinuationLoop, Reducer};
use crate::debounce::Debouncer;
use crate::domain::{DomainSet, TargetedTypeFn};
use crate::effect::Effect;
use crate::error::{StoreError, StoreResult};
use crate::fingerprint::{default_id_fn, Fingerprint, Fingerprinter, IdFn, Lineage};
use crate::matcher::{ActionMatcher, ActionWaiter};
use crate::put::{PutActionConfig, PutStateReducer};
use crate::scheduler::{next_tick, NextTick, Scheduler};
use crate::store::{BaseStore, Listener, RootReducer, StoreCreator, Subscription};

type ProcFn = Rc<dyn Fn(Action, Hooks) -> LocalBoxFuture<'static, anyhow::Result<()>>>;

tokio::task_local! {
    /// Store and cause of the proc, handler or effect currently running.
    static HANDLER_SCOPE: HandlerScope;
}

/// Dispatches made while a scope is entered count as made on behalf of the
/// scope's action: they inherit its lineage and stay debounced.
#[derive(Clone)]
pub(crate) struct HandlerScope {
    store: Weak<Shared>,
    lineage: Option<Lineage>,
}

impl HandlerScope {
    /// Enter the scope on every poll of `future`.
    pub(crate) fn enter<F: Future + 'static>(self, future: F) -> impl Future<Output = F::Output> {
        HANDLER_SCOPE.scope(self, future)
    }

    fn enter_sync<R>(self, f: impl FnOnce() -> R) -> R {
        HANDLER_SCOPE.sync_scope(self, f)
    }

    /// The entered scope, if it belongs to `store`.
    fn current(store: &Weak<Shared>) -> Option<Self> {
        HANDLER_SCOPE
            .try_with(HandlerScope::clone)
            .ok()
            .filter(|scope| scope.store.ptr_eq(store))
    }
}

/// Builds an [`EnhancedStore`] around a base store.
pub struct Enhancer {
    proc: Option<ProcFn>,
    config: Config,
    id_fn: IdFn,
    put_action: Option<PutActionConfig>,
    scheduler: Scheduler,
    domains: Option<DomainSet>,
    targeted_type: Option<TargetedTypeFn>,
}

impl Enhancer {
    /// `proc` runs after every dispatch that does not skip it. Whatever it
    /// does before its first suspension happens inside that dispatch call.
    pub fn new<F, Fut>(proc: F) -> Self
    where
        F: Fn(Action, Hooks) -> Fut + 'static,
        Fut: Future<Output = anyhow::Result<()>> + 'static,
    {
        Self {
            proc: Some(Rc::new(move |action: Action, hooks: Hooks| {
                proc(action, hooks).boxed_local()
            })),
            ..Self::without_proc()
        }
    }

    pub fn without_proc() -> Self {
        Self {
            proc: None,
            config: Config::default(),
            id_fn: default_id_fn(),
            put_action: None,
            scheduler: Scheduler::new(),
            domains: None,
            targeted_type: None,
        }
    }

    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn with_id_fn(mut self, id_fn: impl Fn(&Action) -> String + 'static) -> Self {
        self.id_fn = Rc::new(id_fn);
        self
    }

    /// Overrides `put_action_suffix` from the config.
    pub fn with_put_action(mut self, put_action: PutActionConfig) -> Self {
        self.put_action = Some(put_action);
        self
    }

    /// Share a scheduler with other stores or with the caller's event loop.
    pub fn with_scheduler(mut self, scheduler: Scheduler) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// Partition state into named domains. Their handlers run after the proc.
    pub fn with_domains(mut self, domains: DomainSet) -> Self {
        self.domains = Some(domains);
        self
    }

    /// Type of targeted-dispatch actions, from `(domain, reducer, payload)`.
    pub fn with_targeted_type(
        mut self,
        targeted_type: impl Fn(&str, &str, &Value) -> String + 'static,
    ) -> Self {
        self.targeted_type = Some(Rc::new(targeted_type));
        self
    }

    /// Create the base store through `creator` with `reducer` wrapped.
    pub fn enhance<C, R>(self, creator: C, reducer: R) -> StoreResult<EnhancedStore>
    where
        C: StoreCreator,
        R: Reducer<Value> + 'static,
    {
        let suffix = self.config.put_action_suffix.clone();
        let put_config = self
            .put_action
            .unwrap_or_else(|| PutActionConfig::with_suffix(suffix));

        let user_reducer: Box<dyn Reducer<Value>> = match &self.domains {
            Some(domains) => Box::new(domains.reducer(reducer)),
            None => Box::new(reducer),
        };
        let env = Rc::new(ReduceEnv {
            machine: ContinuationLoop::new(self.config.max_iterations),
            reducer: PutStateReducer::new(user_reducer, put_config.clone()),
            effects: EffectSink::default(),
        });

        let root_env = env.clone();
        let root: RootReducer =
            Box::new(move |state: Value, action: &Action| root_env.reduce(state, action));
        let base = creator.create_store(root)?;

        let shared = Rc::new(Shared {
            base: Box::new(base),
            fingerprinter: Fingerprinter::new(&self.config, self.id_fn),
            debouncer: Debouncer::new(self.scheduler.clone()),
            scheduler: self.scheduler,
            matcher: ActionMatcher::new(),
            put_config,
            proc: self.proc,
            domains: self.domains,
            disable_effects: self.config.disable_effects,
            env,
        });
        let store = EnhancedStore { shared };

        // Effects declared while the base store initialized
        let init_effects = store.shared.env.effects.take_loose();
        store.shared.schedule_effects(init_effects, None);

        if let Some(domains) = &store.shared.domains {
            let targeted_type = self.targeted_type.unwrap_or_else(default_targeted_type);
            domains.connect(&store.downgrade(), targeted_type);
        }

        Ok(store)
    }
}

fn default_targeted_type() -> TargetedTypeFn {
    Rc::new(|domain: &str, reducer: &str, _: &Value| format!("{domain}/{reducer}"))
}

// ---------------------------------------------------------------------------
// Reduction
// ---------------------------------------------------------------------------

/// Effects collected by the root reducer, one frame per enhanced dispatch.
/// Reductions the enhancer did not start land in the bottom frame.
struct EffectSink {
    frames: RefCell<Vec<Vec<Effect>>>,
}

impl Default for EffectSink {
    fn default() -> Self {
        Self {
            frames: RefCell::new(vec![Vec::new()]),
        }
    }
}

impl EffectSink {
    fn open(&self) {
        self.frames.borrow_mut().push(Vec::new());
    }

    fn close(&self) -> Vec<Effect> {
        let mut frames = self.frames.borrow_mut();
        if frames.len() > 1 {
            frames.pop().unwrap_or_default()
        } else {
            Vec::new()
        }
    }

    fn take_loose(&self) -> Vec<Effect> {
        self.frames
            .borrow_mut()
            .first_mut()
            .map(std::mem::take)
            .unwrap_or_default()
    }

    fn extend(&self, effects: Vec<Effect>) {
        if let Some(frame) = self.frames.borrow_mut().last_mut() {
            frame.extend(effects);
        }
    }
}

struct ReduceEnv {
    machine: ContinuationLoop,
    reducer: PutStateReducer<Box<dyn Reducer<Value>>>,
    effects: EffectSink,
}

impl ReduceEnv {
    fn reduce(&self, state: Value, action: &Action) -> StoreResult<Value> {
        let settled = self
            .machine
            .unwrap_all(&self.reducer, state, action.clone())?;
        self.effects.extend(settled.effects);
        Ok(settled.state)
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

struct Shared {
    base: Box<dyn BaseStore>,
    fingerprinter: Fingerprinter,
    scheduler: Scheduler,
    debouncer: Debouncer,
    matcher: ActionMatcher,
    put_config: PutActionConfig,
    proc: Option<ProcFn>,
    domains: Option<DomainSet>,
    disable_effects: bool,
    env: Rc<ReduceEnv>,
}

impl Shared {
    /// Dispatch without flushing notifications.
    fn dispatch(
        self: &Rc<Self>,
        action: Action,
        cause: Option<&Lineage>,
        skip_proc: bool,
    ) -> StoreResult<Action> {
        let action = match cause {
            Some(cause) => self.fingerprinter.stamp_causality(action, cause),
            None => action,
        };
        let (action, lineage) = self.fingerprinter.stamp(action);
        debug!(action_type = %action.action_type, skip_proc, "Dispatching");

        self.env.effects.open();
        let reduced = self.base.dispatch(action.clone());
        let effects = self.env.effects.close();
        reduced?;
        self.schedule_effects(effects, lineage.clone());

        if !skip_proc {
            self.run_proc(&action, lineage)?;
            self.matcher.dispatch(&action);
        }

        Ok(action)
    }

    fn run_proc(self: &Rc<Self>, action: &Action, lineage: Option<Lineage>) -> StoreResult<()> {
        let scope = HandlerScope {
            store: Rc::downgrade(self),
            lineage: lineage.clone(),
        };
        if let Some(proc) = &self.proc {
            let hooks = Hooks {
                store: Rc::downgrade(self),
                action: action.clone(),
                lineage,
            };
            let run = scope.clone().enter(proc(action.clone(), hooks));
            self.scheduler
                .spawn_now("proc", run)
                .map_err(StoreError::from_proc)?;
        }
        if let Some(domains) = &self.domains {
            domains.handle(&self.scheduler, action, &scope)?;
        }
        Ok(())
    }

    /// Run `effects` in order on the next tick, dispatching on behalf of the
    /// action that declared them.
    fn schedule_effects(self: &Rc<Self>, effects: Vec<Effect>, lineage: Option<Lineage>) {
        if effects.is_empty() {
            return;
        }
        if self.disable_effects {
            warn!(count = effects.len(), "Effects disabled; dropping");
            return;
        }

        let store = Rc::downgrade(self);
        self.scheduler.defer(move || {
            let scope = HandlerScope {
                store: store.clone(),
                lineage: lineage.clone(),
            };
            let dispatch = |action: Action| match store.upgrade() {
                Some(shared) => shared.dispatch(action, lineage.as_ref(), false),
                None => Err(StoreError::Closed),
            };
            scope.enter_sync(|| {
                for effect in effects {
                    let label = effect.label();
                    if let Err(err) = effect.run(&dispatch) {
                        error!(effect = %label, error = %err, "Effect failed");
                    }
                }
            });
        });
    }

    fn get_state(&self) -> Value {
        self.base.get_state()
    }
}

/// Hooks handed to the proc for one dispatched action.
///
/// Hooks stay usable after the dispatch that created them returns. Once the
/// store is dropped, reads return `None` and writes fail with
/// [`StoreError::Closed`].
#[derive(Clone)]
pub struct Hooks {
    store: Weak<Shared>,
    action: Action,
    lineage: Option<Lineage>,
}

impl Hooks {
    /// The action the proc is responding to, fingerprint included.
    pub fn action(&self) -> &Action {
        &self.action
    }

    pub fn state(&self) -> Option<Value> {
        self.reader().whole()
    }

    pub fn get_state<K: AsRef<str>>(&self, path: &[K]) -> Option<Value> {
        self.reader().get(path)
    }

    /// Replace the value at `path` with `update(current)`. The put action
    /// skips the proc layer.
    pub fn put_state<K: AsRef<str>>(
        &self,
        path: &[K],
        update: impl FnOnce(Value) -> Value,
    ) -> StoreResult<Action> {
        self.putter()?.put(path, update)
    }

    /// Dispatch as a consequence of the current action.
    pub fn dispatch(&self, action: Action) -> StoreResult<Action> {
        self.upgrade()?
            .dispatch(action, self.lineage.as_ref(), false)
    }

    pub fn dispatch_skip_proc(&self, action: Action) -> StoreResult<Action> {
        self.upgrade()?
            .dispatch(action, self.lineage.as_ref(), true)
    }

    /// Wait for the next action passing `test`.
    pub fn on_next(&self, test: impl Into<ActionTest>) -> ActionWaiter {
        match self.store.upgrade() {
            Some(shared) => shared.matcher.register(test),
            // Resolves to `StoreError::Closed`
            None => ActionMatcher::new().register(test),
        }
    }

    pub fn next_tick(&self) -> NextTick {
        next_tick()
    }

    pub fn fingerprint(&self) -> Option<Fingerprint> {
        let shared = self.store.upgrade()?;
        shared.fingerprinter.read(&self.action)
    }

    pub fn reader(&self) -> StateReader {
        let store = self.store.clone();
        StateReader::new(move || store.upgrade().map(|shared| shared.get_state()))
    }

    pub fn putter(&self) -> StoreResult<StatePutter> {
        let shared = self.upgrade()?;
        let store = self.store.clone();
        let lineage = self.lineage.clone();
        Ok(StatePutter::new(
            self.action.clone(),
            shared.put_config.clone(),
            self.reader(),
            move |action| match store.upgrade() {
                Some(shared) => shared.dispatch(action, lineage.as_ref(), true),
                None => Err(StoreError::Closed),
            },
        ))
    }

    fn upgrade(&self) -> StoreResult<Rc<Shared>> {
        self.store.upgrade().ok_or(StoreError::Closed)
    }
}

// ---------------------------------------------------------------------------
// Store handles
// ---------------------------------------------------------------------------

/// A base store with the enhancer applied. Cloning shares the store.
#[derive(Clone)]
pub struct EnhancedStore {
    shared: Rc<Shared>,
}

impl EnhancedStore {
    /// Dispatch from outside the store. Subscribers have been notified by the
    /// time this returns.
    pub fn dispatch(&self, action: Action) -> StoreResult<Action> {
        let action = self.shared.dispatch(action, None, false)?;
        self.shared.debouncer.flush();
        Ok(action)
    }

    /// Dispatch without running the proc or resolving waiters.
    pub fn dispatch_skip_proc(&self, action: Action) -> StoreResult<Action> {
        let action = self.shared.dispatch(action, None, true)?;
        self.shared.debouncer.flush();
        Ok(action)
    }

    pub fn get_state(&self) -> Value {
        self.shared.get_state()
    }

    /// Register a listener, called at most once per tick.
    pub fn subscribe(&self, listener: impl Fn() + 'static) -> Subscription {
        let trigger = self.shared.debouncer.debounce(listener);
        let fire = trigger.clone();
        let base: Listener = Rc::new(move || fire.trigger());
        let subscription = self.shared.base.subscribe(base);
        Subscription::new(move || {
            trigger.cancel();
            subscription.unsubscribe();
        })
    }

    pub fn on_next(&self, test: impl Into<ActionTest>) -> ActionWaiter {
        self.shared.matcher.register(test)
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.shared.scheduler
    }

    /// Fingerprint fields of `action`, as configured for this store.
    pub fn fingerprint(&self, action: &Action) -> Option<Fingerprint> {
        self.shared.fingerprinter.read(action)
    }

    pub fn downgrade(&self) -> WeakStore {
        WeakStore {
            shared: Rc::downgrade(&self.shared),
        }
    }
}

/// Non-owning store handle, for code the store itself keeps alive.
#[derive(Clone)]
pub struct WeakStore {
    shared: Weak<Shared>,
}

impl WeakStore {
    pub fn upgrade(&self) -> Option<EnhancedStore> {
        self.shared.upgrade().map(|shared| EnhancedStore { shared })
    }

    /// Same as [`EnhancedStore::dispatch`].
    pub fn dispatch(&self, action: Action) -> StoreResult<Action> {
        self.upgrade().ok_or(StoreError::Closed)?.dispatch(action)
    }

    pub fn dispatch_skip_proc(&self, action: Action) -> StoreResult<Action> {
        self.upgrade()
            .ok_or(StoreError::Closed)?
            .dispatch_skip_proc(action)
    }

    pub fn get_state(&self) -> Option<Value> {
        self.upgrade().map(|store| store.get_state())
    }

    /// Dispatch from code that may be running inside this store's procs,
    /// handlers or effects. There the dispatch inherits the running action's
    /// lineage and notifications stay debounced; anywhere else it behaves
    /// like [`dispatch`](Self::dispatch).
    pub(crate) fn dispatch_in_scope(&self, action: Action, skip_proc: bool) -> StoreResult<Action> {
        match HandlerScope::current(&self.shared) {
            Some(scope) => {
                let shared = self.shared.upgrade().ok_or(StoreError::Closed)?;
                shared.dispatch(action, scope.lineage.as_ref(), skip_proc)
            }
            None if skip_proc => self.dispatch_skip_proc(action),
            None => self.dispatch(action),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::continuation::{looping, plain, Continuation};
    use crate::store::MemoryStoreCreator;
    use serde_json::json;
    use std::cell::Cell;

    fn counter() -> impl Reducer<Value> {
        plain(|state: Value, action: &Action| {
            let mut state = if state.is_object() { state } else { json!({}) };
            if let Some(key) = action.action_type.strip_prefix("INCR_") {
                let n = state[key].as_i64().unwrap_or(0);
                state[key] = json!(n + 1);
            }
            state
        })
    }

    #[test]
    fn dispatch_stamps_and_stores() {
        let store = Enhancer::without_proc()
            .with_id_fn(|action| format!("{}#1", action.action_type))
            .enhance(MemoryStoreCreator::new(), counter())
            .unwrap();

        let action = store.dispatch(Action::new("INCR_a")).unwrap();
        assert_eq!(action.field("__id"), Some(&json!("INCR_a#1")));
        assert_eq!(store.get_state(), json!({ "a": 1 }));
    }

    #[test]
    fn external_dispatch_notifies_before_returning() {
        let store = Enhancer::without_proc()
            .enhance(MemoryStoreCreator::new(), counter())
            .unwrap();
        let calls = Rc::new(Cell::new(0));
        let hits = calls.clone();
        store.subscribe(move || hits.set(hits.get() + 1));

        store.dispatch(Action::new("INCR_a")).unwrap();
        assert_eq!(calls.get(), 1);
        store.scheduler().run_until_idle();
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn unsubscribed_listener_is_not_called() {
        let store = Enhancer::without_proc()
            .enhance(MemoryStoreCreator::new(), counter())
            .unwrap();
        let calls = Rc::new(Cell::new(0));
        let hits = calls.clone();
        let subscription = store.subscribe(move || hits.set(hits.get() + 1));

        subscription.unsubscribe();
        store.dispatch(Action::new("INCR_a")).unwrap();
        store.scheduler().run_until_idle();
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn subscriber_churn_does_not_accumulate() {
        let store = Enhancer::without_proc()
            .enhance(MemoryStoreCreator::new(), counter())
            .unwrap();
        for _ in 0..10 {
            store.subscribe(|| {}).unsubscribe();
        }
        let calls = Rc::new(Cell::new(0));
        let hits = calls.clone();
        store.subscribe(move || hits.set(hits.get() + 1));

        store.dispatch(Action::new("INCR_a")).unwrap();
        assert_eq!(calls.get(), 1);
        assert_eq!(store.shared.debouncer.registered(), 1);
    }

    #[test]
    fn proc_sees_reduced_state() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let log = seen.clone();
        let store = Enhancer::new(move |action, hooks| {
            log.borrow_mut()
                .push((action.action_type.clone(), hooks.get_state(&["a"])));
            async { anyhow::Ok(()) }
        })
        .enhance(MemoryStoreCreator::new(), counter())
        .unwrap();

        store.dispatch(Action::new("INCR_a")).unwrap();
        assert_eq!(
            *seen.borrow(),
            vec![("INCR_a".to_string(), Some(json!(1)))]
        );
    }

    #[test]
    fn synchronous_proc_failure_fails_dispatch() {
        let store = Enhancer::new(|action, _| async move {
            anyhow::ensure!(action.action_type != "BOOM", "proc refused");
            Ok(())
        })
        .enhance(MemoryStoreCreator::new(), counter())
        .unwrap();

        let err = store.dispatch(Action::new("BOOM")).unwrap_err();
        assert!(matches!(err, StoreError::Proc(_)));
        assert!(store.dispatch(Action::new("INCR_a")).is_ok());
    }

    #[test]
    fn runaway_aborts_dispatch_and_keeps_state() {
        let store = Enhancer::without_proc()
            .with_config(Config {
                max_iterations: 3,
                ..Config::default()
            })
            .enhance(
                MemoryStoreCreator::new(),
                looping(|state: Value, action: &Action| {
                    if action.action_type == "LOOP" {
                        Continuation::new(json!("looping")).with_action(action.clone())
                    } else {
                        Continuation::new(state)
                    }
                }),
            )
            .unwrap();

        let err = store.dispatch(Action::new("LOOP")).unwrap_err();
        assert!(err.to_string().contains("exceed 3 iterations"));
        assert_eq!(store.get_state(), Value::Null);
    }

    #[test]
    fn hooks_outliving_store_report_closed() {
        let kept = Rc::new(RefCell::new(None));
        let slot = kept.clone();
        let store = Enhancer::new(move |_, hooks| {
            *slot.borrow_mut() = Some(hooks);
            async { anyhow::Ok(()) }
        })
        .enhance(MemoryStoreCreator::new(), counter())
        .unwrap();

        store.dispatch(Action::new("ANY")).unwrap();
        drop(store);

        let hooks = kept.borrow_mut().take().unwrap();
        assert_eq!(hooks.state(), None);
        assert!(matches!(
            hooks.dispatch(Action::new("LATE")),
            Err(StoreError::Closed)
        ));
    }
}
