//! Continuation reductions.
//!
//! A reducer may answer an action with more than a new state: follow-on
//! actions, folded into the same update before anyone is notified, and
//! effects, run after the update settles. [`ContinuationLoop`] re-feeds
//! declared actions batch by batch until none remain.

use std::cell::{Cell, RefCell};
use std::marker::PhantomData;
use std::rc::Rc;

use tracing::trace;

use crate::action::Action;
use crate::effect::Effect;
use crate::error::{StoreError, StoreResult};

/// What one reduction produced.
#[derive(Debug, Clone)]
pub struct Continuation<S> {
    pub state: S,
    pub actions: Vec<Action>,
    pub effects: Vec<Effect>,
}

impl<S> Continuation<S> {
    pub fn new(state: S) -> Self {
        Self {
            state,
            actions: Vec::new(),
            effects: Vec::new(),
        }
    }

    pub fn with_action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    pub fn with_actions(mut self, actions: impl IntoIterator<Item = Action>) -> Self {
        self.actions.extend(actions);
        self
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    pub fn with_effects(mut self, effects: impl IntoIterator<Item = Effect>) -> Self {
        self.effects.extend(effects);
        self
    }

    pub fn map_state<T>(self, f: impl FnOnce(S) -> T) -> Continuation<T> {
        Continuation {
            state: f(self.state),
            actions: self.actions,
            effects: self.effects,
        }
    }
}

/// Identifies the top-level reduction a reducer call belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReduceScope {
    pub iteration: u64,
}

/// Normalized reducer. Use [`plain`], [`looping`], [`fallible`] or [`wrap`]
/// to adapt user functions.
pub trait Reducer<S> {
    fn reduce(&self, state: S, action: &Action, scope: ReduceScope)
        -> StoreResult<Continuation<S>>;
}

impl<S, R: Reducer<S> + ?Sized> Reducer<S> for Box<R> {
    fn reduce(
        &self,
        state: S,
        action: &Action,
        scope: ReduceScope,
    ) -> StoreResult<Continuation<S>> {
        (**self).reduce(state, action, scope)
    }
}

impl<S, R: Reducer<S> + ?Sized> Reducer<S> for Rc<R> {
    fn reduce(
        &self,
        state: S,
        action: &Action,
        scope: ReduceScope,
    ) -> StoreResult<Continuation<S>> {
        (**self).reduce(state, action, scope)
    }
}

// ---------------------------------------------------------------------------
// Adapters
// ---------------------------------------------------------------------------

/// A `(state, action) -> state` reducer.
pub struct Plain<F>(F);

pub fn plain<S, F>(reducer: F) -> Plain<F>
where
    F: Fn(S, &Action) -> S,
{
    Plain(reducer)
}

impl<S, F> Reducer<S> for Plain<F>
where
    F: Fn(S, &Action) -> S,
{
    fn reduce(&self, state: S, action: &Action, _: ReduceScope) -> StoreResult<Continuation<S>> {
        Ok(Continuation::new((self.0)(state, action)))
    }
}

/// A `(state, action) -> continuation` reducer.
pub struct Looping<F>(F);

pub fn looping<S, F>(reducer: F) -> Looping<F>
where
    F: Fn(S, &Action) -> Continuation<S>,
{
    Looping(reducer)
}

impl<S, F> Reducer<S> for Looping<F>
where
    F: Fn(S, &Action) -> Continuation<S>,
{
    fn reduce(&self, state: S, action: &Action, _: ReduceScope) -> StoreResult<Continuation<S>> {
        Ok((self.0)(state, action))
    }
}

/// A continuation reducer that can fail. Failures abort the dispatch.
pub struct Fallible<F>(F);

pub fn fallible<S, F>(reducer: F) -> Fallible<F>
where
    F: Fn(S, &Action) -> anyhow::Result<Continuation<S>>,
{
    Fallible(reducer)
}

impl<S, F> Reducer<S> for Fallible<F>
where
    F: Fn(S, &Action) -> anyhow::Result<Continuation<S>>,
{
    fn reduce(&self, state: S, action: &Action, _: ReduceScope) -> StoreResult<Continuation<S>> {
        (self.0)(state, action).map_err(StoreError::Reducer)
    }
}

/// A continuation reducer with private instance state.
///
/// The instance persists across every call made while settling one
/// top-level dispatch and starts from `Default` on the next one.
pub trait ContinuationReducer<S> {
    type Instance: Default;

    fn reduce(&self, state: S, action: &Action, instance: &mut Self::Instance)
        -> Continuation<S>;
}

/// Closure form of [`ContinuationReducer`].
pub struct WithInstance<F, S, I> {
    reducer: F,
    _types: PhantomData<fn(S) -> I>,
}

pub fn with_instance<S, I, F>(reducer: F) -> WithInstance<F, S, I>
where
    I: Default,
    F: Fn(S, &Action, &mut I) -> Continuation<S>,
{
    WithInstance {
        reducer,
        _types: PhantomData,
    }
}

impl<S, I, F> ContinuationReducer<S> for WithInstance<F, S, I>
where
    I: Default,
    F: Fn(S, &Action, &mut I) -> Continuation<S>,
{
    type Instance = I;

    fn reduce(&self, state: S, action: &Action, instance: &mut I) -> Continuation<S> {
        (self.reducer)(state, action, instance)
    }
}

struct InstanceSlot<I> {
    iteration: Option<u64>,
    instance: I,
}

/// Normalized form of a [`ContinuationReducer`].
pub struct Wrapped<R, I> {
    reducer: R,
    slot: RefCell<InstanceSlot<I>>,
}

pub fn wrap<S, R>(reducer: R) -> Wrapped<R, R::Instance>
where
    R: ContinuationReducer<S>,
{
    Wrapped {
        reducer,
        slot: RefCell::new(InstanceSlot {
            iteration: None,
            instance: R::Instance::default(),
        }),
    }
}

impl<S, R, I> Reducer<S> for Wrapped<R, I>
where
    R: ContinuationReducer<S, Instance = I>,
    I: Default,
{
    fn reduce(
        &self,
        state: S,
        action: &Action,
        scope: ReduceScope,
    ) -> StoreResult<Continuation<S>> {
        let mut instance = {
            let mut slot = self.slot.borrow_mut();
            if slot.iteration != Some(scope.iteration) {
                slot.iteration = Some(scope.iteration);
                slot.instance = I::default();
            }
            std::mem::take(&mut slot.instance)
        };

        let continuation = self.reducer.reduce(state, action, &mut instance);
        self.slot.borrow_mut().instance = instance;
        Ok(continuation)
    }
}

// ---------------------------------------------------------------------------
// The loop
// ---------------------------------------------------------------------------

/// Final state and every effect declared while settling one dispatch.
#[derive(Debug)]
pub struct Settled<S> {
    pub state: S,
    pub effects: Vec<Effect>,
    pub batches: usize,
}

/// Owns the iteration counter shared by every reduction it starts.
#[derive(Debug)]
pub struct ContinuationLoop {
    iteration: Cell<u64>,
    max_iterations: usize,
}

impl ContinuationLoop {
    pub fn new(max_iterations: usize) -> Self {
        Self {
            iteration: Cell::new(0),
            max_iterations,
        }
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    /// Start a new top-level reduction seeded with `action`.
    pub fn begin(&self, action: Action) -> DispatchContext {
        DispatchContext {
            scope: self.next_scope(),
            queue: vec![action],
            effects: Vec::new(),
            max_iterations: self.max_iterations,
        }
    }

    /// Reduce `action` and everything it declares, transitively.
    pub fn unwrap_all<S, R>(
        &self,
        reducer: &R,
        state: S,
        action: Action,
    ) -> StoreResult<Settled<S>>
    where
        R: Reducer<S> + ?Sized,
    {
        self.begin(action).settle(reducer, state)
    }

    /// Reduce `action` once. Declared actions are returned, not re-fed.
    pub fn unwrap<S, R>(
        &self,
        reducer: &R,
        state: S,
        action: &Action,
    ) -> StoreResult<Continuation<S>>
    where
        R: Reducer<S> + ?Sized,
    {
        reducer.reduce(state, action, self.next_scope())
    }

    fn next_scope(&self) -> ReduceScope {
        let iteration = self.iteration.get() + 1;
        self.iteration.set(iteration);
        ReduceScope { iteration }
    }
}

/// Coordination state for one top-level reduction: pending actions and
/// accumulated effects. Created per reduction, consumed by [`settle`].
///
/// [`settle`]: DispatchContext::settle
#[derive(Debug)]
pub struct DispatchContext {
    scope: ReduceScope,
    queue: Vec<Action>,
    effects: Vec<Effect>,
    max_iterations: usize,
}

impl DispatchContext {
    pub fn scope(&self) -> ReduceScope {
        self.scope
    }

    /// Reduce batch after batch until no action is pending. Each action sees
    /// the state left by the one before it in its batch.
    pub fn settle<S, R>(mut self, reducer: &R, mut state: S) -> StoreResult<Settled<S>>
    where
        R: Reducer<S> + ?Sized,
    {
        let mut batches = 0;

        while !self.queue.is_empty() {
            batches += 1;
            if batches > self.max_iterations {
                return Err(StoreError::Runaway {
                    max_iterations: self.max_iterations,
                });
            }

            let batch = std::mem::take(&mut self.queue);
            trace!(
                iteration = self.scope.iteration,
                batch = batches,
                actions = batch.len(),
                "Reducing continuation batch"
            );

            for action in &batch {
                let Continuation {
                    state: next,
                    actions,
                    effects,
                } = reducer.reduce(state, action, self.scope)?;
                state = next;
                self.queue.extend(actions);
                self.effects.extend(effects);
            }
        }

        Ok(Settled {
            state,
            effects: self.effects,
            batches,
        })
    }
}
