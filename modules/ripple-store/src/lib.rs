//! Store enhancer for reducer/action state containers.
//!
//! Wraps a base store so that:
//! - reducers can answer with follow-on actions and deferred effects
//!   ([`Continuation`]), folded into one update per dispatch;
//! - every dispatched action is fingerprinted with its id, parent and origin;
//! - an async proc runs after each dispatch with [`Hooks`] for reading and
//!   writing state by path, dispatching, and awaiting later actions;
//! - subscriber notifications are debounced to once per tick;
//! - state can be split into [`Domain`]s with named reducers reachable by
//!   targeted dispatch.
//!
//! Everything runs on one thread, driven by a cooperative [`Scheduler`].

pub mod accessors;
pub mod action;
pub mod config;
pub mod continuation;
pub mod debounce;
pub mod domain;
pub mod effect;
pub mod enhancer;
pub mod error;
pub mod fingerprint;
pub mod matcher;
pub mod path;
pub mod put;
pub mod scheduler;
pub mod store;

pub use accessors::{StatePutter, StateReader};
pub use action::{Action, ActionKind, ActionTest, PutPayload, TargetedPayload, INIT_ACTION};
pub use config::{load_config, Config};
pub use continuation::{
    fallible, looping, plain, with_instance, wrap, Continuation, ContinuationLoop,
    ContinuationReducer, ReduceScope, Reducer,
};
pub use debounce::Debouncer;
pub use domain::{Domain, DomainBase, DomainSet, TargetedDispatch};
pub use effect::{Effect, EffectTarget};
pub use enhancer::{EnhancedStore, Enhancer, Hooks, WeakStore};
pub use error::{StoreError, StoreResult, UsageError};
pub use fingerprint::{Fingerprint, Fingerprinter};
pub use matcher::{ActionMatcher, ActionWaiter};
pub use put::PutActionConfig;
pub use scheduler::{next_tick, Scheduler};
pub use store::{BaseStore, MemoryStore, MemoryStoreCreator, StoreCreator, Subscription};
