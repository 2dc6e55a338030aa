//! Effects: impure calls a reducer declares but never performs.
//!
//! A reducer returns effects as data. The store runs them on a later tick,
//! after the dispatch that declared them has returned, in declaration order.

use std::fmt;
use std::rc::Rc;

use serde_json::Value;

use crate::action::Action;
use crate::error::{StoreResult, UsageError};

/// A plain function taking the effect's arguments.
pub type EffectFn = Rc<dyn Fn(&[Value]) -> anyhow::Result<()>>;

/// An object whose methods effects can call by name.
pub trait EffectTarget {
    fn has_method(&self, method: &str) -> bool;

    fn call_method(&self, method: &str, args: &[Value]) -> anyhow::Result<()>;
}

/// A declared call, executed only after the reduction settles.
#[derive(Clone)]
pub enum Effect {
    /// Call `func` with `args`.
    Call { func: EffectFn, args: Vec<Value> },

    /// Call the method named `method` on `owner`.
    Method {
        owner: Rc<dyn EffectTarget>,
        method: String,
        args: Vec<Value>,
    },

    /// Dispatch `action` through the dispatch of the action whose reduction
    /// declared this effect, so it inherits that action's causality.
    Dispatch(Action),
}

impl Effect {
    pub fn call(
        func: impl Fn(&[Value]) -> anyhow::Result<()> + 'static,
        args: Vec<Value>,
    ) -> Self {
        Effect::Call {
            func: Rc::new(func),
            args,
        }
    }

    /// Bind a method by name. The owner must expose it now; the lookup is not
    /// deferred to execution time.
    pub fn method(
        owner: Rc<dyn EffectTarget>,
        method: impl Into<String>,
        args: Vec<Value>,
    ) -> Result<Self, UsageError> {
        let method = method.into();
        if !owner.has_method(&method) {
            return Err(UsageError::UnknownMethod(method));
        }
        Ok(Effect::Method {
            owner,
            method,
            args,
        })
    }

    pub fn dispatch(action: Action) -> Self {
        Effect::Dispatch(action)
    }

    /// Short label for logs.
    pub fn label(&self) -> String {
        match self {
            Effect::Call { .. } => "call".to_string(),
            Effect::Method { method, .. } => format!("method:{method}"),
            Effect::Dispatch(action) => format!("dispatch:{}", action.action_type),
        }
    }

    /// Perform the call. `dispatch` is the scoped dispatch used by
    /// [`Effect::Dispatch`].
    pub fn run(self, dispatch: &dyn Fn(Action) -> StoreResult<Action>) -> anyhow::Result<()> {
        match self {
            Effect::Call { func, args } => func(&args),
            Effect::Method {
                owner,
                method,
                args,
            } => owner.call_method(&method, &args),
            Effect::Dispatch(action) => {
                dispatch(action)?;
                Ok(())
            }
        }
    }
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Effect::Call { args, .. } => f.debug_struct("Call").field("args", args).finish(),
            Effect::Method { method, args, .. } => f
                .debug_struct("Method")
                .field("method", method)
                .field("args", args)
                .finish(),
            Effect::Dispatch(action) => f.debug_tuple("Dispatch").field(action).finish(),
        }
    }
}
